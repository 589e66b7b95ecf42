//! Node identifiers — 32-bit radio addresses and their display forms.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// The broadcast address, displayed as `^all`.
pub const BROADCAST_ADDR: u32 = 0xffff_ffff;

/// A radio node address. Wire form is little-endian fixed 32 bits;
/// display form is `^all` for broadcast or `!` + eight lowercase hex
/// digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const BROADCAST: NodeId = NodeId(BROADCAST_ADDR);

    pub fn is_broadcast(self) -> bool {
        self.0 == BROADCAST_ADDR
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            write!(f, "^all")
        } else {
            write!(f, "!{:08x}", self.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeIdError {
    #[error("empty node id")]
    Empty,

    #[error("invalid node id {0:?}")]
    Invalid(String),
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    /// Accepts `^all`, `!xxxxxxxx`, `0x`-prefixed hex, and unsigned
    /// decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(NodeIdError::Empty);
        }
        if s == "^all" {
            return Ok(NodeId::BROADCAST);
        }
        let parsed = if let Some(hex) = s.strip_prefix('!') {
            (1..=8).contains(&hex.len()).then_some(hex).and_then(|h| u32::from_str_radix(h, 16).ok())
        } else if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16).ok()
        } else {
            s.parse::<u32>().ok()
        };
        parsed
            .map(NodeId)
            .ok_or_else(|| NodeIdError::Invalid(s.to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_displays_as_all() {
        assert_eq!(NodeId::BROADCAST.to_string(), "^all");
        assert_eq!(NodeId(0xffff_ffff).to_string(), "^all");
    }

    #[test]
    fn display_is_bang_plus_eight_lowercase_hex() {
        assert_eq!(NodeId(0xd844_b556).to_string(), "!d844b556");
        assert_eq!(NodeId(1).to_string(), "!00000001");
        assert_eq!(NodeId(0).to_string(), "!00000000");
    }

    #[test]
    fn parse_accepts_every_documented_form() {
        assert_eq!("^all".parse::<NodeId>().unwrap(), NodeId::BROADCAST);
        assert_eq!("!d844b556".parse::<NodeId>().unwrap(), NodeId(0xd844_b556));
        assert_eq!("0xd844b556".parse::<NodeId>().unwrap(), NodeId(0xd844_b556));
        assert_eq!("3628381526".parse::<NodeId>().unwrap(), NodeId(0xd844_b556));
        assert_eq!("0".parse::<NodeId>().unwrap(), NodeId(0));
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "!", "!xyz12345", "!123456789", "node", "-1", "0x1_0000_0000"] {
            assert!(bad.parse::<NodeId>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn display_then_parse_is_identity() {
        for value in [0u32, 1, 0xd844_b556, 0xffff_fffe, BROADCAST_ADDR] {
            let shown = NodeId(value).to_string();
            assert_eq!(shown.parse::<NodeId>().unwrap(), NodeId(value));
        }
    }

    #[test]
    fn parse_then_display_is_identity_on_display_forms() {
        for form in ["^all", "!00000000", "!d844b556", "!0000ffff"] {
            let parsed = form.parse::<NodeId>().unwrap();
            assert_eq!(parsed.to_string(), form);
        }
    }
}
