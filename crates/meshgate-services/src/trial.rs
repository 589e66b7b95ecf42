//! Decryption trial engine.
//!
//! An encrypted packet names its channel only indirectly, and the key
//! for that channel may or may not be the one we know. The engine
//! builds a ranked candidate list, prunes it by the packet's advisory
//! channel hint when the hint discriminates, and tries each candidate
//! until the cipher output parses as a clean `Data`. A pure function —
//! the bridge supplies snapshots, nothing here touches shared state.

use meshgate_core::crypto;
use meshgate_core::mesh::{decode_data, MeshPacket};
use meshgate_core::ports::{decode_port_payload, PortPayload, PORT_TEXT_MESSAGE, PORT_UNKNOWN};

/// Plaintext fallback accepts port numbers in (0, this].
const MAX_PLAUSIBLE_PORT: u32 = 511;

// ── Types ─────────────────────────────────────────────────────────────────────

/// One (channel, key) pair to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub channel: String,
    /// Base64 PSK.
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptStatus {
    /// A candidate key produced a clean `Data`.
    Success,
    /// The "encrypted" bytes were plaintext `Data` all along.
    Plaintext,
    /// Nothing worked.
    Failed,
}

impl DecryptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DecryptStatus::Success => "success",
            DecryptStatus::Plaintext => "plaintext",
            DecryptStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialOutcome {
    pub status: DecryptStatus,
    /// [`PORT_UNKNOWN`] when the trial failed.
    pub portnum: u32,
    pub payload: Vec<u8>,
    /// Set iff the portnum is TEXT_MESSAGE.
    pub text: Option<String>,
    pub decoded: Option<PortPayload>,
    /// The candidate that won, for success outcomes.
    pub matched: Option<Candidate>,
}

impl TrialOutcome {
    fn failed() -> Self {
        Self {
            status: DecryptStatus::Failed,
            portnum: PORT_UNKNOWN,
            payload: Vec::new(),
            text: None,
            decoded: None,
            matched: None,
        }
    }

    fn with_match(mut self, candidate: Candidate) -> Self {
        self.matched = Some(candidate);
        self
    }
}

// ── Candidate construction ────────────────────────────────────────────────────

/// Build the ranked candidate list for a packet heard on `channel_id`:
///
///   1. the learned key for that channel, if any;
///   2. the default key paired with that channel;
///   3. every cached (channel, key) pair;
///   4. the default (channel, key) pair as a safety net.
///
/// De-duplicated by pair, order preserved.
pub fn build_candidates(
    channel_id: &str,
    cache: &[(String, String)],
    default_channel: &str,
    default_key: &str,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut push = |channel: &str, key: &str| {
        let candidate = Candidate {
            channel: channel.to_string(),
            key: key.to_string(),
        };
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    };

    if !channel_id.is_empty() {
        if let Some((_, key)) = cache.iter().find(|(c, _)| c == channel_id) {
            push(channel_id, key);
        }
        push(channel_id, default_key);
    }
    for (channel, key) in cache {
        push(channel, key);
    }
    push(default_channel, default_key);
    candidates
}

/// When the packet's hint is non-zero and at least one candidate hashes
/// to it, keep only the matching candidates. A hint nothing matches is
/// ignored — it prunes, it never vetoes.
pub fn filter_by_hint(candidates: Vec<Candidate>, hint: u32) -> Vec<Candidate> {
    if hint == 0 {
        return candidates;
    }
    let matching: Vec<Candidate> = candidates
        .iter()
        .filter(|c| crypto::channel_hash(&c.channel, &c.key).ok() == Some(hint))
        .cloned()
        .collect();
    if matching.is_empty() {
        candidates
    } else {
        matching
    }
}

// ── Trials ────────────────────────────────────────────────────────────────────

/// Try the candidates in order against a packet's encrypted bytes.
pub fn run_trials(packet: &MeshPacket, candidates: &[Candidate]) -> TrialOutcome {
    let encrypted = match packet.encrypted() {
        Some(bytes) => bytes,
        None => return TrialOutcome::failed(),
    };

    for candidate in candidates {
        let plaintext = match crypto::decrypt(encrypted, &candidate.key, packet.id, packet.from) {
            Ok(bytes) => bytes,
            // Unusable candidate (no key, bad base64) — keep trying
            Err(_) => continue,
        };
        if let Ok(data) = decode_data(&plaintext) {
            return outcome(DecryptStatus::Success, data.portnum, data.payload)
                .with_match(candidate.clone());
        }
    }

    // Some gateways ship plaintext in the encrypted field
    if let Ok(data) = decode_data(encrypted) {
        if data.portnum > 0 && data.portnum <= MAX_PLAUSIBLE_PORT && !data.payload.is_empty() {
            return outcome(DecryptStatus::Plaintext, data.portnum, data.payload);
        }
    }

    TrialOutcome::failed()
}

/// Candidate construction, hint filtering, and trials in one call.
pub fn decrypt_packet(
    packet: &MeshPacket,
    channel_id: &str,
    cache: &[(String, String)],
    default_channel: &str,
    default_key: &str,
) -> TrialOutcome {
    let candidates = build_candidates(channel_id, cache, default_channel, default_key);
    let candidates = filter_by_hint(candidates, packet.channel_hint);
    run_trials(packet, &candidates)
}

fn outcome(status: DecryptStatus, portnum: u32, payload: Vec<u8>) -> TrialOutcome {
    let text = (portnum == PORT_TEXT_MESSAGE)
        .then(|| String::from_utf8_lossy(&payload).into_owned());
    let decoded = decode_port_payload(portnum, &payload);
    TrialOutcome {
        status,
        portnum,
        payload,
        text,
        decoded,
        matched: None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
