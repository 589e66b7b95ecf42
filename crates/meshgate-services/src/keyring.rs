//! Learned-key cache — channel name → most recently observed PSK.
//!
//! Seeded from configuration at startup, grown by outbound publishes
//! and subscribe commands that name a key. The decryption trial engine
//! reads snapshots; it never writes.

use dashmap::DashMap;

#[derive(Default)]
pub struct KeyRing {
    keys: DashMap<String, String>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache from configuration. Existing entries are replaced.
    pub fn seed<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (channel, key) in entries {
            self.keys.insert(channel, key);
        }
    }

    /// Record the key most recently used for a channel.
    pub fn learn(&self, channel: &str, key: &str) {
        tracing::debug!(channel, "learned channel key");
        self.keys.insert(channel.to_string(), key.to_string());
    }

    pub fn get(&self, channel: &str) -> Option<String> {
        self.keys.get(channel).map(|entry| entry.value().clone())
    }

    /// Every (channel, key) pair, sorted by channel name so candidate
    /// construction is deterministic.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .keys
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        pairs.sort();
        pairs
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learn_then_get() {
        let ring = KeyRing::new();
        assert_eq!(ring.get("LongFast"), None);
        ring.learn("LongFast", "AQ==");
        assert_eq!(ring.get("LongFast"), Some("AQ==".to_string()));
    }

    #[test]
    fn latest_key_wins() {
        let ring = KeyRing::new();
        ring.learn("private", "AQ==");
        ring.learn("private", "Ag==");
        assert_eq!(ring.get("private"), Some("Ag==".to_string()));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn channel_names_are_case_sensitive() {
        let ring = KeyRing::new();
        ring.learn("LongFast", "AQ==");
        assert_eq!(ring.get("longfast"), None);
    }

    #[test]
    fn snapshot_is_sorted() {
        let ring = KeyRing::new();
        ring.learn("zulu", "AQ==");
        ring.learn("alpha", "Ag==");
        ring.learn("mike", "Aw==");
        let channels: Vec<String> = ring.snapshot().into_iter().map(|(c, _)| c).collect();
        assert_eq!(channels, ["alpha", "mike", "zulu"]);
    }

    #[test]
    fn seed_loads_config_entries() {
        let ring = KeyRing::new();
        ring.seed([
            ("LongFast".to_string(), "AQ==".to_string()),
            ("admin".to_string(), "Ag==".to_string()),
        ]);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.get("admin"), Some("Ag==".to_string()));
    }
}
