//! The broker subscription set.
//!
//! An ordered set of topic-filter strings (MQTT wildcards permitted),
//! owned by the bridge for the process lifetime. Mutex hold times are
//! constant-time set operations; callers snapshot before doing I/O.

use std::collections::BTreeSet;
use std::sync::Mutex;

#[derive(Default)]
pub struct SubscriptionSet {
    topics: Mutex<BTreeSet<String>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the filter was already present.
    pub fn insert(&self, topic: &str) -> bool {
        self.topics
            .lock()
            .expect("subscription set poisoned")
            .insert(topic.to_string())
    }

    /// Returns false if the filter was not present.
    pub fn remove(&self, topic: &str) -> bool {
        self.topics
            .lock()
            .expect("subscription set poisoned")
            .remove(topic)
    }

    pub fn is_empty(&self) -> bool {
        self.topics
            .lock()
            .expect("subscription set poisoned")
            .is_empty()
    }

    /// Sorted copy of the full set.
    pub fn snapshot(&self) -> Vec<String> {
        self.topics
            .lock()
            .expect("subscription set poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
