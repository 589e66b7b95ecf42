//! Browser connection registry and broadcast fan-out.
//!
//! Each browser socket gets an unbounded send queue; its writer task
//! drains the queue onto the socket. Broadcasts serialize the event
//! once, snapshot the senders, and push to each — a queue whose
//! receiver is gone just drops, and the socket's own reader task
//! unregisters it.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use meshgate_services::protocol::ServerEvent;

#[derive(Default)]
pub struct ClientRegistry {
    next_id: AtomicU64,
    clients: DashMap<u64, mpsc::UnboundedSender<String>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new browser connection. Returns its id and the
    /// receiving end of its send queue.
    pub fn register(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, id: u64) {
        self.clients.remove(&id);
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Queue an event for one client. Dropped silently if the client is
    /// gone — its reader task is already tearing it down.
    pub fn send_to(&self, id: u64, event: &ServerEvent) {
        let Some(text) = encode(event) else { return };
        if let Some(entry) = self.clients.get(&id) {
            let _ = entry.value().send(text);
        }
    }

    /// Queue an event for every open client.
    pub fn broadcast(&self, event: &ServerEvent) {
        let Some(text) = encode(event) else { return };
        let senders: Vec<mpsc::UnboundedSender<String>> = self
            .clients
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for sender in senders {
            let _ = sender.send(text.clone());
        }
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize event");
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
