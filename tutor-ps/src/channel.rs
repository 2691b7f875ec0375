//! Per-session event channel
//!
//! Delivers progress notifications to at most one live subscriber per
//! session. Built on tokio broadcast channels: publishing with no
//! subscriber drops the event (progress is best-effort; the synchronous
//! pipeline result is authoritative), and a slow subscriber loses the
//! oldest buffered events first, never the newest.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;
use tutor_common::events::SessionEvent;

/// Registry of per-session broadcast senders
///
/// Constructed once at startup and shared behind an Arc; no globals.
pub struct EventChannel {
    sessions: Mutex<HashMap<String, broadcast::Sender<SessionEvent>>>,
    capacity: usize,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Attach a subscriber for a session.
    ///
    /// Replaces any existing channel for the session, which closes the
    /// previous subscriber's stream — a reconnecting client preempts the
    /// stale connection.
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<SessionEvent> {
        let (tx, rx) = broadcast::channel(self.capacity);
        let mut sessions = self.sessions.lock().expect("channel map poisoned");
        if sessions.insert(session_id.to_string(), tx).is_some() {
            debug!(session_id, "replaced existing event subscriber");
        }
        rx
    }

    /// Publish an event to the session's subscriber, if any.
    ///
    /// Events published with no attached subscriber are dropped.
    pub fn publish(&self, session_id: &str, event: SessionEvent) {
        let sessions = self.sessions.lock().expect("channel map poisoned");
        if let Some(tx) = sessions.get(session_id) {
            // Send fails only when no receiver is alive; that is the
            // documented drop path.
            let _ = tx.send(event);
        }
    }
}
