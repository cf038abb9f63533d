//! Session event bus
//!
//! Observer channel between the state containers. The work-items container
//! publishes `Invalidated` when the backend rejects the session; the identity
//! container listens and logs out. Neither container holds the other.

use crate::gateway::AuthUser;
use tokio::sync::broadcast;

const SESSION_EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn(AuthUser),
    SignedOut,
    /// A request failed because the session is missing, expired or rejected
    Invalidated,
}

/// Cloneable handle to the session bus
#[derive(Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self { sender }
    }

    /// Publish to every live subscriber. Publishing with none is not an error.
    pub fn publish(&self, event: SessionEvent) {
        let receivers = self.sender.send(event.clone()).unwrap_or(0);
        tracing::debug!("Session event {:?} delivered to {} subscriber(s)", event, receivers);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}
