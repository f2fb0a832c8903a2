//! SessionRegistry: the set of live client sessions.
//!
//! This is the only state shared across sessions.  The relay server registers
//! a session when its WebSocket upgrade completes and removes it when the
//! session task finishes, whatever the reason.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::SessionId;

/// Bookkeeping for one registered session.
#[derive(Debug, Clone, Copy)]
pub struct SessionEntry {
    pub peer_addr: SocketAddr,
    pub connected_at: Instant,
}

/// Live sessions keyed by identity.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session.  Re-registering an id replaces its entry.
    pub async fn register(&self, id: SessionId, peer_addr: SocketAddr) {
        let entry = SessionEntry {
            peer_addr,
            connected_at: Instant::now(),
        };
        let total = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(id, entry);
            sessions.len()
        };
        debug!("session {id}: registered ({total} live)");
    }

    /// Removes a session by identity.
    ///
    /// Returns the removed entry, or `None` if the id was not registered.
    /// Removing an absent id is a no-op.
    pub async fn remove(&self, id: SessionId) -> Option<SessionEntry> {
        let removed = self.sessions.write().await.remove(&id);
        if let Some(entry) = &removed {
            debug!(
                "session {id}: deregistered after {:?}",
                entry.connected_at.elapsed()
            );
        }
        removed
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
