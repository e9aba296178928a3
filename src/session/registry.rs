//! Peer id → session map owned by the server

use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::peer::PeerSession;

/// All live peer sessions, at most one per peer id
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<PeerSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `session` under its peer id and hand back the one it displaced
    ///
    /// The caller owns the displaced session and is expected to close it.
    pub async fn create_or_replace(&self, session: Arc<PeerSession>) -> Option<Arc<PeerSession>> {
        let previous = self
            .sessions
            .write()
            .await
            .insert(session.peer_id().to_string(), Arc::clone(&session));

        if let Some(previous) = &previous {
            info!(
                "Registry: peer {} session {} replaced by {}",
                session.peer_id(),
                previous.id(),
                session.id()
            );
        }
        previous
    }

    pub async fn get(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        self.sessions.read().await.get(peer_id).cloned()
    }

    pub async fn remove(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        self.sessions.write().await.remove(peer_id)
    }

    /// Remove the entry for `peer_id` only if it is still session `id`
    pub async fn remove_session(&self, peer_id: &str, id: u64) -> Option<Arc<PeerSession>> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(peer_id) {
            Some(current) if current.id() == id => sessions.remove(peer_id),
            Some(current) => {
                debug!(
                    "Registry: session {} for peer {} already replaced by {}",
                    id,
                    peer_id,
                    current.id()
                );
                None
            }
            None => None,
        }
    }

    pub async fn all(&self) -> Vec<Arc<PeerSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Empty the registry, returning everything it held
    pub async fn clear(&self) -> Vec<Arc<PeerSession>> {
        self.sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
