//! Scripted in-memory engine for exercising the session core

use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{EventHandler, PeerConnection, PeerConnector};
use crate::pipeline::OutgoingTrack;
use crate::session::ConnectionEvent;
use crate::signaling::{IceCandidate, SessionDescription};

/// Negotiation step a mock connection can be told to fail or stall at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    AddTrack,
    SetRemote,
    CreateAnswer,
    SetLocal,
}

#[derive(Default)]
struct Script {
    fail_at: Option<Step>,
    hang_at: Option<Step>,
    reject_candidates: bool,
}

/// Connection handle that records every call made on it
#[derive(Default)]
pub struct MockConnection {
    pub peer_id: String,
    script: Script,
    remote: Mutex<Option<SessionDescription>>,
    local: Mutex<Option<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    handler: Mutex<Option<EventHandler>>,
    track: Mutex<Option<Arc<OutgoingTrack>>>,
    closes: AtomicUsize,
}

impl MockConnection {
    async fn step(&self, step: Step) -> anyhow::Result<()> {
        if self.script.hang_at == Some(step) {
            std::future::pending::<()>().await;
        }
        if self.script.fail_at == Some(step) {
            return Err(anyhow!("scripted failure at {:?}", step));
        }
        Ok(())
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().unwrap().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn track(&self) -> Option<Arc<OutgoingTrack>> {
        self.track.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    /// Fire a lifecycle event through the registered handler
    pub async fn emit(&self, event: ConnectionEvent) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(event).await;
        }
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    async fn add_track(&self, track: Arc<OutgoingTrack>) -> anyhow::Result<()> {
        self.step(Step::AddTrack).await?;
        *self.track.lock().unwrap() = Some(track);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> anyhow::Result<()> {
        self.step(Step::SetRemote).await?;
        *self.remote.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn create_answer(&self) -> anyhow::Result<SessionDescription> {
        self.step(Step::CreateAnswer).await?;
        let remote = self
            .remote()
            .ok_or_else(|| anyhow!("no remote description"))?;
        Ok(SessionDescription::answer(format!("answer-for:{}", remote.sdp)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> anyhow::Result<()> {
        self.step(Step::SetLocal).await?;
        *self.local.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().unwrap().clone()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> anyhow::Result<()> {
        if self.script.reject_candidates {
            return Err(anyhow!("candidate rejected"));
        }
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_event(&self, handler: EventHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }
}

/// Connector handing out [`MockConnection`]s and remembering each one
#[derive(Default)]
pub struct MockConnector {
    connections: Mutex<Vec<Arc<MockConnection>>>,
    scripts: Mutex<HashMap<String, (Option<Step>, Option<Step>, bool)>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next connection for `peer_id` fail at `step`
    pub fn fail_at(&self, peer_id: &str, step: Step) {
        self.scripts.lock().unwrap().entry(peer_id.to_string()).or_default().0 = Some(step);
    }

    /// Make the next connection for `peer_id` never finish `step`
    pub fn hang_at(&self, peer_id: &str, step: Step) {
        self.scripts.lock().unwrap().entry(peer_id.to_string()).or_default().1 = Some(step);
    }

    pub fn reject_candidates(&self, peer_id: &str) {
        self.scripts.lock().unwrap().entry(peer_id.to_string()).or_default().2 = true;
    }

    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections.lock().unwrap().clone()
    }

    /// Most recent connection created for `peer_id`
    pub fn last_for(&self, peer_id: &str) -> Option<Arc<MockConnection>> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.peer_id == peer_id)
            .cloned()
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn create_connection(&self, peer_id: &str) -> anyhow::Result<Arc<dyn PeerConnection>> {
        let (fail_at, hang_at, reject_candidates) = self
            .scripts
            .lock()
            .unwrap()
            .remove(peer_id)
            .unwrap_or_default();

        let connection = Arc::new(MockConnection {
            peer_id: peer_id.to_string(),
            script: Script {
                fail_at,
                hang_at,
                reject_candidates,
            },
            ..Default::default()
        });
        self.connections.lock().unwrap().push(Arc::clone(&connection));
        Ok(connection)
    }
}
