//! Per-peer session: one connection handle, one outgoing track and the
//! negotiation/lifecycle state machine

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime};

use super::state::{ConnectionEvent, ConnectionState, SessionOutcome, SessionState};
use crate::net::PeerConnection;
use crate::pipeline::{FrameFanout, FramePusher, FrameSlot, OutgoingTrack, PipelineHealth};
use crate::signaling::{IceCandidate, SessionDescription};

static PEER_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub struct PeerSession {
    id: u64,
    peer_id: String,
    connection: Arc<dyn PeerConnection>,
    track: Arc<OutgoingTrack>,
    /// Producing half of the track's slot, handed to the fanout on connect
    pusher: Mutex<Option<FramePusher>>,
    fanout: Arc<FrameFanout>,
    state: Mutex<SessionState>,
    created_at: SystemTime,
    closed: AtomicBool,
}

impl PeerSession {
    /// Build a session around a fresh connection
    ///
    /// The track joins the frame path only once the connection is up, so a
    /// peer that never finishes negotiating never holds frames back from the
    /// others.
    pub fn new(
        peer_id: impl Into<String>,
        connection: Arc<dyn PeerConnection>,
        fanout: &Arc<FrameFanout>,
        health: Arc<PipelineHealth>,
    ) -> Self {
        let id = PEER_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let (pusher, slot) = FrameSlot::new();
        let track = Arc::new(OutgoingTrack::new(slot, health));

        PeerSession {
            id,
            peer_id: peer_id.into(),
            connection,
            track,
            pusher: Mutex::new(Some(pusher)),
            fanout: Arc::clone(fanout),
            state: Mutex::new(SessionState::Negotiating),
            created_at: SystemTime::now(),
            closed: AtomicBool::new(false),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, target: SessionState) -> bool {
        let mut state = self.lock_state();
        if !state.can_transition_to(&target) {
            debug!(
                "Peer {} (session {}): ignoring {} -> {}",
                self.peer_id, self.id, *state, target
            );
            return false;
        }
        if *state != target {
            info!(
                "Peer {} (session {}): {} -> {}",
                self.peer_id, self.id, *state, target
            );
        }
        *state = target;
        true
    }

    /// Attach the track, apply the remote offer and produce the local answer
    pub async fn negotiate(&self, offer: SessionDescription) -> anyhow::Result<SessionDescription> {
        self.connection.add_track(Arc::clone(&self.track)).await?;
        self.connection.set_remote_description(offer).await?;

        let answer = self.connection.create_answer().await?;
        self.connection.set_local_description(answer.clone()).await?;

        // The engine may have rewritten the answer while gathering
        Ok(self.connection.local_description().await.unwrap_or(answer))
    }

    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> anyhow::Result<()> {
        self.connection.add_ice_candidate(candidate).await
    }

    /// Apply a lifecycle event and report whether it was structurally relevant
    pub fn dispatch(&self, event: ConnectionEvent) -> Option<SessionOutcome> {
        info!("Peer {}: {}", self.peer_id, event);

        match event {
            ConnectionEvent::ConnectionState(ConnectionState::Connected) => {
                if !self.transition(SessionState::Connected {
                    since: Instant::now(),
                }) {
                    return None;
                }
                self.start_delivery();
                Some(SessionOutcome::Connected)
            }
            ConnectionEvent::ConnectionState(ConnectionState::Failed) => {
                self.transition(SessionState::Failed)
                    .then_some(SessionOutcome::Failed)
            }
            _ => None,
        }
    }

    fn start_delivery(&self) {
        let mut pusher = self.pusher.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(pusher) = pusher.take() {
            self.fanout.attach(self.id, pusher);
        }
    }

    /// Tear down the track and the connection; later calls do nothing
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let connected_for = self.state().connected_duration();
        self.transition(SessionState::Closed);

        self.pusher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.fanout.unsubscribe(self.id);
        self.track.close().await;
        if let Err(e) = self.connection.close().await {
            warn!("Peer {}: error closing connection: {:#}", self.peer_id, e);
        }
        let age = self.created_at.elapsed().unwrap_or_default();
        match connected_for {
            Some(connected_for) => info!(
                "Peer {} (session {}) closed after {:?}, {:?} connected",
                self.peer_id, self.id, age, connected_for
            ),
            None => info!(
                "Peer {} (session {}) closed after {:?}, never connected",
                self.peer_id, self.id, age
            ),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn track(&self) -> Arc<OutgoingTrack> {
        Arc::clone(&self.track)
    }

    pub fn connection(&self) -> Arc<dyn PeerConnection> {
        Arc::clone(&self.connection)
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("peer_id", &self.peer_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testing::{MockConnector, Step};
    use crate::net::PeerConnector;
    use crate::session::state::IceConnectionState;

    async fn session(connector: &MockConnector, peer_id: &str) -> (PeerSession, Arc<FrameFanout>) {
        let health = Arc::new(PipelineHealth::new());
        let fanout = Arc::new(FrameFanout::new(Arc::clone(&health)));
        let connection = connector.create_connection(peer_id).await.unwrap();
        (PeerSession::new(peer_id, connection, &fanout, health), fanout)
    }

    #[tokio::test]
    async fn test_negotiate_returns_local_answer() {
        let connector = MockConnector::new();
        let (session, fanout) = session(&connector, "a").await;

        let answer = session.negotiate(SessionDescription::offer("v=0")).await.unwrap();
        assert_eq!(answer, SessionDescription::answer("answer-for:v=0"));
        assert!(connector.last_for("a").unwrap().track().is_some());
        assert_eq!(session.state(), SessionState::Negotiating);
        // Not fed frames until connected
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_negotiate_propagates_engine_error() {
        let connector = MockConnector::new();
        connector.fail_at("a", Step::CreateAnswer);
        let (session, _fanout) = session(&connector, "a").await;

        assert!(session.negotiate(SessionDescription::offer("v=0")).await.is_err());
    }

    #[tokio::test]
    async fn test_dispatch_outcomes() {
        let connector = MockConnector::new();
        let (session, fanout) = session(&connector, "a").await;

        assert_eq!(
            session.dispatch(ConnectionEvent::IceConnection(IceConnectionState::Checking)),
            None
        );
        assert_eq!(fanout.subscriber_count(), 0);
        assert_eq!(
            session.dispatch(ConnectionEvent::ConnectionState(ConnectionState::Connected)),
            Some(SessionOutcome::Connected)
        );
        assert!(session.state().is_connected());
        assert_eq!(fanout.subscriber_count(), 1);
        assert_eq!(
            session.dispatch(ConnectionEvent::ConnectionState(ConnectionState::Failed)),
            Some(SessionOutcome::Failed)
        );
        // Failed is terminal
        assert_eq!(
            session.dispatch(ConnectionEvent::ConnectionState(ConnectionState::Connected)),
            None
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let connector = MockConnector::new();
        let (session, fanout) = session(&connector, "a").await;

        session.close().await;
        session.close().await;

        let connection = connector.last_for("a").unwrap();
        assert_eq!(connection.close_count(), 1);
        assert_eq!(fanout.subscriber_count(), 0);
        assert!(session.track().is_closed());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_close_after_connect_leaves_frame_path() {
        let connector = MockConnector::new();
        let (session, fanout) = session(&connector, "a").await;
        session.dispatch(ConnectionEvent::ConnectionState(ConnectionState::Connected));
        assert_eq!(fanout.subscriber_count(), 1);

        session.close().await;
        assert_eq!(fanout.subscriber_count(), 0);

        // A late connect on a closed session does not rejoin
        assert_eq!(
            session.dispatch(ConnectionEvent::ConnectionState(ConnectionState::Connected)),
            None
        );
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_session_ids_are_unique() {
        let connector = MockConnector::new();
        let (first, _f1) = session(&connector, "a").await;
        let (second, _f2) = session(&connector, "a").await;
        assert_ne!(first.id(), second.id());
    }
}
