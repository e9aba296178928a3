//! The frame server: signaling surface, frame entry point and lifecycle hooks

use futures_util::future::{join_all, BoxFuture};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::net::{EventHandler, PeerConnector};
use crate::pipeline::{Frame, FrameFanout, FrameInput, PipelineHealth};
use crate::session::{
    ConnectionEvent, ConnectionGate, GateOutcome, PeerSession, SessionOutcome, SessionRegistry,
};
use crate::signaling::{CandidateDescriptor, IceCandidate, SessionDescription};

/// Bridges a blocking frame producer to any number of negotiated peers
///
/// The signaling methods are async and run on the tokio runtime.
/// [`FrameServer::on_frame`] and [`FrameServer::wait_startup_ready`] block and
/// belong on the pipeline thread.
pub struct FrameServer {
    config: ServerConfig,
    connector: Arc<dyn PeerConnector>,
    registry: SessionRegistry,
    gate: ConnectionGate,
    fanout: Arc<FrameFanout>,
    health: Arc<PipelineHealth>,
    shut_down: AtomicBool,
}

impl FrameServer {
    pub fn new(config: ServerConfig, connector: Arc<dyn PeerConnector>) -> Arc<Self> {
        let health = Arc::new(PipelineHealth::new());
        Arc::new(FrameServer {
            config,
            connector,
            registry: SessionRegistry::new(),
            gate: ConnectionGate::new(),
            fanout: Arc::new(FrameFanout::new(Arc::clone(&health))),
            health,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Open a session for `peer_id` and answer its offer
    ///
    /// A session already registered under the same id is replaced and closed.
    /// If negotiation fails or times out the new session is removed and
    /// closed before the error is returned.
    pub async fn handle_offer(
        self: &Arc<Self>,
        peer_id: &str,
        offer: SessionDescription,
    ) -> Result<SessionDescription> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        info!("Offer from peer {} ({})", peer_id, offer.sdp_type);

        let connection = self
            .connector
            .create_connection(peer_id)
            .await
            .map_err(|e| Error::negotiation(peer_id, e))?;

        let session = Arc::new(PeerSession::new(
            peer_id,
            Arc::clone(&connection),
            &self.fanout,
            Arc::clone(&self.health),
        ));
        connection.on_event(self.event_handler(&session));

        if let Some(replaced) = self.registry.create_or_replace(Arc::clone(&session)).await {
            replaced.close().await;
        }
        if self.is_shut_down() {
            // Lost the race against shutdown
            self.registry.remove_session(peer_id, session.id()).await;
            session.close().await;
            return Err(Error::ShutDown);
        }
        self.health.record_session_opened();

        let negotiated = match self.config.negotiation_timeout() {
            Some(timeout) => {
                match tokio::time::timeout(timeout, session.negotiate(offer)).await {
                    Ok(result) => result.map_err(|e| Error::negotiation(peer_id, e)),
                    Err(_) => Err(Error::NegotiationTimeout {
                        peer_id: peer_id.to_string(),
                        timeout,
                    }),
                }
            }
            None => session
                .negotiate(offer)
                .await
                .map_err(|e| Error::negotiation(peer_id, e)),
        };

        match negotiated {
            Ok(answer) => {
                info!("Answer ready for peer {} (session {})", peer_id, session.id());
                Ok(answer)
            }
            Err(e) => {
                error!("Negotiation with peer {} aborted: {}", peer_id, e);
                self.health.record_session_failed();
                self.registry.remove_session(peer_id, session.id()).await;
                session.close().await;
                Err(e)
            }
        }
    }

    fn event_handler(self: &Arc<Self>, session: &Arc<PeerSession>) -> EventHandler {
        let server = Arc::downgrade(self);
        let session = Arc::downgrade(session);

        Arc::new(move |event: ConnectionEvent| -> BoxFuture<'static, ()> {
            let server = server.clone();
            let session = session.clone();
            Box::pin(async move {
                if let (Some(server), Some(session)) = (server.upgrade(), session.upgrade()) {
                    server.on_connection_event(&session, event).await;
                }
            })
        })
    }

    /// Apply a lifecycle event reported for `session`
    pub async fn on_connection_event(&self, session: &Arc<PeerSession>, event: ConnectionEvent) {
        match session.dispatch(event) {
            Some(SessionOutcome::Connected) => {
                self.gate.resolve(GateOutcome::Ready);
            }
            Some(SessionOutcome::Failed) => {
                warn!(
                    "Peer {} (session {}) failed, removing",
                    session.peer_id(),
                    session.id()
                );
                self.health.record_session_failed();
                self.registry
                    .remove_session(session.peer_id(), session.id())
                    .await;
                session.close().await;
                self.gate.resolve(GateOutcome::Failed);
            }
            None => {}
        }
    }

    /// Route a remote candidate to the session registered for `peer_id`
    ///
    /// Candidates for unknown peers and the end-of-candidates marker are
    /// ignored.
    pub async fn add_ice_candidate(&self, peer_id: &str, descriptor: CandidateDescriptor) -> Result<()> {
        let Some(session) = self.registry.get(peer_id).await else {
            warn!("ICE candidate for unknown peer {}, ignoring", peer_id);
            return Ok(());
        };

        let Some(candidate) = IceCandidate::from_descriptor(&descriptor)? else {
            debug!("End of candidates from peer {}", peer_id);
            return Ok(());
        };

        debug!("Peer {}: adding {}", peer_id, candidate);
        session
            .add_ice_candidate(candidate)
            .await
            .map_err(|source| Error::Candidate {
                peer_id: peer_id.to_string(),
                source,
            })
    }

    /// Close every session concurrently and stop the frame path
    ///
    /// Later calls return immediately.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already done");
            return;
        }

        let sessions = self.registry.clear().await;
        info!("Shutting down {} session(s)", sessions.len());
        join_all(sessions.iter().map(|session| session.close())).await;

        self.fanout.close();
        // Release anyone still waiting for the first peer
        self.gate.resolve(GateOutcome::Failed);
        info!("{}", self.health.summary());
    }

    /// Hand one frame from the pipeline to every connected track
    ///
    /// Blocks until every track's slot has room and, with no peer at all,
    /// until one arrives. Must not be called from inside the async runtime.
    pub fn on_frame(&self, input: &FrameInput) -> Result<usize> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        let frame = Frame::from_input(input)?;
        self.fanout.push(frame)
    }

    /// Wait until the first peer connects (`true`) or fails (`false`)
    pub async fn await_startup_ready(&self) -> bool {
        let Some(timeout) = self.config.startup_timeout() else {
            return self.gate.await_ready().await;
        };

        match tokio::time::timeout(timeout, self.gate.await_ready()).await {
            Ok(ready) => ready,
            Err(_) => self.startup_timed_out(),
        }
    }

    /// Blocking form of [`FrameServer::await_startup_ready`]
    pub fn wait_startup_ready(&self) -> bool {
        let Some(timeout) = self.config.startup_timeout() else {
            return self.gate.wait_ready();
        };

        match self.gate.wait_ready_timeout(timeout) {
            Some(ready) => ready,
            None => self.startup_timed_out(),
        }
    }

    fn startup_timed_out(&self) -> bool {
        warn!("No peer connected within the startup timeout");
        self.gate.resolve(GateOutcome::Failed);
        // A peer may have connected in the meantime
        self.gate.outcome() == Some(GateOutcome::Ready)
    }

    /// Pipeline start hook: block until a peer connects
    pub fn startup(&self) -> Result<()> {
        if self.wait_startup_ready() {
            Ok(())
        } else {
            error!("Startup aborted, no peer connected");
            Err(Error::StartupAbort)
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn health(&self) -> Arc<PipelineHealth> {
        Arc::clone(&self.health)
    }

    pub fn gate(&self) -> &ConnectionGate {
        &self.gate
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}
