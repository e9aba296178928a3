//! Seam between the session core and the real-time transport engine
//!
//! The core only ever talks to a connection through [`PeerConnection`]; the
//! `webrtc` crate binding lives in [`webrtc`], and tests drive the core with
//! the scripted engine in `testing`.

pub mod webrtc;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::Arc;

use crate::pipeline::OutgoingTrack;
use crate::session::ConnectionEvent;
use crate::signaling::{IceCandidate, SessionDescription};

/// Callback invoked for every lifecycle event of a connection, in order
pub type EventHandler = Arc<dyn Fn(ConnectionEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Factory for connection handles, one per peer session
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create_connection(&self, peer_id: &str) -> anyhow::Result<Arc<dyn PeerConnection>>;
}

/// A single negotiated connection to a remote peer
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach the track the engine pulls outgoing frames from
    async fn add_track(&self, track: Arc<OutgoingTrack>) -> anyhow::Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> anyhow::Result<()>;

    async fn create_answer(&self) -> anyhow::Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> anyhow::Result<()>;

    /// The description actually in effect locally, once set
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;

    /// Register the lifecycle event handler, replacing any previous one
    fn on_event(&self, handler: EventHandler);
}
