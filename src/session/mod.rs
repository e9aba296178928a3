//! Peer sessions, their registry and the startup readiness gate

pub mod gate;
pub mod peer;
pub mod registry;
pub mod state;

pub use gate::{ConnectionGate, GateOutcome};
pub use peer::PeerSession;
pub use registry::SessionRegistry;
pub use state::{
    ConnectionEvent, ConnectionState, IceConnectionState, IceGatheringState, SessionOutcome,
    SessionState,
};
