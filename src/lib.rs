//! Stream frames from a blocking pipeline stage to WebRTC peers
//!
//! A [`FrameServer`] owns one session per remote peer. Frames pushed with
//! [`FrameServer::on_frame`] fan out to each peer's outgoing track, which the
//! transport engine pulls from at its own pace.

pub mod config;
pub mod error;
pub mod net;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod signaling;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use pipeline::{Frame, FrameInput, PixelArray};
pub use server::FrameServer;
pub use signaling::{CandidateDescriptor, SdpType, SessionDescription};
