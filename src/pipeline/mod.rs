//! Frame path between the producing pipeline and the outgoing tracks
//!
//! The producer runs on its own thread and pushes each frame into a
//! [`FrameFanout`], which hands a copy to one single-slot buffer per peer.
//! Every peer's [`OutgoingTrack`] pulls from its own slot at the transport
//! engine's pace and stamps the frame with its own [`TimestampClock`].
//!
//! ```text
//! producer ─▶ FrameFanout ─┬─▶ FrameSlot ─▶ OutgoingTrack (peer a)
//!                          └─▶ FrameSlot ─▶ OutgoingTrack (peer b)
//! ```
//!
//! A slot holds at most one frame, so the producer blocks until the slowest
//! track has taken the previous one.

pub mod clock;
pub mod fanout;
pub mod health;
pub mod slot;
pub mod track;
pub mod types;

pub use clock::TimestampClock;
pub use fanout::FrameFanout;
pub use health::{HealthSummary, PipelineHealth};
pub use slot::{FramePusher, FrameSlot};
pub use track::OutgoingTrack;
pub use types::{Frame, FrameInput, PixelArray, TimeBase};
