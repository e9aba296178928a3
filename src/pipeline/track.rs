//! Outgoing video track: the consumer side of the frame path

use std::sync::{Arc, Mutex};

use super::clock::TimestampClock;
use super::health::PipelineHealth;
use super::slot::FrameSlot;
use super::types::Frame;
use crate::error::Result;

/// Track a transport engine pulls frames from, one per peer session
///
/// Each call to [`OutgoingTrack::produce_frame`] waits for the next frame the
/// producer hands over, stamps it with this track's own clock and returns it.
/// It never returns a stale or placeholder frame.
pub struct OutgoingTrack {
    slot: FrameSlot,
    clock: Mutex<TimestampClock>,
    health: Arc<PipelineHealth>,
}

impl OutgoingTrack {
    pub fn new(slot: FrameSlot, health: Arc<PipelineHealth>) -> Self {
        Self {
            slot,
            clock: Mutex::new(TimestampClock::new()),
            health,
        }
    }

    /// Wait for the next frame and stamp it with a presentation timestamp
    pub async fn produce_frame(&self) -> Result<Frame> {
        let frame = self.slot.pull().await?;
        let (pts, time_base) = self
            .clock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .next();
        self.health.record_pull();
        Ok(frame.stamped(pts, time_base))
    }

    /// Stop the track; a pending or later `produce_frame` fails
    pub async fn close(&self) {
        self.slot.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use bytes::Bytes;
    use std::time::Duration;

    fn vga_frame(fill: u8) -> Frame {
        Frame::rgb24(640, 480, Bytes::from(vec![fill; 640 * 480 * 3])).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_are_stamped_from_first_pull() {
        let (pusher, slot) = FrameSlot::new();
        let health = Arc::new(PipelineHealth::new());
        let track = Arc::new(OutgoingTrack::new(slot, Arc::clone(&health)));

        // The track is already waiting when the first frame arrives
        let waiting = {
            let track = Arc::clone(&track);
            tokio::spawn(async move { track.produce_frame().await })
        };
        tokio::task::yield_now().await;
        pusher.push_async(vga_frame(1)).await.unwrap();

        let first = waiting.await.unwrap().unwrap();
        assert_eq!(first.pts, Some(0));
        assert_eq!(first.data[0], 1);
        assert_eq!((first.width, first.height), (640, 480));

        tokio::time::advance(Duration::from_millis(100)).await;
        pusher.push_async(vga_frame(2)).await.unwrap();

        let second = track.produce_frame().await.unwrap();
        let pts = second.pts.unwrap();
        assert!((99..=101).contains(&pts), "unexpected pts {}", pts);
        assert_eq!(second.data[0], 2);
        assert_eq!(health.summary().frames_pulled, 2);
    }

    #[tokio::test]
    async fn test_close_stops_production() {
        let (_pusher, slot) = FrameSlot::new();
        let track = OutgoingTrack::new(slot, Arc::new(PipelineHealth::new()));

        track.close().await;
        assert!(track.is_closed());
        assert!(matches!(track.produce_frame().await, Err(Error::SlotClosed)));
    }
}
