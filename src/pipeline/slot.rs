//! Single-frame handoff between the producer thread and an outgoing track
//!
//! The slot is a bounded channel of capacity one. The producing half
//! ([`FramePusher`]) blocks while a frame is still waiting to be pulled, so the
//! producer can never run more than one frame ahead of the consumer and no
//! frame is ever overwritten or dropped. The consuming half ([`FrameSlot`])
//! suspends until a frame arrives.
//!
//! ```text
//! producer thread ── push ──▶ [ 0..=1 frame ] ── pull ──▶ outgoing track
//! ```

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::types::Frame;
use crate::error::{Error, Result};

/// Producing half of a frame slot
#[derive(Debug, Clone)]
pub struct FramePusher {
    tx: mpsc::Sender<Frame>,
}

impl FramePusher {
    /// Store a frame, blocking the calling thread while the slot is occupied
    ///
    /// Must not be called from inside the async runtime; use
    /// [`FramePusher::push_async`] there.
    pub fn push(&self, frame: Frame) -> Result<()> {
        self.tx.blocking_send(frame).map_err(|_| Error::SlotClosed)
    }

    /// Store a frame, suspending while the slot is occupied
    pub async fn push_async(&self, frame: Frame) -> Result<()> {
        self.tx.send(frame).await.map_err(|_| Error::SlotClosed)
    }

    /// Whether the consuming half has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consuming half of a frame slot
#[derive(Debug)]
pub struct FrameSlot {
    rx: Mutex<mpsc::Receiver<Frame>>,
    closed: CancellationToken,
}

impl FrameSlot {
    /// Create an empty slot and its producing half
    pub fn new() -> (FramePusher, FrameSlot) {
        let (tx, rx) = mpsc::channel(1);
        (
            FramePusher { tx },
            FrameSlot {
                rx: Mutex::new(rx),
                closed: CancellationToken::new(),
            },
        )
    }

    /// Take the pending frame, waiting until one is available
    ///
    /// Fails with [`Error::SlotClosed`] once the slot is closed or every
    /// pusher is gone.
    pub async fn pull(&self) -> Result<Frame> {
        let mut rx = tokio::select! {
            _ = self.closed.cancelled() => return Err(Error::SlotClosed),
            rx = self.rx.lock() => rx,
        };

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::SlotClosed),
            frame = rx.recv() => frame.ok_or(Error::SlotClosed),
        }
    }

    /// Take the pending frame without waiting
    pub fn try_pull(&self) -> Option<Frame> {
        if self.closed.is_cancelled() {
            return None;
        }
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Close the slot
    ///
    /// Wakes a pending `pull` and fails any `push` that is blocked on this
    /// slot, so a producer never hangs on a consumer that is gone.
    pub async fn close(&self) {
        self.closed.cancel();
        self.rx.lock().await.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::sync::mpsc as std_mpsc;
    use std::thread;
    use std::time::Duration;

    fn frame(tag: u8) -> Frame {
        Frame::rgb24(1, 1, Bytes::from(vec![tag, tag, tag])).unwrap()
    }

    #[tokio::test]
    async fn test_pull_returns_pushed_frame() {
        let (pusher, slot) = FrameSlot::new();

        pusher.push_async(frame(1)).await.unwrap();
        let pulled = slot.pull().await.unwrap();
        assert_eq!(pulled.data[0], 1);

        // Nothing left after a single pull
        assert!(slot.try_pull().is_none());
    }

    #[test]
    fn test_push_blocks_while_occupied() {
        let (pusher, slot) = FrameSlot::new();
        pusher.push(frame(1)).unwrap();

        let (done_tx, done_rx) = std_mpsc::channel();
        let producer = thread::spawn(move || {
            let result = pusher.push(frame(2));
            done_tx.send(()).unwrap();
            result
        });

        // Second push must not complete while the first frame is unread
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        let first = slot.try_pull().unwrap();
        assert_eq!(first.data[0], 1);

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        producer.join().unwrap().unwrap();

        let second = slot.try_pull().unwrap();
        assert_eq!(second.data[0], 2);
    }

    #[test]
    fn test_idle_consumer_stalls_producer() {
        let (pusher, slot) = FrameSlot::new();
        let (progress_tx, progress_rx) = std_mpsc::channel();

        let producer = thread::spawn(move || {
            let mut pushed = 0;
            while pusher.push(frame(pushed)).is_ok() {
                pushed += 1;
                progress_tx.send(pushed).unwrap();
            }
            pushed
        });

        assert_eq!(progress_rx.recv_timeout(Duration::from_secs(5)), Ok(1));
        assert!(progress_rx.recv_timeout(Duration::from_millis(200)).is_err());

        // Dropping the consumer releases the producer with an error
        drop(slot);
        assert_eq!(producer.join().unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pulls_never_exceed_pushes() {
        let (pusher, slot) = FrameSlot::new();
        let slot = Arc::new(slot);

        let producer = tokio::task::spawn_blocking(move || {
            for i in 0..50u8 {
                pusher.push(frame(i)).unwrap();
            }
        });

        let mut seen = Vec::new();
        while let Ok(frame) = slot.pull().await {
            seen.push(frame.data[0]);
            if seen.len() == 50 {
                break;
            }
        }
        producer.await.unwrap();

        assert_eq!(seen, (0..50u8).collect::<Vec<_>>());
        assert!(slot.try_pull().is_none());
    }

    #[tokio::test]
    async fn test_close_wakes_puller_and_fails_pusher() {
        let (pusher, slot) = FrameSlot::new();
        let slot = Arc::new(slot);

        let waiting = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move { slot.pull().await })
        };
        tokio::task::yield_now().await;

        slot.close().await;
        assert!(matches!(waiting.await.unwrap(), Err(Error::SlotClosed)));
        assert!(matches!(
            pusher.push_async(frame(1)).await,
            Err(Error::SlotClosed)
        ));
        assert!(pusher.is_closed());
    }
}
