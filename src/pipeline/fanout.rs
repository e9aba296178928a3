//! Fan-out from the single frame producer to every subscribed track

use log::{debug, info};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use super::health::PipelineHealth;
use super::slot::{FramePusher, FrameSlot};
use super::types::Frame;
use crate::error::{Error, Result};

struct FanoutState {
    subscribers: Vec<(u64, FramePusher)>,
    closed: bool,
}

/// Broadcasts each produced frame into one [`FrameSlot`] per subscriber
///
/// Every subscriber owns its slot, so one track pulling a frame never hides
/// it from another. A push returns once the frame sits in every live slot;
/// it therefore waits on the slowest consumer, and with no subscriber at all
/// it waits until one subscribes.
pub struct FrameFanout {
    state: Mutex<FanoutState>,
    subscribed: Condvar,
    health: Arc<PipelineHealth>,
}

impl FrameFanout {
    pub fn new(health: Arc<PipelineHealth>) -> Self {
        Self {
            state: Mutex::new(FanoutState {
                subscribers: Vec::new(),
                closed: false,
            }),
            subscribed: Condvar::new(),
            health,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FanoutState> {
        // A panic while holding the lock cannot leave the list half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new consumer under `id`, replacing any previous one
    pub fn subscribe(&self, id: u64) -> FrameSlot {
        let (pusher, slot) = FrameSlot::new();
        self.attach(id, pusher);
        slot
    }

    /// Start delivering into an existing slot
    ///
    /// Only attach a slot whose consumer is already pulling; an idle slot
    /// stalls every other subscriber once it fills.
    pub fn attach(&self, id: u64, pusher: FramePusher) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.subscribers.retain(|(sid, _)| *sid != id);
        state.subscribers.push((id, pusher));
        debug!("Fanout: subscriber {} added, {} total", id, state.subscribers.len());
        self.subscribed.notify_all();
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut state = self.lock();
        state.subscribers.retain(|(sid, _)| *sid != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Push a frame into every subscribed slot
    ///
    /// Blocks the calling thread; returns the number of slots the frame was
    /// delivered to. Slots whose consumer has gone away are dropped. If every
    /// subscriber turns out to be gone the frame is kept and delivered to the
    /// next one that subscribes.
    pub fn push(&self, frame: Frame) -> Result<usize> {
        loop {
            let targets = {
                let mut state = self.lock();
                while state.subscribers.is_empty() && !state.closed {
                    state = self
                        .subscribed
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                if state.closed {
                    return Err(Error::ShutDown);
                }
                state.subscribers.clone()
            };

            let mut delivered = 0;
            let mut gone = Vec::new();
            for (id, pusher) in &targets {
                match pusher.push(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => gone.push(*id),
                }
            }

            if !gone.is_empty() {
                let mut state = self.lock();
                state.subscribers.retain(|(sid, _)| !gone.contains(sid));
                debug!("Fanout: dropped {} closed subscriber(s)", gone.len());
            }

            if delivered > 0 {
                self.health.record_push(delivered);
                return Ok(delivered);
            }
        }
    }

    /// Stop accepting frames and release a producer waiting for subscribers
    pub fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            info!("Fanout: closed with {} subscriber(s)", state.subscribers.len());
        }
        state.closed = true;
        state.subscribers.clear();
        self.subscribed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
