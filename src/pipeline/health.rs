//! Health counters for the frame path and peer sessions

use std::sync::atomic::{AtomicU64, Ordering};

/// Health metrics for the bridge
///
/// All fields use atomic operations for thread-safe access from the
/// producer thread and the async tasks alike.
pub struct PipelineHealth {
    /// Frames accepted from the producer
    pub frames_pushed: AtomicU64,

    /// Frame copies placed into subscriber slots
    pub frames_delivered: AtomicU64,

    /// Frames pulled and stamped by outgoing tracks
    pub frames_pulled: AtomicU64,

    pub sessions_opened: AtomicU64,

    pub sessions_failed: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self {
            frames_pushed: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            frames_pulled: AtomicU64::new(0),
            sessions_opened: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
        }
    }

    /// Record a frame handed to `delivered` subscriber slots
    pub fn record_push(&self, delivered: usize) {
        self.frames_pushed.fetch_add(1, Ordering::Relaxed);
        self.frames_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
    }

    pub fn record_pull(&self) {
        self.frames_pulled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_pushed: self.frames_pushed.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_pulled: self.frames_pulled.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSummary {
    pub frames_pushed: u64,
    pub frames_delivered: u64,
    pub frames_pulled: u64,
    pub sessions_opened: u64,
    pub sessions_failed: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} frames pushed ({} deliveries, {} pulled), {} sessions opened, {} failed",
            self.frames_pushed,
            self.frames_delivered,
            self.frames_pulled,
            self.sessions_opened,
            self.sessions_failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let health = PipelineHealth::new();
        health.record_push(3);
        health.record_push(1);
        health.record_pull();
        health.record_session_opened();
        health.record_session_failed();

        let summary = health.summary();
        assert_eq!(summary.frames_pushed, 2);
        assert_eq!(summary.frames_delivered, 4);
        assert_eq!(summary.frames_pulled, 1);
        assert_eq!(summary.sessions_opened, 1);
        assert_eq!(summary.sessions_failed, 1);
        assert!(summary.to_string().starts_with("Health: 2 frames pushed"));
    }
}
