//! One-shot readiness latch for pipeline startup

use log::info;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// Terminal outcome a gate resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Ready,
    Failed,
}

/// Latch that holds pipeline startup until the first peer connects or fails
///
/// The first call to [`ConnectionGate::resolve`] wins; every later call is a
/// no-op. Waiters can block a thread ([`ConnectionGate::wait_ready`]) or
/// suspend a task ([`ConnectionGate::await_ready`]).
#[derive(Debug, Default)]
pub struct ConnectionGate {
    outcome: Mutex<Option<GateOutcome>>,
    condvar: Condvar,
    notify: Notify,
}

impl ConnectionGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<GateOutcome>> {
        self.outcome.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolve the gate; returns whether this call was the one that did it
    pub fn resolve(&self, outcome: GateOutcome) -> bool {
        let mut current = self.lock();
        if current.is_some() {
            return false;
        }
        *current = Some(outcome);
        drop(current);

        info!("Connection gate resolved: {:?}", outcome);
        self.condvar.notify_all();
        self.notify.notify_waiters();
        true
    }

    /// Current outcome, `None` while unresolved
    pub fn outcome(&self) -> Option<GateOutcome> {
        *self.lock()
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome().is_some()
    }

    /// Suspend until resolved; `true` means a peer connected
    pub async fn await_ready(&self) -> bool {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.outcome() {
                return outcome == GateOutcome::Ready;
            }
            notified.await;
        }
    }

    /// Block the calling thread until resolved
    pub fn wait_ready(&self) -> bool {
        let guard = self
            .condvar
            .wait_while(self.lock(), |outcome| outcome.is_none())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard == Some(GateOutcome::Ready)
    }

    /// Block for at most `timeout`; `None` if still unresolved
    pub fn wait_ready_timeout(&self, timeout: Duration) -> Option<bool> {
        let (guard, _) = self
            .condvar
            .wait_timeout_while(self.lock(), timeout, |outcome| outcome.is_none())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.map(|outcome| outcome == GateOutcome::Ready)
    }
}
