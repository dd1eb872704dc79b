//! One-shot release gates.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Single-fire signal that holds back a response until released.
///
/// Releasing is idempotent and waiting on a released gate returns at once.
/// Clones share the same state, so a test keeps one clone and hands the other
/// to [`ExpectationHandle::release_gate`](crate::ExpectationHandle::release_gate).
#[derive(Debug, Clone)]
pub struct ReleaseGate {
    state: Arc<watch::Sender<bool>>,
}

impl Default for ReleaseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Gate that releases itself once `delay` has elapsed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn after(delay: Duration) -> Self {
        let gate = Self::new();
        let timer = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            timer.release();
        });
        gate
    }

    pub fn release(&self) {
        self.state.send_replace(true);
    }

    pub fn is_released(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait until the gate is released.
    pub async fn wait(&self) {
        let mut released = self.state.subscribe();
        // The sender lives in `self`, so this only returns once released.
        let _ = released.wait_for(|open| *open).await;
    }
}
