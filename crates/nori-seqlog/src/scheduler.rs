//! Debounce timer for pending flushes.
//!
//! Each handle owns one [`FlushTimer`], a two-state machine:
//! - `Idle` → `Scheduled` when a push arrives and no flush is armed
//! - `Scheduled` → `Idle` when the timer fires (the flush then runs) or is cancelled
//!
//! Pushes made while `Scheduled` arm nothing; they ride along with the flush
//! that is already pending.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;

/// Token identifying one armed timer. Cancellation wakes its sleeper.
#[derive(Debug, Clone)]
pub struct TimerToken {
    cancel: Arc<Notify>,
}

impl TimerToken {
    fn new() -> Self {
        Self {
            cancel: Arc::new(Notify::new()),
        }
    }

    fn same(&self, other: &TimerToken) -> bool {
        Arc::ptr_eq(&self.cancel, &other.cancel)
    }

    /// Sleeps for `delay` unless cancelled first.
    pub async fn wait(&self, delay: Duration) -> TimeoutResult {
        tokio::select! {
            _ = sleep(delay) => TimeoutResult::Elapsed,
            _ = self.cancel.notified() => TimeoutResult::Cancelled,
        }
    }
}

/// Result of waiting on a timer.
#[derive(Debug, PartialEq, Eq)]
pub enum TimeoutResult {
    /// Timeout elapsed
    Elapsed,
    /// Timeout was cancelled
    Cancelled,
}

#[derive(Debug, Default)]
enum TimerState {
    #[default]
    Idle,
    Scheduled(TimerToken),
}

/// Per-handle flush timer state.
#[derive(Debug, Default)]
pub struct FlushTimer {
    state: TimerState,
}

impl FlushTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self.state, TimerState::Scheduled(_))
    }

    /// Idle → Scheduled. Returns the token of the new timer, or `None` if one
    /// is already armed.
    pub fn arm(&mut self) -> Option<TimerToken> {
        match self.state {
            TimerState::Idle => {
                let token = TimerToken::new();
                self.state = TimerState::Scheduled(token.clone());
                Some(token)
            }
            TimerState::Scheduled(_) => None,
        }
    }

    /// Scheduled → Idle on expiry of `token`.
    ///
    /// Returns false if `token` is no longer the armed timer (it was cancelled
    /// or superseded), in which case the caller must not flush.
    pub fn fire(&mut self, token: &TimerToken) -> bool {
        match &self.state {
            TimerState::Scheduled(current) if current.same(token) => {
                self.state = TimerState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Scheduled → Idle without flushing.
    pub fn cancel(&mut self) {
        if let TimerState::Scheduled(token) = std::mem::take(&mut self.state) {
            // notify_one stores a permit if the sleeper has not polled yet
            token.cancel.notify_one();
        }
    }
}
