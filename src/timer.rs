//! Single-shot retransmission timer.
//!
//! One [`RetransmitTimer`] covers a whole send window: it is armed when the
//! first packet becomes outstanding, re-armed whenever the window slides or is
//! retransmitted, and stopped once the window drains.  It never fires on its
//! own; the send loop either polls [`RetransmitTimer::is_expired`] or sleeps
//! until [`RetransmitTimer::deadline`].
//!
//! Time is read from `tokio::time::Instant`, so tests running on a paused
//! tokio clock control expiry exactly.

use std::time::Duration;

use tokio::time::Instant;

/// Countdown gating retransmission of the oldest outstanding packet.
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    timeout: Duration,
    /// `Some(deadline)` while running.
    deadline: Option<Instant>,
}

impl RetransmitTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Arm the timer for `now + timeout`.
    ///
    /// Restarting a running timer replaces its deadline; there is never more
    /// than one pending expiry.
    pub fn start(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// `true` only when running and the deadline has been reached.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Pending expiry instant, `None` when stopped.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
