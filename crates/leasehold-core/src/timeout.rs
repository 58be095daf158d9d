//! Deadline helpers for blocking operations.

use std::time::Duration;

use tokio::time::Instant;

/// Point in time after which a blocking acquire gives up.
///
/// - `Deadline::after(Some(d))` - give up `d` from now
/// - `Deadline::after(None)` - no time limit
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn after(limit: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.limit.is_none()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// Time left, or `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.limit.map(|limit| limit.saturating_sub(self.start.elapsed()))
    }

    /// Shortens `delay` so a sleep never outlasts the deadline.
    pub fn clamp(&self, delay: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => delay.min(remaining),
            None => delay,
        }
    }
}
