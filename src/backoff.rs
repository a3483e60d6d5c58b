//! Bounded exponential reconnect delay.

use crate::config::{RECONNECT_MAXIMUM_DELAY_SECS, RECONNECT_MINIMUM_DELAY_SECS};
use std::time::Duration;

/// Reconnect delay that doubles after each failed session, capped at a maximum.
///
/// `current` always lies in `[min, max]`. The delay handed out by
/// [`next_delay`](Self::next_delay) is the current value; the counter then
/// doubles for the following failure, so consecutive failures wait
/// 3s, 6s, 12s, 24s, ... up to 300s with the default bounds.
///
/// ```
/// use mail_aware::ReconnectBackoff;
/// use std::time::Duration;
///
/// let mut backoff = ReconnectBackoff::default();
/// assert_eq!(backoff.next_delay(), Duration::from_secs(3));
/// assert_eq!(backoff.next_delay(), Duration::from_secs(6));
/// backoff.reset();
/// assert_eq!(backoff.current(), Duration::from_secs(3));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBackoff {
    current_secs: u64,
    min_secs: u64,
    max_secs: u64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(RECONNECT_MINIMUM_DELAY_SECS, RECONNECT_MAXIMUM_DELAY_SECS)
    }
}

impl ReconnectBackoff {
    /// Creates a backoff with the given bounds in seconds.
    ///
    /// A zero minimum is raised to one second and a maximum below the minimum
    /// is raised to the minimum.
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        let min_secs = min_secs.max(1);
        let max_secs = max_secs.max(min_secs);
        Self {
            current_secs: min_secs,
            min_secs,
            max_secs,
        }
    }

    /// Current delay.
    #[must_use]
    pub fn current(&self) -> Duration {
        Duration::from_secs(self.current_secs)
    }

    /// Returns the delay to wait now and doubles the counter for next time.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current();
        self.current_secs = self.current_secs.saturating_mul(2).min(self.max_secs);
        delay
    }

    /// Goes back to the minimum delay after a successful connect.
    pub fn reset(&mut self) {
        self.current_secs = self.min_secs;
    }
}
