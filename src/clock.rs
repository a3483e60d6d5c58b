//! Source of "now" for the monitor.

use chrono::{DateTime, Utc};

/// Supplies the current wall-clock time.
///
/// Workers read time only through this trait, which lets tests drive alarm
/// thresholds from tokio's paused clock instead of the system clock.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
