//! Per-target alarm state machine.
//!
//! Decides whether a target is silent for longer than its threshold and reports
//! the edges of that condition.
//!
//! # State Machine
//!
//! ```text
//!                 initialize                 evaluate: silent
//!  Uninitialized ───────────► Normal ─────────────────────────► AlarmExceeded
//!                               ▲                                     │
//!                               └──────── evaluate: heard from ───────┘
//! ```
//!
//! - **Uninitialized:** every operation except [`initialize`](AlarmStateMachine::initialize)
//!   fails with [`Error::Uninitialized`].
//! - **Normal:** the last heartbeat is within the threshold.
//! - **AlarmExceeded:** no heartbeat for at least the threshold.
//!
//! "Within threshold" is `last_seen < now < last_seen + threshold`. A `now` that
//! is not strictly after `last_seen` counts as silent, so a clock stepping
//! backwards never produces a negative window.
//!
//! The machine only returns [`AlarmEvent`]s; delivering them is the caller's job.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::info;

/// Alarm state of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    /// Not yet initialized.
    Uninitialized,
    /// Heartbeats are arriving within the threshold.
    Normal,
    /// The threshold has been exceeded.
    AlarmExceeded,
}

impl std::fmt::Display for AlarmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmState::Uninitialized => write!(f, "uninitialized"),
            AlarmState::Normal => write!(f, "normal"),
            AlarmState::AlarmExceeded => write!(f, "alarm"),
        }
    }
}

/// A state transition worth notifying about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmEvent {
    /// `Normal -> AlarmExceeded`.
    Raised {
        /// Display name of the target.
        target: String,
    },
    /// `AlarmExceeded -> Normal`.
    Cleared {
        /// Display name of the target.
        target: String,
    },
}

impl AlarmEvent {
    /// Display name of the target the event belongs to.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            AlarmEvent::Raised { target } | AlarmEvent::Cleared { target } => target,
        }
    }
}

/// Alarm state machine for one target.
#[derive(Debug, Clone)]
pub struct AlarmStateMachine {
    display_name: String,
    state: AlarmState,
    last_seen: Option<DateTime<Utc>>,
    threshold: chrono::Duration,
}

impl AlarmStateMachine {
    /// Creates an uninitialized machine for the named target.
    #[must_use]
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            state: AlarmState::Uninitialized,
            last_seen: None,
            threshold: chrono::Duration::zero(),
        }
    }

    /// Moves to `Normal` and treats `now` as the last heartbeat.
    ///
    /// May be called again at any time; it resets the machine regardless of
    /// its current state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `threshold` is zero or too large to
    /// represent.
    pub fn initialize(&mut self, threshold: Duration, now: DateTime<Utc>) -> Result<()> {
        if threshold.is_zero() {
            return Err(Error::InvalidConfig {
                message: "alarm threshold must be greater than 0".into(),
            });
        }
        self.threshold = chrono::Duration::from_std(threshold).map_err(|_| {
            Error::InvalidConfig {
                message: format!("alarm threshold {threshold:?} is out of range"),
            }
        })?;
        self.state = AlarmState::Normal;
        self.last_seen = Some(now);
        Ok(())
    }

    /// Records a heartbeat timestamp. The latest call wins, whatever its order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Uninitialized`] before [`initialize`](Self::initialize).
    pub fn record_sighting(&mut self, timestamp: DateTime<Utc>) -> Result<()> {
        self.ensure_initialized()?;
        self.last_seen = Some(timestamp);
        Ok(())
    }

    /// Applies the threshold rule at `now` and returns the transition, if any.
    ///
    /// Repeated calls in the same condition return `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Uninitialized`] before [`initialize`](Self::initialize).
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> Result<Option<AlarmEvent>> {
        self.ensure_initialized()?;
        let within = self.is_within_threshold(now);

        let event = match (self.state, within) {
            (AlarmState::Normal, false) => {
                self.state = AlarmState::AlarmExceeded;
                info!(mailbox = %self.display_name, "Alarm state: alarm threshold exceeded");
                Some(AlarmEvent::Raised {
                    target: self.display_name.clone(),
                })
            }
            (AlarmState::AlarmExceeded, true) => {
                self.state = AlarmState::Normal;
                info!(mailbox = %self.display_name, "Alarm state: normal");
                Some(AlarmEvent::Cleared {
                    target: self.display_name.clone(),
                })
            }
            _ => None,
        };

        Ok(event)
    }

    /// Returns `true` if a heartbeat was seen strictly before `now` and less than
    /// one threshold ago.
    #[must_use]
    pub fn is_within_threshold(&self, now: DateTime<Utc>) -> bool {
        match self.last_seen {
            // A window ending past the representable range never closes
            Some(last_seen) => {
                now > last_seen
                    && last_seen
                        .checked_add_signed(self.threshold)
                        .map_or(true, |end| now < end)
            }
            None => false,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AlarmState {
        self.state
    }

    /// Timestamp of the last heartbeat, or of initialization.
    #[must_use]
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// Display name of the target.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.state == AlarmState::Uninitialized {
            return Err(Error::Uninitialized);
        }
        Ok(())
    }
}
