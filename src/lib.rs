//! # mail-aware
//!
//! Dead man's switch for mailboxes: watches one or more IMAP inboxes for a recurring
//! heartbeat message and sends a notification when it stops arriving, and again when
//! it comes back.
//!
//! This crate provides:
//! - A per-target alarm state machine ([`AlarmStateMachine`])
//! - A resilient polling worker with reconnect backoff ([`MailboxWorker`], [`MailboxMonitor`])
//! - A supervisor that runs one worker per target ([`MonitorSupervisor`])
//! - An IMAP [`MailboxClient`] (TLS, optional SOCKS5 proxy) and an SMTP [`NotificationSink`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use mail_aware::{ImapMailboxClient, MailAwareConfig, MonitorSupervisor, SmtpNotifier};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MailAwareConfig::load("config.json")?;
//! let notifier = Arc::new(SmtpNotifier::new(&config.notification)?);
//!
//! let supervisor = MonitorSupervisor::start(config.targets, notifier, |_| {
//!     Box::new(ImapMailboxClient::new())
//! })?;
//!
//! tokio::signal::ctrl_c().await?;
//! supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Building a Target in Code
//!
//! ```
//! use mail_aware::{Socks5Proxy, TargetMailbox};
//!
//! let target = TargetMailbox::builder()
//!     .display_name("nightly backups")
//!     .host("imap.example.com")
//!     .username("watch@example.com")
//!     .password("app-password")
//!     .subject_snippet("[backup] completed")
//!     .alarm_threshold_secs(26 * 3600)
//!     .poll_interval_ms(60_000)
//!     .proxy(Socks5Proxy::new("127.0.0.1", 1080))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(target.effective_port(), 993);
//! ```
//!
//! ## Alarm Semantics
//!
//! A target is *within threshold* while its last heartbeat is strictly in the past and
//! less than `alarm_threshold` old. Leaving that window raises the alarm once; the next
//! heartbeat clears it once. Heartbeat messages are deleted after they are read so the
//! same message is never counted twice.
//!
//! ```
//! use chrono::{Duration, Utc};
//! use mail_aware::{AlarmEvent, AlarmStateMachine};
//!
//! let start = Utc::now();
//! let mut alarm = AlarmStateMachine::new("backups");
//! alarm.initialize(std::time::Duration::from_secs(60), start).unwrap();
//!
//! let event = alarm.evaluate(start + Duration::seconds(61)).unwrap();
//! assert!(matches!(event, Some(AlarmEvent::Raised { .. })));
//! ```
//!
//! ## Error Handling
//!
//! Mailbox failures never stop a worker; they end the session and the worker
//! reconnects after a growing delay. [`Error::category`] tells them apart from
//! contract violations such as starting a monitor twice:
//!
//! ```
//! use mail_aware::{Error, ErrorCategory};
//!
//! fn handle_error(error: &Error) {
//!     match error.category() {
//!         ErrorCategory::Contract => panic!("bug: {error}"),
//!         _ if error.is_retryable() => println!("Transient error, will reconnect: {error}"),
//!         _ => println!("Permanent error: {error}"),
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation.
//!
//! ### Span Naming Convention
//!
//! - `MailboxWorker::run` - Worker lifetime for one target
//! - `MailboxWorker::connect_session` - Connect, login and fresh-start purge
//! - `MailboxWorker::purge_matching_emails` - Heartbeat deletion
//! - `ImapMailboxClient::connect` - TCP and TLS setup
//! - `session::authenticate` - IMAP authentication
//! - `connection::establish_tls` - TLS connection
//! - `SmtpNotifier::send_all` - Notification delivery
//!
//! ### Standard Fields
//!
//! - `mailbox` - Target display name
//! - `imap_host` - IMAP server hostname
//! - `proxy_enabled` - Whether proxy is used
//! - `uid` - Message UID
//! - `delay_secs` - Reconnect delay

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod alarm;
pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod notify;
pub mod proxy;
pub mod supervisor;
pub mod worker;

// Internal modules
mod connection;
mod parser;
mod session;

// Re-exports for ergonomic API
pub use alarm::{AlarmEvent, AlarmState, AlarmStateMachine};
pub use backoff::ReconnectBackoff;
pub use clock::{Clock, SystemClock};
pub use config::{
    MailAwareConfig, NotificationServer, NotificationServerBuilder, TargetMailbox,
    TargetMailboxBuilder, TimeoutConfig,
};
pub use email_address::EmailAddress;
pub use error::{Error, ErrorCategory, Result};
pub use mailbox::{ImapMailboxClient, MailboxClient, MessageSummary};
pub use notify::{NotificationError, NotificationSink, SmtpNotifier};
pub use proxy::{ProxyAuth, Socks5Proxy};
pub use supervisor::MonitorSupervisor;
pub use worker::{MailboxMonitor, MailboxWorker};
