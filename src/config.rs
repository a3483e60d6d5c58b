//! Configuration for mailbox monitors and the notification channel.
//!
//! Configuration is read from a JSON file (see [`MailAwareConfig::load`]) or built
//! in code with [`TargetMailbox::builder`] and [`NotificationServer::builder`]:
//!
//! ```
//! use mail_aware::TargetMailbox;
//!
//! let target = TargetMailbox::builder()
//!     .display_name("nightly backups")
//!     .host("imap.example.com")
//!     .username("watchdog@example.com")
//!     .password("app-password")
//!     .subject_snippet("[backup] completed")
//!     .alarm_threshold_secs(1800)
//!     .build()
//!     .expect("valid target");
//!
//! assert_eq!(target.server_address(), "imap.example.com:993");
//! ```
//!
//! The file layout mirrors the builder fields with camelCase keys:
//!
//! ```json
//! {
//!   "targetMailServers": [{
//!     "hostAddress": "imap.example.com",
//!     "username": "watchdog@example.com",
//!     "password": "secret",
//!     "targetSubjectSnippet": "[backup] completed",
//!     "alarmThresholdSecs": 1800,
//!     "pollingFrequencyMs": 10000,
//!     "displayName": "nightly backups"
//!   }],
//!   "notificationMailServer": {
//!     "hostAddress": "smtp.example.com",
//!     "fromAddress": "watchdog@example.com",
//!     "recipients": ["oncall@example.com"]
//!   }
//! }
//! ```

use crate::error::{Error, Result};
use crate::proxy::Socks5Proxy;
use email_address::EmailAddress;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// The minimum delay before reconnecting to a mail server.
pub const RECONNECT_MINIMUM_DELAY_SECS: u64 = 3;

/// The maximum delay before reconnecting to a mail server.
pub const RECONNECT_MAXIMUM_DELAY_SECS: u64 = 300;

/// Configuration file read when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// IMAPS port used when a target leaves `hostPort` at 0.
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// SMTP submission port used when the notification server leaves `hostPort` at 0.
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Largest accepted `alarmThresholdSecs` (about 68 years).
pub const MAXIMUM_ALARM_THRESHOLD_SECS: u64 = 2_147_483_647;

const DEFAULT_ALARM_THRESHOLD_SECS: u64 = 1800;
const DEFAULT_POLLING_FREQUENCY_MS: u64 = 10_000;
const MINIMUM_POLLING_FREQUENCY_MS: u64 = 1000;

/// One mailbox to watch for heartbeat messages.
///
/// Create using [`TargetMailbox::builder()`]. Immutable once built.
///
/// The password is stored as a [`SecretString`] and redacted from `Debug` output.
#[derive(Clone)]
pub struct TargetMailbox {
    /// Name used in logs and notifications.
    pub display_name: String,
    /// IMAP server hostname.
    pub host: String,
    /// IMAP server port (0 selects [`DEFAULT_IMAP_PORT`]).
    pub port: u16,
    username: String,
    password: SecretString,
    /// Accept any server certificate.
    pub ignore_ssl_certificates: bool,
    /// Substring a message subject must contain to count as a heartbeat.
    pub subject_snippet: String,
    /// Maximum silence before the alarm is raised.
    pub alarm_threshold: Duration,
    /// Delay between poll iterations.
    pub poll_interval: Duration,
    /// Optional SOCKS5 proxy for the IMAP connection.
    pub proxy: Option<Socks5Proxy>,
    /// Per-operation protocol timeouts.
    pub timeouts: TimeoutConfig,
}

impl std::fmt::Debug for TargetMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetMailbox")
            .field("display_name", &self.display_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("ignore_ssl_certificates", &self.ignore_ssl_certificates)
            .field("subject_snippet", &self.subject_snippet)
            .field("alarm_threshold", &self.alarm_threshold)
            .field("poll_interval", &self.poll_interval)
            .field("proxy", &self.proxy)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl TargetMailbox {
    /// Creates a new target builder.
    #[must_use]
    pub fn builder() -> TargetMailboxBuilder {
        TargetMailboxBuilder::default()
    }

    /// Returns the login username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the password as a string slice.
    ///
    /// The password is intentionally not directly accessible to prevent accidental logging.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Returns the configured port, or the IMAPS default when it is 0.
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_IMAP_PORT
        } else {
            self.port
        }
    }

    /// Returns the full IMAP server address as "host:port".
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.effective_port())
    }
}

/// Timeout configuration for IMAP operations.
///
/// Every protocol call is bounded so that a stalled server surfaces as an error
/// and forces a reconnect instead of hanging the worker.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for selecting a mailbox.
    pub select: Duration,
    /// Timeout for UID searches and NOOP.
    pub search: Duration,
    /// Timeout for fetching message headers.
    pub fetch: Duration,
    /// Timeout for flag stores and expunge.
    pub store: Duration,
    /// Timeout for close and logout.
    pub logout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            select: Duration::from_secs(10),
            search: Duration::from_secs(10),
            fetch: Duration::from_secs(30),
            store: Duration::from_secs(10),
            logout: Duration::from_secs(5),
        }
    }
}

/// Builder for [`TargetMailbox`].
#[derive(Debug, Default)]
pub struct TargetMailboxBuilder {
    display_name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    ignore_ssl_certificates: bool,
    subject_snippet: Option<String>,
    alarm_threshold_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
    proxy: Option<Socks5Proxy>,
    timeouts: Option<TimeoutConfig>,
}

impl TargetMailboxBuilder {
    /// Sets the display name (required, non-empty).
    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the IMAP server hostname (required).
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the IMAP server port. 0 selects the default (993).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the login username (required).
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password (required).
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Accepts any server certificate when `true`.
    #[must_use]
    pub fn ignore_ssl_certificates(mut self, ignore: bool) -> Self {
        self.ignore_ssl_certificates = ignore;
        self
    }

    /// Sets the heartbeat subject substring (required, non-empty).
    #[must_use]
    pub fn subject_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.subject_snippet = Some(snippet.into());
        self
    }

    /// Sets the alarm threshold in seconds. Must be greater than 0. Default 1800.
    #[must_use]
    pub fn alarm_threshold_secs(mut self, secs: u64) -> Self {
        self.alarm_threshold_secs = Some(secs);
        self
    }

    /// Sets the poll interval in milliseconds. Must be greater than 1000. Default 10000.
    #[must_use]
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = Some(ms);
        self
    }

    /// Routes the IMAP connection through a SOCKS5 proxy.
    #[must_use]
    pub fn proxy(mut self, proxy: Socks5Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Builds the target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a required field is missing or a value
    /// is out of range.
    pub fn build(self) -> Result<TargetMailbox> {
        let display_name = required_non_empty(self.display_name, "displayName")?;
        let host = required_non_empty(self.host, "hostAddress")?;
        let username = required_non_empty(self.username, "username")?;
        let password = self.password.ok_or_else(|| invalid("password is required"))?;
        let subject_snippet = required_non_empty(self.subject_snippet, "targetSubjectSnippet")?;

        let threshold_secs = self
            .alarm_threshold_secs
            .unwrap_or(DEFAULT_ALARM_THRESHOLD_SECS);
        if threshold_secs == 0 {
            return Err(invalid("alarmThresholdSecs must be greater than 0"));
        }
        if threshold_secs > MAXIMUM_ALARM_THRESHOLD_SECS {
            return Err(invalid(format!(
                "alarmThresholdSecs must be at most {MAXIMUM_ALARM_THRESHOLD_SECS}"
            )));
        }

        let poll_ms = self.poll_interval_ms.unwrap_or(DEFAULT_POLLING_FREQUENCY_MS);
        if poll_ms <= MINIMUM_POLLING_FREQUENCY_MS {
            return Err(invalid(format!(
                "pollingFrequencyMs must be greater than {MINIMUM_POLLING_FREQUENCY_MS}"
            )));
        }

        Ok(TargetMailbox {
            display_name,
            host,
            port: self.port.unwrap_or(0),
            username,
            password: SecretString::from(password),
            ignore_ssl_certificates: self.ignore_ssl_certificates,
            subject_snippet,
            alarm_threshold: Duration::from_secs(threshold_secs),
            poll_interval: Duration::from_millis(poll_ms),
            proxy: self.proxy,
            timeouts: self.timeouts.unwrap_or_default(),
        })
    }
}

/// The outbound mail server used to deliver alarm notifications.
#[derive(Clone)]
pub struct NotificationServer {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port (0 selects [`DEFAULT_SMTP_PORT`]).
    pub port: u16,
    username: Option<String>,
    password: SecretString,
    /// Skip certificate and hostname verification.
    pub ignore_ssl_certificates: bool,
    /// Prefix placed before "Alarm Status Update" in the subject. May be empty.
    pub subject_prefix: String,
    /// Sender address.
    pub from_address: EmailAddress,
    /// Recipient addresses (never empty).
    pub recipients: Vec<EmailAddress>,
}

impl std::fmt::Debug for NotificationServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationServer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("ignore_ssl_certificates", &self.ignore_ssl_certificates)
            .field("subject_prefix", &self.subject_prefix)
            .field("from_address", &self.from_address.as_str())
            .field("recipients", &self.recipients.len())
            .finish()
    }
}

impl NotificationServer {
    /// Creates a new notification server builder.
    #[must_use]
    pub fn builder() -> NotificationServerBuilder {
        NotificationServerBuilder::default()
    }

    /// Returns the SMTP username, if authentication is configured.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Returns the SMTP password.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Returns the configured port, or the submission default when it is 0.
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_SMTP_PORT
        } else {
            self.port
        }
    }
}

/// Builder for [`NotificationServer`].
#[derive(Debug, Default)]
pub struct NotificationServerBuilder {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    ignore_ssl_certificates: bool,
    subject_prefix: Option<String>,
    from_address: Option<String>,
    recipients: Vec<String>,
}

impl NotificationServerBuilder {
    /// Sets the SMTP hostname (required).
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the SMTP port. 0 selects the default (587).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the SMTP username. An empty username disables authentication.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the SMTP password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Skips certificate verification when `true`.
    #[must_use]
    pub fn ignore_ssl_certificates(mut self, ignore: bool) -> Self {
        self.ignore_ssl_certificates = ignore;
        self
    }

    /// Sets the subject prefix.
    #[must_use]
    pub fn subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = Some(prefix.into());
        self
    }

    /// Sets the sender address (required).
    #[must_use]
    pub fn from_address(mut self, address: impl Into<String>) -> Self {
        self.from_address = Some(address.into());
        self
    }

    /// Adds a recipient. At least one is required.
    #[must_use]
    pub fn recipient(mut self, address: impl Into<String>) -> Self {
        self.recipients.push(address.into());
        self
    }

    /// Adds several recipients.
    #[must_use]
    pub fn recipients<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipients.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Builds the notification server configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the host or sender is missing, there are no recipients,
    /// or any address is malformed.
    pub fn build(self) -> Result<NotificationServer> {
        let host = required_non_empty(self.host, "notification hostAddress")?;
        let from_raw = required_non_empty(self.from_address, "fromAddress")?;
        let from_address = validate_email(&from_raw)?;

        if self.recipients.is_empty() {
            return Err(invalid("at least one recipient is required"));
        }
        let recipients = self
            .recipients
            .iter()
            .map(|r| validate_email(r))
            .collect::<Result<Vec<_>>>()?;

        Ok(NotificationServer {
            host,
            port: self.port.unwrap_or(0),
            username: self.username.filter(|u| !u.is_empty()),
            password: SecretString::from(self.password.unwrap_or_default()),
            ignore_ssl_certificates: self.ignore_ssl_certificates,
            subject_prefix: self.subject_prefix.unwrap_or_default(),
            from_address,
            recipients,
        })
    }
}

/// Validated application configuration.
#[derive(Debug, Clone)]
pub struct MailAwareConfig {
    /// Targets that passed validation.
    pub targets: Vec<TargetMailbox>,
    /// Where notifications are sent.
    pub notification: NotificationServer,
    /// Number of targets rejected during validation.
    pub skipped_targets: usize,
}

impl MailAwareConfig {
    /// Reads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, the notification
    /// server block is invalid, or no target is valid. Individual invalid targets
    /// are logged and skipped.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| Error::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&json, path)
    }

    /// Parses and validates configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::parse(json, Path::new("<inline>"))
    }

    fn parse(json: &str, path: &Path) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json).map_err(|source| Error::ParseConfig {
            path: PathBuf::from(path),
            source,
        })?;

        let notification = raw.notification_mail_server.into_builder().build()?;

        let total = raw.target_mail_servers.len();
        let mut targets = Vec::with_capacity(total);
        for (index, raw_target) in raw.target_mail_servers.into_iter().enumerate() {
            let label = raw_target.label(index);
            match raw_target.into_builder().build() {
                Ok(target) => targets.push(target),
                Err(e) => warn!(mailbox = %label, error = %e, "Skipping invalid target mail server"),
            }
        }

        if targets.is_empty() {
            return Err(invalid("no valid target mail servers configured"));
        }

        debug!(valid = targets.len(), total, "Configuration loaded");

        Ok(Self {
            skipped_targets: total - targets.len(),
            targets,
            notification,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File representation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default)]
    target_mail_servers: Vec<RawTargetMailServer>,
    notification_mail_server: RawNotificationMailServer,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawTargetMailServer {
    host_address: Option<String>,
    host_port: u16,
    username: Option<String>,
    password: Option<String>,
    ignore_ssl_certificates: bool,
    target_subject_snippet: Option<String>,
    alarm_threshold_secs: Option<u64>,
    polling_frequency_ms: Option<u64>,
    display_name: Option<String>,
    proxy: Option<Socks5Proxy>,
}

impl RawTargetMailServer {
    fn label(&self, index: usize) -> String {
        self.display_name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.host_address.clone())
            .unwrap_or_else(|| format!("#{index}"))
    }

    fn into_builder(self) -> TargetMailboxBuilder {
        let mut builder = TargetMailbox::builder()
            .port(self.host_port)
            .ignore_ssl_certificates(self.ignore_ssl_certificates);
        builder.display_name = self.display_name;
        builder.host = self.host_address;
        builder.username = self.username;
        builder.password = self.password;
        builder.subject_snippet = self.target_subject_snippet;
        builder.alarm_threshold_secs = self.alarm_threshold_secs;
        builder.poll_interval_ms = self.polling_frequency_ms;
        builder.proxy = self.proxy;
        builder
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawNotificationMailServer {
    host_address: Option<String>,
    host_port: u16,
    username: Option<String>,
    password: Option<String>,
    ignore_ssl_certificates: bool,
    subject_prefix: Option<String>,
    from_address: Option<String>,
    recipients: Vec<String>,
}

impl RawNotificationMailServer {
    fn into_builder(self) -> NotificationServerBuilder {
        NotificationServerBuilder {
            host: self.host_address,
            port: Some(self.host_port),
            username: self.username,
            password: self.password,
            ignore_ssl_certificates: self.ignore_ssl_certificates,
            subject_prefix: self.subject_prefix,
            from_address: self.from_address,
            recipients: self.recipients,
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidConfig {
        message: message.into(),
    }
}

fn required_non_empty(value: Option<String>, field: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| invalid(format!("{field} is required")))
}

/// Validates an email address format.
fn validate_email(email: &str) -> Result<EmailAddress> {
    EmailAddress::parse_with_options(email, email_address::Options::default()).map_err(|_| {
        Error::InvalidEmailFormat {
            email: email.to_string(),
        }
    })
}
