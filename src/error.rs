//! Error types for the mail-aware crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are categorized by their retryability - see [`Error::is_retryable`].
//!
//! Inside a running worker, retryable errors never escape: they end the current
//! session and trigger a reconnect with backoff. Contract errors
//! ([`ErrorCategory::Contract`]) indicate a caller bug and are returned immediately.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running a mailbox monitor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration / validation errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid email address format.
    #[error("invalid email format: {email}")]
    InvalidEmailFormat {
        /// The invalid email address.
        email: String,
    },

    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Configuration file could not be read.
    #[error("failed to read configuration file {}", path.display())]
    ReadConfig {
        /// Path of the configuration file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid JSON for the expected shape.
    #[error("failed to parse configuration file {}", path.display())]
    ParseConfig {
        /// Path of the configuration file.
        path: PathBuf,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network / connection errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to connect via SOCKS5 proxy.
    #[error("failed to connect via SOCKS5 proxy {proxy_host} to {target}")]
    Socks5Connect {
        /// The SOCKS5 proxy hostname.
        proxy_host: String,
        /// The target address.
        target: String,
        /// The underlying SOCKS5 error.
        #[source]
        source: tokio_socks::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Timeout errors (RETRYABLE - a hung server is treated like a dropped one)
    // ─────────────────────────────────────────────────────────────────────────
    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {username} after {timeout:?}")]
    AuthTimeout {
        /// The username used for authentication.
        username: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Mailbox selection timeout.
    #[error("mailbox selection timeout for '{mailbox}' after {timeout:?}")]
    SelectTimeout {
        /// The mailbox name.
        mailbox: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// UID search timeout.
    #[error("search timeout after {timeout:?}")]
    SearchTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Message fetch timeout.
    #[error("message fetch timeout for UID {uid} after {timeout:?}")]
    FetchTimeout {
        /// The UID being fetched.
        uid: u32,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Flag store or expunge timeout.
    #[error("{operation} timeout after {timeout:?}")]
    StoreTimeout {
        /// The IMAP command that timed out.
        operation: &'static str,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Close or logout timeout.
    #[error("logout timeout after {timeout:?}")]
    LogoutTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Keepalive NOOP timed out.
    #[error("NOOP timed out after {timeout:?}")]
    NoopTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IMAP protocol errors (RETRYABLE - could be transient server issues)
    // ─────────────────────────────────────────────────────────────────────────
    /// IMAP login failed.
    #[error("IMAP login failed for {username}")]
    ImapLogin {
        /// The username used for login.
        username: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to select mailbox.
    #[error("failed to select mailbox '{mailbox}'")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP NOOP failed.
    #[error("IMAP NOOP command failed")]
    ImapNoop {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP search failed.
    #[error("IMAP search failed")]
    ImapSearch {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP fetch failed.
    #[error("IMAP fetch failed for UID {uid}")]
    ImapFetch {
        /// The UID that failed.
        uid: u32,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// The server returned no data for a UID it had just listed.
    #[error("message with UID {uid} not found")]
    MessageNotFound {
        /// The missing UID.
        uid: u32,
    },

    /// IMAP STORE of the deleted flag failed.
    #[error("failed to flag UIDs {uid_set} as deleted")]
    ImapStore {
        /// The UID set being flagged.
        uid_set: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP EXPUNGE failed.
    #[error("IMAP expunge failed")]
    ImapExpunge {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP CLOSE failed.
    #[error("IMAP close failed")]
    ImapClose {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Header parsing errors (NOT retryable - malformed content won't change)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to parse message headers.
    #[error("failed to parse headers of UID {uid}")]
    ParseHeaders {
        /// The UID whose headers failed to parse.
        uid: u32,
        /// The underlying parse error.
        #[source]
        source: mailparse::MailParseError,
    },

    /// Neither a `Date` header nor an internal date was available.
    #[error("message with UID {uid} has no usable timestamp")]
    MissingTimestamp {
        /// The UID of the message.
        uid: u32,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Programming-contract errors (NOT retryable - caller bug)
    // ─────────────────────────────────────────────────────────────────────────
    /// The alarm state machine was used before `initialize`.
    #[error("alarm state machine is not initialized")]
    Uninitialized,

    /// `start` was called on a monitor that is already running.
    #[error("already monitoring mailbox '{target}'")]
    AlreadyRunning {
        /// Display name of the target.
        target: String,
    },

    /// An operation that needs a live session was called while disconnected.
    #[error("not connected: {operation} requires an open mailbox session")]
    NotConnected {
        /// The operation that was attempted.
        operation: &'static str,
    },
}

impl Error {
    /// Returns `true` if this error represents a transient failure that might succeed on retry.
    ///
    /// The worker loop does not consult this to decide whether to reconnect (it
    /// always does); it is exposed for callers driving a [`MailboxClient`] directly.
    ///
    /// [`MailboxClient`]: crate::MailboxClient
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.category() {
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Protocol => true,
            ErrorCategory::Configuration | ErrorCategory::Parse | ErrorCategory::Contract => false,
        }
    }

    /// Returns the error category for metrics/logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidEmailFormat { .. }
            | Error::InvalidConfig { .. }
            | Error::ReadConfig { .. }
            | Error::ParseConfig { .. }
            | Error::InvalidDnsName { .. } => ErrorCategory::Configuration,

            Error::TcpConnect { .. } | Error::TlsConnect { .. } | Error::Socks5Connect { .. } => {
                ErrorCategory::Network
            }

            Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::StoreTimeout { .. }
            | Error::LogoutTimeout { .. }
            | Error::NoopTimeout { .. } => ErrorCategory::Timeout,

            Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapNoop { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::MessageNotFound { .. }
            | Error::ImapStore { .. }
            | Error::ImapExpunge { .. }
            | Error::ImapClose { .. }
            | Error::ImapLogout { .. } => ErrorCategory::Protocol,

            Error::ParseHeaders { .. } | Error::MissingTimestamp { .. } => ErrorCategory::Parse,

            Error::Uninitialized | Error::AlreadyRunning { .. } | Error::NotConnected { .. } => {
                ErrorCategory::Contract
            }
        }
    }
}

/// Error categories for metrics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// Network connectivity errors.
    Network,
    /// Timeout errors.
    Timeout,
    /// IMAP protocol errors.
    Protocol,
    /// Header parsing errors.
    Parse,
    /// API misuse by the caller.
    Contract,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Parse => write!(f, "parse"),
            ErrorCategory::Contract => write!(f, "contract"),
        }
    }
}
