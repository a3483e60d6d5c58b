//! Mailbox access capability used by the monitor.
//!
//! [`MailboxClient`] is the set of primitives a [`MailboxWorker`](crate::MailboxWorker)
//! needs from a remote mailbox. [`ImapMailboxClient`] implements it over IMAP with
//! TLS; tests and alternative transports can provide their own implementation.
//!
//! A client moves through four states:
//!
//! ```text
//! Disconnected --connect--> Connected --authenticate--> Authenticated --open_read_write--> Selected
//!      ^                                                     |   ^                            |
//!      +------------------------ disconnect -----------------+   +----------- close ----------+
//! ```
//!
//! Calling an operation in the wrong state returns [`Error::NotConnected`].

use crate::config::{TargetMailbox, TimeoutConfig};
use crate::connection;
use crate::error::{Error, Result};
use crate::parser;
use crate::session::{self, AuthConfig, ImapClient, ImapSession, INBOX};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument};

/// Subject and timestamp of one message, as seen by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    /// Server UID of the message.
    pub uid: u32,
    /// Decoded subject line (empty when absent).
    pub subject: String,
    /// When the message was sent, or received when no `Date` header exists.
    pub timestamp: DateTime<Utc>,
}

impl MessageSummary {
    /// Builds a summary from a raw RFC 5322 header block and the server's
    /// internal date, as [`MailboxClient::fetch_message`] implementations do.
    ///
    /// # Errors
    ///
    /// Fails when the header block cannot be parsed, or when neither a usable
    /// `Date` header nor an internal date is available.
    pub fn from_header(
        uid: u32,
        header: Option<&[u8]>,
        internal_date: Option<DateTime<FixedOffset>>,
    ) -> Result<Self> {
        parser::parse_summary(uid, header, internal_date)
    }
}

/// Primitives for accessing one remote mailbox.
///
/// All operations are fallible; any error is treated by the worker as a broken
/// connection. Calls on one client are always issued sequentially.
#[async_trait]
pub trait MailboxClient: Send {
    /// Opens a transport connection to the target's server.
    async fn connect(&mut self, target: &TargetMailbox) -> Result<()>;

    /// Logs in on a connected transport.
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<()>;

    /// Opens the inbox read-write. Returns the number of messages it holds.
    async fn open_read_write(&mut self) -> Result<u32>;

    /// Returns UIDs of messages whose subject contains `subject_contains`,
    /// optionally only those delivered on or after the day of `delivered_after`.
    ///
    /// Ordered oldest first, so the most recent match is last. The date filter is
    /// coarse and may over-match.
    async fn search(
        &mut self,
        subject_contains: &str,
        delivered_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<u32>>;

    /// Fetches subject and timestamp for one message.
    async fn fetch_message(&mut self, uid: u32) -> Result<MessageSummary>;

    /// Marks messages as deleted.
    async fn flag_deleted(&mut self, uids: &[u32]) -> Result<()>;

    /// Permanently removes messages marked as deleted.
    async fn expunge(&mut self) -> Result<()>;

    /// Protocol no-op that keeps the session alive.
    async fn keepalive(&mut self) -> Result<()>;

    /// Closes the open mailbox.
    async fn close(&mut self) -> Result<()>;

    /// Ends the session and drops the transport.
    async fn disconnect(&mut self) -> Result<()>;

    /// Returns `true` while a mailbox is open.
    fn is_open(&self) -> bool;

    /// Returns `true` while a transport connection exists.
    fn is_connected(&self) -> bool;
}

enum State {
    Disconnected,
    Connected(ImapClient),
    Authenticated(ImapSession),
    Selected(ImapSession),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Disconnected => "disconnected",
            State::Connected(_) => "connected",
            State::Authenticated(_) => "authenticated",
            State::Selected(_) => "selected",
        }
    }
}

/// [`MailboxClient`] over IMAP with TLS, optionally through a SOCKS5 proxy.
///
/// Every protocol call is bounded by the target's [`TimeoutConfig`].
pub struct ImapMailboxClient {
    state: State,
    timeouts: TimeoutConfig,
}

impl Default for ImapMailboxClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ImapMailboxClient {
    /// Creates a disconnected client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Disconnected,
            timeouts: TimeoutConfig::default(),
        }
    }

    fn selected_session(&mut self, operation: &'static str) -> Result<&mut ImapSession> {
        match &mut self.state {
            State::Selected(session) => Ok(session),
            _ => Err(Error::NotConnected { operation }),
        }
    }
}

impl std::fmt::Debug for ImapMailboxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapMailboxClient")
            .field("state", &self.state.name())
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// Runs `fut` with a deadline, mapping expiry to `on_timeout()`.
async fn timed<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
    on_timeout: impl FnOnce() -> Error,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| on_timeout())?
}

#[async_trait]
impl MailboxClient for ImapMailboxClient {
    #[instrument(
        name = "ImapMailboxClient::connect",
        skip_all,
        fields(
            imap_host = %target.host,
            proxy_enabled = target.proxy.is_some()
        )
    )]
    async fn connect(&mut self, target: &TargetMailbox) -> Result<()> {
        self.timeouts = target.timeouts.clone();
        let target_addr = target.server_address();
        let limit = self.timeouts.connect;

        let tls_stream = timed(
            limit,
            connection::establish_tls_connection(
                &target.host,
                &target_addr,
                target.proxy.as_ref(),
                target.ignore_ssl_certificates,
            ),
            || Error::ConnectTimeout {
                target: target_addr.clone(),
                timeout: limit,
            },
        )
        .await?;

        debug!("TLS connection established");

        self.state = State::Connected(async_imap::Client::new(tls_stream));
        Ok(())
    }

    #[instrument(name = "ImapMailboxClient::authenticate", skip_all, fields(username = %username))]
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        let client = match std::mem::replace(&mut self.state, State::Disconnected) {
            State::Connected(client) => client,
            other => {
                self.state = other;
                return Err(Error::NotConnected {
                    operation: "authenticate",
                });
            }
        };

        let limit = self.timeouts.auth;
        let auth_config = AuthConfig { username, password };
        let session = timed(limit, session::authenticate(client, &auth_config), || {
            Error::AuthTimeout {
                username: username.to_string(),
                timeout: limit,
            }
        })
        .await?;

        debug!("Authenticated");

        self.state = State::Authenticated(session);
        Ok(())
    }

    #[instrument(name = "ImapMailboxClient::open_read_write", skip(self))]
    async fn open_read_write(&mut self) -> Result<u32> {
        let limit = self.timeouts.select;
        let mut session = match std::mem::replace(&mut self.state, State::Disconnected) {
            State::Authenticated(session) | State::Selected(session) => session,
            other => {
                self.state = other;
                return Err(Error::NotConnected {
                    operation: "open_read_write",
                });
            }
        };

        let result = timed(limit, session::select_mailbox(&mut session, INBOX), || {
            Error::SelectTimeout {
                mailbox: INBOX.to_string(),
                timeout: limit,
            }
        })
        .await;

        match result {
            Ok(exists) => {
                debug!(exists, "Selected INBOX");
                self.state = State::Selected(session);
                Ok(exists)
            }
            Err(e) => {
                self.state = State::Authenticated(session);
                Err(e)
            }
        }
    }

    async fn search(
        &mut self,
        subject_contains: &str,
        delivered_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<u32>> {
        let limit = self.timeouts.search;
        let session = self.selected_session("search")?;
        let since_date = delivered_after.and_then(session::since_date);

        timed(
            limit,
            session::search_subject(session, subject_contains, since_date),
            || Error::SearchTimeout { timeout: limit },
        )
        .await
    }

    async fn fetch_message(&mut self, uid: u32) -> Result<MessageSummary> {
        let limit = self.timeouts.fetch;
        let session = self.selected_session("fetch_message")?;

        let fetch = timed(limit, session::fetch_header(session, uid), || {
            Error::FetchTimeout {
                uid,
                timeout: limit,
            }
        })
        .await?;

        parser::summary_from_fetch(uid, &fetch)
    }

    async fn flag_deleted(&mut self, uids: &[u32]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let limit = self.timeouts.store;
        let session = self.selected_session("flag_deleted")?;

        timed(limit, session::store_deleted(session, uids), || {
            Error::StoreTimeout {
                operation: "store",
                timeout: limit,
            }
        })
        .await
    }

    async fn expunge(&mut self) -> Result<()> {
        let limit = self.timeouts.store;
        let session = self.selected_session("expunge")?;

        timed(limit, session::expunge(session), || Error::StoreTimeout {
            operation: "expunge",
            timeout: limit,
        })
        .await
        .map(|_| ())
    }

    async fn keepalive(&mut self) -> Result<()> {
        let limit = self.timeouts.search;
        let session = match &mut self.state {
            State::Authenticated(session) | State::Selected(session) => session,
            _ => {
                return Err(Error::NotConnected {
                    operation: "keepalive",
                })
            }
        };

        timed(limit, session::noop(session), || Error::NoopTimeout {
            timeout: limit,
        })
        .await
    }

    #[instrument(name = "ImapMailboxClient::close", skip(self))]
    async fn close(&mut self) -> Result<()> {
        let limit = self.timeouts.logout;
        let mut session = match std::mem::replace(&mut self.state, State::Disconnected) {
            State::Selected(session) => session,
            other => {
                self.state = other;
                return Err(Error::NotConnected { operation: "close" });
            }
        };

        let result = timed(limit, session::close(&mut session), || {
            Error::LogoutTimeout { timeout: limit }
        })
        .await;

        self.state = State::Authenticated(session);
        result
    }

    #[instrument(name = "ImapMailboxClient::disconnect", skip(self))]
    async fn disconnect(&mut self) -> Result<()> {
        let limit = self.timeouts.logout;

        // The transport is dropped on every path, including a failed logout.
        match std::mem::replace(&mut self.state, State::Disconnected) {
            State::Authenticated(mut session) | State::Selected(mut session) => {
                timed(limit, session::logout(&mut session), || {
                    Error::LogoutTimeout { timeout: limit }
                })
                .await
            }
            State::Connected(_) | State::Disconnected => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        matches!(self.state, State::Selected(_))
    }

    fn is_connected(&self) -> bool {
        !matches!(self.state, State::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_client_is_disconnected() {
        let client = ImapMailboxClient::new();
        assert!(!client.is_connected());
        assert!(!client.is_open());
        assert!(format!("{client:?}").contains("disconnected"));
    }

    #[tokio::test]
    async fn test_operations_require_session() {
        let mut client = ImapMailboxClient::new();

        let err = client.search("heartbeat", None).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected { operation: "search" }));

        let err = client.authenticate("user", "pass").await.unwrap_err();
        assert!(matches!(
            err,
            Error::NotConnected {
                operation: "authenticate"
            }
        ));

        assert!(client.keepalive().await.is_err());
        assert!(client.close().await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_when_disconnected_is_noop() {
        let mut client = ImapMailboxClient::new();
        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_flag_nothing_is_noop() {
        let mut client = ImapMailboxClient::new();
        client.flag_deleted(&[]).await.unwrap();
    }
}
