//! Internal IMAP session management.
//!
//! This module wraps async-imap operations with proper error handling.

use crate::connection::TlsStream;
use crate::error::{Error, Result};
use async_imap::types::Fetch;
use async_imap::Session;
use chrono::{DateTime, NaiveDate, Utc};
use futures::TryStreamExt;
use tracing::{debug, instrument};

/// Type alias for IMAP session over TLS.
pub(crate) type ImapSession = Session<TlsStream>;

/// Type alias for an unauthenticated IMAP client over TLS.
pub(crate) type ImapClient = async_imap::Client<TlsStream>;

/// Mailbox opened by the monitor.
pub(crate) const INBOX: &str = "INBOX";

/// Items requested for each candidate heartbeat. `PEEK` keeps `\Seen` untouched.
const HEADER_FETCH_QUERY: &str = "(UID INTERNALDATE BODY.PEEK[HEADER])";

/// Authentication configuration for IMAP.
pub(crate) struct AuthConfig<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Authenticates to IMAP server and returns a session.
#[instrument(
    name = "session::authenticate",
    skip_all,
    fields(username = %config.username)
)]
pub(crate) async fn authenticate(
    client: ImapClient,
    config: &AuthConfig<'_>,
) -> Result<ImapSession> {
    debug!("Authenticating to IMAP server");

    client
        .login(config.username, config.password)
        .await
        .map_err(|e| Error::ImapLogin {
            username: config.username.to_string(),
            source: e.0,
        })
}

/// Selects a mailbox read-write (typically "INBOX").
#[instrument(name = "session::select", skip(session), fields(mailbox = %mailbox))]
pub(crate) async fn select_mailbox(session: &mut ImapSession, mailbox: &str) -> Result<u32> {
    debug!("Selecting mailbox");

    let mailbox_info = session
        .select(mailbox)
        .await
        .map_err(|source| Error::SelectMailbox {
            mailbox: mailbox.to_string(),
            source,
        })?;

    Ok(mailbox_info.exists)
}

/// Issues a NOOP so the server keeps the connection and reports new state.
#[instrument(name = "session::noop", skip(session))]
pub(crate) async fn noop(session: &mut ImapSession) -> Result<()> {
    session
        .noop()
        .await
        .map_err(|source| Error::ImapNoop { source })
}

/// Searches for UIDs whose subject contains `subject`, optionally limited to
/// messages received on or after `since_date`.
///
/// Returns UIDs in ascending order, so the most recent message is last.
#[instrument(
    name = "session::search_subject",
    skip(session),
    fields(subject = %subject, since = ?since_date)
)]
pub(crate) async fn search_subject(
    session: &mut ImapSession,
    subject: &str,
    since_date: Option<NaiveDate>,
) -> Result<Vec<u32>> {
    let query = build_search_query(subject, since_date);

    let uids = session
        .uid_search(&query)
        .await
        .map_err(|source| Error::ImapSearch { source })?;

    let mut uids_vec: Vec<u32> = uids.into_iter().collect();
    uids_vec.sort_unstable();

    debug!(uid_count = uids_vec.len(), "Found emails");

    Ok(uids_vec)
}

/// Fetches the header block and internal date of a single message.
#[instrument(name = "session::fetch_header", skip(session))]
pub(crate) async fn fetch_header(session: &mut ImapSession, uid: u32) -> Result<Fetch> {
    let uid_str = uid.to_string();

    let fetches: Vec<Fetch> = session
        .uid_fetch(&uid_str, HEADER_FETCH_QUERY)
        .await
        .map_err(|source| Error::ImapFetch { uid, source })?
        .try_collect()
        .await
        .map_err(|source| Error::ImapFetch { uid, source })?;

    // Servers may push unsolicited FETCH responses for other messages.
    fetches
        .into_iter()
        .find(|fetch| fetch.uid == Some(uid))
        .ok_or(Error::MessageNotFound { uid })
}

/// Adds the `\Deleted` flag to every UID in `uids`.
#[instrument(name = "session::store_deleted", skip(session), fields(count = uids.len()))]
pub(crate) async fn store_deleted(session: &mut ImapSession, uids: &[u32]) -> Result<()> {
    let uid_set = format_uid_set(uids);

    let _: Vec<Fetch> = session
        .uid_store(&uid_set, "+FLAGS.SILENT (\\Deleted)")
        .await
        .map_err(|source| Error::ImapStore {
            uid_set: uid_set.clone(),
            source,
        })?
        .try_collect()
        .await
        .map_err(|source| Error::ImapStore {
            uid_set: uid_set.clone(),
            source,
        })?;

    Ok(())
}

/// Permanently removes messages flagged `\Deleted`. Returns the expunged count.
#[instrument(name = "session::expunge", skip(session))]
pub(crate) async fn expunge(session: &mut ImapSession) -> Result<usize> {
    let expunged: Vec<u32> = session
        .expunge()
        .await
        .map_err(|source| Error::ImapExpunge { source })?
        .try_collect()
        .await
        .map_err(|source| Error::ImapExpunge { source })?;

    debug!(expunged = expunged.len(), "Expunged messages");

    Ok(expunged.len())
}

/// Closes the selected mailbox.
#[instrument(name = "session::close", skip(session))]
pub(crate) async fn close(session: &mut ImapSession) -> Result<()> {
    session
        .close()
        .await
        .map_err(|source| Error::ImapClose { source })
}

/// Logs out from IMAP session.
#[instrument(name = "session::logout", skip(session))]
pub(crate) async fn logout(session: &mut ImapSession) -> Result<()> {
    debug!("Logging out");

    session
        .logout()
        .await
        .map_err(|source| Error::ImapLogout { source })?;

    Ok(())
}

/// Builds a `UID SEARCH` query for a subject substring.
///
/// IMAP `SINCE` is day-granular and compares against the server's internal date,
/// so the result may include messages older than the exact cutoff.
fn build_search_query(subject: &str, since_date: Option<NaiveDate>) -> String {
    let charset = if subject.is_ascii() {
        ""
    } else {
        "CHARSET UTF-8 "
    };
    let subject = quote(subject);

    match since_date {
        // IMAP SINCE format: "DD-Mon-YYYY" (e.g., "07-Dec-2025")
        Some(date) => format!("{charset}SINCE {} SUBJECT {subject}", date.format("%d-%b-%Y")),
        None => format!("{charset}SUBJECT {subject}"),
    }
}

/// Day to pass to `SINCE` for messages delivered after `cutoff`.
///
/// Servers compare `SINCE` against the internal date in their own timezone, which
/// can be a calendar day behind UTC. Starting one day earlier keeps such messages
/// in the result; the caller filters to the exact cutoff.
pub(crate) fn since_date(cutoff: DateTime<Utc>) -> Option<NaiveDate> {
    cutoff.date_naive().pred_opt()
}

/// Renders an IMAP quoted string.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Renders UIDs as a comma-separated IMAP sequence set.
fn format_uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
