//! Internal module for turning fetched headers into a [`MessageSummary`].

use crate::error::{Error, Result};
use crate::mailbox::MessageSummary;
use chrono::{DateTime, FixedOffset, Utc};
use mailparse::{dateparse, parse_headers, MailHeaderMap};
use tracing::{debug, warn};

/// Builds a summary from an IMAP fetch result.
pub(crate) fn summary_from_fetch(
    uid: u32,
    message: &async_imap::types::Fetch,
) -> Result<MessageSummary> {
    parse_summary(uid, message.header(), message.internal_date())
}

/// Extracts subject and timestamp from a raw header block.
///
/// The `Date` header is preferred because it reflects when the heartbeat was
/// produced. When it is missing or malformed, the server's internal (arrival)
/// date is used instead.
pub(crate) fn parse_summary(
    uid: u32,
    header: Option<&[u8]>,
    internal_date: Option<DateTime<FixedOffset>>,
) -> Result<MessageSummary> {
    let (subject, header_date) = match header {
        Some(raw) => {
            let (headers, _) =
                parse_headers(raw).map_err(|source| Error::ParseHeaders { uid, source })?;
            let subject = headers.get_first_value("Subject").unwrap_or_default();
            let date = headers.get_first_value("Date").and_then(|value| {
                let parsed = parse_date_header(&value);
                if parsed.is_none() {
                    warn!(uid, date = %value, "Unparseable Date header");
                }
                parsed
            });
            (subject, date)
        }
        None => {
            debug!(uid, "Message has no header section");
            (String::new(), None)
        }
    };

    let timestamp = header_date
        .or_else(|| internal_date.map(|d| d.with_timezone(&Utc)))
        .ok_or(Error::MissingTimestamp { uid })?;

    Ok(MessageSummary {
        uid,
        subject,
        timestamp,
    })
}

/// Parses an RFC 2822 `Date` value, tolerating the sloppier forms mailparse accepts.
///
/// `dateparse` yields 0 for input it cannot make sense of, so anything at or
/// before the epoch is treated as unparseable.
fn parse_date_header(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value.trim()) {
        return Some(date.with_timezone(&Utc));
    }
    match dateparse(value) {
        Ok(secs) if secs > 0 => DateTime::<Utc>::from_timestamp(secs, 0),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "mailparse rejected Date header");
            None
        }
    }
}
