//! Delivery of alarm state changes.
//!
//! Workers hand every [`AlarmEvent`] to a [`NotificationSink`] through
//! [`dispatch`]. A failed delivery is logged and dropped: the alarm state has
//! already changed and is never rolled back.
//!
//! [`SmtpNotifier`] is the production sink. It sends one plain-text message per
//! recipient over SMTP.

use crate::alarm::AlarmEvent;
use crate::config::NotificationServer;
use async_trait::async_trait;
use futures::future::join_all;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

/// Port on which SMTP servers expect TLS from the first byte.
const IMPLICIT_TLS_PORT: u16 = 465;

/// Errors raised while delivering a notification.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotificationError {
    /// An address could not be used as a mailbox.
    #[error("invalid address '{address}'")]
    InvalidAddress {
        /// The offending address.
        address: String,
        /// Underlying error.
        #[source]
        source: lettre::address::AddressError,
    },

    /// The message could not be assembled.
    #[error("failed to build notification message")]
    BuildMessage(#[from] lettre::error::Error),

    /// TLS parameters for the SMTP server could not be created.
    #[error("failed to configure TLS for SMTP server '{host}'")]
    Tls {
        /// SMTP host.
        host: String,
        /// Underlying error.
        #[source]
        source: lettre::transport::smtp::Error,
    },

    /// At least one recipient did not receive the notification.
    #[error("notification delivery failed for {failed} of {total} recipient(s)")]
    Delivery {
        /// Number of failed sends.
        failed: usize,
        /// Number of recipients.
        total: usize,
    },

    /// Any other sink-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Consumer of alarm transitions.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Reports that the named target went silent for longer than its threshold.
    async fn notify_alarm(&self, target: &str) -> Result<(), NotificationError>;

    /// Reports that the named target is heard from again.
    async fn notify_normal(&self, target: &str) -> Result<(), NotificationError>;
}

/// Forwards `event` to `sink`. Delivery failures are logged, not returned.
pub async fn dispatch(sink: &dyn NotificationSink, event: &AlarmEvent) {
    let result = match event {
        AlarmEvent::Raised { target } => sink.notify_alarm(target).await,
        AlarmEvent::Cleared { target } => sink.notify_normal(target).await,
    };

    if let Err(e) = result {
        error!(mailbox = %event.target(), error = %e, "Failed to send notification");
    }
}

/// Body of the message sent when a target goes silent.
#[must_use]
pub fn render_alarm_body(target: &str) -> String {
    format!(
        "Mailbox: {target}\nCurrent state: Alarm\nMessage: The alarm threshold has been exceeded."
    )
}

/// Body of the message sent when a target recovers.
#[must_use]
pub fn render_normal_body(target: &str) -> String {
    format!("Mailbox: {target}\nCurrent state: Normal\nMessage: The system is functioning properly.")
}

/// Subject shared by both notification kinds.
#[must_use]
pub fn render_subject(prefix: &str) -> String {
    format!("{prefix} Alarm Status Update").trim().to_string()
}

/// [`NotificationSink`] that mails every configured recipient.
///
/// Port 465 uses implicit TLS; every other port upgrades with STARTTLS when
/// the server offers it. Credentials are sent only if a username is set.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
    subject: String,
}

impl std::fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("from", &self.from.to_string())
            .field("recipients", &self.recipients.len())
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl SmtpNotifier {
    /// Creates a notifier for `server`.
    ///
    /// No connection is made until the first notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError::Tls`] if TLS parameters cannot be built, or
    /// [`NotificationError::InvalidAddress`] if an address is rejected by the
    /// mail builder.
    pub fn new(server: &NotificationServer) -> Result<Self, NotificationError> {
        let port = server.effective_port();

        let tls_parameters = TlsParameters::builder(server.host.clone())
            .dangerous_accept_invalid_certs(server.ignore_ssl_certificates)
            .build()
            .map_err(|source| NotificationError::Tls {
                host: server.host.clone(),
                source,
            })?;

        let tls = if port == IMPLICIT_TLS_PORT {
            Tls::Wrapper(tls_parameters)
        } else {
            Tls::Opportunistic(tls_parameters)
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&server.host)
            .port(port)
            .tls(tls);
        if let Some(username) = server.username() {
            builder = builder.credentials(Credentials::new(
                username.to_string(),
                server.password().to_string(),
            ));
        }

        let from = to_mailbox(server.from_address.as_str())?;
        let recipients = server
            .recipients
            .iter()
            .map(|address| to_mailbox(address.as_str()))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            smtp_host = %server.host,
            port,
            recipients = recipients.len(),
            "SMTP notifier configured"
        );

        Ok(Self {
            transport: builder.build(),
            from,
            recipients,
            subject: render_subject(&server.subject_prefix),
        })
    }

    /// Sends `body` to every recipient concurrently.
    #[instrument(name = "SmtpNotifier::send_all", skip_all, fields(recipients = self.recipients.len()))]
    async fn send_all(&self, body: String) -> Result<(), NotificationError> {
        let mut messages = Vec::with_capacity(self.recipients.len());
        for recipient in &self.recipients {
            let message = Message::builder()
                .from(self.from.clone())
                .to(recipient.clone())
                .subject(self.subject.clone())
                .body(body.clone())?;
            messages.push((recipient, message));
        }

        let results = join_all(messages.into_iter().map(|(recipient, message)| async move {
            (recipient, self.transport.send(message).await)
        }))
        .await;

        let total = results.len();
        let mut failed = 0;
        for (recipient, result) in results {
            match result {
                Ok(_) => debug!(recipient = %recipient, "Notification delivered"),
                Err(e) => {
                    failed += 1;
                    error!(recipient = %recipient, error = %e, "Notification delivery failed");
                }
            }
        }

        if failed > 0 {
            return Err(NotificationError::Delivery { failed, total });
        }

        info!(recipients = total, "Notification sent");
        Ok(())
    }
}

fn to_mailbox(address: &str) -> Result<Mailbox, NotificationError> {
    address
        .parse::<Mailbox>()
        .map_err(|source| NotificationError::InvalidAddress {
            address: address.to_string(),
            source,
        })
}

#[async_trait]
impl NotificationSink for SmtpNotifier {
    async fn notify_alarm(&self, target: &str) -> Result<(), NotificationError> {
        self.send_all(render_alarm_body(target)).await
    }

    async fn notify_normal(&self, target: &str) -> Result<(), NotificationError> {
        self.send_all(render_normal_body(target)).await
    }
}
