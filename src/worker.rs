//! Per-target connection lifecycle and polling loop.
//!
//! A [`MailboxWorker`] keeps one target's mailbox session alive, looks for
//! heartbeat messages, feeds them to its [`AlarmStateMachine`] and forwards
//! transitions to the [`NotificationSink`]. [`MailboxMonitor`] runs a worker on
//! its own tokio task.
//!
//! # Loop
//!
//! ```text
//! loop until cancelled:
//!     connect, authenticate, open INBOX
//!         ok  -> reset backoff, purge old heartbeats, initialize alarm
//!                poll until error or cancel:
//!                    search since cutoff -> fetch newest -> record -> purge
//!                    evaluate -> notify -> keepalive -> sleep(poll interval)
//!     close / disconnect whatever is still open
//!     sleep(backoff), doubling it for next time
//! ```
//!
//! Any failure inside the poll phase ends the session; nothing is retried in
//! place. Both sleeps wake as soon as the cancellation token fires. A protocol
//! call already in flight is allowed to finish or time out.

use crate::alarm::{AlarmEvent, AlarmState, AlarmStateMachine};
use crate::backoff::ReconnectBackoff;
use crate::clock::{Clock, SystemClock};
use crate::config::TargetMailbox;
use crate::error::{Error, Result};
use crate::mailbox::MailboxClient;
use crate::notify::{dispatch, NotificationSink};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Watches one target mailbox.
pub struct MailboxWorker {
    target: Arc<TargetMailbox>,
    client: Box<dyn MailboxClient>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    alarm: AlarmStateMachine,
    backoff: ReconnectBackoff,
}

impl std::fmt::Debug for MailboxWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxWorker")
            .field("target", &self.target.display_name)
            .field("alarm", &self.alarm.state())
            .field("backoff", &self.backoff)
            .field("connected", &self.client.is_connected())
            .finish_non_exhaustive()
    }
}

impl MailboxWorker {
    /// Creates a worker that reads time from the system clock.
    pub fn new(
        target: Arc<TargetMailbox>,
        client: Box<dyn MailboxClient>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self::with_clock(target, client, sink, Arc::new(SystemClock))
    }

    /// Creates a worker with an explicit time source.
    pub fn with_clock(
        target: Arc<TargetMailbox>,
        client: Box<dyn MailboxClient>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let alarm = AlarmStateMachine::new(target.display_name.clone());
        Self {
            target,
            client,
            sink,
            clock,
            alarm,
            backoff: ReconnectBackoff::default(),
        }
    }

    /// The target being watched.
    #[must_use]
    pub fn target(&self) -> &TargetMailbox {
        &self.target
    }

    /// Current alarm state.
    #[must_use]
    pub fn alarm_state(&self) -> AlarmState {
        self.alarm.state()
    }

    /// Current reconnect backoff.
    #[must_use]
    pub fn backoff(&self) -> &ReconnectBackoff {
        &self.backoff
    }

    /// Runs connect/poll/teardown/backoff cycles until `cancel` fires.
    ///
    /// Never returns early on a mailbox failure.
    #[instrument(
        name = "MailboxWorker::run",
        skip_all,
        fields(mailbox = %self.target.display_name)
    )]
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!("Monitoring started");

        while !cancel.is_cancelled() {
            match self.connect_session().await {
                Ok(()) => {
                    if let Err(e) = self.poll_until_cancelled(&cancel).await {
                        warn!(
                            error = %e,
                            category = %e.category(),
                            "Polling failed, reconnecting"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        category = %e.category(),
                        "Failed to connect to mail server"
                    );
                }
            }

            self.teardown().await;

            let delay = self.backoff.next_delay();
            if cancel.is_cancelled() {
                break;
            }
            info!(delay_secs = delay.as_secs(), "Waiting before reconnect");
            if !sleep_or_cancel(delay, &cancel).await {
                break;
            }
        }

        info!("Monitoring stopped");
    }

    /// Opens a session and prepares the alarm for it.
    ///
    /// On success the backoff is reset, heartbeats already in the mailbox are
    /// purged and the alarm is initialized at the current time.
    ///
    /// # Errors
    ///
    /// Returns the first failing protocol step.
    #[instrument(
        name = "MailboxWorker::connect_session",
        skip_all,
        fields(imap_host = %self.target.host)
    )]
    pub async fn connect_session(&mut self) -> Result<()> {
        info!("Attempting to connect to the mail server");

        self.client.connect(&self.target).await?;
        self.client
            .authenticate(self.target.username(), self.target.password())
            .await?;
        let exists = self.client.open_read_write().await?;

        info!(exists, "Connected to the mail server");
        self.backoff.reset();

        let purged = self.purge_matching_emails().await?;
        if purged > 0 {
            info!(purged, "Discarded heartbeat messages from before this session");
        }

        self.alarm
            .initialize(self.target.alarm_threshold, self.clock.now())?;
        Ok(())
    }

    /// Runs one poll iteration on an open session.
    ///
    /// Returns the alarm transition produced by this iteration, after it has
    /// been handed to the notification sink.
    ///
    /// # Errors
    ///
    /// Returns any protocol failure, or [`Error::Uninitialized`] if no session
    /// was set up with [`connect_session`](Self::connect_session).
    pub async fn poll_once(&mut self) -> Result<Option<AlarmEvent>> {
        if self.alarm.state() == AlarmState::Uninitialized {
            return Err(Error::Uninitialized);
        }

        let cutoff = self.cutoff(self.clock.now())?;
        debug!(cutoff = ?cutoff, "Searching for heartbeat messages");

        let uids = self
            .client
            .search(&self.target.subject_snippet, cutoff)
            .await?;

        if let Some(&latest) = uids.last() {
            let message = self.client.fetch_message(latest).await?;
            if cutoff.map_or(true, |cutoff| message.timestamp > cutoff) {
                info!(
                    matches = uids.len(),
                    uid = message.uid,
                    sent = %message.timestamp,
                    "System is alive, heartbeat found"
                );
                self.alarm.record_sighting(message.timestamp)?;
            } else {
                debug!(
                    uid = message.uid,
                    sent = %message.timestamp,
                    "Newest match is older than the threshold"
                );
            }
            self.purge_matching_emails().await?;
        }

        let event = self.alarm.evaluate(self.clock.now())?;
        if let Some(event) = &event {
            dispatch(self.sink.as_ref(), event).await;
        }

        self.client.keepalive().await?;
        Ok(event)
    }

    /// Deletes every message whose subject matches the heartbeat snippet.
    ///
    /// Returns the number of messages flagged. Expunge runs once, and only
    /// when something matched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] when no mailbox is open, or the failing
    /// protocol step.
    #[instrument(name = "MailboxWorker::purge_matching_emails", skip_all)]
    pub async fn purge_matching_emails(&mut self) -> Result<usize> {
        if !self.client.is_open() {
            return Err(Error::NotConnected {
                operation: "purge_matching_emails",
            });
        }

        let uids = self
            .client
            .search(&self.target.subject_snippet, None)
            .await?;
        if uids.is_empty() {
            return Ok(0);
        }

        self.client.flag_deleted(&uids).await?;
        self.client.expunge().await?;

        debug!(count = uids.len(), "Purged heartbeat messages");
        Ok(uids.len())
    }

    /// Closes the mailbox and disconnects, whichever is still open.
    ///
    /// Failures are logged; the client is left disconnected either way.
    pub async fn teardown(&mut self) {
        if self.client.is_open() {
            if let Err(e) = self.client.close().await {
                warn!(error = %e, "Failed to close mailbox");
            }
        }
        if self.client.is_connected() {
            info!("Disconnecting from mail server");
            if let Err(e) = self.client.disconnect().await {
                warn!(error = %e, "Failed to disconnect cleanly");
            }
        }
    }

    async fn poll_until_cancelled(&mut self, cancel: &CancellationToken) -> Result<()> {
        while !cancel.is_cancelled() {
            self.poll_once().await?;
            if !sleep_or_cancel(self.target.poll_interval, cancel).await {
                break;
            }
        }
        Ok(())
    }

    /// Earliest acceptable heartbeat time, or `None` if it predates the calendar.
    fn cutoff(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let threshold =
            chrono::Duration::from_std(self.target.alarm_threshold).map_err(|_| {
                Error::InvalidConfig {
                    message: "alarm threshold is out of range".into(),
                }
            })?;
        Ok(now.checked_sub_signed(threshold))
    }
}

/// Sleeps for `duration`. Returns `false` if `cancel` fired first.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

/// Handle that runs a [`MailboxWorker`] on its own task.
///
/// ```no_run
/// # async fn example(
/// #     target: mail_aware::TargetMailbox,
/// #     sink: std::sync::Arc<dyn mail_aware::NotificationSink>,
/// # ) -> mail_aware::Result<()> {
/// use mail_aware::{ImapMailboxClient, MailboxMonitor};
///
/// let mut monitor = MailboxMonitor::new(target, Box::new(ImapMailboxClient::new()), sink);
/// monitor.start()?;
/// // ...
/// monitor.stop();
/// monitor.join().await;
/// # Ok(())
/// # }
/// ```
pub struct MailboxMonitor {
    display_name: String,
    worker: Option<MailboxWorker>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for MailboxMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxMonitor")
            .field("target", &self.display_name)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl MailboxMonitor {
    /// Creates a stopped monitor for `target`.
    pub fn new(
        target: TargetMailbox,
        client: Box<dyn MailboxClient>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self::from_worker(MailboxWorker::new(Arc::new(target), client, sink))
    }

    /// Wraps an already configured worker.
    #[must_use]
    pub fn from_worker(worker: MailboxWorker) -> Self {
        Self {
            display_name: worker.target.display_name.clone(),
            worker: Some(worker),
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    /// Replaces the stop token, e.g. with a child of a supervisor's token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Display name of the watched target.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Spawns the worker task. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if the monitor was started before.
    pub fn start(&mut self) -> Result<()> {
        let mut worker = self.worker.take().ok_or_else(|| Error::AlreadyRunning {
            target: self.display_name.clone(),
        })?;
        let cancel = self.cancel.clone();

        self.handle = Some(tokio::spawn(async move {
            worker.run(cancel).await;
        }));
        Ok(())
    }

    /// Asks the worker to stop. It exits at its next suspension point.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` while the worker task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Waits for the worker task to exit.
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(mailbox = %self.display_name, error = %e, "Monitor task failed");
            }
        }
    }
}
