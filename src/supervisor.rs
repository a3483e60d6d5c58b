//! Runs one monitor per target and stops them together.

use crate::clock::{Clock, SystemClock};
use crate::config::TargetMailbox;
use crate::error::Result;
use crate::mailbox::MailboxClient;
use crate::notify::NotificationSink;
use crate::worker::{MailboxMonitor, MailboxWorker};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Owns every [`MailboxMonitor`] of the process.
///
/// All monitors hang off one parent [`CancellationToken`], so [`stop`](Self::stop)
/// reaches every worker at once. A monitor that exits is not restarted.
#[derive(Debug)]
pub struct MonitorSupervisor {
    monitors: Vec<MailboxMonitor>,
    cancel: CancellationToken,
}

impl MonitorSupervisor {
    /// Starts one monitor per target, each with a client from `client_factory`.
    ///
    /// # Errors
    ///
    /// Returns an error if a monitor fails to start.
    pub fn start<I, F>(
        targets: I,
        sink: Arc<dyn NotificationSink>,
        client_factory: F,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = TargetMailbox>,
        F: FnMut(&TargetMailbox) -> Box<dyn MailboxClient>,
    {
        Self::start_with_clock(targets, sink, Arc::new(SystemClock), client_factory)
    }

    /// Like [`start`](Self::start), with an explicit time source for every worker.
    ///
    /// # Errors
    ///
    /// Returns an error if a monitor fails to start.
    pub fn start_with_clock<I, F>(
        targets: I,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        mut client_factory: F,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = TargetMailbox>,
        F: FnMut(&TargetMailbox) -> Box<dyn MailboxClient>,
    {
        let cancel = CancellationToken::new();
        let mut monitors = Vec::new();

        for target in targets {
            let client = client_factory(&target);
            let worker =
                MailboxWorker::with_clock(Arc::new(target), client, sink.clone(), clock.clone());
            let mut monitor =
                MailboxMonitor::from_worker(worker).with_cancellation(cancel.child_token());
            monitor.start()?;
            monitors.push(monitor);
        }

        info!(monitors = monitors.len(), "Monitors started");
        Ok(Self { monitors, cancel })
    }

    /// Number of monitors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    /// Returns `true` if no target is monitored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// The monitors, in target order.
    #[must_use]
    pub fn monitors(&self) -> &[MailboxMonitor] {
        &self.monitors
    }

    /// Signals every monitor to stop without waiting for them.
    pub fn stop(&self) {
        info!("Stopping all monitors");
        self.cancel.cancel();
    }

    /// Stops every monitor and waits until all have exited.
    pub async fn shutdown(mut self) {
        self.stop();
        for monitor in &mut self.monitors {
            monitor.join().await;
        }
        info!("All monitors stopped");
    }
}
