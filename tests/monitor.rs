//! Worker and supervisor behaviour against an in-memory mailbox.
//!
//! Every test runs on tokio's paused clock. The worker reads wall-clock time from
//! [`PausedClock`], which follows tokio's `Instant`, so thresholds, poll intervals
//! and reconnect delays all advance together and deterministically.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mail_aware::{
    AlarmEvent, AlarmState, Clock, Error, MailboxClient, MailboxMonitor, MailboxWorker,
    MessageSummary, MonitorSupervisor, NotificationError, NotificationSink, Result,
    TargetMailbox,
};
use mail_aware::config::MAXIMUM_ALARM_THRESHOLD_SECS;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

// ─────────────────────────────────────────────────────────────────────────────
// Test Doubles
// ─────────────────────────────────────────────────────────────────────────────

const SUBJECT: &str = "[backup] completed";

/// Wall clock anchored to tokio's (paused) monotonic clock.
struct PausedClock {
    base: DateTime<Utc>,
    start: Instant,
}

impl PausedClock {
    fn new() -> Self {
        Self {
            base: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            start: Instant::now(),
        }
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.start.elapsed()).unwrap();
        self.base + elapsed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Connect,
    Authenticate,
    Open,
    Search { dated: bool },
    Fetch(u32),
    FlagDeleted(Vec<u32>),
    Expunge,
    Keepalive,
    Close,
    Disconnect,
}

struct StoredMessage {
    uid: u32,
    subject: String,
    timestamp: DateTime<Utc>,
    /// Header block served on fetch; `timestamp` then acts as INTERNALDATE.
    raw_header: Option<Vec<u8>>,
    deleted: bool,
}

#[derive(Default)]
struct Server {
    messages: Vec<StoredMessage>,
    next_uid: u32,
    connect_failures: usize,
    fail_keepalive: bool,
    connect_attempts: Vec<Instant>,
    calls: Vec<Call>,
}

impl Server {
    fn deliver(&mut self, subject: &str, timestamp: DateTime<Utc>) -> u32 {
        self.next_uid += 1;
        self.messages.push(StoredMessage {
            uid: self.next_uid,
            subject: subject.to_string(),
            timestamp,
            raw_header: None,
            deleted: false,
        });
        self.next_uid
    }

    fn deliver_raw(&mut self, header: &str, received: DateTime<Utc>) -> u32 {
        let uid = self.deliver(SUBJECT, received);
        if let Some(message) = self.messages.last_mut() {
            message.raw_header = Some(header.as_bytes().to_vec());
        }
        uid
    }

    fn count(&self, wanted: &Call) -> usize {
        self.calls.iter().filter(|call| *call == wanted).count()
    }
}

#[derive(Clone, Default)]
struct SharedServer(Arc<Mutex<Server>>);

impl SharedServer {
    fn lock(&self) -> std::sync::MutexGuard<'_, Server> {
        self.0.lock().unwrap()
    }

    fn client(&self) -> Box<dyn MailboxClient> {
        Box::new(FakeMailbox {
            server: self.clone(),
            connected: false,
            open: false,
        })
    }
}

struct FakeMailbox {
    server: SharedServer,
    connected: bool,
    open: bool,
}

fn broken(operation: &str) -> Error {
    Error::ConnectTimeout {
        target: operation.to_string(),
        timeout: Duration::from_secs(30),
    }
}

#[async_trait]
impl MailboxClient for FakeMailbox {
    async fn connect(&mut self, _target: &TargetMailbox) -> Result<()> {
        let mut server = self.server.lock();
        server.connect_attempts.push(Instant::now());
        server.calls.push(Call::Connect);
        if server.connect_failures > 0 {
            server.connect_failures -= 1;
            return Err(broken("connect"));
        }
        self.connected = true;
        Ok(())
    }

    async fn authenticate(&mut self, _username: &str, _password: &str) -> Result<()> {
        self.server.lock().calls.push(Call::Authenticate);
        Ok(())
    }

    async fn open_read_write(&mut self) -> Result<u32> {
        let mut server = self.server.lock();
        server.calls.push(Call::Open);
        self.open = true;
        Ok(u32::try_from(server.messages.len()).unwrap())
    }

    async fn search(
        &mut self,
        subject_contains: &str,
        delivered_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<u32>> {
        let mut server = self.server.lock();
        server.calls.push(Call::Search {
            dated: delivered_after.is_some(),
        });
        // Day-granular, like IMAP SINCE
        Ok(server
            .messages
            .iter()
            .filter(|m| !m.deleted && m.subject.contains(subject_contains))
            .filter(|m| delivered_after.map_or(true, |c| m.timestamp.date_naive() >= c.date_naive()))
            .map(|m| m.uid)
            .collect())
    }

    async fn fetch_message(&mut self, uid: u32) -> Result<MessageSummary> {
        let mut server = self.server.lock();
        server.calls.push(Call::Fetch(uid));
        let message = server
            .messages
            .iter()
            .find(|m| m.uid == uid)
            .ok_or(Error::MessageNotFound { uid })?;
        match &message.raw_header {
            Some(raw) => MessageSummary::from_header(
                uid,
                Some(raw),
                Some(message.timestamp.fixed_offset()),
            ),
            None => Ok(MessageSummary {
                uid,
                subject: message.subject.clone(),
                timestamp: message.timestamp,
            }),
        }
    }

    async fn flag_deleted(&mut self, uids: &[u32]) -> Result<()> {
        let mut server = self.server.lock();
        server.calls.push(Call::FlagDeleted(uids.to_vec()));
        for message in &mut server.messages {
            if uids.contains(&message.uid) {
                message.deleted = true;
            }
        }
        Ok(())
    }

    async fn expunge(&mut self) -> Result<()> {
        let mut server = self.server.lock();
        server.calls.push(Call::Expunge);
        server.messages.retain(|m| !m.deleted);
        Ok(())
    }

    async fn keepalive(&mut self) -> Result<()> {
        let mut server = self.server.lock();
        server.calls.push(Call::Keepalive);
        if server.fail_keepalive {
            return Err(broken("keepalive"));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.server.lock().calls.push(Call::Close);
        self.open = false;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.server.lock().calls.push(Call::Disconnect);
        self.open = false;
        self.connected = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) -> std::result::Result<(), NotificationError> {
        self.events.lock().unwrap().push(event);
        if self.fail {
            return Err(NotificationError::Other("smtp unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify_alarm(&self, target: &str) -> std::result::Result<(), NotificationError> {
        self.record(format!("alarm:{target}"))
    }

    async fn notify_normal(&self, target: &str) -> std::result::Result<(), NotificationError> {
        self.record(format!("normal:{target}"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn target(name: &str) -> TargetMailbox {
    TargetMailbox::builder()
        .display_name(name)
        .host("imap.example.com")
        .username("watch@example.com")
        .password("secret")
        .subject_snippet(SUBJECT)
        .alarm_threshold_secs(1800)
        .poll_interval_ms(10_000)
        .build()
        .unwrap()
}

struct Harness {
    server: SharedServer,
    sink: Arc<RecordingSink>,
    clock: Arc<PausedClock>,
}

impl Harness {
    fn new() -> Self {
        Self::with_sink(RecordingSink::default())
    }

    fn with_sink(sink: RecordingSink) -> Self {
        Self {
            server: SharedServer::default(),
            sink: Arc::new(sink),
            clock: Arc::new(PausedClock::new()),
        }
    }

    fn worker(&self) -> MailboxWorker {
        MailboxWorker::with_clock(
            Arc::new(target("backups")),
            self.server.client(),
            self.sink.clone(),
            self.clock.clone(),
        )
    }

    fn monitor(&self) -> MailboxMonitor {
        MailboxMonitor::from_worker(self.worker())
    }

    fn deliver_heartbeat(&self) -> u32 {
        let now = self.clock.now();
        self.server.lock().deliver(SUBJECT, now)
    }
}

async fn sleep_secs(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// End-to-end Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_silence_raises_exactly_one_alarm() {
    let harness = Harness::new();
    let mut monitor = harness.monitor();
    monitor.start().unwrap();

    sleep_secs(1795).await;
    assert!(harness.sink.events().is_empty());

    sleep_secs(10).await;
    assert_eq!(harness.sink.events(), vec!["alarm:backups"]);

    // Still silent an hour later: nothing more is sent
    sleep_secs(3600).await;
    assert_eq!(harness.sink.events(), vec!["alarm:backups"]);

    monitor.stop();
    monitor.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_clears_alarm_once() {
    let harness = Harness::new();
    let mut monitor = harness.monitor();
    monitor.start().unwrap();

    sleep_secs(1835).await;
    assert_eq!(harness.sink.events(), vec!["alarm:backups"]);

    let uid = harness.deliver_heartbeat();

    // Next poll at t=1840 sees it
    sleep_secs(10).await;
    assert_eq!(harness.sink.events(), vec!["alarm:backups", "normal:backups"]);
    assert_eq!(harness.server.lock().count(&Call::FlagDeleted(vec![uid])), 1);
    assert!(harness.server.lock().messages.is_empty());

    // The consumed heartbeat is not counted again
    sleep_secs(600).await;
    assert_eq!(harness.sink.events().len(), 2);

    monitor.stop();
    monitor.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_date_header_uses_arrival_time() {
    let harness = Harness::new();
    let mut monitor = harness.monitor();
    monitor.start().unwrap();

    sleep_secs(1835).await;
    assert_eq!(harness.sink.events(), vec!["alarm:backups"]);

    let header = format!("Subject: {SUBJECT}\r\nDate: not a date\r\n\r\n");
    let now = harness.clock.now();
    harness.server.lock().deliver_raw(&header, now);

    sleep_secs(10).await;
    assert_eq!(harness.sink.events(), vec!["alarm:backups", "normal:backups"]);

    monitor.stop();
    monitor.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_largest_threshold_keeps_polling() {
    let harness = Harness::new();
    let target = TargetMailbox::builder()
        .display_name("archive")
        .host("imap.example.com")
        .username("watch@example.com")
        .password("secret")
        .subject_snippet(SUBJECT)
        .alarm_threshold_secs(MAXIMUM_ALARM_THRESHOLD_SECS)
        .poll_interval_ms(10_000)
        .build()
        .unwrap();
    let worker = MailboxWorker::with_clock(
        Arc::new(target),
        harness.server.client(),
        harness.sink.clone(),
        harness.clock.clone(),
    );
    let mut monitor = MailboxMonitor::from_worker(worker);
    monitor.start().unwrap();

    sleep_secs(5).await;
    let uid = harness.deliver_heartbeat();
    sleep_secs(60).await;

    assert!(monitor.is_running());
    assert_eq!(harness.server.lock().count(&Call::Fetch(uid)), 1);
    assert!(harness.server.lock().count(&Call::Search { dated: true }) >= 6);
    assert!(harness.sink.events().is_empty());

    monitor.stop();
    monitor.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_delays_double() {
    let harness = Harness::new();
    harness.server.lock().connect_failures = usize::MAX;
    let mut monitor = harness.monitor();
    monitor.start().unwrap();

    sleep_secs(50).await;

    let attempts = harness.server.lock().connect_attempts.clone();
    let gaps: Vec<u64> = attempts
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_secs())
        .collect();
    assert_eq!(gaps, vec![3, 6, 12, 24]);

    // Nothing past connect was attempted
    assert_eq!(harness.server.lock().count(&Call::Authenticate), 0);

    monitor.stop();
    monitor.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_purge_flags_every_match_and_expunges_once() {
    let harness = Harness::new();
    let mut monitor = harness.monitor();
    monitor.start().unwrap();

    sleep_secs(5).await;
    let first = harness.server.lock().deliver(SUBJECT, harness.clock.now() - chrono::Duration::seconds(2));
    let second = harness.deliver_heartbeat();

    // Poll at t=10 processes both
    sleep_secs(10).await;

    let server = harness.server.lock();
    let expected = [
        Call::Search { dated: true },
        Call::Fetch(second),
        Call::Search { dated: false },
        Call::FlagDeleted(vec![first, second]),
        Call::Expunge,
        Call::Keepalive,
    ];
    assert!(
        server.calls.windows(expected.len()).any(|w| w == expected),
        "unexpected call sequence: {:?}",
        server.calls
    );
    assert_eq!(server.count(&Call::Expunge), 1);
    assert!(server.messages.is_empty());
    drop(server);

    monitor.stop();
    monitor.join().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_fresh_start_purges_old_heartbeats() {
    let harness = Harness::new();
    let stale = harness.deliver_heartbeat();
    let mut worker = harness.worker();

    worker.connect_session().await.unwrap();

    let server = harness.server.lock();
    assert_eq!(
        server.calls,
        vec![
            Call::Connect,
            Call::Authenticate,
            Call::Open,
            Call::Search { dated: false },
            Call::FlagDeleted(vec![stale]),
            Call::Expunge,
        ]
    );
    assert!(server.messages.is_empty());
    drop(server);

    assert_eq!(worker.alarm_state(), AlarmState::Normal);
}

#[tokio::test(start_paused = true)]
async fn test_match_older_than_cutoff_is_not_a_sighting() {
    let harness = Harness::new();
    let mut worker = harness.worker();
    worker.connect_session().await.unwrap();

    tokio::time::advance(Duration::from_secs(100)).await;
    // Same calendar day, but two hours old: the server search over-matches
    let old = harness.clock.now() - chrono::Duration::hours(2);
    let uid = harness.server.lock().deliver(SUBJECT, old);

    assert_eq!(worker.poll_once().await.unwrap(), None);
    assert_eq!(worker.alarm_state(), AlarmState::Normal);
    // Still purged
    assert_eq!(harness.server.lock().count(&Call::FlagDeleted(vec![uid])), 1);

    tokio::time::advance(Duration::from_secs(1700)).await;
    assert!(matches!(
        worker.poll_once().await.unwrap(),
        Some(AlarmEvent::Raised { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_notification_failure_keeps_transition() {
    let harness = Harness::with_sink(RecordingSink::failing());
    let mut worker = harness.worker();
    worker.connect_session().await.unwrap();

    tokio::time::advance(Duration::from_secs(1800)).await;
    let event = worker.poll_once().await.unwrap();

    assert!(matches!(event, Some(AlarmEvent::Raised { ref target }) if target == "backups"));
    assert_eq!(worker.alarm_state(), AlarmState::AlarmExceeded);
    assert_eq!(harness.sink.events(), vec!["alarm:backups"]);
}

#[tokio::test(start_paused = true)]
async fn test_poll_failure_tears_down_and_resets_backoff() {
    let harness = Harness::new();
    {
        let mut server = harness.server.lock();
        server.connect_failures = 3;
        server.fail_keepalive = true;
    }
    let mut monitor = harness.monitor();
    monitor.start().unwrap();

    sleep_secs(25).await;

    let server = harness.server.lock();
    let offsets: Vec<u64> = server
        .connect_attempts
        .iter()
        .map(|at| (*at - server.connect_attempts[0]).as_secs())
        .collect();
    // Three failures, a session that dies in its first poll, then the minimum delay again
    assert_eq!(offsets, vec![0, 3, 9, 21, 24]);

    let expected = [Call::Keepalive, Call::Close, Call::Disconnect];
    assert!(server.calls.windows(3).any(|w| w == expected));
    drop(server);

    monitor.stop();
    monitor.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_purge_without_session_is_rejected() {
    let harness = Harness::new();
    let mut worker = harness.worker();

    let err = worker.purge_matching_emails().await.unwrap_err();
    assert!(matches!(err, Error::NotConnected { .. }));
    assert!(harness.server.lock().calls.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_poll_sleep_disconnects() {
    let harness = Harness::new();
    let mut monitor = harness.monitor();
    monitor.start().unwrap();

    sleep_secs(5).await;
    let stopped_at = Instant::now();
    monitor.stop();
    monitor.join().await;

    assert!(stopped_at.elapsed() < Duration::from_secs(1));
    assert!(!monitor.is_running());
    let calls = harness.server.lock().calls.clone();
    assert_eq!(calls.last(), Some(&Call::Disconnect));
    assert!(calls.contains(&Call::Close));
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_is_rejected() {
    let harness = Harness::new();
    let mut monitor = harness.monitor();

    monitor.start().unwrap();
    assert!(matches!(
        monitor.start(),
        Err(Error::AlreadyRunning { .. })
    ));

    monitor.stop();
    monitor.join().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_supervisor_runs_one_worker_per_target() {
    let server = SharedServer::default();
    let sink = Arc::new(RecordingSink::default());
    let factory_server = server.clone();

    let supervisor = MonitorSupervisor::start_with_clock(
        vec![target("first"), target("second"), target("third")],
        sink.clone(),
        Arc::new(PausedClock::new()),
        move |_| factory_server.client(),
    )
    .unwrap();

    assert_eq!(supervisor.len(), 3);
    assert!(!supervisor.is_empty());
    let names: Vec<&str> = supervisor
        .monitors()
        .iter()
        .map(MailboxMonitor::display_name)
        .collect();
    assert_eq!(names, vec!["first", "second", "third"]);

    sleep_secs(1805).await;
    let mut events = sink.events();
    events.sort();
    assert_eq!(events, vec!["alarm:first", "alarm:second", "alarm:third"]);
    assert_eq!(server.lock().count(&Call::Connect), 3);

    let stopped_at = Instant::now();
    supervisor.shutdown().await;
    assert!(stopped_at.elapsed() < Duration::from_secs(1));
    assert_eq!(server.lock().count(&Call::Disconnect), 3);
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_stop_reaches_workers_in_backoff() {
    let server = SharedServer::default();
    server.lock().connect_failures = usize::MAX;
    let factory_server = server.clone();

    let supervisor = MonitorSupervisor::start(
        vec![target("a"), target("b")],
        Arc::new(RecordingSink::default()),
        move |_| factory_server.client(),
    )
    .unwrap();

    sleep_secs(1).await;
    assert!(supervisor.monitors().iter().all(MailboxMonitor::is_running));

    supervisor.stop();
    sleep_secs(1).await;
    assert!(!supervisor.monitors().iter().any(MailboxMonitor::is_running));
    supervisor.shutdown().await;
}
