//! Integration tests for mail-aware.
//!
//! These tests require a real IMAP server and are disabled by default.
//! To run them:
//!
//! ```bash
//! # Set environment variables
//! export MAIL_AWARE_TEST_HOST="imap.example.com"
//! export MAIL_AWARE_TEST_USERNAME="watch@example.com"
//! export MAIL_AWARE_TEST_PASSWORD="your-app-password"
//!
//! # Optional: subject used for heartbeat searches (default "mail-aware test heartbeat")
//! export MAIL_AWARE_TEST_SUBJECT="[backup] completed"
//!
//! # Optional: proxy configuration
//! export MAIL_AWARE_TEST_PROXY_HOST="proxy.example.com"
//! export MAIL_AWARE_TEST_PROXY_PORT="1080"
//!
//! # Run with the integration-tests feature
//! cargo test --features integration-tests -- --ignored
//! ```

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use mail_aware::{
    AlarmState, ImapMailboxClient, MailAwareConfig, MailboxClient, MailboxWorker,
    NotificationError, NotificationSink, Socks5Proxy, TargetMailbox,
};
use std::env;
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────────
// Test Configuration Helpers
// ─────────────────────────────────────────────────────────────────────────────

const DEFAULT_TEST_SUBJECT: &str = "mail-aware test heartbeat";

fn get_test_credentials() -> Option<(String, String, String)> {
    dotenvy::dotenv().ok();
    let host = env::var("MAIL_AWARE_TEST_HOST").ok()?;
    let username = env::var("MAIL_AWARE_TEST_USERNAME").ok()?;
    let password = env::var("MAIL_AWARE_TEST_PASSWORD").ok()?;
    Some((host, username, password))
}

fn get_test_proxy() -> Option<Socks5Proxy> {
    let host = env::var("MAIL_AWARE_TEST_PROXY_HOST").ok()?;
    let port: u16 = env::var("MAIL_AWARE_TEST_PROXY_PORT").ok()?.parse().ok()?;

    let proxy = match (
        env::var("MAIL_AWARE_TEST_PROXY_USER").ok(),
        env::var("MAIL_AWARE_TEST_PROXY_PASS").ok(),
    ) {
        (Some(user), Some(pass)) => Socks5Proxy::with_auth(&host, port, user, pass),
        _ => Socks5Proxy::new(host, port),
    };

    Some(proxy)
}

fn get_test_target() -> Option<TargetMailbox> {
    let (host, username, password) = get_test_credentials()?;
    let subject =
        env::var("MAIL_AWARE_TEST_SUBJECT").unwrap_or_else(|_| DEFAULT_TEST_SUBJECT.into());

    let mut builder = TargetMailbox::builder()
        .display_name("integration")
        .host(host)
        .username(username)
        .password(password)
        .subject_snippet(subject)
        .alarm_threshold_secs(3600);

    if let Some(proxy) = get_test_proxy() {
        builder = builder.proxy(proxy);
    }

    builder.build().ok()
}

async fn open_client(target: &TargetMailbox) -> ImapMailboxClient {
    let mut client = ImapMailboxClient::new();
    client.connect(target).await.expect("Failed to connect");
    client
        .authenticate(target.username(), target.password())
        .await
        .expect("Failed to authenticate");
    client.open_read_write().await.expect("Failed to open INBOX");
    client
}

struct PrintSink;

#[async_trait]
impl NotificationSink for PrintSink {
    async fn notify_alarm(&self, target: &str) -> Result<(), NotificationError> {
        println!("alarm: {target}");
        Ok(())
    }

    async fn notify_normal(&self, target: &str) -> Result<(), NotificationError> {
        println!("normal: {target}");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
#[ignore = "requires real IMAP server"]
async fn test_connect_open_and_disconnect() {
    let target = get_test_target().expect("Test config from environment variables");

    let mut client = open_client(&target).await;
    assert!(client.is_connected());
    assert!(client.is_open());

    client.keepalive().await.expect("NOOP failed");
    client.close().await.expect("Failed to close");
    assert!(!client.is_open());

    client.disconnect().await.expect("Failed to logout");
    assert!(!client.is_connected());
}

#[tokio::test]
#[ignore = "requires real IMAP server"]
async fn test_client_debug_shows_state() {
    let target = get_test_target().expect("Test config from environment variables");

    let mut client = open_client(&target).await;
    let debug_str = format!("{client:?}");
    assert!(debug_str.contains("ImapMailboxClient"));
    assert!(debug_str.contains("selected"));

    client.disconnect().await.expect("Failed to logout");
}

// ─────────────────────────────────────────────────────────────────────────────
// Search and Fetch Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
#[ignore = "requires real IMAP server"]
async fn test_search_since_cutoff() {
    let target = get_test_target().expect("Test config from environment variables");
    let mut client = open_client(&target).await;

    let cutoff = Utc::now() - ChronoDuration::hours(24);
    let uids = client
        .search(&target.subject_snippet, Some(cutoff))
        .await
        .expect("Search failed");

    assert!(uids.windows(2).all(|w| w[0] < w[1]));

    if let Some(&latest) = uids.last() {
        let message = client.fetch_message(latest).await.expect("Fetch failed");
        assert_eq!(message.uid, latest);
        println!(
            "Newest heartbeat: {} at {}",
            message.subject, message.timestamp
        );
    } else {
        println!("No heartbeat in the last 24h (expected if none was sent)");
    }

    client.disconnect().await.expect("Failed to logout");
}

#[tokio::test]
#[ignore = "requires real IMAP server"]
async fn test_search_no_match() {
    let target = get_test_target().expect("Test config from environment variables");
    let mut client = open_client(&target).await;

    let uids = client
        .search("NONEXISTENT_SUBJECT_12345", None)
        .await
        .expect("Search failed");
    assert!(uids.is_empty());

    client.disconnect().await.expect("Failed to logout");
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
#[ignore = "deletes matching messages on a real IMAP server"]
async fn test_worker_session_purges_and_polls() {
    let target = get_test_target().expect("Test config from environment variables");

    let mut worker = MailboxWorker::new(
        Arc::new(target),
        Box::new(ImapMailboxClient::new()),
        Arc::new(PrintSink),
    );

    worker.connect_session().await.expect("Failed to connect");
    assert_eq!(worker.alarm_state(), AlarmState::Normal);

    // The fresh-start purge already ran
    assert_eq!(worker.purge_matching_emails().await.expect("Purge failed"), 0);

    let event = worker.poll_once().await.expect("Poll failed");
    assert!(event.is_none());

    worker.teardown().await;
    assert!(worker.purge_matching_emails().await.is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Error Handling Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
#[ignore = "requires intentionally wrong credentials"]
async fn test_invalid_credentials() {
    let (host, username, _) = get_test_credentials().expect("Test config from environment");
    let target = TargetMailbox::builder()
        .display_name("bad login")
        .host(host)
        .username(username)
        .password("wrong-password")
        .subject_snippet("x")
        .build()
        .expect("valid config structure");

    let mut client = ImapMailboxClient::new();
    client.connect(&target).await.expect("Failed to connect");
    let err = client
        .authenticate(target.username(), target.password())
        .await
        .unwrap_err();

    // Login failures are retried by the worker
    println!("Authentication error: {err}");
    println!("Category: {}", err.category());
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_invalid_target_rejected() {
    let result = TargetMailbox::builder()
        .display_name("")
        .host("imap.example.com")
        .username("user")
        .password("password")
        .subject_snippet("ping")
        .build();
    assert!(result.is_err());

    let result = TargetMailbox::builder()
        .display_name("fast")
        .host("imap.example.com")
        .username("user")
        .password("password")
        .subject_snippet("ping")
        .poll_interval_ms(1000)
        .build();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_config_skips_invalid_targets() {
    let json = r#"{
        "targetMailServers": [
            {
                "hostAddress": "imap.example.com",
                "username": "watch@example.com",
                "password": "secret",
                "targetSubjectSnippet": "[backup]",
                "displayName": "backups"
            },
            {
                "hostAddress": "imap.example.com",
                "username": "watch@example.com",
                "password": "secret",
                "targetSubjectSnippet": "[backup]",
                "alarmThresholdSecs": 0,
                "displayName": "broken"
            }
        ],
        "notificationMailServer": {
            "hostAddress": "smtp.example.com",
            "fromAddress": "alerts@example.com",
            "recipients": ["ops@example.com"]
        }
    }"#;

    let config = MailAwareConfig::from_json_str(json).expect("valid config");
    assert_eq!(config.targets.len(), 1);
    assert_eq!(config.skipped_targets, 1);
    assert_eq!(config.targets[0].display_name, "backups");
}
