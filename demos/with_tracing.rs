//! Example: Watching one mailbox with tracing enabled.
//!
//! Runs a single monitor against a real IMAP server and prints alarm
//! transitions instead of mailing them. All worker, IMAP and TLS steps emit
//! tracing spans and events.
//!
//! # Usage
//!
//! ```bash
//! export IMAP_HOST="imap.example.com"
//! export IMAP_USERNAME="watch@example.com"
//! export IMAP_PASSWORD="your-app-password"
//! export HEARTBEAT_SUBJECT="[backup] completed"
//! # Set log level (trace, debug, info, warn, error)
//! export RUST_LOG=mail_aware=debug
//!
//! cargo run --example with_tracing
//! ```

use async_trait::async_trait;
use mail_aware::{
    ImapMailboxClient, MailboxMonitor, NotificationError, NotificationSink, TargetMailbox,
};
use std::env;
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Prints transitions to stdout.
struct ConsoleSink;

#[async_trait]
impl NotificationSink for ConsoleSink {
    async fn notify_alarm(&self, target: &str) -> Result<(), NotificationError> {
        println!("\n{}", mail_aware::notify::render_alarm_body(target));
        Ok(())
    }

    async fn notify_normal(&self, target: &str) -> Result<(), NotificationError> {
        println!("\n{}", mail_aware::notify::render_normal_body(target));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> mail_aware::Result<()> {
    // Initialize tracing subscriber with environment filter
    // Use RUST_LOG environment variable to control log levels
    // Example: RUST_LOG=mail_aware=debug,info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mail_aware=info")),
        )
        .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let host = env::var("IMAP_HOST").expect("IMAP_HOST environment variable required");
    let username = env::var("IMAP_USERNAME").expect("IMAP_USERNAME environment variable required");
    let password = env::var("IMAP_PASSWORD").expect("IMAP_PASSWORD environment variable required");
    let subject = env::var("HEARTBEAT_SUBJECT").unwrap_or_else(|_| "heartbeat".to_string());

    tracing::info!(imap_host = %host, "Starting mail-aware example");

    // Short threshold so the alarm fires within a couple of minutes
    let target = TargetMailbox::builder()
        .display_name("demo")
        .host(host)
        .username(username)
        .password(password)
        .subject_snippet(subject)
        .alarm_threshold_secs(120)
        .poll_interval_ms(5_000)
        .build()?;

    tracing::debug!(?target, "Configuration built successfully");

    let mut monitor = MailboxMonitor::new(
        target,
        Box::new(ImapMailboxClient::new()),
        Arc::new(ConsoleSink),
    );
    monitor.start()?;

    println!("Monitoring, press Ctrl-C to stop...");
    tokio::signal::ctrl_c().await.ok();

    // Stop emits the teardown spans (close, logout)
    monitor.stop();
    monitor.join().await;

    tracing::info!("Example completed successfully");

    Ok(())
}
