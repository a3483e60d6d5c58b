//! `mail-aware` command line entry point.

use clap::Parser;
use mail_aware::config::DEFAULT_CONFIG_FILE;
use mail_aware::{ImapMailboxClient, MailAwareConfig, MonitorSupervisor, SmtpNotifier};
use std::path::PathBuf;
use std::process::ExitCode;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Watches mailboxes for heartbeat messages and alerts when they stop arriving.
#[derive(Debug, Parser)]
#[command(name = "mail-aware", version, about)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, env = "MAIL_AWARE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mail_aware=info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "mail-aware failed to start");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = MailAwareConfig::load(&args.config)?;
    info!(
        config = %args.config.display(),
        targets = config.targets.len(),
        skipped = config.skipped_targets,
        "Configuration loaded"
    );

    let notifier = Arc::new(SmtpNotifier::new(&config.notification)?);
    let supervisor = MonitorSupervisor::start(config.targets, notifier, |_| {
        Box::new(ImapMailboxClient::new())
    })?;

    println!("Started {} monitor(s).", supervisor.len());
    println!("Press \"q\" to quit...");

    tokio::select! {
        () = wait_for_quit_key() => info!("Quit requested"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Interrupt received"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        },
    }

    supervisor.shutdown().await;
    Ok(())
}

/// Resolves once a `q` line is read from stdin.
///
/// Stdin is read on a plain thread: a blocking read parked on the runtime's
/// blocking pool would hold up shutdown until the next line arrives. A closed
/// stdin never resolves, so a detached process keeps running until it is
/// signalled.
async fn wait_for_quit_key() {
    let (quit_tx, quit_rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("stdin-quit".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) if is_quit_command(&line) => {
                        let _ = quit_tx.send(());
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        return;
                    }
                }
            }
        });

    if let Err(e) = spawned {
        warn!(error = %e, "Failed to spawn stdin reader");
        std::future::pending::<()>().await;
    }
    if quit_rx.await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn is_quit_command(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("q")
}
