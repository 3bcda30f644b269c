//! Connect to a slotsync server and log what the mirror sees
//!
//! ```text
//! mirror_watch client.ron
//! mirror_watch client.ron --observer -v
//! ```

use clap::Parser;
use slotsync_client::{ClientConfig, Session, SessionEvent, WsConnector};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(name = "mirror_watch", about = "Watch a slotsync mirror")]
struct Cli {
    /// RON client configuration
    config: PathBuf,

    /// Join as an observer regardless of the configuration
    #[arg(long)]
    observer: bool,

    /// Seconds between bandwidth reports
    #[arg(long, default_value_t = 5)]
    report_secs: u64,

    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> slotsync_client::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info".into()),
        1 => tracing_subscriber::EnvFilter::new("debug"),
        _ => tracing_subscriber::EnvFilter::new("trace"),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Loading configuration from {}", cli.config.display());
    let mut config = ClientConfig::load(&cli.config)?;
    config.observer |= cli.observer;

    let (session, handle, mut events) = Session::new(config, WsConnector::new())?;
    let mut task = tokio::spawn(session.run());
    let mut report = tokio::time::interval(Duration::from_secs(cli.report_secs.max(1)));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping");
                handle.stop();
            }
            _ = report.tick() => {
                let sample = handle.bandwidth();
                let participants = handle.mirror().await.participants().count();
                info!(
                    participants,
                    total = sample.total,
                    components = sample.components,
                    states = sample.states,
                    "bytes received in the last second"
                );
            }
            Some(event) = events.recv() => log_event(&event),
            result = &mut task => {
                return match result {
                    Ok(result) => result,
                    Err(err) => {
                        warn!(error = %err, "session task failed");
                        Ok(())
                    }
                };
            }
        }
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => info!(?state, "session state"),
        SessionEvent::Connected { added } => info!(participants = added.len(), "checked out"),
        SessionEvent::Tick {
            removed,
            added,
            state_updates,
            server_time,
            ..
        } => {
            if !removed.is_empty() || !added.is_empty() || !state_updates.is_empty() {
                info!(
                    removed = removed.len(),
                    added = added.len(),
                    states = state_updates.len(),
                    ?server_time,
                    "tick"
                );
            }
        }
        SessionEvent::UserIndex(index) => info!(index, "assigned slot"),
        SessionEvent::ServerError {
            error_type,
            message,
            retryable,
        } => warn!(%error_type, %message, retryable, "server error"),
        SessionEvent::Warning(message) => warn!(%message, "server warning"),
        SessionEvent::ServerCustom {
            custom_type,
            contents,
        } => info!(custom_type, bytes = contents.len(), "custom message"),
        SessionEvent::ConnectionLost { reason } => warn!(%reason, "connection lost"),
        SessionEvent::Disconnected { reason } => info!(?reason, "disconnected"),
    }
}
