mod classifier;
mod config;
mod error;
mod event;
mod game_state;
mod monitor;
mod outbound;
mod paths;
mod race;
mod router;
mod status;
mod tail;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::error::{DialogKind, ErrorReporter};
use crate::event::DaemonEvent;
use crate::monitor::{Monitor, MonitorState};
use crate::outbound::OutboxWriter;
use crate::router::Router;
use crate::status::StatusBoard;

/// Appends to `RACEWATCH_LOG_PATH` when set, otherwise logs to stderr.
fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    if let Ok(path) = std::env::var("RACEWATCH_LOG_PATH") {
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_ansi(false)
                .with_writer(file)
                .init();
            return;
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();

    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = paths::app_data_dir();
    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        tracing::error!(dir = %app_dir.display(), error = %e, "failed to create app data directory");
        std::process::exit(1);
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths::config_file_path(&app_dir);
    let config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        tracing::error!(error = %format!("{e:#}"), "config error, using defaults");
        config::Config::default()
    });

    let race_path = paths::race_file_path(&app_dir);
    let mut races = race::load_or_default(&race_path).unwrap_or_else(|e| {
        tracing::error!(error = %format!("{e:#}"), "race file error, assuming no race");
        race::RaceBoard::default()
    });

    // ── Initial status ────────────────────────────────────────────────────────
    let status = Arc::new(StatusBoard::new(paths::status_file_path(&app_dir)));

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(256);

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path, event_tx.clone()));
    tokio::spawn(config::watch_file(race_path, event_tx.clone(), |p| {
        race::load_or_default(p).map(DaemonEvent::RacesReloaded)
    }));

    let outbox = OutboxWriter::start(paths::outbox_file_path(&app_dir), event_tx.clone());

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    // ── Log monitoring ────────────────────────────────────────────────────────
    let router = Router::new(
        config.account.username.clone(),
        status.clone(),
        status.clone(),
        Box::new(outbox),
        event_tx.clone(),
    );
    let mut monitor = Monitor::new(router, status.clone(), event_tx.clone());
    if let Err(e) = monitor.begin(&config.watcher) {
        tracing::warn!(error = %e, "log monitoring not started");
    }
    status.set_monitor_state(monitor.state());
    let mut watcher_config = config.watcher;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "racewatch-daemon started");

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            evt @ (DaemonEvent::LogLine { .. }
            | DaemonEvent::StreamFault { .. }
            | DaemonEvent::InGameDelayElapsed { .. }) => {
                let before = monitor.state();
                monitor.handle(evt, &races).await;
                if monitor.state() != before {
                    status.set_monitor_state(monitor.state());
                }
            }

            DaemonEvent::SendFailed { command, detail } => {
                let message = format!("Failed to send {command} to the race server: {detail}");
                status.error_report(&message, false, DialogKind::Notice);
            }

            DaemonEvent::ConfigReloaded(new_config) => {
                tracing::info!("config reloaded");
                monitor
                    .router_mut()
                    .set_local_name(new_config.account.username.clone());

                let path_changed =
                    monitor.log_path() != new_config.watcher.log_file_path.as_deref();
                let interval_changed = watcher_config.effective_poll_interval()
                    != new_config.watcher.effective_poll_interval();
                if path_changed || interval_changed || monitor.state() != MonitorState::Active {
                    monitor.stop().await;
                    match monitor.begin(&new_config.watcher) {
                        Ok(_) => status.clear_error(),
                        Err(e) => tracing::warn!(error = %e, "log monitoring not restarted"),
                    }
                    status.set_monitor_state(monitor.state());
                }
                watcher_config = new_config.watcher;
            }

            DaemonEvent::RacesReloaded(board) => {
                tracing::info!(
                    current_race_id = board.current_race_id.as_deref().unwrap_or("none"),
                    races = board.races.len(),
                    "race file reloaded"
                );
                races = board;
            }

            DaemonEvent::Shutdown => {
                tracing::info!("shutting down");
                monitor.stop().await;
                status.set_monitor_state(monitor.state());
                break;
            }
        }
    }
}
