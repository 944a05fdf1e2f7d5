use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::event::DaemonEvent;

pub const MIN_POLL_INTERVAL_MS: u64 = 50;
pub const MAX_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Root configuration structure. Deserialized from `<app data>/config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub account: AccountConfig,
}

/// Where the game log lives and how often to check it for new lines.
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Path to the Afterbirth+ `log.txt`. Unset until the user picks it.
    pub log_file_path: Option<PathBuf>,
    /// Delay between reads of the log file. Clamped to [50, 2000].
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            log_file_path: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl WatcherConfig {
    pub fn effective_poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS),
        )
    }
}

/// The logged-in race account.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountConfig {
    /// Name the local player appears under in race racer lists.
    #[serde(default)]
    pub username: String,
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Watches `path` and sends a `ConfigReloaded` event whenever it is rewritten.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    watch_file(path, tx, |p| load_or_default(p).map(DaemonEvent::ConfigReloaded)).await;
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the file
/// is created or modified, `reload` re-reads it and the resulting event is sent to `tx`.
pub async fn watch_file<F>(path: PathBuf, tx: mpsc::Sender<DaemonEvent>, reload: F)
where
    F: Fn(&Path) -> Result<DaemonEvent> + Send + 'static,
{
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "failed to create file watcher");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            tracing::error!(path = %path.display(), "watched path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        tracing::error!(dir = %watch_dir.display(), error = %e, "failed to watch directory");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_file = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_file && is_write {
            match reload(&path) {
                Ok(reloaded) => {
                    if tx.send(reloaded).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %format!("{e:#}"), "failed to reload file"),
            }
        }
    }
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
