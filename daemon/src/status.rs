use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::{DialogKind, ErrorReporter};
use crate::game_state::{ClientHooks, GameState, ReadyBlocker};
use crate::monitor::MonitorState;

/// Most recent error surfaced to the user.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ReportedError {
    pub message: String,
    pub fatal: bool,
    pub dialog: DialogKind,
    /// RFC 3339 timestamp of when the error was reported.
    pub timestamp: String,
}

/// Runtime status written by the daemon to `<app data>/status.toml`.
/// The UI reads this file (read-only) to gate the ready checkbox and show errors.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    /// Current log monitoring state.
    pub monitor: MonitorState,
    /// Whether the local player may mark themselves ready.
    pub ready: bool,
    /// First reason the player may not ready up, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_blocker: Option<ReadyBlocker>,
    /// Game-state flags derived from the log.
    pub game: GameState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportedError>,
}

impl DaemonStatus {
    /// Constructs the initial idle status on daemon startup.
    pub fn new() -> Self {
        let game = GameState::default();
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            monitor: MonitorState::Idle,
            ready: game.is_ready_valid(),
            ready_blocker: game.ready_blocker(),
            game,
            error: None,
        }
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Logs errors rather than panicking; a failed status write never stops the
/// daemon.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::error!(dir = %parent.display(), error = %e, "failed to create status directory");
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                tracing::error!(error = %e, "failed to write status file");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to serialize status"),
    }
}

/// Owns the status file; every update rewrites it.
///
/// Doubles as the daemon's [`ErrorReporter`] and [`ClientHooks`]: the UI
/// picks up errors and ready gating from the file.
pub struct StatusBoard {
    path: PathBuf,
    status: Mutex<DaemonStatus>,
}

impl StatusBoard {
    pub fn new(path: PathBuf) -> Self {
        let status = DaemonStatus::new();
        write_status(&path, &status);
        Self {
            path,
            status: Mutex::new(status),
        }
    }

    pub fn set_monitor_state(&self, state: MonitorState) {
        self.update(|s| s.monitor = state);
    }

    /// Drops the last error once the user has fixed the configuration.
    pub fn clear_error(&self) {
        self.update(|s| s.error = None);
    }

    fn update(&self, f: impl FnOnce(&mut DaemonStatus)) {
        let mut status = self.lock();
        f(&mut status);
        write_status(&self.path, &status);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DaemonStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ErrorReporter for StatusBoard {
    fn error_report(&self, message: &str, is_fatal: bool, dialog: DialogKind) {
        if is_fatal {
            tracing::error!(?dialog, "{message}");
        } else {
            tracing::warn!(?dialog, "{message}");
        }
        let reported = ReportedError {
            message: message.to_string(),
            fatal: is_fatal,
            dialog,
            timestamp: chrono::Local::now().to_rfc3339(),
        };
        self.update(|s| s.error = Some(reported));
    }
}

impl ClientHooks for StatusBoard {
    fn recheck_ready_validity(&self, state: &GameState) {
        let blocker = state.ready_blocker();
        tracing::debug!(ready = blocker.is_none(), ?blocker, "ready validity rechecked");
        self.update(|s| {
            s.ready = blocker.is_none();
            s.ready_blocker = blocker;
            s.game = state.clone();
        });
    }

    fn on_save_slot_changed(&self, slot: u8) {
        tracing::info!(slot, "save file slot changed");
        self.update(|s| s.game.save_slot = Some(slot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &Path) -> DaemonStatus {
        toml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    // ── DaemonStatus::new ─────────────────────────────────────────────────────

    #[test]
    fn new_starts_idle_and_not_ready() {
        let s = DaemonStatus::new();
        assert_eq!(s.monitor, MonitorState::Idle);
        assert!(!s.ready);
        assert_eq!(s.ready_blocker, Some(ReadyBlocker::NotInGame));
        assert!(s.error.is_none());
    }

    #[test]
    fn new_version_matches_cargo_pkg() {
        let s = DaemonStatus::new();
        assert_eq!(s.version, env!("CARGO_PKG_VERSION"));
    }

    // ── serialization ─────────────────────────────────────────────────────────

    #[test]
    fn monitor_state_serializes_to_lowercase() {
        let mut s = DaemonStatus::new();
        s.monitor = MonitorState::Erroring;
        let content = toml::to_string_pretty(&s).unwrap();
        assert!(content.contains("monitor = \"erroring\""));
    }

    // ── write_status ──────────────────────────────────────────────────────────

    #[test]
    fn write_status_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dir").join("status.toml");
        write_status(&path, &DaemonStatus::new());
        assert!(path.exists());
    }

    #[test]
    fn write_status_omits_none_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        let mut status = DaemonStatus::new();
        status.ready_blocker = None;
        write_status(&path, &status);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("ready_blocker"));
        assert!(!content.contains("[error]"));
        assert!(!content.contains("save_slot"));
    }

    // ── StatusBoard ───────────────────────────────────────────────────────────

    #[test]
    fn recheck_publishes_flags_and_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        let board = StatusBoard::new(path.clone());

        let state = GameState {
            in_game: true,
            racing_plus_mod_enabled: true,
            order7: Some(vec![1, 2, 3, 4, 5, 6, 7]),
            ..GameState::default()
        };
        board.recheck_ready_validity(&state);

        let parsed = read(&path);
        assert!(parsed.ready);
        assert!(parsed.ready_blocker.is_none());
        assert_eq!(parsed.game, state);
    }

    #[test]
    fn error_report_is_written_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        let board = StatusBoard::new(path.clone());

        board.error_report("log file not found", true, DialogKind::LogFileModal);
        let err = read(&path).error.unwrap();
        assert_eq!(err.message, "log file not found");
        assert!(err.fatal);
        assert_eq!(err.dialog, DialogKind::LogFileModal);
        assert!(chrono::DateTime::parse_from_rfc3339(&err.timestamp).is_ok());

        board.clear_error();
        assert!(read(&path).error.is_none());
    }

    #[test]
    fn save_slot_and_monitor_state_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        let board = StatusBoard::new(path.clone());

        board.on_save_slot_changed(3);
        board.set_monitor_state(MonitorState::Active);

        let parsed = read(&path);
        assert_eq!(parsed.game.save_slot, Some(3));
        assert_eq!(parsed.monitor, MonitorState::Active);
    }
}
