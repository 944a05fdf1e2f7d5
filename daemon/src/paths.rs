/// Canonical file paths for racewatch data files.
///
/// Everything lives under one application data directory:
///   - config.toml   Written by the client settings screen, read by the daemon.
///   - race.toml     Written by the lobby/race screens, read by the daemon.
///   - status.toml   Written by the daemon, read by the UI for ready gating.
///   - outbox.jsonl  Appended by the daemon, drained by the server connection.
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "Racing+";
/// Overrides the application data directory when set.
pub const HOME_ENV_VAR: &str = "RACEWATCH_HOME";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const RACE_FILE_NAME: &str = "race.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";
pub const OUTBOX_FILE_NAME: &str = "outbox.jsonl";

/// Returns the application data directory.
///
/// `%APPDATA%\Racing+` on Windows, `$XDG_CONFIG_HOME/Racing+` or
/// `$HOME/.config/Racing+` elsewhere, unless `RACEWATCH_HOME` is set.
pub fn app_data_dir() -> PathBuf {
    let lookup = |key: &str| std::env::var_os(key).map(PathBuf::from);
    resolve_app_data_dir(&lookup)
}

fn resolve_app_data_dir(lookup: &dyn Fn(&str) -> Option<PathBuf>) -> PathBuf {
    if let Some(dir) = lookup(HOME_ENV_VAR) {
        return dir;
    }
    let base = lookup("APPDATA")
        .or_else(|| lookup("XDG_CONFIG_HOME"))
        .or_else(|| lookup("HOME").map(|home| home.join(".config")))
        .unwrap_or_else(std::env::temp_dir);
    base.join(APP_DIR_NAME)
}

pub fn config_file_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE_NAME)
}

pub fn race_file_path(dir: &Path) -> PathBuf {
    dir.join(RACE_FILE_NAME)
}

pub fn status_file_path(dir: &Path) -> PathBuf {
    dir.join(STATUS_FILE_NAME)
}

pub fn outbox_file_path(dir: &Path) -> PathBuf {
    dir.join(OUTBOX_FILE_NAME)
}
