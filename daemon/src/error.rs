/// Error taxonomy for the log pipeline and the collaborator that surfaces
/// errors to the user.
///
/// - [`ConfigError`]: the log path is unset, missing, or points at the wrong
///   game installation. Fatal to starting a session.
/// - [`LineError::Parse`]: a known prefix with a malformed payload. The line
///   is dropped and a low-severity notice is raised.
/// - [`LineError::Upstream`]: the log producer reported an `error: ` line.
///   Reported and ends the active session, like a stream fault.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no log file path is configured")]
    LogPathUnset,
    #[error("log file not found: {}", .0.display())]
    LogFileMissing(PathBuf),
    #[error(
        "it appears that you have selected your Rebirth \"log.txt\" file, \
         which is different than the Afterbirth+ \"log.txt\" file"
    )]
    RebirthLogFile,
    #[error(
        "it appears that you have selected your Afterbirth \"log.txt\" file, \
         which is different than the Afterbirth+ \"log.txt\" file"
    )]
    AfterbirthLogFile,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LineError {
    #[error("failed to parse the {what} from the log line: {line:?}")]
    Parse { what: &'static str, line: String },
    #[error("something went wrong with the log monitoring: {0}")]
    Upstream(String),
}

impl LineError {
    pub fn parse(what: &'static str, line: &str) -> Self {
        Self::Parse {
            what,
            line: line.to_string(),
        }
    }

    /// Upstream errors end the session; parse errors only drop their line.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Starting a second session would attach two tails to the same state.
    #[error("a log monitoring session is already active")]
    SessionAlreadyActive,
}

/// Which dialog the UI should use to present an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DialogKind {
    /// Generic error modal.
    Error,
    /// The "select your log file" modal.
    LogFileModal,
    /// Non-modal notice.
    Notice,
}

/// Sink for user-facing errors.
pub trait ErrorReporter {
    fn error_report(&self, message: &str, is_fatal: bool, dialog: DialogKind);
}
