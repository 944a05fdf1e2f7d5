use crate::config::Config;
use crate::monitor::SessionId;
use crate::race::RaceBoard;

pub enum DaemonEvent {
    /// A complete line was appended to the monitored log file.
    LogLine { session: SessionId, line: String },
    /// The tailed file vanished or could not be read; the session is over.
    StreamFault { session: SessionId, detail: String },
    /// The run-start delay elapsed for the session that scheduled it.
    InGameDelayElapsed { session: SessionId },
    /// The outbox writer could not deliver a message.
    SendFailed { command: &'static str, detail: String },
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// The race file changed on disk and was successfully re-parsed.
    RacesReloaded(RaceBoard),
    /// Ctrl+C received; the daemon should stop monitoring and exit.
    Shutdown,
}
