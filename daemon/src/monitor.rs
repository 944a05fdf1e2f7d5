/// Log stream monitoring sessions.
///
/// A session is started with a validated log path and owns the tail task that
/// feeds lines into the event loop.  The [`Monitor`] keeps at most one session
/// alive, tracks the session state machine
/// (`Idle → Starting → Active → {Active, Erroring} → Stopped`) and routes the
/// session's events through the [`Router`].
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::WatcherConfig;
use crate::error::{ConfigError, DialogKind, ErrorReporter, MonitorError};
use crate::event::DaemonEvent;
use crate::race::RaceRegistry;
use crate::router::{LineOutcome, Router};
use crate::tail;

/// Directory names of installations whose `log.txt` is not the Afterbirth+ one.
/// Matched as whole path segments, so `Binding of Isaac Afterbirth+` passes.
const REBIRTH_DIR: &str = "Binding of Isaac Rebirth";
const AFTERBIRTH_DIR: &str = "Binding of Isaac Afterbirth";

/// Identifies one monitoring session so stale events can be discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    /// No session has been started, or the last start was rejected.
    Idle,
    Starting,
    /// Lines are being read and routed.
    Active,
    /// The stream faulted; the session is being torn down.
    Erroring,
    Stopped,
}

/// Checks that `path` is set, is not a log from the wrong game, and exists.
///
/// The wrong-installation checks run first, so a Rebirth or Afterbirth path
/// is reported as such even when the file is missing.
pub fn validate_log_path(path: Option<&Path>) -> Result<&Path, ConfigError> {
    let path = path.ok_or(ConfigError::LogPathUnset)?;
    if has_segment(path, REBIRTH_DIR) {
        return Err(ConfigError::RebirthLogFile);
    }
    if has_segment(path, AFTERBIRTH_DIR) {
        return Err(ConfigError::AfterbirthLogFile);
    }
    if !path.exists() {
        return Err(ConfigError::LogFileMissing(path.to_path_buf()));
    }
    Ok(path)
}

/// Segment match on either slash so Windows paths are caught on any host.
fn has_segment(path: &Path, segment: &str) -> bool {
    path.to_string_lossy()
        .split(|c: char| c == '/' || c == '\\')
        .any(|part| part == segment)
}

/// A running tail over one log file.
struct MonitorSession {
    id: SessionId,
    path: PathBuf,
    /// Setting this to `true` signals the tail task to stop.
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MonitorSession {
    fn start(id: SessionId, path: PathBuf, config: &WatcherConfig, tx: mpsc::Sender<DaemonEvent>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(tail::run(
            id,
            path.clone(),
            config.effective_poll_interval(),
            tx,
            stop_rx,
        ));
        Self {
            id,
            path,
            stop_tx,
            handle,
        }
    }

    /// Signals the tail task to stop and waits for it to finish.
    async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

pub struct Monitor {
    state: MonitorState,
    session: Option<MonitorSession>,
    next_id: u64,
    router: Router,
    reporter: Arc<dyn ErrorReporter>,
    events: mpsc::Sender<DaemonEvent>,
}

impl Monitor {
    pub fn new(
        router: Router,
        reporter: Arc<dyn ErrorReporter>,
        events: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        Self {
            state: MonitorState::Idle,
            session: None,
            next_id: 0,
            router,
            reporter,
            events,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Path of the file the live session is tailing.
    pub fn log_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.path.as_path())
    }

    pub fn is_live(&self, session: SessionId) -> bool {
        self.state == MonitorState::Active && self.session.as_ref().is_some_and(|s| s.id == session)
    }

    /// Starts monitoring the configured log file.
    ///
    /// Game state always starts from scratch. A rejected path is reported
    /// with the log file dialog and leaves the monitor `Idle`. Starting while a session exists is a caller bug and
    /// fails without touching the running session.
    pub fn begin(&mut self, config: &WatcherConfig) -> Result<SessionId, MonitorError> {
        if self.session.is_some() {
            return Err(MonitorError::SessionAlreadyActive);
        }
        self.state = MonitorState::Starting;

        let path = match validate_log_path(config.log_file_path.as_deref()) {
            Ok(p) => p.to_path_buf(),
            Err(e) => {
                self.state = MonitorState::Idle;
                self.reporter
                    .error_report(&e.to_string(), true, DialogKind::LogFileModal);
                return Err(e.into());
            }
        };

        self.router.reset();
        self.next_id += 1;
        let id = SessionId::new(self.next_id);
        self.session = Some(MonitorSession::start(id, path, config, self.events.clone()));
        self.state = MonitorState::Active;
        tracing::info!(session = id.0, "log monitoring started");
        Ok(id)
    }

    /// Stops the live session, if any.
    pub async fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop().await;
            self.state = MonitorState::Stopped;
            tracing::info!("log monitoring stopped");
        }
    }

    /// Handles the session-scoped events. Events from a session that is no
    /// longer live are dropped.
    pub async fn handle(&mut self, event: DaemonEvent, races: &dyn RaceRegistry) {
        match event {
            DaemonEvent::LogLine { session, line } => {
                if !self.is_live(session) {
                    return;
                }
                if let LineOutcome::EndSession(reason) =
                    self.router.handle_line(session, &line, races)
                {
                    self.fail(&reason).await;
                }
            }
            DaemonEvent::StreamFault { session, detail } => {
                if !self.is_live(session) {
                    return;
                }
                let message = format!("Something went wrong with the log monitoring: {detail}");
                self.reporter.error_report(&message, true, DialogKind::Error);
                self.fail(&detail).await;
            }
            DaemonEvent::InGameDelayElapsed { session } => {
                if self.is_live(session) {
                    self.router.enter_game(session);
                } else {
                    tracing::debug!(session = session.0, "in-game delay elapsed after session ended");
                }
            }
            _ => {}
        }
    }

    async fn fail(&mut self, reason: &str) {
        self.state = MonitorState::Erroring;
        tracing::error!(reason, "log monitoring session failed");
        if let Some(session) = self.session.take() {
            session.stop().await;
        }
        self.state = MonitorState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_state::GameState;
    use crate::race::RaceBoard;
    use crate::router::tests::{racing_board, router, Recorder};
    use std::io::Write;
    use std::time::Duration;

    fn monitor() -> (Monitor, Arc<Recorder>, mpsc::Receiver<DaemonEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let (router, rec) = router(tx.clone());
        (Monitor::new(router, rec.clone(), tx), rec, rx)
    }

    fn watcher_config(path: &Path) -> WatcherConfig {
        WatcherConfig {
            log_file_path: Some(path.to_path_buf()),
            poll_interval_ms: 50,
        }
    }

    // ── validate_log_path ─────────────────────────────────────────────────────

    #[test]
    fn unset_path_is_rejected() {
        assert_eq!(validate_log_path(None), Err(ConfigError::LogPathUnset));
    }

    #[test]
    fn missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        assert_eq!(
            validate_log_path(Some(path.as_path())),
            Err(ConfigError::LogFileMissing(path.clone()))
        );
    }

    #[test]
    fn wrong_installations_are_rejected_with_either_slash() {
        // Neither file exists; the installation check still wins.
        let rebirth = Path::new(r"C:\Users\me\Documents\My Games\Binding of Isaac Rebirth\log.txt");
        assert_eq!(validate_log_path(Some(rebirth)), Err(ConfigError::RebirthLogFile));

        let afterbirth = Path::new("/home/me/.local/share/binding of isaac/Binding of Isaac Afterbirth/log.txt");
        assert_eq!(validate_log_path(Some(afterbirth)), Err(ConfigError::AfterbirthLogFile));
    }

    #[test]
    fn afterbirth_plus_log_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let game_dir = dir.path().join("Binding of Isaac Afterbirth+");
        std::fs::create_dir(&game_dir).unwrap();
        let path = game_dir.join("log.txt");
        std::fs::write(&path, "").unwrap();
        assert_eq!(validate_log_path(Some(path.as_path())), Ok(path.as_path()));
    }

    // ── session lifecycle ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn bad_path_reports_and_stays_idle() {
        let (mut m, rec, _rx) = monitor();
        let err = m.begin(&WatcherConfig::default()).unwrap_err();
        assert!(matches!(err, MonitorError::Config(ConfigError::LogPathUnset)));
        assert_eq!(m.state(), MonitorState::Idle);

        let errors = rec.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1);
        assert_eq!(errors[0].2, DialogKind::LogFileModal);
    }

    #[tokio::test]
    async fn second_session_fails_fast() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let (mut m, _rec, _rx) = monitor();
        let first = m.begin(&watcher_config(tmp.path())).unwrap();

        assert!(matches!(
            m.begin(&watcher_config(tmp.path())),
            Err(MonitorError::SessionAlreadyActive)
        ));
        assert!(m.is_live(first));
        assert_eq!(m.state(), MonitorState::Active);

        m.stop().await;
        assert_eq!(m.state(), MonitorState::Stopped);
        assert!(!m.is_live(first));
    }

    #[tokio::test]
    async fn restart_after_stop_gets_a_new_session() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let (mut m, _rec, _rx) = monitor();
        let first = m.begin(&watcher_config(tmp.path())).unwrap();
        m.stop().await;
        let second = m.begin(&watcher_config(tmp.path())).unwrap();
        assert_ne!(first, second);
        assert_eq!(m.log_path(), Some(tmp.path()));
        m.stop().await;
    }

    #[tokio::test]
    async fn new_session_starts_with_fresh_game_state() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let (mut m, rec, _rx) = monitor();
        let board = RaceBoard::default();

        let first = m.begin(&watcher_config(tmp.path())).unwrap();
        for line in ["Race validation succeeded.", "Race error: Wrong mode.", "Save file slot: 2"] {
            let evt = DaemonEvent::LogLine {
                session: first,
                line: line.to_string(),
            };
            m.handle(evt, &board).await;
        }
        assert!(m.router_mut().state().hard_mode);
        m.stop().await;

        m.begin(&watcher_config(tmp.path())).unwrap();
        assert_eq!(*m.router_mut().state(), GameState::default());
        // The UI is told readiness was lost.
        assert_eq!(rec.rechecks.lock().unwrap().last(), Some(&GameState::default()));
        m.stop().await;
    }

    #[tokio::test]
    async fn lines_from_the_file_are_routed_in_order() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let (mut m, rec, mut rx) = monitor();
        m.begin(&watcher_config(tmp.path())).unwrap();
        let board = racing_board();

        tokio::time::sleep(Duration::from_millis(100)).await;
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(tmp.path()).unwrap();
            writeln!(f, "New item: 1").unwrap();
            writeln!(f, "New item: 2").unwrap();
        }

        while rec.sent.lock().unwrap().len() < 2 {
            let evt = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            m.handle(evt, &board).await;
        }
        let ids: Vec<String> = rec
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|msg| serde_json::to_value(msg).unwrap()["data"]["itemID"].to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
        m.stop().await;
    }

    #[tokio::test]
    async fn upstream_error_line_stops_the_session() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let (mut m, rec, _rx) = monitor();
        let session = m.begin(&watcher_config(tmp.path())).unwrap();

        let line = DaemonEvent::LogLine {
            session,
            line: "error: the game closed the log".to_string(),
        };
        m.handle(line, &RaceBoard::default()).await;

        assert_eq!(m.state(), MonitorState::Stopped);
        assert!(!m.is_live(session));
        assert!(rec.errors.lock().unwrap()[0].1);
    }

    #[tokio::test]
    async fn stream_fault_is_reported_and_not_restarted() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let (mut m, rec, _rx) = monitor();
        let session = m.begin(&watcher_config(tmp.path())).unwrap();

        let fault = DaemonEvent::StreamFault {
            session,
            detail: "file removed".to_string(),
        };
        m.handle(fault, &RaceBoard::default()).await;

        assert_eq!(m.state(), MonitorState::Stopped);
        assert!(m.log_path().is_none());
        let errors = rec.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].0.contains("file removed"));
        assert_eq!(errors[0].2, DialogKind::Error);
    }

    #[tokio::test]
    async fn events_from_a_stale_session_are_ignored() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let (mut m, rec, _rx) = monitor();
        let old = m.begin(&watcher_config(tmp.path())).unwrap();
        m.stop().await;
        m.begin(&watcher_config(tmp.path())).unwrap();

        let line = DaemonEvent::LogLine {
            session: old,
            line: "New item: 5".to_string(),
        };
        m.handle(line, &racing_board()).await;

        assert!(rec.sent.lock().unwrap().is_empty());
        m.stop().await;
    }

    // ── in-game delay ─────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn in_game_flips_only_after_the_delay() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let (mut m, _rec, mut rx) = monitor();
        let session = m.begin(&watcher_config(tmp.path())).unwrap();
        let board = RaceBoard::default();

        for line in ["Title menu initialized.", "A new run has begun."] {
            let evt = DaemonEvent::LogLine {
                session,
                line: line.to_string(),
            };
            m.handle(evt, &board).await;
        }
        assert!(!m.router_mut().state().in_game);

        // Lines arriving while the delay is pending are applied right away.
        let evt = DaemonEvent::LogLine {
            session,
            line: "Race validation succeeded.".to_string(),
        };
        m.handle(evt, &board).await;
        assert!(m.router_mut().state().racing_plus_mod_enabled);
        assert!(!m.router_mut().state().in_game);

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(!m.router_mut().state().in_game);

        loop {
            match rx.recv().await {
                Some(evt @ DaemonEvent::InGameDelayElapsed { .. }) => {
                    m.handle(evt, &board).await;
                    break;
                }
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
        assert!(m.router_mut().state().in_game);
        m.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn in_game_delay_is_a_no_op_after_stop() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let (mut m, rec, mut rx) = monitor();
        let session = m.begin(&watcher_config(tmp.path())).unwrap();
        let rechecks_at_start = rec.rechecks.lock().unwrap().len();

        let evt = DaemonEvent::LogLine {
            session,
            line: "A new run has begun.".to_string(),
        };
        m.handle(evt, &RaceBoard::default()).await;
        m.stop().await;

        loop {
            match rx.recv().await {
                Some(evt @ DaemonEvent::InGameDelayElapsed { .. }) => {
                    m.handle(evt, &RaceBoard::default()).await;
                    break;
                }
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
        assert!(!m.router_mut().state().in_game);
        assert_eq!(rec.rechecks.lock().unwrap().len(), rechecks_at_start);
    }
}
