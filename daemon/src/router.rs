/// Per-line dispatch: classify, then update game state or gate and forward.
///
/// Runs only on the daemon event loop, so the game state has a single owner
/// and needs no locking.
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::classifier::{classify, ClassifiedEvent};
use crate::error::{DialogKind, ErrorReporter};
use crate::event::DaemonEvent;
use crate::game_state::{self, ClientHooks, Effect, GameState, Transition, IN_GAME_DELAY};
use crate::monitor::SessionId;
use crate::outbound::{OutboundMessage, OutboundSink};
use crate::race::{self, RaceRegistry};

/// What the monitor should do with its session after a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Continue,
    /// The log producer reported an error; the session must end.
    EndSession(String),
}

pub struct Router {
    state: GameState,
    local_name: String,
    reporter: Arc<dyn ErrorReporter>,
    hooks: Arc<dyn ClientHooks>,
    sink: Box<dyn OutboundSink>,
    /// Used to deliver the delayed in-game transition back to the event loop.
    events: mpsc::Sender<DaemonEvent>,
}

impl Router {
    pub fn new(
        local_name: String,
        reporter: Arc<dyn ErrorReporter>,
        hooks: Arc<dyn ClientHooks>,
        sink: Box<dyn OutboundSink>,
        events: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        Self {
            state: GameState::default(),
            local_name,
            reporter,
            hooks,
            sink,
            events,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn set_local_name(&mut self, name: String) {
        self.local_name = name;
    }

    /// Forgets everything learned from the previous session's log.
    pub fn reset(&mut self) {
        self.state = GameState::default();
        self.hooks.recheck_ready_validity(&self.state);
    }

    /// Classifies and routes one line from `session`.
    pub fn handle_line(
        &mut self,
        session: SessionId,
        line: &str,
        races: &dyn RaceRegistry,
    ) -> LineOutcome {
        let event = classify(line);

        match &event {
            ClassifiedEvent::Unrecognized { .. } => {
                tracing::trace!(line, "ignoring log line");
                return LineOutcome::Continue;
            }
            e if e.is_noisy() => tracing::debug!(line, "log line"),
            _ => tracing::info!(line, "log line"),
        }

        if let ClassifiedEvent::ErrorReported(err) = &event {
            let message = err.to_string();
            if err.is_fatal() {
                self.reporter.error_report(&message, true, DialogKind::Error);
                return LineOutcome::EndSession(message);
            }
            self.reporter.error_report(&message, false, DialogKind::Notice);
            return LineOutcome::Continue;
        }

        if event.is_telemetry() {
            self.forward(&event, races);
        } else {
            let transition = game_state::apply(&event, std::mem::take(&mut self.state));
            self.commit(session, transition);
        }
        LineOutcome::Continue
    }

    /// Applies the delayed half of a run start. The caller checks that the
    /// scheduling session is still live.
    pub fn enter_game(&mut self, session: SessionId) {
        let transition = game_state::enter_game(std::mem::take(&mut self.state));
        self.commit(session, transition);
    }

    fn forward(&self, event: &ClassifiedEvent, races: &dyn RaceRegistry) {
        if !race::should_forward(event, races, &self.local_name) {
            return;
        }
        let Some(race_id) = races.current_race_id() else {
            return;
        };
        if let Some(msg) = OutboundMessage::for_event(race_id, event) {
            tracing::debug!(command = msg.command(), race_id, "forwarding to race server");
            self.sink.send(msg);
        }
    }

    fn commit(&mut self, session: SessionId, transition: Transition) {
        self.state = transition.state;
        for effect in transition.effects {
            match effect {
                Effect::RecheckReady => self.hooks.recheck_ready_validity(&self.state),
                Effect::SaveSlotChanged(slot) => self.hooks.on_save_slot_changed(slot),
                Effect::ScheduleInGame => self.schedule_in_game(session),
            }
        }
    }

    /// Fire-and-forget timer; never blocks processing of later lines.
    fn schedule_in_game(&self, session: SessionId) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(IN_GAME_DELAY).await;
            let _ = events.send(DaemonEvent::InGameDelayElapsed { session }).await;
        });
    }
}
