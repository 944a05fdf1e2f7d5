/// Race registry view and the gate that decides which telemetry events are
/// forwarded to the race server.
///
/// The registry is owned by the lobby/race UI, which writes it to
/// `race.toml`. The daemon only ever reads it.
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::classifier::{ClassifiedEvent, RunGoal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RacerStatus {
    NotReady,
    Ready,
    Racing,
    Finished,
    Quit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Racer {
    pub name: String,
    pub status: RacerStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ruleset {
    /// Boss the race must be finished on, e.g. `"Blue Baby"`.
    pub goal: String,
}

/// One race as seen by the local client.
#[derive(Debug, Clone, Deserialize)]
pub struct RaceParticipationView {
    pub id: String,
    pub ruleset: Ruleset,
    #[serde(default)]
    pub racers: Vec<Racer>,
}

impl RaceParticipationView {
    pub fn racer(&self, name: &str) -> Option<&Racer> {
        self.racers.iter().find(|r| r.name == name)
    }
}

/// Read-only access to the races the client knows about.
pub trait RaceRegistry {
    /// The race the local player has joined, if any.
    fn current_race_id(&self) -> Option<&str>;
    fn get_race_by_id(&self, id: &str) -> Option<&RaceParticipationView>;
    /// Whether the race is still listed (not finished and removed).
    fn is_race_active(&self, id: &str) -> bool;
}

/// Race registry as last written to `race.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RaceBoard {
    #[serde(default)]
    pub current_race_id: Option<String>,
    #[serde(default)]
    pub races: Vec<RaceParticipationView>,
}

impl RaceRegistry for RaceBoard {
    fn current_race_id(&self) -> Option<&str> {
        self.current_race_id.as_deref()
    }

    fn get_race_by_id(&self, id: &str) -> Option<&RaceParticipationView> {
        self.races.iter().find(|race| race.id == id)
    }

    fn is_race_active(&self, id: &str) -> bool {
        self.get_race_by_id(id).is_some()
    }
}

/// Loads the race board at `path`, returning an empty board if the file does not exist.
pub fn load_or_default(path: &Path) -> Result<RaceBoard> {
    if !path.exists() {
        return Ok(RaceBoard::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read race file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse race file: {}", path.display()))
}

/// Why a telemetry event was held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotTelemetry,
    NoRaceJoined,
    RaceInactive,
    RacerNotFound,
    NotRacing,
    WrongGoal,
}

/// Runs the gate checks in order and returns the id of the race to report to.
pub fn gate<'r>(
    event: &ClassifiedEvent,
    registry: &'r dyn RaceRegistry,
    local_name: &str,
) -> Result<&'r str, Rejection> {
    if !event.is_telemetry() {
        return Err(Rejection::NotTelemetry);
    }
    let race_id = registry.current_race_id().ok_or(Rejection::NoRaceJoined)?;
    if !registry.is_race_active(race_id) {
        return Err(Rejection::RaceInactive);
    }
    let race = registry
        .get_race_by_id(race_id)
        .ok_or(Rejection::RaceInactive)?;
    let racer = race.racer(local_name).ok_or(Rejection::RacerNotFound)?;
    if racer.status != RacerStatus::Racing {
        return Err(Rejection::NotRacing);
    }
    if let ClassifiedEvent::RunFinished { goal } = event {
        if *goal != RunGoal::Trophy && goal.label() != race.ruleset.goal {
            return Err(Rejection::WrongGoal);
        }
    }
    Ok(race_id)
}

/// Whether `event` should be sent to the current race. Rejections are logged.
pub fn should_forward(
    event: &ClassifiedEvent,
    registry: &dyn RaceRegistry,
    local_name: &str,
) -> bool {
    match gate(event, registry, local_name) {
        Ok(_) => true,
        Err(reason) => {
            tracing::debug!(?reason, "telemetry not forwarded");
            false
        }
    }
}
