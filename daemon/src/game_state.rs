use serde::{Deserialize, Serialize};

use crate::classifier::{ClassifiedEvent, OrderSlot};

/// How long after a run starts before the player counts as in-game.
/// Keeps the ready check from passing before the mod has validated the run.
pub const IN_GAME_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// What the log stream has told us about the local game client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub in_game: bool,
    pub hard_mode: bool,
    pub racing_plus_mod_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_slot: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order7: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order9: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order14: Option<Vec<u32>>,
}

/// Why the local player may not mark themselves ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadyBlocker {
    NotInGame,
    HardMode,
    ModNotEnabled,
}

impl GameState {
    pub fn ready_blocker(&self) -> Option<ReadyBlocker> {
        if !self.in_game {
            Some(ReadyBlocker::NotInGame)
        } else if self.hard_mode {
            Some(ReadyBlocker::HardMode)
        } else if !self.racing_plus_mod_enabled {
            Some(ReadyBlocker::ModNotEnabled)
        } else {
            None
        }
    }

    pub fn is_ready_valid(&self) -> bool {
        self.ready_blocker().is_none()
    }
}

/// Client-side collaborators notified of game-state changes.
pub trait ClientHooks {
    /// Re-evaluates whether the ready checkbox may be enabled.
    fn recheck_ready_validity(&self, state: &GameState);
    /// The mod loader writes per-slot files, so it needs the active save slot.
    fn on_save_slot_changed(&self, slot: u8);
}

/// A side effect the caller must carry out after a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Re-evaluate whether the ready checkbox may be enabled.
    RecheckReady,
    /// Notify the mod loader that the save slot changed.
    SaveSlotChanged(u8),
    /// Call [`enter_game`] once [`IN_GAME_DELAY`] has elapsed.
    ScheduleInGame,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: GameState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn unchanged(state: GameState) -> Self {
        Self {
            state,
            effects: Vec::new(),
        }
    }
}

/// Applies a classified event to `state`.
///
/// Telemetry and unrecognized events leave the state alone and produce no effects.
pub fn apply(event: &ClassifiedEvent, mut state: GameState) -> Transition {
    let effects = match event {
        ClassifiedEvent::SaveSlotChanged { slot } => {
            state.save_slot = Some(*slot);
            vec![Effect::SaveSlotChanged(*slot), Effect::RecheckReady]
        }
        ClassifiedEvent::TitleMenuInitialized => {
            state.in_game = false;
            state.hard_mode = false;
            state.racing_plus_mod_enabled = false;
            vec![Effect::RecheckReady]
        }
        ClassifiedEvent::RunStarted => vec![Effect::ScheduleInGame],
        ClassifiedEvent::WrongModeDetected => {
            state.hard_mode = true;
            vec![Effect::RecheckReady]
        }
        ClassifiedEvent::ModValidationSucceeded => {
            state.racing_plus_mod_enabled = true;
            vec![Effect::RecheckReady]
        }
        ClassifiedEvent::SpeedrunOrderSet { slot, order } => {
            let target = match slot {
                OrderSlot::Seven => &mut state.order7,
                OrderSlot::Nine => &mut state.order9,
                OrderSlot::Fourteen => &mut state.order14,
            };
            *target = Some(order.clone());
            vec![Effect::RecheckReady]
        }
        _ => return Transition::unchanged(state),
    };
    Transition { state, effects }
}

/// The delayed half of [`ClassifiedEvent::RunStarted`].
pub fn enter_game(mut state: GameState) -> Transition {
    state.in_game = true;
    Transition {
        state,
        effects: vec![Effect::RecheckReady],
    }
}
