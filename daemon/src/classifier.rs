/// Line classifier for the Racing+ log stream.
///
/// Each line is matched against fixed prefixes and exact literals, anchored at
/// the start of the line and case-sensitive. Exactly one [`ClassifiedEvent`]
/// comes out of every line.
use crate::error::LineError;

const SEED_PREFIX: &str = "New seed: ";
const FLOOR_PREFIX: &str = "New floor: ";
const ROOM_PREFIX: &str = "New room: ";
const ITEM_PREFIX: &str = "New item: ";
const SAVE_SLOT_PREFIX: &str = "Save file slot: ";
const ORDER_PREFIX: &str = "New order: ";
const UPSTREAM_ERROR_PREFIX: &str = "error: ";

const TITLE_MENU_LINE: &str = "Title menu initialized.";
const RUN_STARTED_LINE: &str = "A new run has begun.";
const WRONG_MODE_LINE: &str = "Race error: Wrong mode.";
const VALIDATION_LINE: &str = "Race validation succeeded.";
const FINISH_PREFIX: &str = "Finished run: ";

/// The boss (or trophy) a run was finished on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunGoal {
    BlueBaby,
    TheLamb,
    MegaSatan,
    /// Finishing on the trophy satisfies any ruleset.
    Trophy,
}

impl RunGoal {
    /// The name used both in the log line and in a race ruleset.
    pub fn label(self) -> &'static str {
        match self {
            Self::BlueBaby => "Blue Baby",
            Self::TheLamb => "The Lamb",
            Self::MegaSatan => "Mega Satan",
            Self::Trophy => "Trophy",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        [Self::BlueBaby, Self::TheLamb, Self::MegaSatan, Self::Trophy]
            .into_iter()
            .find(|goal| goal.label() == label)
    }
}

/// Speedrun order slots, keyed by the number of characters in the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSlot {
    Seven,
    Nine,
    Fourteen,
}

impl OrderSlot {
    fn for_len(len: usize) -> Option<Self> {
        match len {
            7 => Some(Self::Seven),
            9 => Some(Self::Nine),
            14 => Some(Self::Fourteen),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedEvent {
    SaveSlotChanged { slot: u8 },
    TitleMenuInitialized,
    RunStarted,
    WrongModeDetected,
    ModValidationSucceeded,
    SpeedrunOrderSet { slot: OrderSlot, order: Vec<u32> },
    SeedAssigned { seed: String },
    FloorChanged { floor_num: u32, stage_type: u32 },
    RoomChanged { room_id: String },
    ItemCollected { item_id: u32 },
    RunFinished { goal: RunGoal },
    Unrecognized { raw: String },
    ErrorReported(LineError),
}

impl ClassifiedEvent {
    /// Events destined for the race server, subject to the race gate.
    pub fn is_telemetry(&self) -> bool {
        matches!(
            self,
            Self::SeedAssigned { .. }
                | Self::FloorChanged { .. }
                | Self::RoomChanged { .. }
                | Self::ItemCollected { .. }
                | Self::RunFinished { .. }
        )
    }

    /// High-frequency events that are only logged at debug level.
    pub fn is_noisy(&self) -> bool {
        matches!(
            self,
            Self::FloorChanged { .. } | Self::RoomChanged { .. } | Self::ItemCollected { .. }
        )
    }
}

/// Classifies one log line.
pub fn classify(line: &str) -> ClassifiedEvent {
    match line {
        TITLE_MENU_LINE => return ClassifiedEvent::TitleMenuInitialized,
        RUN_STARTED_LINE => return ClassifiedEvent::RunStarted,
        WRONG_MODE_LINE => return ClassifiedEvent::WrongModeDetected,
        VALIDATION_LINE => return ClassifiedEvent::ModValidationSucceeded,
        _ => {}
    }

    if let Some(goal) = line.strip_prefix(FINISH_PREFIX).and_then(RunGoal::from_label) {
        return ClassifiedEvent::RunFinished { goal };
    }

    let parsed = if let Some(detail) = line.strip_prefix(UPSTREAM_ERROR_PREFIX) {
        Err(LineError::Upstream(detail.to_string()))
    } else if let Some(rest) = line.strip_prefix(SEED_PREFIX) {
        parse_seed(rest)
            .map(|seed| ClassifiedEvent::SeedAssigned { seed })
            .ok_or_else(|| LineError::parse("new seed", line))
    } else if let Some(rest) = line.strip_prefix(FLOOR_PREFIX) {
        parse_floor(rest)
            .map(|(floor_num, stage_type)| ClassifiedEvent::FloorChanged {
                floor_num,
                stage_type,
            })
            .ok_or_else(|| LineError::parse("new floor", line))
    } else if let Some(rest) = line.strip_prefix(ROOM_PREFIX) {
        if rest.is_empty() {
            Err(LineError::parse("new room", line))
        } else {
            Ok(ClassifiedEvent::RoomChanged {
                room_id: rest.to_string(),
            })
        }
    } else if let Some(rest) = line.strip_prefix(ITEM_PREFIX) {
        parse_uint(rest)
            .map(|item_id| ClassifiedEvent::ItemCollected { item_id })
            .ok_or_else(|| LineError::parse("new item", line))
    } else if let Some(rest) = line.strip_prefix(SAVE_SLOT_PREFIX) {
        parse_slot(rest)
            .map(|slot| ClassifiedEvent::SaveSlotChanged { slot })
            .ok_or_else(|| LineError::parse("save slot number", line))
    } else if let Some(rest) = line.strip_prefix(ORDER_PREFIX) {
        match serde_json::from_str::<Vec<u32>>(rest) {
            Ok(order) => Ok(match OrderSlot::for_len(order.len()) {
                Some(slot) => ClassifiedEvent::SpeedrunOrderSet { slot, order },
                // Orders of any other length are dropped without a report.
                None => ClassifiedEvent::Unrecognized {
                    raw: line.to_string(),
                },
            }),
            Err(_) => Err(LineError::parse("speedrun order", line)),
        }
    } else {
        Ok(ClassifiedEvent::Unrecognized {
            raw: line.to_string(),
        })
    };

    parsed.unwrap_or_else(ClassifiedEvent::ErrorReported)
}

/// `XXXX XXXX`: two groups of four non-space characters.
fn parse_seed(rest: &str) -> Option<String> {
    let (head, tail) = rest.split_once(' ')?;
    let is_group = |s: &str| s.chars().count() == 4 && !s.chars().any(char::is_whitespace);
    (is_group(head) && is_group(tail)).then(|| rest.to_string())
}

/// `<floor>-<stage type>`
fn parse_floor(rest: &str) -> Option<(u32, u32)> {
    let (floor, stage) = rest.split_once('-')?;
    Some((parse_uint(floor)?, parse_uint(stage)?))
}

fn parse_slot(rest: &str) -> Option<u8> {
    match rest.as_bytes() {
        [digit @ b'0'..=b'9'] => Some(digit - b'0'),
        _ => None,
    }
}

/// Digits only; rejects the sign and whitespace `str::parse` would otherwise tolerate.
fn parse_uint(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
