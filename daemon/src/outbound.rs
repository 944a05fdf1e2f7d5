/// Outbound race messages and the sink that delivers them.
///
/// The daemon does not speak the race server protocol itself: each message is
/// appended as one JSON line to the outbox file, which the client's socket
/// layer drains. Writes happen on a background task so a slow disk never
/// holds up line processing.
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::classifier::ClassifiedEvent;
use crate::event::DaemonEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", content = "data", rename_all = "camelCase")]
pub enum OutboundMessage {
    RaceSeed {
        id: String,
        seed: String,
    },
    #[serde(rename_all = "camelCase")]
    RaceFloor {
        id: String,
        floor_num: u32,
        stage_type: u32,
    },
    RaceRoom {
        id: String,
        #[serde(rename = "roomID")]
        room_id: String,
    },
    RaceItem {
        id: String,
        #[serde(rename = "itemID")]
        item_id: u32,
    },
    RaceFinish {
        id: String,
    },
}

impl OutboundMessage {
    /// Builds the message for a telemetry event that passed the race gate.
    pub fn for_event(race_id: &str, event: &ClassifiedEvent) -> Option<Self> {
        let id = race_id.to_string();
        let msg = match event {
            ClassifiedEvent::SeedAssigned { seed } => Self::RaceSeed {
                id,
                seed: seed.clone(),
            },
            ClassifiedEvent::FloorChanged {
                floor_num,
                stage_type,
            } => Self::RaceFloor {
                id,
                floor_num: *floor_num,
                stage_type: *stage_type,
            },
            ClassifiedEvent::RoomChanged { room_id } => Self::RaceRoom {
                id,
                room_id: room_id.clone(),
            },
            ClassifiedEvent::ItemCollected { item_id } => Self::RaceItem {
                id,
                item_id: *item_id,
            },
            ClassifiedEvent::RunFinished { .. } => Self::RaceFinish { id },
            _ => return None,
        };
        Some(msg)
    }

    pub fn command(&self) -> &'static str {
        match self {
            Self::RaceSeed { .. } => "raceSeed",
            Self::RaceFloor { .. } => "raceFloor",
            Self::RaceRoom { .. } => "raceRoom",
            Self::RaceItem { .. } => "raceItem",
            Self::RaceFinish { .. } => "raceFinish",
        }
    }
}

/// Delivers messages to the race coordinator. Must not block the caller.
pub trait OutboundSink {
    fn send(&self, msg: OutboundMessage);
}

/// Appends messages to the outbox file from a background task.
pub struct OutboxWriter {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl OutboxWriter {
    /// Spawns the writer task. Failed writes come back to the event loop as
    /// [`DaemonEvent::SendFailed`].
    pub fn start(path: PathBuf, events: mpsc::Sender<DaemonEvent>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = append_message(&path, &msg) {
                    tracing::error!(command = msg.command(), error = %e, "outbox write failed");
                    let failed = DaemonEvent::SendFailed {
                        command: msg.command(),
                        detail: format!("{e:#}"),
                    };
                    if events.send(failed).await.is_err() {
                        break;
                    }
                }
            }
        });
        Self { tx }
    }
}

impl OutboundSink for OutboxWriter {
    fn send(&self, msg: OutboundMessage) {
        if self.tx.send(msg).is_err() {
            tracing::warn!("outbox writer has stopped; message dropped");
        }
    }
}

/// Serializes `msg` as one JSON line and appends it to `path`.
pub fn append_message(path: &Path, msg: &OutboundMessage) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(msg).context("Failed to serialize outbound message")?;
    line.push('\n');
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open outbox: {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("Failed to write outbox: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::RunGoal;
    use serde_json::json;

    fn to_json(msg: &OutboundMessage) -> serde_json::Value {
        serde_json::to_value(msg).unwrap()
    }

    // ── message shapes ────────────────────────────────────────────────────────

    #[test]
    fn item_message_carries_integer_item_id() {
        let msg =
            OutboundMessage::for_event("R1", &ClassifiedEvent::ItemCollected { item_id: 42 }).unwrap();
        assert_eq!(
            to_json(&msg),
            json!({"command": "raceItem", "data": {"id": "R1", "itemID": 42}})
        );
    }

    #[test]
    fn floor_message_carries_both_integers() {
        let msg = OutboundMessage::for_event(
            "R1",
            &ClassifiedEvent::FloorChanged {
                floor_num: 3,
                stage_type: 1,
            },
        )
        .unwrap();
        assert_eq!(
            to_json(&msg),
            json!({"command": "raceFloor", "data": {"id": "R1", "floorNum": 3, "stageType": 1}})
        );
    }

    #[test]
    fn seed_room_and_finish_shapes() {
        let seed = OutboundMessage::for_event(
            "R1",
            &ClassifiedEvent::SeedAssigned {
                seed: "ABCD EFGH".into(),
            },
        )
        .unwrap();
        assert_eq!(
            to_json(&seed),
            json!({"command": "raceSeed", "data": {"id": "R1", "seed": "ABCD EFGH"}})
        );

        let room = OutboundMessage::for_event(
            "R1",
            &ClassifiedEvent::RoomChanged {
                room_id: "7.1".into(),
            },
        )
        .unwrap();
        assert_eq!(
            to_json(&room),
            json!({"command": "raceRoom", "data": {"id": "R1", "roomID": "7.1"}})
        );

        let finish = OutboundMessage::for_event(
            "R1",
            &ClassifiedEvent::RunFinished {
                goal: RunGoal::Trophy,
            },
        )
        .unwrap();
        assert_eq!(
            to_json(&finish),
            json!({"command": "raceFinish", "data": {"id": "R1"}})
        );
    }

    #[test]
    fn non_telemetry_has_no_message() {
        assert!(OutboundMessage::for_event("R1", &ClassifiedEvent::RunStarted).is_none());
    }

    // ── outbox file ───────────────────────────────────────────────────────────

    #[test]
    fn append_message_writes_one_line_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("outbox.jsonl");
        let msg = OutboundMessage::RaceFinish { id: "R1".into() };
        append_message(&path, &msg).unwrap();
        append_message(&path, &msg).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"command":"raceFinish","data":{"id":"R1"}}"#);
    }

    #[tokio::test]
    async fn writer_task_appends_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.jsonl");
        let (tx, _rx) = mpsc::channel(4);
        let writer = OutboxWriter::start(path.clone(), tx);

        writer.send(OutboundMessage::RaceItem {
            id: "R1".into(),
            item_id: 1,
        });
        writer.send(OutboundMessage::RaceItem {
            id: "R1".into(),
            item_id: 2,
        });

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let content = std::fs::read_to_string(&path).unwrap();
        let ids: Vec<u64> = content
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["data"]["itemID"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn writer_reports_failed_writes() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in place of the file makes the open fail.
        let path = dir.path().join("outbox.jsonl");
        std::fs::create_dir(&path).unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let writer = OutboxWriter::start(path, tx);

        writer.send(OutboundMessage::RaceFinish { id: "R1".into() });

        match rx.recv().await {
            Some(DaemonEvent::SendFailed { command, .. }) => assert_eq!(command, "raceFinish"),
            _ => panic!("expected SendFailed"),
        }
    }
}
