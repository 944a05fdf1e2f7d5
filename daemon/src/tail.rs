use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};

use crate::event::DaemonEvent;
use crate::monitor::SessionId;

/// Follows `path` from its current end and sends every completed line to `tx`
/// as [`DaemonEvent::LogLine`], in file order.
///
/// Polls every `poll` until `stop_rx` flips to `true`. If the file disappears
/// or a read fails, a single [`DaemonEvent::StreamFault`] is sent and the task
/// ends; it never reopens the file on its own.
pub async fn run(
    session: SessionId,
    path: PathBuf,
    poll: Duration,
    tx: mpsc::Sender<DaemonEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut follower = match LineFollower::open_at_end(&path) {
        Ok(f) => f,
        Err(e) => {
            let detail = format!("failed to open {}: {e}", path.display());
            deliver(&tx, &mut stop_rx, DaemonEvent::StreamFault { session, detail }).await;
            return;
        }
    };
    tracing::info!(path = %path.display(), "tailing log file");

    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let lines = match std::fs::metadata(&path)
                    .and_then(|meta| follower.read_new_lines(meta.len()))
                {
                    Ok(lines) => lines,
                    Err(e) => {
                        let detail = format!("lost access to {}: {e}", path.display());
                        deliver(&tx, &mut stop_rx, DaemonEvent::StreamFault { session, detail }).await;
                        return;
                    }
                };
                for line in lines {
                    if !deliver(&tx, &mut stop_rx, DaemonEvent::LogLine { session, line }).await {
                        return;
                    }
                }
            }
        }
    }

    tracing::debug!(path = %path.display(), "tail stopped");
}

/// Sends `event` unless a stop request arrives first, so a full channel never
/// keeps the task from shutting down. Returns `false` once the task should end.
async fn deliver(
    tx: &mpsc::Sender<DaemonEvent>,
    stop_rx: &mut watch::Receiver<bool>,
    event: DaemonEvent,
) -> bool {
    tokio::select! {
        sent = tx.send(event) => sent.is_ok(),
        _ = stop_rx.changed() => false,
    }
}

/// Incremental line reader over an append-only file.
struct LineFollower {
    reader: BufReader<File>,
    offset: u64,
    /// Bytes of a line whose newline has not been written yet.
    pending: Vec<u8>,
}

impl LineFollower {
    fn open_at_end(path: &std::path::Path) -> io::Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let offset = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader,
            offset,
            pending: Vec::new(),
        })
    }

    /// Returns the lines completed since the last call. `file_len` is the
    /// current size on disk; a size below our offset means the file was
    /// truncated and is re-read from the start.
    fn read_new_lines(&mut self, file_len: u64) -> io::Result<Vec<String>> {
        if file_len < self.offset {
            tracing::info!("log file truncated, restarting from the beginning");
            self.offset = self.reader.seek(SeekFrom::Start(0))?;
            self.pending.clear();
        }

        let mut lines = Vec::new();
        loop {
            let n = self.reader.read_until(b'\n', &mut self.pending)?;
            if n == 0 {
                break;
            }
            self.offset += n as u64;
            if self.pending.last() != Some(&b'\n') {
                // Partial line; wait for the rest.
                break;
            }
            let text = String::from_utf8_lossy(&self.pending);
            let text = text.trim_end_matches(&['\n', '\r'][..]);
            if !text.is_empty() {
                lines.push(text.to_string());
            }
            self.pending.clear();
        }
        Ok(lines)
    }
}
