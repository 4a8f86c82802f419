//! Arrival egress - writes queue transitions to file
//!
//! Entries are written in JSONL format (one JSON object per line) to the file
//! specified in config. The queue never blocks on disk: it hands entries to a
//! bounded channel and [`EgressWriter`] appends them in the background.

use crate::domain::arrival::{ArrivalEvent, ArrivalId, ArrivalStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

/// One line of the arrival log
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArrivalLogEntry {
    Recorded {
        arrival: ArrivalEvent,
    },
    StatusChanged {
        arrival_id: ArrivalId,
        line_code: String,
        destination_stop: String,
        from: ArrivalStatus,
        to: ArrivalStatus,
        at: DateTime<Utc>,
    },
    Purged {
        count: usize,
        cutoff: DateTime<Utc>,
    },
}

impl ArrivalLogEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            ArrivalLogEntry::Recorded { .. } => "recorded",
            ArrivalLogEntry::StatusChanged { .. } => "status_changed",
            ArrivalLogEntry::Purged { .. } => "purged",
        }
    }
}

/// Egress writer for arrival log entries
pub struct Egress {
    file_path: String,
}

impl Egress {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "egress_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write an entry to the egress file
    /// Returns true if successful, false otherwise
    pub fn write_entry(&self, entry: &ArrivalLogEntry) -> bool {
        let json = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                error!(kind = %entry.kind(), error = %e, "egress_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => true,
            Err(e) => {
                error!(kind = %entry.kind(), error = %e, "egress_write_failed");
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "egress_written");

        Ok(())
    }
}

/// Non-blocking handle used by the queue
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<ArrivalLogEntry>,
}

impl EgressSender {
    /// Drop the entry if the channel is full; returns false when dropped
    pub fn send(&self, entry: ArrivalLogEntry) -> bool {
        self.tx.try_send(entry).is_ok()
    }
}

/// Background task draining the channel into the egress file
pub struct EgressWriter {
    egress: Egress,
    rx: mpsc::Receiver<ArrivalLogEntry>,
}

impl EgressWriter {
    /// Run until shutdown, then drain whatever is still queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(file = %self.egress.file_path, "egress_writer_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let mut drained = 0usize;
                        while let Ok(entry) = self.rx.try_recv() {
                            self.egress.write_entry(&entry);
                            drained += 1;
                        }
                        info!(drained = %drained, "egress_writer_shutdown");
                        return;
                    }
                }
                entry = self.rx.recv() => {
                    match entry {
                        Some(entry) => {
                            self.egress.write_entry(&entry);
                        }
                        None => {
                            info!("egress_writer_closed");
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Create a bounded egress channel and the writer that drains it
pub fn create_egress_channel(capacity: usize, file_path: &str) -> (EgressSender, EgressWriter) {
    let (tx, rx) = mpsc::channel(capacity);
    (EgressSender { tx }, EgressWriter { egress: Egress::new(file_path), rx })
}
