//! Event log egress - writes engine output to file
//!
//! Status changes, guidance, cues and metrics snapshots are written in JSONL
//! format (one JSON object per line, tagged by `t`) to the file specified in
//! config.

use crate::io::egress_channel::EgressMessage;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

/// Append-only JSONL writer
#[derive(Debug, Clone)]
pub struct EventLog {
    file_path: String,
}

impl EventLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "event_log_initialized");
        Self { file_path: file_path.to_string() }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Write one message; false if serialization or the write failed
    pub fn write_message(&self, msg: &EgressMessage) -> bool {
        let json = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(e) => {
                error!(kind = %msg.kind(), error = %e, "event_log_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                if let EgressMessage::Status(payload) = msg {
                    info!(pid = %payload.pid, status = %payload.status, "status_logged");
                }
                true
            }
            Err(e) => {
                error!(kind = %msg.kind(), error = %e, "event_log_write_failed");
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
        debug!(file = %self.file_path, bytes = %line.len(), "event_log_written");

        Ok(())
    }
}

/// Drain the egress channel into the event log until shutdown or channel close
pub async fn run_event_log(
    log: EventLog,
    mut rx: mpsc::Receiver<EgressMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    while let Ok(msg) = rx.try_recv() {
                        log.write_message(&msg);
                    }
                    info!("event_log_shutdown");
                    return;
                }
            }
            msg = rx.recv() => {
                match msg {
                    Some(msg) => {
                        log.write_message(&msg);
                    }
                    None => return,
                }
            }
        }
    }
}
