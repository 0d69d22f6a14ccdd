//! The per-process network restriction log.
//!
//! One JSON object per supervised process, rewritten whole by its
//! single owner as events accrue. Concurrent readers (a GUI tailing
//! the directory) must tolerate a transient partial write and retry;
//! that is the documented exception to the crate's append-only rule.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::logs::file_timestamp;

use super::NetError;

/// One intercepted socket call, as recorded by the shim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketEvent {
    pub timestamp: String,
    pub api: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub stack: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LogData {
    timestamp: String,
    pid: u32,
    mode: String,
    command: Vec<String>,
    events: Vec<SocketEvent>,
    event_count: usize,
    status: String,
    exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception: Option<String>,
}

pub struct NetRestrictionLog {
    path: PathBuf,
    data: LogData,
    finalized: bool,
}

impl NetRestrictionLog {
    /// Create the log in `running` state and write it immediately so
    /// readers see the run as soon as it starts.
    pub fn create(command: &[String], log_dir: &Path, pid: u32) -> Result<Self, NetError> {
        fs::create_dir_all(log_dir).map_err(|e| NetError::Log(e.to_string()))?;

        let timestamp = file_timestamp();
        let path = log_dir.join(format!("net_restrict_{}_{}.json", timestamp, pid));
        let log = Self {
            path,
            data: LogData {
                timestamp,
                pid,
                mode: "dev-safe".to_string(),
                command: command.to_vec(),
                events: Vec::new(),
                event_count: 0,
                status: "running".to_string(),
                exit_code: None,
                exception: None,
            },
            finalized: false,
        };
        log.write()?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn event_count(&self) -> usize {
        self.data.event_count
    }

    /// Replace the event list with the latest full view of the shim's
    /// stream and rewrite the file. Idempotent across refreshes.
    pub fn set_events(&mut self, events: Vec<SocketEvent>) -> Result<(), NetError> {
        self.data.event_count = events.len();
        self.data.events = events;
        self.write()
    }

    /// Record an abnormal end (signal death, spawn failure). The status
    /// becomes terminal `exception`.
    pub fn record_exception(&mut self, message: &str) -> Result<(), NetError> {
        self.data.status = "exception".to_string();
        self.data.exception = Some(message.to_string());
        self.write()
    }

    /// Write the terminal status and exit code. All exits funnel here
    /// and only the first call has any effect.
    pub fn finalize(&mut self, exit_code: i32) -> Result<(), NetError> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        self.data.exit_code = Some(exit_code);
        if self.data.status == "running" {
            self.data.status = "completed".to_string();
        }
        self.write()
    }

    fn write(&self) -> Result<(), NetError> {
        let mut body =
            serde_json::to_string_pretty(&self.data).map_err(|e| NetError::Log(e.to_string()))?;
        body.push('\n');
        fs::write(&self.path, body).map_err(|e| NetError::Log(e.to_string()))
    }
}

/// Read the shim's JSONL side stream. Partial trailing lines (the shim
/// may be mid-write) and garbage are skipped.
pub fn parse_event_stream(path: &Path) -> Vec<SocketEvent> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter(|l| !l.is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}
