//! Shared structured-log plumbing.
//!
//! Every component writes JSON records under the log directory and owns
//! its own files; nothing here locks across processes. Two formats are
//! used crate-wide:
//!
//! - JSON Lines streams (guard events, samples, alerts): append-only,
//!   one object per line, written through [`append_json_line`].
//! - Single-object reports (jail runs, net restriction logs): the owning
//!   component rewrites the whole file itself.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// ISO-8601 UTC timestamp with seconds precision, used inside records.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Compact UTC timestamp (`YYYYmmddTHHMMSSZ`) used in log file names.
pub fn file_timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

/// Append one serialized JSON object as a line, creating parent
/// directories and the file on first use.
pub fn append_json_line<T: serde::Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }

    let line = serde_json::to_string(record).context("Failed to serialize log record")?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;
    writeln!(file, "{}", line).context("Failed to write log record")?;
    Ok(())
}

/// Read every parseable JSON object from a JSONL file.
///
/// Corrupted or partial lines are skipped rather than failing the read;
/// a missing file yields an empty vector.
pub fn read_json_lines(path: &Path) -> Result<Vec<serde_json::Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read log file: {}", path.display()))?;

    Ok(content
        .lines()
        .filter(|l| !l.is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}
