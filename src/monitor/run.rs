//! Telemetry runs: the unit of inference.
//!
//! A run is an ordered sequence of samples bounded by a start and an
//! optional stop event. Live runs are synthesized on the fly from a
//! guard worker's rolling window; recorded runs are loaded from the
//! JSONL files the sampler writes.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::sample::{MonitorError, Sample};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRun {
    pub run_id: String,

    /// "live" for window-synthesized runs, "recorded" for loaded logs.
    pub source: String,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default)]
    pub start: Option<serde_json::Value>,

    #[serde(default)]
    pub stop: Option<serde_json::Value>,

    pub samples: Vec<Sample>,
}

impl TelemetryRun {
    /// Synthesize a live run from a rolling window's contents.
    pub fn live(run_id: &str, samples: Vec<Sample>) -> Self {
        Self {
            run_id: run_id.to_string(),
            source: "live".to_string(),
            label: None,
            summary: None,
            start: None,
            stop: None,
            samples,
        }
    }

    /// Load a recorded run from a sampler JSONL log.
    ///
    /// Lines route by their `event` field: `start`/`stop` become the run
    /// bounds, `sample` lines become samples. Unparseable lines are
    /// skipped. The run id comes from the first record carrying one,
    /// falling back to the file stem.
    pub fn load(path: &Path) -> Result<Self, MonitorError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MonitorError::UnreadableLog(format!("{}: {}", path.display(), e)))?;

        let fallback_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());

        let mut run_id: Option<String> = None;
        let mut label = None;
        let mut summary = None;
        let mut start = None;
        let mut stop = None;
        let mut samples = Vec::new();

        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
                continue;
            };

            if run_id.is_none()
                && let Some(id) = value.get("run_id").and_then(|v| v.as_str())
            {
                run_id = Some(id.to_string());
            }
            if let Some(l) = value.get("label").and_then(|v| v.as_str()) {
                label = Some(l.to_string());
            }
            if let Some(s) = value.get("summary").and_then(|v| v.as_str()) {
                summary = Some(s.to_string());
            }

            let event_kind = value
                .get("event")
                .and_then(|v| v.as_str())
                .map(str::to_owned);
            match event_kind.as_deref() {
                Some("start") => start = Some(value),
                Some("stop") => stop = Some(value),
                Some("sample") => {
                    if let Ok(sample) = serde_json::from_value::<Sample>(value) {
                        samples.push(sample);
                    }
                }
                _ => {}
            }
        }

        if samples.is_empty() {
            return Err(MonitorError::UnreadableLog(format!(
                "{}: no sample records",
                path.display()
            )));
        }

        Ok(Self {
            run_id: run_id.unwrap_or(fallback_id),
            source: "recorded".to_string(),
            label,
            summary,
            start,
            stop,
            samples,
        })
    }
}
