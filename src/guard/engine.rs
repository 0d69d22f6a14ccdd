//! Inference collaborator seam.
//!
//! The model-training pipeline is an external system; the guard
//! consumes it through one narrow interface: feed a telemetry run in,
//! get a labeled prediction back. The production implementation shells
//! out to a configured command; tests substitute the trait.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use thiserror::Error;

use crate::monitor::TelemetryRun;

pub const LABEL_MALICIOUS: &str = "malicious";
pub const LABEL_UNKNOWN: &str = "unknown";

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("no inference command configured")]
    NotConfigured,

    #[error("failed to launch inference command: {0}")]
    Launch(std::io::Error),

    #[error("inference command exited with {0}")]
    Failed(String),

    #[error("malformed prediction output: {0}")]
    Malformed(String),
}

/// Verdict returned by the collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,

    /// Self-reported certainty in [0, 1].
    pub confidence: f64,

    #[serde(default)]
    pub probabilities: BTreeMap<String, f64>,

    /// Top contributing feature names, most influential first.
    #[serde(default)]
    pub top_features: Vec<String>,

    #[serde(default)]
    pub info: Option<String>,
}

impl Prediction {
    /// The fail-open verdict: any collaborator failure maps here so a
    /// broken classifier never interferes with the workload.
    pub fn unknown(reason: &str) -> Self {
        Self {
            label: LABEL_UNKNOWN.to_string(),
            confidence: 0.0,
            probabilities: BTreeMap::new(),
            top_features: Vec::new(),
            info: Some(reason.to_string()),
        }
    }

    pub fn is_malicious_at(&self, threshold: f64) -> bool {
        self.label == LABEL_MALICIOUS && self.confidence >= threshold
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait InferenceEngine: Send + Sync {
    fn predict_run(&self, run: &TelemetryRun) -> Result<Prediction, InferenceError>;
}

/// External-process collaborator: the run is written to the command's
/// stdin as JSON and a prediction JSON is expected on stdout. The
/// artifact directory, when configured, is exported as
/// `DEVJAIL_ARTIFACTS` for the command to locate its model files.
pub struct CommandEngine {
    command: Vec<String>,
    artifact_dir: Option<PathBuf>,
}

impl CommandEngine {
    pub fn new(command: Vec<String>, artifact_dir: Option<PathBuf>) -> Result<Self, InferenceError> {
        if command.is_empty() {
            return Err(InferenceError::NotConfigured);
        }
        Ok(Self {
            command,
            artifact_dir,
        })
    }
}

impl InferenceEngine for CommandEngine {
    fn predict_run(&self, run: &TelemetryRun) -> Result<Prediction, InferenceError> {
        let payload =
            serde_json::to_vec(run).map_err(|e| InferenceError::Malformed(e.to_string()))?;

        let mut command = Command::new(&self.command[0]);
        command
            .args(&self.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(dir) = &self.artifact_dir {
            command.env("DEVJAIL_ARTIFACTS", dir);
        }

        let mut child = command.spawn().map_err(InferenceError::Launch)?;

        // A collaborator that ignores stdin closes the pipe early;
        // tolerate the broken pipe and still read its verdict.
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(&payload);
        }

        let output = child.wait_with_output().map_err(InferenceError::Launch)?;
        if !output.status.success() {
            return Err(InferenceError::Failed(output.status.to_string()));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| InferenceError::Malformed(e.to_string()))
    }
}
