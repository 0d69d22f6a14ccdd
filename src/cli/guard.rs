use anyhow::Result;
use clap::Args;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::guard::{CommandEngine, InferenceEngine, Prediction, is_process_in_jail};
use crate::logs::{append_json_line, iso_timestamp};
use crate::monitor::TelemetryRun;

use super::Globals;

#[derive(Args)]
pub struct GuardArgs {
    /// Telemetry log path or identifier under the log directory
    pub log: String,

    /// Optional command description for logging
    #[arg(long, num_args = 1..)]
    pub command: Option<Vec<String>>,

    /// Artifact directory override for the inference collaborator
    #[arg(long)]
    pub artifacts: Option<PathBuf>,

    /// Sandbox root for PID confinement verification
    #[arg(long, default_value = "sandbox_jail")]
    pub jail: PathBuf,

    /// PID to optionally terminate when malicious
    #[arg(long)]
    pub pid: Option<u32>,

    #[arg(long, default_value_t = 0.85)]
    pub kill_threshold: f64,

    /// Test mode – never send SIGKILL
    #[arg(long)]
    pub no_kill: bool,

    /// Persist this invocation to the guard event log
    #[arg(long)]
    pub log_event: bool,
}

/// One-shot verdict: print a JSON prediction and apply the kill policy.
/// The exit code is 0 regardless of verdict — the verdict is data, not
/// a failure.
pub async fn run(args: GuardArgs, globals: &Globals) -> Result<i32> {
    let config = globals.load_config()?;
    let log_dir = globals.resolve_log_dir(&config);

    let run = load_run(&args.log, &log_dir)?;

    let artifacts = args
        .artifacts
        .clone()
        .or_else(|| config.guard.artifact_dir.clone().map(PathBuf::from));

    // Fail open at every step: a missing or broken collaborator is an
    // unknown verdict, never a crash.
    let prediction = match CommandEngine::new(config.guard.engine_command.clone(), artifacts) {
        Ok(engine) => engine
            .predict_run(&run)
            .unwrap_or_else(|e| Prediction::unknown(&e.to_string())),
        Err(e) => Prediction::unknown(&e.to_string()),
    };

    println!("{}", serde_json::to_string_pretty(&prediction)?);

    let action = apply_kill_policy(&prediction, &args);
    eprintln!(
        "[devjail] guard verdict: {} ({:.2}) -> {}",
        prediction.label, prediction.confidence, action
    );

    if args.log_event {
        let payload = json!({
            "event": "ml_guard_cli",
            "timestamp": iso_timestamp(),
            "target": args.log,
            "action": action,
            "label": prediction.label,
            "confidence": prediction.confidence,
            "pid": args.pid,
            "jail": args.jail,
            "info": prediction.info,
            "command": args.command.clone().unwrap_or_default(),
        });
        append_json_line(&log_dir.join("guard_events.jsonl"), &payload)?;
    }

    Ok(0)
}

fn load_run(target: &str, log_dir: &Path) -> Result<TelemetryRun> {
    let direct = Path::new(target);
    if direct.exists() {
        return Ok(TelemetryRun::load(direct)?);
    }
    // Bare identifiers resolve under the log directory
    let under_logs = log_dir.join(format!("{}.jsonl", target));
    Ok(TelemetryRun::load(&under_logs)?)
}

fn apply_kill_policy(prediction: &Prediction, args: &GuardArgs) -> &'static str {
    if !prediction.is_malicious_at(args.kill_threshold) {
        return "cli-benign";
    }
    let Some(pid) = args.pid else {
        return "cli-alert";
    };
    if args.no_kill {
        return "cli-no-kill";
    }
    if !is_process_in_jail(pid, &args.jail) {
        return "cli-outside-jail";
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => "cli-terminated",
            Err(nix::errno::Errno::ESRCH) => "cli-missing-pid",
            Err(e) => {
                warn!(pid, "SIGKILL failed: {}", e);
                "cli-alert"
            }
        }
    }

    #[cfg(not(unix))]
    {
        "cli-alert"
    }
}
