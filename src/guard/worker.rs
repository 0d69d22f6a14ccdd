//! The per-PID supervision loop.
//!
//! State machine: attach → sample → (update)* → terminated | exited |
//! stopped. The worker owns its sample source and rolling window
//! outright; the only shared state it touches is the registry map it
//! removes itself from on the way out.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::logs::{append_json_line, iso_timestamp};
use crate::monitor::{SampleSource, SampleWindow};

use super::engine::Prediction;
use super::registry::GuardRegistry;

pub(crate) struct WorkerContext {
    pub pid: u32,
    pub jail_root: PathBuf,
    pub command: Vec<String>,
    pub run_id: String,
    pub stop: Arc<AtomicBool>,
    pub registry: Arc<GuardRegistry>,
}

/// One line in the guard event stream.
#[derive(Serialize)]
struct GuardEvent<'a> {
    event: &'static str,
    timestamp: String,
    pid: u32,
    command: &'a [String],
    run_id: &'a str,
    action: &'a str,
    label: &'a str,
    confidence: f64,
    probabilities: &'a BTreeMap<String, f64>,
    top_features: &'a [String],
    info: &'a Option<String>,
}

pub(crate) fn monitor_loop(ctx: WorkerContext) {
    let config = ctx.registry.config().clone();
    let engine = ctx.registry.engine();
    let poll = config.poll_interval();

    let mut source = match SampleSource::new(ctx.pid) {
        Ok(source) => source,
        Err(e) => {
            debug!(pid = ctx.pid, "guard attach failed: {}", e);
            ctx.registry.unregister(ctx.pid);
            return;
        }
    };

    let mut window = SampleWindow::new();
    let mut last_label: Option<String> = None;
    let mut last_confidence = 0.0_f64;
    let mut last_result: Option<Prediction> = None;
    let mut terminated = false;

    while !ctx.stop.load(Ordering::SeqCst) && source.is_running() {
        let sample = match source.sample() {
            Ok(sample) => sample,
            Err(_) => break,
        };
        window.push(sample);

        if !window.is_ready(config.min_samples) {
            std::thread::sleep(poll);
            continue;
        }

        let run = window.to_run(&ctx.run_id);
        let result = match engine.predict_run(&run) {
            Ok(prediction) => prediction,
            // Fail open: a broken classifier is an unknown verdict,
            // never an aborted watch.
            Err(e) => {
                debug!(pid = ctx.pid, "inference failed: {}", e);
                Prediction::unknown(&e.to_string())
            }
        };

        if result.is_malicious_at(config.kill_threshold) {
            if !config.allow_terminate {
                log_event(&ctx, &result, "no-kill-test");
                last_result = Some(result);
                break;
            }
            // Race-safe re-check: the PID may have been re-exec'd or
            // already exited since the verdict was computed. The guard
            // refuses to kill outside the jail it polices.
            if is_process_in_jail(ctx.pid, &ctx.jail_root) {
                terminate(ctx.pid);
                log_event(&ctx, &result, "terminated");
                terminated = true;
            } else {
                log_event(&ctx, &result, "skip-termination");
            }
            last_result = Some(result);
            break;
        }

        let label_changed = last_label.as_deref() != Some(result.label.as_str());
        if label_changed || (result.confidence - last_confidence).abs() >= config.confidence_delta {
            last_label = Some(result.label.clone());
            last_confidence = result.confidence;
            log_event(&ctx, &result, "update");
        }
        last_result = Some(result);

        std::thread::sleep(poll);
    }

    if let Some(result) = &last_result
        && !terminated
    {
        log_event(&ctx, result, "exit");
    }

    ctx.registry.unregister(ctx.pid);
}

fn log_event(ctx: &WorkerContext, result: &Prediction, action: &str) {
    let event = GuardEvent {
        event: "ml_guard",
        timestamp: iso_timestamp(),
        pid: ctx.pid,
        command: &ctx.command,
        run_id: &ctx.run_id,
        action,
        label: &result.label,
        confidence: result.confidence,
        probabilities: &result.probabilities,
        top_features: &result.top_features,
        info: &result.info,
    };

    if let Err(e) = append_json_line(ctx.registry.event_log(), &event) {
        warn!(pid = ctx.pid, "failed to write guard event: {}", e);
    }
}

/// Forced kill, idempotent against the process already having exited.
fn terminate(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => {}
            Err(nix::errno::Errno::ESRCH) => {} // already gone
            Err(e) => warn!(pid, "SIGKILL failed: {}", e),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

/// Whether the process's current working directory is still rooted
/// under the jail. Unreadable `/proc` entries (process gone, permission
/// denied) read as "not confined".
pub fn is_process_in_jail(pid: u32, jail_root: &Path) -> bool {
    let Ok(cwd) = std::fs::canonicalize(format!("/proc/{}/cwd", pid)) else {
        return false;
    };
    let Ok(jail) = jail_root.canonicalize() else {
        return false;
    };
    cwd.starts_with(&jail)
}
