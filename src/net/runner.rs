//! Net-restricted execution: spawn the target with the interposition
//! shim loaded ahead of it, fold intercepted events into the
//! restriction log while it runs, and funnel every exit through one
//! finalize step.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::logs::file_timestamp;

use super::log::{NetRestrictionLog, parse_event_stream};
use super::{NET_DISABLED_ENV, NET_EVENTS_ENV, NET_SHIM_ENV, NetError, SHIM_FILE_NAME};

/// Shells whose `-c` flag evaluates an inline string.
const INLINE_EVAL_SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh"];

/// Result of one restricted run.
#[derive(Debug)]
pub struct NetOutcome {
    pub exit_code: i32,
    pub event_count: usize,
    pub log_path: PathBuf,
}

pub struct NetRunner {
    shim: PathBuf,
    log_dir: PathBuf,
    refresh: Duration,
}

impl NetRunner {
    /// Build a runner, resolving the shim location. Missing
    /// instrumentation is an abort with a clear diagnostic — the
    /// restrictor never silently runs a target unrestricted.
    pub fn new(config: &Config, log_dir: PathBuf) -> Result<Self, NetError> {
        let shim = locate_shim(config)?;
        Ok(Self::with_shim(shim, log_dir, config))
    }

    /// Construct with an explicit shim path (tests, unusual layouts).
    pub fn with_shim(shim: PathBuf, log_dir: PathBuf, config: &Config) -> Self {
        Self {
            shim,
            log_dir,
            refresh: Duration::from_millis(config.net.refresh_interval_ms.max(20)),
        }
    }

    pub fn shim(&self) -> &Path {
        &self.shim
    }

    /// Run the command with socket creation denied and logged.
    pub async fn run(&self, command: &[String]) -> Result<NetOutcome, NetError> {
        reject_inline_eval(command)?;

        let events_path = self
            .log_dir
            .join(format!("net_events_{}_{}.jsonl", file_timestamp(), std::process::id()));

        let outcome = self.run_with_event_stream(command, &events_path).await;
        let _ = std::fs::remove_file(&events_path);
        outcome
    }

    /// Inner loop with an explicit event-stream path (the shim appends
    /// there; we fold into the restriction log on a fixed cadence).
    pub(crate) async fn run_with_event_stream(
        &self,
        command: &[String],
        events_path: &Path,
    ) -> Result<NetOutcome, NetError> {
        std::fs::create_dir_all(&self.log_dir).map_err(|e| NetError::Log(e.to_string()))?;

        info!(shim = %self.shim.display(), "starting net-restricted command");

        let spawned = tokio::process::Command::new(&command[0])
            .args(&command[1..])
            .env("LD_PRELOAD", preload_value(&self.shim))
            .env(NET_EVENTS_ENV, events_path)
            .env(NET_DISABLED_ENV, "1")
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                // Even a failed launch leaves an auditable record.
                let mut log = NetRestrictionLog::create(command, &self.log_dir, 0)?;
                log.record_exception(&e.to_string())?;
                let code = if e.kind() == std::io::ErrorKind::NotFound {
                    127
                } else {
                    1
                };
                log.finalize(code)?;
                return Err(if e.kind() == std::io::ErrorKind::NotFound {
                    NetError::CommandNotFound(command[0].clone())
                } else {
                    NetError::Spawn(e)
                });
            }
        };

        let pid = child.id().unwrap_or(0);
        let mut log = NetRestrictionLog::create(command, &self.log_dir, pid)?;

        let mut ticker = tokio::time::interval(self.refresh);
        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = ticker.tick() => {
                    let events = parse_event_stream(events_path);
                    if events.len() != log.event_count() {
                        debug!(pid, events = events.len(), "folding intercepted socket events");
                        log.set_events(events)?;
                    }
                }
            }
        };

        // Catch events recorded between the last tick and exit.
        log.set_events(parse_event_stream(events_path))?;

        let exit_code = match status.code() {
            Some(code) => code,
            None => {
                log.record_exception("terminated by signal")?;
                1
            }
        };
        log.finalize(exit_code)?;

        Ok(NetOutcome {
            exit_code,
            event_count: log.event_count(),
            log_path: log.path().to_path_buf(),
        })
    }
}

/// Resolve the shim library: config override, then env var, then the
/// library sitting next to the devjail binary.
pub fn locate_shim(config: &Config) -> Result<PathBuf, NetError> {
    if let Some(configured) = &config.net.shim_path {
        let path = PathBuf::from(shellexpand::tilde(configured).to_string());
        if path.is_file() {
            return Ok(path);
        }
        return Err(NetError::ShimUnavailable(path.display().to_string()));
    }

    if let Ok(from_env) = std::env::var(NET_SHIM_ENV) {
        let path = PathBuf::from(&from_env);
        if path.is_file() {
            return Ok(path);
        }
        return Err(NetError::ShimUnavailable(from_env));
    }

    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let beside = dir.join(SHIM_FILE_NAME);
        if beside.is_file() {
            return Ok(beside);
        }
        return Err(NetError::ShimUnavailable(beside.display().to_string()));
    }

    Err(NetError::ShimUnavailable(SHIM_FILE_NAME.to_string()))
}

/// Refuse `-c` style inline evaluation: an inline string cannot be
/// attributed or safely re-run, and the original interface rejected it.
fn reject_inline_eval(command: &[String]) -> Result<(), NetError> {
    let Some(head) = command.first() else {
        return Err(NetError::EmptyCommand);
    };

    let base = Path::new(head)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| head.clone());

    if INLINE_EVAL_SHELLS.contains(&base.as_str()) && command.iter().skip(1).any(|a| a == "-c") {
        return Err(NetError::InlineEval);
    }

    Ok(())
}

/// Prepend our shim to any LD_PRELOAD the caller already exported.
fn preload_value(shim: &Path) -> String {
    match std::env::var("LD_PRELOAD") {
        Ok(existing) if !existing.is_empty() => {
            format!("{}:{}", shim.display(), existing)
        }
        _ => shim.display().to_string(),
    }
}
