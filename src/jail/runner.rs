//! Jail run orchestration: spawn the target rooted at the jail,
//! observe it with the selected strategy, classify what it touched and
//! report the outcome.
//!
//! Exit-code contract: the wrapper exits with the reserved violation
//! code (2) when any escape was recorded, with 127 when the command
//! cannot be found, and with the child's own exit code otherwise.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::Config;
use crate::guard::GuardRegistry;
use crate::logs::file_timestamp;

use super::allowlist::AllowListPolicy;
use super::observer::{self, Observer};
use super::JailError;

/// Reserved wrapper exit code meaning "filesystem escape recorded".
pub const VIOLATION_EXIT_CODE: i32 = 2;

/// Exit code when the target command cannot be found.
pub const COMMAND_NOT_FOUND_EXIT_CODE: i32 = 127;

/// Structured record of one jail run, written as a single JSON object.
#[derive(Debug, Clone, Serialize)]
pub struct JailReport {
    pub timestamp: String,
    pub jail: PathBuf,
    pub command: Vec<String>,
    pub method: String,
    pub strace_available: bool,
    pub command_exit_code: i32,
    pub violations: Vec<PathBuf>,
    pub wrapper_exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strace_log: Option<PathBuf>,

    /// Where the report itself was written (not part of the record).
    #[serde(skip)]
    pub report_file: PathBuf,
}

pub struct JailRunner {
    policy: Arc<AllowListPolicy>,
    observer: Observer,
    log_dir: PathBuf,
    fd_poll_interval: Duration,
}

impl JailRunner {
    /// Prepare a runner: the jail directory is created if absent, the
    /// allow-list is built with any configured extras, and the best
    /// available observer is detected once.
    pub fn new(jail_root: &Path, log_dir: PathBuf, config: &Config) -> Result<Self, JailError> {
        fs::create_dir_all(jail_root).map_err(|source| JailError::JailDir {
            path: jail_root.to_path_buf(),
            source,
        })?;

        let policy = AllowListPolicy::with_extras(
            jail_root,
            &config.expanded_allow_prefixes(),
            &config.expanded_allow_files(),
        )?;

        Ok(Self {
            policy: Arc::new(policy),
            observer: Observer::detect(),
            log_dir,
            fd_poll_interval: Duration::from_millis(config.jail.fd_poll_interval_ms.max(10)),
        })
    }

    /// Force a specific observation strategy. Tests pin the fallback so
    /// results do not depend on whether the host has strace installed.
    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = observer;
        self
    }

    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    pub fn policy(&self) -> &AllowListPolicy {
        &self.policy
    }

    /// Execute the command inside the jail and classify everything it
    /// was observed to open. When a guard registry is supplied, an ML
    /// guard worker watches the child for the duration of the run.
    pub async fn run(
        &self,
        command: &[String],
        guard: Option<&Arc<GuardRegistry>>,
    ) -> Result<JailReport, JailError> {
        if command.is_empty() {
            return Err(JailError::EmptyCommand);
        }

        fs::create_dir_all(&self.log_dir).map_err(|source| JailError::JailDir {
            path: self.log_dir.clone(),
            source,
        })?;

        let timestamp = file_timestamp();
        info!(
            jail = %self.policy.jail_root().display(),
            method = self.observer.method(),
            "starting jailed command"
        );

        let (command_exit_code, violations, strace_log) = match &self.observer {
            Observer::Trace { strace } => {
                self.run_traced(strace, command, &timestamp, guard).await?
            }
            Observer::FdPoll => self.run_fd_polled(command, guard).await?,
        };

        let wrapper_exit_code = if violations.is_empty() {
            command_exit_code
        } else {
            VIOLATION_EXIT_CODE
        };

        let report = JailReport {
            timestamp: timestamp.clone(),
            jail: self.policy.jail_root().to_path_buf(),
            command: command.to_vec(),
            method: self.observer.method().to_string(),
            strace_available: self.observer.strace_available(),
            command_exit_code,
            violations: violations.into_iter().collect(),
            wrapper_exit_code,
            strace_log,
            report_file: self.log_dir.join(format!("jail_run_{}.json", timestamp)),
        };

        let mut body =
            serde_json::to_string_pretty(&report).map_err(|e| JailError::Report(e.to_string()))?;
        body.push('\n');
        fs::write(&report.report_file, body).map_err(|e| JailError::Report(e.to_string()))?;

        Ok(report)
    }

    /// Trace mode: synchronous — wait for exit, then classify the log.
    async fn run_traced(
        &self,
        strace: &Path,
        command: &[String],
        timestamp: &str,
        guard: Option<&Arc<GuardRegistry>>,
    ) -> Result<(i32, BTreeSet<PathBuf>, Option<PathBuf>), JailError> {
        let trace_log = self.log_dir.join(format!("strace_{}.log", timestamp));

        let mut child = tokio::process::Command::new(strace)
            .args(["-f", "-e", "trace=file", "-o"])
            .arg(&trace_log)
            .arg("--")
            .args(command)
            .current_dir(self.policy.jail_root())
            .spawn()
            .map_err(|e| spawn_error(e, strace.to_string_lossy().as_ref()))?;

        // The direct child here is the tracer, and SIGKILLing strace
        // detaches the target instead of stopping it. The guard must
        // watch the tracee, which surfaces as strace's first child.
        let watched = match (guard, child.id()) {
            (Some(_), Some(tracer)) => self.attach_guard(guard, tracee_pid(tracer).await, command),
            _ => None,
        };

        let status = child.wait().await?;
        if let Some(pid) = watched {
            self.detach_guard(guard, pid);
        }

        let violations = observer::parse_trace_log(&trace_log, &self.policy);
        Ok((exit_code(&status), violations, Some(trace_log)))
    }

    /// Fallback mode: poll the child's descriptor table while the
    /// parent waits on exit, with one final snapshot after exit to
    /// catch descriptors still open when the process died.
    async fn run_fd_polled(
        &self,
        command: &[String],
        guard: Option<&Arc<GuardRegistry>>,
    ) -> Result<(i32, BTreeSet<PathBuf>, Option<PathBuf>), JailError> {
        let mut child = tokio::process::Command::new(&command[0])
            .args(&command[1..])
            .current_dir(self.policy.jail_root())
            .spawn()
            .map_err(|e| spawn_error(e, &command[0]))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let poller = match child.id() {
            Some(pid) => Some(tokio::spawn(observer::poll_fd_violations(
                pid,
                Arc::clone(&self.policy),
                self.fd_poll_interval,
                stop_rx,
            ))),
            None => None,
        };

        let watched = self.attach_guard(guard, child.id(), command);

        let status = child.wait().await?;
        let _ = stop_tx.send(true);

        if let Some(pid) = watched {
            self.detach_guard(guard, pid);
        }

        let violations = match poller {
            Some(handle) => handle.await.unwrap_or_default(),
            None => BTreeSet::new(),
        };

        Ok((exit_code(&status), violations, None))
    }

    fn attach_guard(
        &self,
        guard: Option<&Arc<GuardRegistry>>,
        pid: Option<u32>,
        command: &[String],
    ) -> Option<u32> {
        let (registry, pid) = (guard?, pid?);
        registry.watch(pid, self.policy.jail_root(), command, None);
        debug!(pid, "guard attached to jailed child");
        Some(pid)
    }

    fn detach_guard(&self, guard: Option<&Arc<GuardRegistry>>, pid: u32) {
        if let Some(registry) = guard {
            registry.stop(pid);
        }
    }
}

/// Resolve the PID strace spawned. The tracee registers as a child of
/// the tracer a moment after spawn, so the lookup retries briefly; a
/// target that exits first simply goes unwatched.
async fn tracee_pid(tracer: u32) -> Option<u32> {
    for _ in 0..50 {
        if let Some(pid) = first_child_of(tracer) {
            return Some(pid);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

fn first_child_of(pid: u32) -> Option<u32> {
    let tasks = fs::read_dir(format!("/proc/{}/task", pid)).ok()?;
    for task in tasks.flatten() {
        if let Ok(children) = fs::read_to_string(task.path().join("children"))
            && let Some(first) = children.split_whitespace().next()
        {
            return first.parse().ok();
        }
    }
    None
}

fn exit_code(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn spawn_error(e: std::io::Error, program: &str) -> JailError {
    if e.kind() == std::io::ErrorKind::NotFound {
        JailError::CommandNotFound(program.to_string())
    } else {
        JailError::Spawn(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(jail: &Path, logs: &Path) -> JailRunner {
        JailRunner::new(jail, logs.to_path_buf(), &Config::default())
            .unwrap()
            // Deterministic across hosts: never depend on strace in tests
            .with_observer(Observer::FdPoll)
    }

    // Re-point the shell's own stdio at /dev/null first: inherited
    // descriptors (e.g. a CI log file on fd 1) would otherwise show up
    // in the child's fd table and pollute the violation set.
    fn sh(script: &str) -> Vec<String> {
        vec![
            "sh".into(),
            "-c".into(),
            format!("exec </dev/null >/dev/null 2>&1; {}", script),
        ]
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn clean_run_inside_jail_has_no_violations() {
        let jail = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(jail.path().join("data")).unwrap();
        std::fs::write(jail.path().join("data/file.txt"), b"hello\n").unwrap();

        let runner = runner(jail.path(), logs.path());
        let report = runner.run(&sh("cat data/file.txt"), None).await.unwrap();

        assert!(report.violations.is_empty(), "{:?}", report.violations);
        assert_eq!(report.command_exit_code, 0);
        assert_eq!(report.wrapper_exit_code, 0);
        assert_eq!(report.method, "proc_fd");
        assert!(report.report_file.exists());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn held_open_escape_is_detected() {
        let jail = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();

        let runner = runner(jail.path(), logs.path());
        // Hold /etc/hosts open for several poll intervals so the
        // fallback observer is guaranteed to see it.
        let report = runner
            .run(&sh("exec 3</etc/hosts; sleep 0.5"), None)
            .await
            .unwrap();

        let hosts = Path::new("/etc/hosts")
            .canonicalize()
            .unwrap_or_else(|_| PathBuf::from("/etc/hosts"));
        assert!(
            report.violations.contains(&hosts),
            "expected {:?} in {:?}",
            hosts,
            report.violations
        );
        assert_eq!(report.violations.len(), 1, "deduplicated by resolved path");
        assert_eq!(report.wrapper_exit_code, VIOLATION_EXIT_CODE);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn child_exit_code_propagates_when_clean() {
        let jail = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();

        let runner = runner(jail.path(), logs.path());
        let report = runner.run(&sh("exit 7"), None).await.unwrap();

        assert_eq!(report.command_exit_code, 7);
        assert_eq!(report.wrapper_exit_code, 7);
    }

    #[tokio::test]
    async fn missing_command_is_a_distinct_error() {
        let jail = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();

        let runner = runner(jail.path(), logs.path());
        let err = runner
            .run(&["devjail-no-such-binary".to_string()], None)
            .await
            .unwrap_err();

        assert!(matches!(err, JailError::CommandNotFound(_)));
    }

    #[tokio::test]
    async fn empty_command_rejected() {
        let jail = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();

        let runner = runner(jail.path(), logs.path());
        assert!(matches!(
            runner.run(&[], None).await.unwrap_err(),
            JailError::EmptyCommand
        ));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn tracee_resolution_finds_the_spawned_child() {
        // The trailing `true` keeps sh from exec-replacing itself, so
        // sleep runs as its child, like a tracee under strace.
        let mut shell = std::process::Command::new("sh")
            .args(["-c", "sleep 0.5; true"])
            .spawn()
            .unwrap();

        let tracee = tracee_pid(shell.id()).await;
        assert!(tracee.is_some(), "shell's child must be visible");
        assert_ne!(tracee.unwrap(), shell.id());

        let _ = shell.kill();
        let _ = shell.wait();
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn report_json_has_the_contracted_fields() {
        let jail = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();

        let runner = runner(jail.path(), logs.path());
        let report = runner.run(&sh("true"), None).await.unwrap();

        let body: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report.report_file).unwrap()).unwrap();
        for key in [
            "timestamp",
            "jail",
            "command",
            "method",
            "strace_available",
            "command_exit_code",
            "violations",
            "wrapper_exit_code",
        ] {
            assert!(body.get(key).is_some(), "missing report field {}", key);
        }
    }
}
