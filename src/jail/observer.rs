//! File-access observation strategies.
//!
//! Two ways to see what a jailed command opens, selected once at
//! startup rather than branched on per call:
//!
//! - **Trace**: run the child under `strace -f -e trace=file`, then
//!   parse every quoted string out of the trace as a candidate path.
//!   Complete, but slower and only available where strace is installed.
//! - **FdPoll**: enumerate `/proc/<pid>/fd` on a 100 ms cadence (plus
//!   once immediately after exit). Opens that begin and end between two
//!   polls are missed — a documented fidelity trade-off, not a bug.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::allowlist::{AllowListPolicy, is_pseudo_path};

/// Quoted-string arguments in strace output, escape-aware.
static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"\\]+(?:\\.[^"\\]*)*)""#).expect("static regex"));

/// Observation strategy, chosen by tool availability.
#[derive(Debug, Clone)]
pub enum Observer {
    Trace { strace: PathBuf },
    FdPoll,
}

impl Observer {
    /// Pick the best available strategy: trace when strace is on PATH,
    /// descriptor polling otherwise.
    pub fn detect() -> Self {
        match find_in_path("strace") {
            Some(strace) => Observer::Trace { strace },
            None => Observer::FdPoll,
        }
    }

    /// Method tag recorded in the run report.
    pub fn method(&self) -> &'static str {
        match self {
            Observer::Trace { .. } => "strace",
            Observer::FdPoll => "proc_fd",
        }
    }

    pub fn strace_available(&self) -> bool {
        matches!(self, Observer::Trace { .. })
    }
}

/// Search PATH for an executable.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Pull candidate paths out of one strace line.
pub fn extract_quoted_paths(line: &str) -> Vec<String> {
    QUOTED
        .captures_iter(line)
        .map(|c| c[1].replace("\\\"", "\""))
        .collect()
}

/// Classify every quoted string in a finished trace log.
///
/// A missing log (the child never ran far enough to produce one) reads
/// as zero violations rather than an error.
pub fn parse_trace_log(log_path: &Path, policy: &AllowListPolicy) -> BTreeSet<PathBuf> {
    let mut violations = BTreeSet::new();

    let Ok(content) = std::fs::read_to_string(log_path) else {
        return violations;
    };

    for line in content.lines() {
        for candidate in extract_quoted_paths(line) {
            if !policy.is_allowed(&candidate) {
                violations.insert(policy.resolve_candidate(&candidate));
            }
        }
    }

    violations
}

/// One pass over `/proc/<pid>/fd`, adding any out-of-jail descriptor
/// targets to the violation set.
pub fn snapshot_fd_violations(pid: u32, policy: &AllowListPolicy, out: &mut BTreeSet<PathBuf>) {
    let fd_dir = PathBuf::from(format!("/proc/{}/fd", pid));
    let Ok(entries) = std::fs::read_dir(&fd_dir) else {
        return;
    };

    for entry in entries.flatten() {
        let Ok(target) = std::fs::read_link(entry.path()) else {
            continue;
        };
        let target = target.to_string_lossy();
        if target.is_empty() || is_pseudo_path(&target) {
            continue;
        }
        if !policy.is_allowed(&target) {
            out.insert(policy.resolve_candidate(&target));
        }
    }
}

/// Descriptor-polling loop: snapshot on a fixed cadence until told to
/// stop, then once more to catch descriptors still open at exit.
pub async fn poll_fd_violations(
    pid: u32,
    policy: Arc<AllowListPolicy>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) -> BTreeSet<PathBuf> {
    let mut violations = BTreeSet::new();

    loop {
        snapshot_fd_violations(pid, &policy, &mut violations);

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop_rx.changed() => {
                snapshot_fd_violations(pid, &policy, &mut violations);
                break;
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_paths_extracted_from_trace_lines() {
        let line = r#"openat(AT_FDCWD, "/etc/hosts", O_RDONLY) = 3"#;
        assert_eq!(extract_quoted_paths(line), vec!["/etc/hosts"]);

        let multi = r#"rename("/tmp/a", "/tmp/b") = 0"#;
        assert_eq!(extract_quoted_paths(multi), vec!["/tmp/a", "/tmp/b"]);
    }

    #[test]
    fn escaped_quotes_unescaped() {
        let line = r#"openat(AT_FDCWD, "/tmp/we\"ird", O_RDONLY) = 3"#;
        assert_eq!(extract_quoted_paths(line), vec![r#"/tmp/we"ird"#]);
    }

    #[test]
    fn lines_without_quotes_yield_nothing() {
        assert!(extract_quoted_paths("exit_group(0) = ?").is_empty());
    }

    #[test]
    fn trace_log_parsing_dedups_by_resolved_path() {
        let jail = tempfile::tempdir().unwrap();
        let policy = AllowListPolicy::new(jail.path()).unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("strace.log");
        std::fs::write(
            &log,
            concat!(
                "openat(AT_FDCWD, \"/etc/hosts\", O_RDONLY) = 3\n",
                "openat(AT_FDCWD, \"/etc/hosts\", O_RDONLY) = 4\n",
                "openat(AT_FDCWD, \"/etc/ld.so.cache\", O_RDONLY) = 5\n",
            ),
        )
        .unwrap();

        let violations = parse_trace_log(&log, &policy);
        assert_eq!(violations.len(), 1, "same target twice is one violation");
        assert!(violations.contains(&PathBuf::from("/etc/hosts")));
    }

    #[test]
    fn missing_trace_log_reads_empty() {
        let jail = tempfile::tempdir().unwrap();
        let policy = AllowListPolicy::new(jail.path()).unwrap();
        assert!(parse_trace_log(Path::new("/nonexistent.log"), &policy).is_empty());
    }

    #[test]
    fn detect_always_produces_a_strategy() {
        let observer = Observer::detect();
        assert!(matches!(observer.method(), "strace" | "proc_fd"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn fd_snapshot_of_self_sees_out_of_jail_descriptor() {
        use std::fs::File;

        let jail = tempfile::tempdir().unwrap();
        let policy = AllowListPolicy::new(jail.path()).unwrap();

        let outside = tempfile::tempdir().unwrap();
        let held = outside.path().join("held.txt");
        std::fs::write(&held, b"x").unwrap();
        let _file = File::open(&held).unwrap();

        let mut violations = BTreeSet::new();
        snapshot_fd_violations(std::process::id(), &policy, &mut violations);
        assert!(
            violations.contains(&held.canonicalize().unwrap()),
            "open descriptor outside the jail must be seen: {:?}",
            violations
        );
    }
}
