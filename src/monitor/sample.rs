//! One-shot process snapshots built from OS introspection primitives.
//!
//! CPU, memory and cumulative I/O come from `sysinfo`; descriptor,
//! socket and thread counts are read from `/proc/<pid>` directly (the
//! jail's fd-polling observer shares that enumeration). On platforms
//! without `/proc`, those counts degrade to zero rather than failing
//! the sample.

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use thiserror::Error;

use crate::logs::iso_timestamp;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("process {0} is not running")]
    ProcessNotFound(u32),

    #[error("telemetry log unreadable: {0}")]
    UnreadableLog(String),
}

/// One point-in-time snapshot of a process.
///
/// Immutable once produced; ordered by timestamp within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: String,

    /// Percent of one core; may exceed 100 on multi-core.
    pub cpu_percent: f64,

    /// Resident set size in bytes.
    pub memory_rss: u64,

    /// Virtual memory size in bytes.
    pub memory_vms: u64,

    #[serde(default)]
    pub open_files: u32,

    #[serde(default)]
    pub socket_count: u32,

    #[serde(default = "default_threads")]
    pub threads: u32,

    /// Cumulative bytes read since process start.
    #[serde(default)]
    pub read_bytes: u64,

    /// Cumulative bytes written since process start.
    #[serde(default)]
    pub write_bytes: u64,
}

fn default_threads() -> u32 {
    1
}

/// Wraps process introspection for a single PID.
///
/// Owns its `sysinfo::System` so consecutive refreshes yield CPU deltas;
/// one source per watched process, owned by that process's worker.
#[derive(Debug)]
pub struct SampleSource {
    pid: u32,
    sys: System,
}

impl SampleSource {
    /// Attach to a running process. Fails if the PID does not exist.
    pub fn new(pid: u32) -> Result<Self, MonitorError> {
        let mut sys = System::new();
        if !sys.refresh_process(Pid::from_u32(pid)) {
            return Err(MonitorError::ProcessNotFound(pid));
        }
        Ok(Self { pid, sys })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Refreshes and reports whether the process still exists.
    pub fn is_running(&mut self) -> bool {
        self.sys.refresh_process(Pid::from_u32(self.pid))
    }

    /// Produce one snapshot. Errors only when the process is gone.
    pub fn sample(&mut self) -> Result<Sample, MonitorError> {
        let pid = Pid::from_u32(self.pid);
        if !self.sys.refresh_process(pid) {
            return Err(MonitorError::ProcessNotFound(self.pid));
        }
        let process = self
            .sys
            .process(pid)
            .ok_or(MonitorError::ProcessNotFound(self.pid))?;

        let disk = process.disk_usage();
        let (open_files, socket_count) = descriptor_counts(self.pid);

        Ok(Sample {
            timestamp: iso_timestamp(),
            cpu_percent: process.cpu_usage() as f64,
            memory_rss: process.memory(),
            memory_vms: process.virtual_memory(),
            open_files,
            socket_count,
            threads: thread_count(self.pid),
            read_bytes: disk.total_read_bytes,
            write_bytes: disk.total_written_bytes,
        })
    }
}

/// Count open descriptors and how many of them are sockets.
///
/// Readlink failures on individual entries are skipped; a denied or
/// missing fd directory yields zeros (observation must not fail the
/// sampler).
pub fn descriptor_counts(pid: u32) -> (u32, u32) {
    #[cfg(target_os = "linux")]
    {
        let fd_dir = std::path::PathBuf::from(format!("/proc/{}/fd", pid));
        let Ok(entries) = std::fs::read_dir(&fd_dir) else {
            return (0, 0);
        };

        let mut open = 0u32;
        let mut sockets = 0u32;
        for entry in entries.flatten() {
            open += 1;
            if let Ok(target) = std::fs::read_link(entry.path())
                && target.to_string_lossy().starts_with("socket:")
            {
                sockets += 1;
            }
        }
        (open, sockets)
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        (0, 0)
    }
}

/// Thread count from `/proc/<pid>/status`, defaulting to 1.
fn thread_count(pid: u32) -> u32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("Threads:") {
                    return rest.trim().parse().unwrap_or(1);
                }
            }
        }
        1
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_own_process_works() {
        let pid = std::process::id();
        let mut source = SampleSource::new(pid).unwrap();

        assert!(source.is_running());
        let sample = source.sample().unwrap();

        assert!(sample.memory_rss > 0);
        assert!(sample.timestamp.ends_with('Z'));
        #[cfg(target_os = "linux")]
        {
            assert!(sample.open_files > 0, "test process has open descriptors");
            assert!(sample.threads >= 1);
        }
    }

    #[test]
    fn nonexistent_pid_rejected() {
        // Far beyond the default pid_max on Linux
        let err = SampleSource::new(999_999_999).unwrap_err();
        assert!(matches!(err, MonitorError::ProcessNotFound(_)));
    }

    #[test]
    fn sample_roundtrips_through_json() {
        let sample = Sample {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            cpu_percent: 12.5,
            memory_rss: 1024,
            memory_vms: 2048,
            open_files: 4,
            socket_count: 1,
            threads: 2,
            read_bytes: 100,
            write_bytes: 200,
        };

        let json = serde_json::to_string(&sample).unwrap();
        let parsed: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.memory_rss, 1024);
        assert_eq!(parsed.socket_count, 1);
    }

    #[test]
    fn missing_optional_fields_default() {
        // Recorded logs from older samplers omit descriptor counts
        let json = r#"{"timestamp":"t","cpu_percent":1.0,"memory_rss":10,"memory_vms":20}"#;
        let sample: Sample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.open_files, 0);
        assert_eq!(sample.threads, 1);
    }
}
