//! Owned registry of guard workers, keyed by watched PID.
//!
//! The map is the only structure mutated from multiple call sites
//! (watch, stop, and each worker's own loop exit), so it sits behind a
//! single lock. The registry has an explicit lifecycle — created by the
//! caller, passed by reference — rather than living as ambient global
//! state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, warn};

use crate::config::GuardConfig;

use super::engine::InferenceEngine;
use super::worker::{self, WorkerContext};

struct WorkerEntry {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct GuardRegistry {
    config: GuardConfig,
    engine: Arc<dyn InferenceEngine>,
    event_log: PathBuf,
    workers: Mutex<HashMap<u32, WorkerEntry>>,
}

impl GuardRegistry {
    pub fn new(
        config: GuardConfig,
        engine: Arc<dyn InferenceEngine>,
        event_log: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            engine,
            event_log,
            workers: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn engine(&self) -> Arc<dyn InferenceEngine> {
        Arc::clone(&self.engine)
    }

    pub fn event_log(&self) -> &Path {
        &self.event_log
    }

    /// A poisoned lock still holds a structurally sound map; recover
    /// rather than cascading one worker's panic into every caller.
    fn workers(&self) -> MutexGuard<'_, HashMap<u32, WorkerEntry>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start watching a PID. Calling twice for the same live PID is a
    /// no-op; returns whether a new worker was started.
    pub fn watch(
        self: &Arc<Self>,
        pid: u32,
        jail_root: &Path,
        command: &[String],
        run_id: Option<String>,
    ) -> bool {
        let mut workers = self.workers();
        if workers.contains_key(&pid) {
            debug!(pid, "already watching, watch is a no-op");
            return false;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let ctx = WorkerContext {
            pid,
            jail_root: jail_root.to_path_buf(),
            command: command.to_vec(),
            run_id: run_id.unwrap_or_else(|| format!("live-{}", pid)),
            stop: Arc::clone(&stop),
            registry: Arc::clone(self),
        };

        let thread = match std::thread::Builder::new()
            .name(format!("guard-{}", pid))
            .spawn(move || worker::monitor_loop(ctx))
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(pid, "failed to spawn guard worker: {}", e);
                return false;
            }
        };

        workers.insert(pid, WorkerEntry { stop, thread });
        true
    }

    /// End a watch early. Idempotent: unknown PIDs are a no-op. On
    /// return the PID is absent from the active set and the worker has
    /// terminated (the worker observes the stop flag within one poll
    /// interval, and we join it).
    pub fn stop(&self, pid: u32) {
        let entry = self.workers().remove(&pid);

        if let Some(entry) = entry {
            entry.stop.store(true, Ordering::SeqCst);
            if entry.thread.join().is_err() {
                warn!(pid, "guard worker panicked");
            }
        }
    }

    /// Worker-side removal on loop exit. Never joins (the worker is
    /// removing itself).
    pub(crate) fn unregister(&self, pid: u32) {
        self.workers().remove(&pid);
    }

    pub fn is_watching(&self, pid: u32) -> bool {
        self.workers().contains_key(&pid)
    }

    pub fn active_pids(&self) -> Vec<u32> {
        self.workers().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::engine::{MockInferenceEngine, Prediction};
    use std::process::{Child, Command};
    use std::time::{Duration, Instant};

    fn benign_engine() -> Arc<dyn InferenceEngine> {
        let mut engine = MockInferenceEngine::new();
        engine.expect_predict_run().returning(|_| {
            Ok(Prediction {
                label: "benign".to_string(),
                confidence: 0.3,
                probabilities: Default::default(),
                top_features: Vec::new(),
                info: None,
            })
        });
        Arc::new(engine)
    }

    fn fast_config() -> GuardConfig {
        GuardConfig {
            poll_interval_secs: 0.05,
            min_samples: 2,
            ..GuardConfig::default()
        }
    }

    fn spawn_sleeper(secs: &str) -> Child {
        Command::new("sleep").arg(secs).spawn().expect("spawn sleep")
    }

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn duplicate_watch_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = GuardRegistry::new(
            fast_config(),
            benign_engine(),
            tmp.path().join("events.jsonl"),
        );

        let mut child = spawn_sleeper("5");
        let pid = child.id();

        assert!(registry.watch(pid, tmp.path(), &["sleep".into()], None));
        assert!(!registry.watch(pid, tmp.path(), &["sleep".into()], None));
        assert_eq!(registry.active_pids(), vec![pid]);

        registry.stop(pid);
        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn stop_is_idempotent_and_leaves_pid_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = GuardRegistry::new(
            fast_config(),
            benign_engine(),
            tmp.path().join("events.jsonl"),
        );

        let mut child = spawn_sleeper("5");
        let pid = child.id();
        registry.watch(pid, tmp.path(), &["sleep".into()], None);

        registry.stop(pid);
        assert!(!registry.is_watching(pid), "pid absent after stop returns");

        // Second stop of the same pid, and stop of a never-watched pid
        registry.stop(pid);
        registry.stop(999_999);

        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn worker_unregisters_itself_when_process_exits() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = GuardRegistry::new(
            fast_config(),
            benign_engine(),
            tmp.path().join("events.jsonl"),
        );

        let mut child = spawn_sleeper("0.2");
        let pid = child.id();
        registry.watch(pid, tmp.path(), &["sleep".into()], None);

        let _ = child.wait();
        assert!(
            wait_until(Duration::from_secs(3), || !registry.is_watching(pid)),
            "worker must leave the active set after its process exits"
        );
    }

    #[test]
    fn watching_a_dead_pid_self_cleans() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = GuardRegistry::new(
            fast_config(),
            benign_engine(),
            tmp.path().join("events.jsonl"),
        );

        let mut child = spawn_sleeper("0");
        let pid = child.id();
        let _ = child.wait();

        // The worker may start before noticing the PID is gone; either
        // way it must not linger in the active set.
        registry.watch(pid, tmp.path(), &["sleep".into()], None);
        assert!(wait_until(Duration::from_secs(3), || !registry.is_watching(pid)));
    }
}
