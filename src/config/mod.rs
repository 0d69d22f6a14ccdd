use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::Paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    #[serde(default)]
    pub jail: JailConfig,

    #[serde(default)]
    pub net: NetConfig,

    #[serde(default)]
    pub guard: GuardConfig,

    #[serde(default)]
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JailConfig {
    /// Extra allow-list prefixes beyond the built-in OS/library set.
    /// Tilde-expanded.
    #[serde(default)]
    pub extra_allow_prefixes: Vec<String>,

    /// Extra exact-file allowances. Tilde-expanded.
    #[serde(default)]
    pub extra_allow_files: Vec<String>,

    /// Descriptor-polling interval in milliseconds (fallback observer)
    #[serde(default = "default_fd_poll_interval_ms")]
    pub fd_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    /// Override path to the interposition shim library.
    /// Default: DEVJAIL_NET_SHIM env, then next to the devjail binary.
    #[serde(default)]
    pub shim_path: Option<String>,

    /// How often the restriction log is rewritten with newly intercepted
    /// events while the target runs, in milliseconds
    #[serde(default = "default_net_refresh_ms")]
    pub refresh_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Sampling cadence in seconds
    #[serde(default = "default_guard_poll_secs")]
    pub poll_interval_secs: f64,

    /// Samples required in the window before the first inference
    #[serde(default = "default_guard_min_samples")]
    pub min_samples: usize,

    /// Minimum confidence at which a malicious verdict may terminate.
    /// Policy parameter, not a protocol invariant.
    #[serde(default = "default_kill_threshold")]
    pub kill_threshold: f64,

    /// false = observe-only test mode, never send SIGKILL
    #[serde(default = "default_true")]
    pub allow_terminate: bool,

    /// Confidence movement required to log a non-kill update event.
    /// Policy parameter, not a protocol invariant.
    #[serde(default = "default_confidence_delta")]
    pub confidence_delta: f64,

    /// External inference collaborator: command vector fed the run as
    /// JSON on stdin, expected to print a prediction JSON on stdout
    #[serde(default)]
    pub engine_command: Vec<String>,

    /// Artifact directory handed to the collaborator via DEVJAIL_ARTIFACTS
    #[serde(default)]
    pub artifact_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// CPU threshold in percent (may exceed 100 on multi-core)
    #[serde(default = "default_alert_cpu_percent")]
    pub cpu_percent: f64,

    /// Resident-set threshold in bytes (default: 512 MiB)
    #[serde(default = "default_alert_rss_bytes")]
    pub memory_rss_bytes: u64,
}

impl GuardConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs.max(0.05))
    }
}

impl Config {
    /// Load configuration from the default location, falling back to
    /// defaults when no config file exists yet.
    pub fn load() -> Result<Self> {
        let paths = Paths::resolve()?;
        Self::load_with_paths(paths)
    }

    /// Load configuration from an explicit file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let paths = Paths::resolve()?;
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.paths = paths;
        Ok(config)
    }

    fn load_with_paths(paths: Paths) -> Result<Self> {
        let config_file = paths.config_file();

        let mut config = if config_file.exists() {
            let content = fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {}", config_file.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", config_file.display()))?
        } else {
            Config::default()
        };

        config.paths = paths;
        Ok(config)
    }

    /// Extra jail allow-prefixes with `~` expanded to absolute paths.
    pub fn expanded_allow_prefixes(&self) -> Vec<PathBuf> {
        expand_all(&self.jail.extra_allow_prefixes)
    }

    /// Extra jail exact-file allowances with `~` expanded.
    pub fn expanded_allow_files(&self) -> Vec<PathBuf> {
        expand_all(&self.jail.extra_allow_files)
    }
}

fn expand_all(raw: &[String]) -> Vec<PathBuf> {
    raw.iter()
        .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
        .collect()
}

impl Default for JailConfig {
    fn default() -> Self {
        Self {
            extra_allow_prefixes: Vec::new(),
            extra_allow_files: Vec::new(),
            fd_poll_interval_ms: default_fd_poll_interval_ms(),
        }
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            shim_path: None,
            refresh_interval_ms: default_net_refresh_ms(),
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_guard_poll_secs(),
            min_samples: default_guard_min_samples(),
            kill_threshold: default_kill_threshold(),
            allow_terminate: default_true(),
            confidence_delta: default_confidence_delta(),
            engine_command: Vec::new(),
            artifact_dir: None,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cpu_percent: default_alert_cpu_percent(),
            memory_rss_bytes: default_alert_rss_bytes(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_fd_poll_interval_ms() -> u64 {
    100
}

fn default_net_refresh_ms() -> u64 {
    200
}

fn default_guard_poll_secs() -> f64 {
    0.4
}

fn default_guard_min_samples() -> usize {
    8
}

fn default_kill_threshold() -> f64 {
    0.85
}

fn default_confidence_delta() -> f64 {
    0.2
}

fn default_alert_cpu_percent() -> f64 {
    85.0
}

fn default_alert_rss_bytes() -> u64 {
    512 * 1024 * 1024
}
