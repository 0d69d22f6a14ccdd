pub mod alerts;
pub mod guard;
pub mod jail;
pub mod net;
pub mod sample;
pub mod status;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "devjail")]
#[command(author, version, about = "Dev-safe process sandbox: observe, restrict and guard without root")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub globals: Globals,
}

#[derive(Args)]
pub struct Globals {
    /// Path to config file
    #[arg(short, long, global = true, env = "DEVJAIL_CONFIG")]
    pub config: Option<String>,

    /// Override the structured-log directory
    #[arg(long, global = true, env = "DEVJAIL_LOG_DIR")]
    pub log_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command inside a monitored file jail
    Jail(jail::JailArgs),

    /// Run a command with network socket creation denied and logged
    Net(net::NetArgs),

    /// Predict a verdict for a telemetry run and apply the kill policy
    Guard(guard::GuardArgs),

    /// Stream resource samples for a PID to a JSONL log
    Sample(sample::SampleArgs),

    /// Inspect and acknowledge threshold alerts
    Alerts(alerts::AlertsArgs),

    /// Show detected capabilities and effective configuration
    Status,
}

impl Globals {
    /// Load config honoring the `--config` override.
    pub(crate) fn load_config(&self) -> anyhow::Result<Config> {
        match &self.config {
            Some(path) => Config::load_from(std::path::Path::new(path)),
            None => Config::load(),
        }
    }

    /// Resolve the structured-log directory honoring `--log-dir`.
    pub(crate) fn resolve_log_dir(&self, config: &Config) -> PathBuf {
        match &self.log_dir {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).to_string()),
            None => config.paths.logs_dir(),
        }
    }
}
