use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::logs::{append_json_line, iso_timestamp, read_json_lines};
use crate::monitor::{AlertManager, TelemetryRun};

use super::Globals;

#[derive(Args)]
pub struct AlertsArgs {
    #[command(subcommand)]
    pub command: AlertsCommands,
}

#[derive(Subcommand)]
pub enum AlertsCommands {
    /// Replay a recorded sample log through the threshold evaluator
    Check {
        /// Telemetry JSONL log to evaluate
        log: PathBuf,

        /// Override the run id recorded on created alerts
        #[arg(long)]
        run_id: Option<String>,
    },

    /// List unacknowledged alerts, most recent first
    List,

    /// Acknowledge an alert by id
    Ack { alert_id: String },
}

pub async fn run(args: AlertsArgs, globals: &Globals) -> Result<i32> {
    let config = globals.load_config()?;
    let log_dir = globals.resolve_log_dir(&config);
    let alert_log = log_dir.join("alerts.jsonl");

    match args.command {
        AlertsCommands::Check { log, run_id } => {
            let run = TelemetryRun::load(&log)
                .with_context(|| format!("Failed to load telemetry log {}", log.display()))?;
            let run_id = run_id.unwrap_or_else(|| run.run_id.clone());

            let mut manager = AlertManager::new(config.alerts.clone(), alert_log);
            for sample in &run.samples {
                manager.evaluate(&run_id, sample);
            }

            let active = manager.active_alerts();
            if active.is_empty() {
                println!("[devjail] No thresholds breached over {} samples.", run.samples.len());
            } else {
                println!("[devjail] {} alert(s) over {} samples:", active.len(), run.samples.len());
                for alert in active.iter().rev() {
                    println!(
                        "  {}  {}  value {:.1} > threshold {:.1} (severity {:.1})",
                        alert.alert_id, alert.metric, alert.value, alert.threshold, alert.severity
                    );
                }
            }
            Ok(0)
        }

        AlertsCommands::List => {
            let records = read_json_lines(&alert_log)?;

            // Acknowledgement entries mask the alerts they reference
            let acked: HashSet<String> = records
                .iter()
                .filter(|r| r["acknowledged"] == true && r.get("metric").is_none())
                .filter_map(|r| r["alert_id"].as_str().map(String::from))
                .collect();

            let mut shown = 0;
            for record in records.iter().rev() {
                let Some(id) = record["alert_id"].as_str() else {
                    continue;
                };
                if record.get("metric").is_none() || acked.contains(id) {
                    continue;
                }
                println!(
                    "  {}  {}  run {}  value {} > {}  at {}",
                    id,
                    record["metric"].as_str().unwrap_or("?"),
                    record["run_id"].as_str().unwrap_or("?"),
                    record["value"],
                    record["threshold"],
                    record["created_at"].as_str().unwrap_or("?"),
                );
                shown += 1;
            }
            if shown == 0 {
                println!("[devjail] No active alerts.");
            }
            Ok(0)
        }

        AlertsCommands::Ack { alert_id } => {
            let records = read_json_lines(&alert_log)?;
            let known = records
                .iter()
                .any(|r| r["alert_id"] == alert_id.as_str() && r.get("metric").is_some());
            if !known {
                eprintln!("[devjail] Unknown alert id: {}", alert_id);
                return Ok(1);
            }

            append_json_line(
                &alert_log,
                &json!({
                    "alert_id": alert_id,
                    "acknowledged": true,
                    "acknowledged_at": iso_timestamp(),
                }),
            )?;
            println!("[devjail] Acknowledged {}", alert_id);
            Ok(0)
        }
    }
}
