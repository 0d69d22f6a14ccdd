use anyhow::Result;
use clap::Args;
use serde_json::json;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::logs::{append_json_line, iso_timestamp};
use crate::monitor::{AlertManager, SampleSource};

use super::Globals;

#[derive(Args)]
pub struct SampleArgs {
    /// Process to sample
    #[arg(long)]
    pub pid: u32,

    /// Sampling interval in seconds
    #[arg(long, default_value_t = 0.4)]
    pub interval: f64,

    /// Output JSONL path (default: <log-dir>/<run-id>.jsonl)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Run identifier (default: run-<pid>-<uuid>)
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Stream `sample` records for a PID until it exits (or Ctrl-C), then
/// append a `stop` summary with the observed maxima. Each sample is
/// also pushed through the alert manager's thresholds.
pub async fn run(args: SampleArgs, globals: &Globals) -> Result<i32> {
    let config = globals.load_config()?;
    let log_dir = globals.resolve_log_dir(&config);

    let run_id = args.run_id.clone().unwrap_or_else(|| {
        let unique = uuid::Uuid::new_v4().simple().to_string();
        format!("run-{}-{}", args.pid, &unique[..8])
    });
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| log_dir.join(format!("{}.jsonl", run_id)));

    let mut source = SampleSource::new(args.pid)?;
    let mut alerts = AlertManager::new(config.alerts.clone(), log_dir.join("alerts.jsonl"));

    let interval = Duration::from_secs_f64(args.interval.max(0.05));
    let started = Instant::now();

    append_json_line(
        &output,
        &json!({
            "event": "start",
            "run_id": run_id,
            "timestamp": iso_timestamp(),
            "pid": args.pid,
            "interval": args.interval,
        }),
    )?;

    println!("[devjail] Sampling pid {} every {:.2}s -> {}", args.pid, args.interval, output.display());

    let mut sample_count = 0u64;
    let mut max_cpu = 0.0_f64;
    let mut max_rss = 0u64;
    let mut peak_files = 0u32;
    let mut alert_count = 0usize;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                eprintln!("[devjail] Interrupted, writing summary.");
                break;
            }
            _ = ticker.tick() => {
                let Ok(sample) = source.sample() else { break };

                max_cpu = max_cpu.max(sample.cpu_percent);
                max_rss = max_rss.max(sample.memory_rss);
                peak_files = peak_files.max(sample.open_files);
                alert_count += alerts.evaluate(&run_id, &sample).len();

                let mut record = serde_json::to_value(&sample)?;
                if let serde_json::Value::Object(ref mut map) = record {
                    map.insert("event".to_string(), json!("sample"));
                    map.insert("run_id".to_string(), json!(run_id));
                    map.insert("pid".to_string(), json!(args.pid));
                }
                append_json_line(&output, &record)?;
                sample_count += 1;
            }
        }
    }

    append_json_line(
        &output,
        &json!({
            "event": "stop",
            "run_id": run_id,
            "timestamp": iso_timestamp(),
            "samples": sample_count,
            "duration_seconds": started.elapsed().as_secs_f64(),
            "max_cpu_percent": max_cpu,
            "max_memory_rss": max_rss,
            "peak_open_files": peak_files,
        }),
    )?;

    println!(
        "[devjail] {} samples, max cpu {:.1}%, max rss {} bytes, {} alert(s).",
        sample_count, max_cpu, max_rss, alert_count
    );

    Ok(0)
}
