//! Threshold-based alert manager.
//!
//! Stateful evaluator over a stream of samples: whenever a sample
//! crosses one of the static thresholds (CPU percent, resident set
//! bytes) an [`AlertRecord`] is created and appended to the alert log.
//! Repeated breaches create repeated records, preserving the severity
//! history. Acknowledgement appends a new entry; existing lines are
//! never edited.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use crate::config::AlertConfig;
use crate::logs::{append_json_line, iso_timestamp};

use super::sample::Sample;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert_id: String,
    pub run_id: String,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    /// How far past the threshold the breach went.
    pub severity: f64,
    pub acknowledged: bool,
    pub created_at: String,
}

/// Acknowledgement entry appended alongside alert records.
#[derive(Debug, Serialize, Deserialize)]
struct AckRecord {
    alert_id: String,
    acknowledged: bool,
    acknowledged_at: String,
}

pub struct AlertManager {
    thresholds: AlertConfig,
    log_path: PathBuf,
    records: Vec<AlertRecord>,
}

impl AlertManager {
    pub fn new(thresholds: AlertConfig, log_path: PathBuf) -> Self {
        Self {
            thresholds,
            log_path,
            records: Vec::new(),
        }
    }

    pub fn thresholds(&self) -> &AlertConfig {
        &self.thresholds
    }

    /// Evaluate one sample against both thresholds, recording an alert
    /// per breached metric. Returns the ids of alerts created.
    pub fn evaluate(&mut self, run_id: &str, sample: &Sample) -> Vec<String> {
        let mut created = Vec::new();

        if sample.cpu_percent > self.thresholds.cpu_percent {
            let record =
                self.record_alert(run_id, "cpu_percent", sample.cpu_percent, self.thresholds.cpu_percent);
            created.push(record.alert_id.clone());
        }

        let rss_threshold = self.thresholds.memory_rss_bytes as f64;
        if sample.memory_rss as f64 > rss_threshold {
            let record =
                self.record_alert(run_id, "memory_rss", sample.memory_rss as f64, rss_threshold);
            created.push(record.alert_id.clone());
        }

        created
    }

    /// Append one alert. Always succeeds from the caller's perspective:
    /// a persistence failure is logged and the in-memory record stands.
    pub fn record_alert(
        &mut self,
        run_id: &str,
        metric: &str,
        value: f64,
        threshold: f64,
    ) -> &AlertRecord {
        let record = AlertRecord {
            alert_id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            metric: metric.to_string(),
            value,
            threshold,
            severity: value - threshold,
            acknowledged: false,
            created_at: iso_timestamp(),
        };

        if let Err(e) = append_json_line(&self.log_path, &record) {
            warn!("Failed to persist alert {}: {}", record.alert_id, e);
        }

        self.records.push(record);
        self.records.last().expect("record just pushed")
    }

    /// Unacknowledged records, most recent first; ties between records
    /// created in the same instant break by insertion order.
    pub fn active_alerts(&self) -> Vec<&AlertRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| !r.acknowledged)
            .collect()
    }

    /// Acknowledge by id. Returns false for unknown ids. The log gains
    /// an acknowledgement entry; nothing already written is touched.
    pub fn acknowledge(&mut self, alert_id: &str) -> bool {
        let Some(record) = self.records.iter_mut().find(|r| r.alert_id == alert_id) else {
            return false;
        };
        if !record.acknowledged {
            record.acknowledged = true;
            let ack = AckRecord {
                alert_id: alert_id.to_string(),
                acknowledged: true,
                acknowledged_at: iso_timestamp(),
            };
            if let Err(e) = append_json_line(&self.log_path, &ack) {
                warn!("Failed to persist acknowledgement for {}: {}", alert_id, e);
            }
        }
        true
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::read_json_lines;

    fn manager(tmp: &tempfile::TempDir) -> AlertManager {
        AlertManager::new(
            AlertConfig {
                cpu_percent: 80.0,
                memory_rss_bytes: 1000,
            },
            tmp.path().join("alerts.jsonl"),
        )
    }

    fn sample(cpu: f64, rss: u64) -> Sample {
        Sample {
            timestamp: iso_timestamp(),
            cpu_percent: cpu,
            memory_rss: rss,
            memory_vms: rss,
            open_files: 0,
            socket_count: 0,
            threads: 1,
            read_bytes: 0,
            write_bytes: 0,
        }
    }

    #[test]
    fn breaches_create_records_per_metric() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(&tmp);

        let created = mgr.evaluate("run-1", &sample(95.0, 2000));
        assert_eq!(created.len(), 2, "both thresholds breached");

        let created = mgr.evaluate("run-1", &sample(50.0, 500));
        assert!(created.is_empty());
    }

    #[test]
    fn repeated_breaches_repeat_records() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(&tmp);

        mgr.evaluate("run-1", &sample(95.0, 0));
        mgr.evaluate("run-1", &sample(96.0, 0));

        assert_eq!(mgr.active_alerts().len(), 2);
        assert_eq!(read_json_lines(mgr.log_path()).unwrap().len(), 2);
    }

    #[test]
    fn severity_is_value_minus_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(&tmp);

        let record = mgr.record_alert("run-1", "cpu_percent", 92.5, 80.0);
        assert!((record.severity - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn active_alerts_most_recent_first() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(&tmp);

        let first = mgr.record_alert("run-1", "cpu_percent", 90.0, 80.0).alert_id.clone();
        let second = mgr.record_alert("run-1", "cpu_percent", 91.0, 80.0).alert_id.clone();

        let active = mgr.active_alerts();
        assert_eq!(active[0].alert_id, second);
        assert_eq!(active[1].alert_id, first);
    }

    #[test]
    fn acknowledge_removes_from_active_and_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(&tmp);

        let id = mgr.record_alert("run-1", "memory_rss", 2000.0, 1000.0).alert_id.clone();
        assert_eq!(mgr.active_alerts().len(), 1);

        assert!(mgr.acknowledge(&id));
        assert!(mgr.active_alerts().is_empty());

        // Original line untouched, ack entry appended
        let lines = read_json_lines(mgr.log_path()).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["acknowledged"], false);
        assert_eq!(lines[1]["acknowledged"], true);
        assert_eq!(lines[1]["alert_id"], id);
    }

    #[test]
    fn acknowledge_unknown_id_is_false() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(&tmp);
        assert!(!mgr.acknowledge("no-such-alert"));
    }

    #[test]
    fn acknowledge_is_idempotent_on_the_log() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(&tmp);

        let id = mgr.record_alert("run-1", "cpu_percent", 90.0, 80.0).alert_id.clone();
        assert!(mgr.acknowledge(&id));
        assert!(mgr.acknowledge(&id));

        // One alert + one ack; the second acknowledge wrote nothing
        assert_eq!(read_json_lines(mgr.log_path()).unwrap().len(), 2);
    }
}
