use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::histogram::HistogramSummary;
use crate::metrics::{ReceiveCounts, SendMetrics};
use crate::ping::{PingConfig, PingOutcome};

/// Host description stored with every run for reproducibility
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub rust_version: String,
    pub tool_version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: crate::utils::get_cpu_cores(),
            rust_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            tool_version: crate::VERSION.to_string(),
        }
    }
}

/// JSON document written by `ping --output-file`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingRecord {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub system: SystemInfo,
    pub config: PingConfig,
    pub send: SendMetrics,
    pub receive: ReceiveCounts,
    pub latency: HistogramSummary,
    pub buckets: Vec<u64>,
}

impl PingRecord {
    pub fn new(config: &PingConfig, outcome: &PingOutcome) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            system: SystemInfo::default(),
            config: config.clone(),
            send: outcome.metrics.clone(),
            receive: outcome.counts,
            latency: outcome.histogram.summary(),
            buckets: outcome.histogram.buckets().to_vec(),
        }
    }
}

/// Writes run records to the configured output file
pub struct ResultsManager {
    output_file: PathBuf,
}

impl ResultsManager {
    pub fn new(output_file: &Path) -> Self {
        Self {
            output_file: output_file.to_path_buf(),
        }
    }

    pub fn write_ping(&self, record: &PingRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&self.output_file, json).with_context(|| {
            format!("failed to write results to {}", self.output_file.display())
        })?;
        info!(path = %self.output_file.display(), "results written");
        Ok(())
    }

    pub fn read_ping(&self) -> Result<PingRecord> {
        let json = std::fs::read_to_string(&self.output_file).with_context(|| {
            format!("failed to read results from {}", self.output_file.display())
        })?;
        serde_json::from_str(&json).context("results file is not a ping record")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::{Histogram, HistogramSpec};
    use crate::ping::{PingTransport, WarmupSpec};
    use std::time::Duration;
    use tempfile::TempDir;

    fn outcome() -> (PingConfig, PingOutcome) {
        let config = PingConfig {
            rate: 1000,
            num_msgs: 3,
            msg_len: 32,
            histogram: HistogramSpec {
                num_buckets: 4,
                ns_per_bucket: 100,
            },
            warmup: WarmupSpec::default(),
            affinity_src: None,
            affinity_rcv: Some(1),
            linger: Duration::from_millis(10),
            resolution_pause: Duration::ZERO,
            send_delay: None,
            transport: PingTransport::Loopback,
        };
        let mut histogram = Histogram::from_spec(config.histogram).unwrap();
        for sample in [10, 120, 450] {
            histogram.record(sample);
        }
        let outcome = PingOutcome {
            metrics: SendMetrics::new(3, 2_000_000, 1, 2),
            counts: ReceiveCounts {
                num_rcv_msgs: 3,
                ..Default::default()
            },
            histogram,
        };
        (config, outcome)
    }

    #[test]
    fn test_ping_record_written_as_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ping.json");
        let manager = ResultsManager::new(&path);

        let (config, outcome) = outcome();
        let record = PingRecord::new(&config, &outcome);
        manager.write_ping(&record).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["send"]["actual_sends"], 3);
        assert_eq!(raw["latency"]["overflow_count"], 1);
        assert_eq!(raw["buckets"], serde_json::json!([1, 1, 0, 0]));
        assert_eq!(raw["config"]["transport"], "Loopback");

        let read = manager.read_ping().unwrap();
        assert_eq!(read.config, record.config);
        assert_eq!(read.timestamp, record.timestamp);
        assert_eq!(read.receive, record.receive);
        assert_eq!(read.latency.sample_count, 3);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let manager = ResultsManager::new(&dir.path().join("absent.json"));
        assert!(manager.read_ping().is_err());
    }
}
