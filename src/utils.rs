//! # Validation and Formatting Helpers
//!
//! Setup-time validation for the tool configurations plus a few formatters
//! used in diagnostics. Validators return `anyhow::Result` wrapping a typed
//! [`ConfigError`], so callers can either propagate with `?` or downcast.
//!
//! Nothing here is called from a measured loop.

use anyhow::Result;
use std::time::Duration;
use tracing::warn;

use crate::error::ConfigError;
use crate::histogram::{HistogramSpec, MAX_BUCKETS};
use crate::message::HEADER_LEN;

/// Size of the kernel CPU set; core indices at or above this cannot be bound
pub const MAX_CPU_INDEX: usize = 1024;

/// Reject a zero count, rate or size
pub fn validate_positive(name: &'static str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(ConfigError::Zero { name }.into());
    }
    Ok(())
}

/// Validate a histogram geometry
///
/// A latency tool without a histogram is meaningless, so both the bucket
/// count and the bucket width must be positive.
pub fn validate_histogram(spec: &HistogramSpec) -> Result<()> {
    validate_positive("histogram bucket count", spec.num_buckets as u64)?;
    validate_positive("histogram bucket width", spec.ns_per_bucket)?;
    if spec.num_buckets > MAX_BUCKETS {
        return Err(ConfigError::TooManyBuckets {
            num_buckets: spec.num_buckets,
            max: MAX_BUCKETS,
        }
        .into());
    }
    Ok(())
}

/// Every message must be able to carry the timestamp header
pub fn validate_message_len(len: usize) -> Result<()> {
    if len < HEADER_LEN {
        return Err(ConfigError::MessageTooShort {
            len,
            min: HEADER_LEN,
        }
        .into());
    }
    Ok(())
}

/// Warmup loops beyond the priming message need a rate to be sent at
pub fn validate_warmup(loops: u64, rate: u64) -> Result<()> {
    if loops > 1 && rate == 0 {
        return Err(ConfigError::WarmupRate { loops }.into());
    }
    Ok(())
}

pub fn validate_duration(name: &'static str, duration: Duration) -> Result<()> {
    if duration.is_zero() {
        return Err(ConfigError::Zero { name }.into());
    }
    Ok(())
}

/// Validate an explicitly requested core
///
/// Indices beyond the detected core count are allowed (the process may run
/// under a restricted CPU set) but are logged, since binding will likely fail.
pub fn validate_cpu(cpu: usize) -> Result<()> {
    if cpu >= MAX_CPU_INDEX {
        return Err(ConfigError::CpuOutOfRange {
            cpu,
            max: MAX_CPU_INDEX - 1,
        }
        .into());
    }
    let cores = get_cpu_cores();
    if cpu >= cores {
        warn!(cpu, cores, "requested cpu is beyond the detected core count");
    }
    Ok(())
}

/// Logical CPU cores available to this process
pub fn get_cpu_cores() -> usize {
    num_cpus::get()
}

/// Format a duration with a unit suited to its magnitude
///
/// ```rust
/// # use um_lat::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_nanos(1250)), "1.25μs");
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    }
}

pub fn format_duration_ns(ns: u64) -> String {
    format_duration(Duration::from_nanos(ns))
}

/// Format a message rate with K/M scaling
pub fn format_message_rate(messages_per_second: f64) -> String {
    if messages_per_second < 1000.0 {
        format!("{:.0} msg/s", messages_per_second)
    } else if messages_per_second < 1_000_000.0 {
        format!("{:.2}K msg/s", messages_per_second / 1000.0)
    } else {
        format!("{:.2}M msg/s", messages_per_second / 1_000_000.0)
    }
}
