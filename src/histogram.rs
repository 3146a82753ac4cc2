//! # Fixed-Width Latency Histogram
//!
//! The histogram sits on the critical measurement path: samples are recorded
//! from the receive thread immediately after a message arrives. Recording is a
//! handful of integer operations and never allocates, so it adds no noise to
//! the latency being measured.
//!
//! Index `i` counts samples in `[i * width, (i + 1) * width)`. Samples at or
//! beyond `bucket_count * width` are counted as overflows. Percentiles are
//! rank-based upper bounds with a resolution of one bucket width.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::ConfigError;

/// Largest bucket count accepted from configuration (2 GiB of counters)
pub const MAX_BUCKETS: usize = 1 << 28;

/// Percentiles included in every summary and report
pub const REPORT_PERCENTILES: [f64; 5] = [90.0, 99.0, 99.9, 99.99, 99.999];

/// Errors raised by the histogram engine
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistogramError {
    /// Both bucket count and bucket width must be positive
    #[error("invalid histogram geometry: bucket_count={bucket_count}, bucket_width_ns={bucket_width_ns}")]
    InvalidConfig {
        bucket_count: usize,
        bucket_width_ns: u64,
    },

    /// The bucket storage could not be allocated
    #[error("cannot allocate {bucket_count} histogram buckets")]
    Allocation { bucket_count: usize },

    /// The end timestamp precedes the start timestamp
    #[error("negative latency sample: start_ns={start_ns} is after end_ns={end_ns}")]
    NegativeSample { start_ns: u64, end_ns: u64 },
}

/// Histogram geometry, written on the command line as "num_buckets,ns_per_bucket"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramSpec {
    pub num_buckets: usize,
    pub ns_per_bucket: u64,
}

impl fmt::Display for HistogramSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.num_buckets, self.ns_per_bucket)
    }
}

impl FromStr for HistogramSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::Malformed {
            value: s.to_string(),
            expected: "num_buckets,ns_per_bucket",
        };
        let (buckets, width) = s.trim().split_once(',').ok_or_else(malformed)?;
        Ok(Self {
            num_buckets: buckets.trim().parse().map_err(|_| malformed())?,
            ns_per_bucket: width.trim().parse().map_err(|_| malformed())?,
        })
    }
}

/// A single percentile estimate; `None` when the rank lies in the overflow region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value_ns: Option<u64>,
}

/// Point-in-time summary of the histogram contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub sample_count: u64,
    pub sample_sum: u64,
    /// Integer mean, `None` when no samples were recorded
    pub mean_ns: Option<u64>,
    pub min_ns: Option<u64>,
    pub max_ns: Option<u64>,
    pub overflow_count: u64,
    pub percentiles: Vec<PercentileValue>,
}

/// Online latency histogram with fixed geometry
#[derive(Debug, Clone)]
pub struct Histogram {
    bucket_width_ns: u64,
    buckets: Box<[u64]>,
    overflow_count: u64,
    sample_count: u64,
    sample_sum: u64,
    min_sample: u64,
    max_sample: u64,
}

impl Histogram {
    /// Allocate a zeroed histogram with `bucket_count` buckets of `bucket_width_ns` each
    pub fn new(bucket_count: usize, bucket_width_ns: u64) -> Result<Self, HistogramError> {
        if bucket_count == 0 || bucket_width_ns == 0 {
            return Err(HistogramError::InvalidConfig {
                bucket_count,
                bucket_width_ns,
            });
        }

        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(bucket_count)
            .map_err(|_| HistogramError::Allocation { bucket_count })?;
        buckets.resize(bucket_count, 0);

        let mut histogram = Self {
            bucket_width_ns,
            buckets: buckets.into_boxed_slice(),
            overflow_count: 0,
            sample_count: 0,
            sample_sum: 0,
            min_sample: u64::MAX,
            max_sample: 0,
        };
        histogram.reset();
        Ok(histogram)
    }

    /// Build a histogram from a parsed `-H` option
    pub fn from_spec(spec: HistogramSpec) -> Result<Self, HistogramError> {
        Self::new(spec.num_buckets, spec.ns_per_bucket)
    }

    /// Zero all counters and extrema, keeping the geometry.
    ///
    /// Every bucket slot is written so that the backing pages are resident
    /// before the measured loop starts.
    pub fn reset(&mut self) {
        self.overflow_count = 0;
        self.sample_count = 0;
        self.sample_sum = 0;
        self.min_sample = u64::MAX;
        self.max_sample = 0;
        for bucket in self.buckets.iter_mut() {
            *bucket = 0;
        }
    }

    /// Record one sample in nanoseconds. Constant time.
    #[inline]
    pub fn record(&mut self, sample_ns: u64) {
        self.sample_count += 1;
        self.sample_sum = self.sample_sum.wrapping_add(sample_ns);

        if sample_ns > self.max_sample {
            self.max_sample = sample_ns;
        }
        if sample_ns < self.min_sample {
            self.min_sample = sample_ns;
        }

        let bucket = sample_ns / self.bucket_width_ns;
        match usize::try_from(bucket)
            .ok()
            .and_then(|i| self.buckets.get_mut(i))
        {
            Some(slot) => *slot += 1,
            None => self.overflow_count += 1,
        }
    }

    /// Record the interval between two clock readings.
    ///
    /// A reading pair where `end_ns < start_ns` is rejected and leaves the
    /// histogram untouched.
    #[inline]
    pub fn record_interval(&mut self, start_ns: u64, end_ns: u64) -> Result<(), HistogramError> {
        let sample = end_ns
            .checked_sub(start_ns)
            .ok_or(HistogramError::NegativeSample { start_ns, end_ns })?;
        self.record(sample);
        Ok(())
    }

    /// Upper edge of the first bucket whose cumulative count exceeds
    /// `floor(sample_count * p / 100)`, or `None` if the rank falls in overflow.
    pub fn percentile(&self, p: f64) -> Option<u64> {
        let needed = (self.sample_count as f64 * p / 100.0) as u64;
        let mut found = 0u64;

        for (i, &count) in self.buckets.iter().enumerate() {
            found += count;
            if found > needed {
                return Some((i as u64 + 1) * self.bucket_width_ns);
            }
        }
        None
    }

    /// Summary statistics plus the standard report percentiles
    pub fn summary(&self) -> HistogramSummary {
        let has_samples = self.sample_count > 0;

        HistogramSummary {
            sample_count: self.sample_count,
            sample_sum: self.sample_sum,
            mean_ns: has_samples.then(|| self.sample_sum / self.sample_count),
            min_ns: has_samples.then_some(self.min_sample),
            max_ns: has_samples.then_some(self.max_sample),
            overflow_count: self.overflow_count,
            percentiles: REPORT_PERCENTILES
                .iter()
                .map(|&p| PercentileValue {
                    percentile: p,
                    value_ns: self.percentile(p),
                })
                .collect(),
        }
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket_width_ns(&self) -> u64 {
        self.bucket_width_ns
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    pub fn spec(&self) -> HistogramSpec {
        HistogramSpec {
            num_buckets: self.buckets.len(),
            ns_per_bucket: self.bucket_width_ns,
        }
    }
}
