//! # Error Taxonomy
//!
//! Typed errors for the setup and transport layers. Configuration problems are
//! detected before any traffic is generated and are always fatal; transport
//! failures are fatal as soon as they happen because retrying a send would
//! perturb the very timing being measured.
//!
//! Histogram and affinity errors live next to the types that raise them
//! (`histogram::HistogramError`, `affinity::AffinityError`). The binary and
//! the run drivers wrap all of these in `anyhow::Error` with context.

use std::io;
use thiserror::Error;

/// Invalid command-line or programmatic configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A count, rate or size that must be positive was zero
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    /// The payload cannot hold the fixed-size timestamp header
    #[error("message length {len} is smaller than the {min}-byte timestamp header")]
    MessageTooShort { len: usize, min: usize },

    /// Warmup loops were requested without a usable warmup rate
    #[error("warmup rate must be greater than zero when {loops} warmup loops are requested")]
    WarmupRate { loops: u64 },

    /// More histogram buckets than can reasonably be kept resident
    #[error("histogram bucket count {num_buckets} exceeds the maximum of {max}")]
    TooManyBuckets { num_buckets: usize, max: usize },

    /// The core index cannot be expressed in a CPU set
    #[error("cpu {cpu} is out of range (maximum {max})")]
    CpuOutOfRange { cpu: usize, max: usize },

    /// A compound option string such as "buckets,width" could not be parsed
    #[error("malformed value '{value}': expected {expected}")]
    Malformed {
        value: String,
        expected: &'static str,
    },
}

/// Failures raised by a transport capability
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket setup (create, bind, options, clone) failed
    #[error("transport setup failed: {0}")]
    Setup(#[source] io::Error),

    /// The transport refused an outgoing buffer
    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    /// The peer side of an in-process transport is gone
    #[error("transport disconnected")]
    Disconnected,

    /// The receive thread terminated by panicking
    #[error("receive thread panicked")]
    ReceiverPanicked,
}
