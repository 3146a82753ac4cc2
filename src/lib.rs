//! # um-lat
//!
//! An instrument for measuring round-trip latency and timestamp jitter under
//! controlled, open-loop load. The measurement engine is shared by three
//! tools:
//!
//! - **ping**: sends timestamped messages at a fixed rate and histograms the
//!   round trip of each echo
//! - **pong**: echoes every message it receives back to the pinger
//! - **jitter**: histograms the cost of back-to-back clock reads on a chosen or
//!   calibrated core
//!
//! ## Architecture Overview
//!
//! - `histogram`: fixed-width online histogram with O(1) recording and
//!   rank-based percentiles
//! - `pacer`: the catch-up send scheduler, which busy-polls the clock to hold
//!   an exact open-loop rate
//! - `affinity`: pins threads to cores and calibrates the best core
//!   empirically
//! - `transport`: narrow send/receive capabilities with UDP and in-process
//!   loopback implementations
//! - `ping`, `pong`, `jitter`: the run drivers
//! - `report`, `results`: line-oriented stdout reports and optional JSON
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use um_lat::histogram::HistogramSpec;
//! use um_lat::ping::{self, PingConfig, PingTransport, WarmupSpec};
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = PingConfig {
//!         rate: 10_000,
//!         num_msgs: 100_000,
//!         msg_len: 64,
//!         histogram: HistogramSpec { num_buckets: 500, ns_per_bucket: 100 },
//!         warmup: WarmupSpec { loops: 1000, rate: 10_000 },
//!         affinity_src: Some(2),
//!         affinity_rcv: Some(3),
//!         linger: Duration::from_secs(1),
//!         resolution_pause: Duration::from_secs(1),
//!         send_delay: None,
//!         transport: PingTransport::Loopback,
//!     };
//!
//!     let outcome = ping::run(&config, &mut std::io::stdout(), Box::new(std::io::stdout()))?;
//!     println!("99th percentile: {:?}", outcome.histogram.percentile(99.0));
//!     Ok(())
//! }
//! ```

pub mod affinity;

/// Command-line interface
///
/// clap derive definitions for the `ping`, `pong` and `jitter` subcommands,
/// plus parsers for the compound `"a,b"` options and human-readable durations.
pub mod cli;

pub mod clock;
pub mod error;
pub mod flight;
pub mod histogram;
pub mod jitter;
pub mod logging;
pub mod message;

/// Send and receive metrics collected during a run
pub mod metrics;

pub mod pacer;
pub mod ping;
pub mod pong;
pub mod report;

/// JSON run records with system information
pub mod results;

/// IPC transports behind the `TransportSend` and `MessageSink` capabilities
pub mod transport;

pub mod utils;

pub use affinity::{Calibration, Calibrator, CoreAffinityBinder, CpuBinder};
pub use clock::{Clock, MonotonicClock};
pub use error::{ConfigError, TransportError};
pub use flight::FlightTracker;
pub use histogram::{Histogram, HistogramError, HistogramSpec, HistogramSummary};
pub use pacer::{Pacer, SendPlan, SendScheduler};

/// Current version of the tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Linger after the measured loop before reporting, in milliseconds
    pub const LINGER_MS: u64 = 1000;

    /// Pause after the priming message
    pub const RESOLUTION_PAUSE: &str = "1s";

    /// Rate used for the single priming send; high enough to go out at once
    pub const PRIMING_RATE: u64 = 999_999_999;

    pub const PING_DEST: &str = "127.0.0.1:12000";
    pub const PING_BIND: &str = "0.0.0.0:12001";
    pub const PONG_BIND: &str = "0.0.0.0:12000";
    pub const PONG_DEST: &str = "127.0.0.1:12001";

    pub const MULTICAST_TTL: u32 = 15;

    /// Calibration probe traffic for the jitter tool
    pub const JITTER_GROUP: &str = "239.101.3.1";
    pub const JITTER_PROBE_PORT: u16 = 12000;

    pub const JITTER_DURATION: &str = "2s";
    pub const PROBE_WARMUP: &str = "100ms";
    pub const PROBE_WINDOW: &str = "1s";
}
