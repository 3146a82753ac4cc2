use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::histogram::HistogramSpec;
use crate::ping::WarmupSpec;

/// um-lat - open-loop latency and timestamp jitter instrument
#[derive(Parser, Debug)]
#[clap(name = "um-lat", version, about, long_about = None)]
pub struct Args {
    /// Increase diagnostic verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send timestamped messages at a fixed rate and histogram the round trip
    Ping(PingArgs),
    /// Echo every received message back to the pinger
    Pong(PongArgs),
    /// Histogram the cost of back-to-back clock reads
    Jitter(JitterArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PingArgs {
    /// Messages per second during the measured loop
    #[clap(short = 'r', long, help_heading = "Load")]
    pub rate: u64,

    /// Number of measured messages
    #[clap(short = 'n', long, help_heading = "Load")]
    pub num_msgs: u64,

    /// Message length in bytes, including the timestamp header
    #[clap(short = 'm', long, help_heading = "Load")]
    pub msg_len: usize,

    /// Histogram geometry: num_buckets,ns_per_bucket
    #[clap(short = 'H', long, value_parser = parse_histogram, help_heading = "Load")]
    pub histogram: HistogramSpec,

    /// Warmup before measuring: loops,rate
    #[clap(short = 'w', long, value_parser = parse_warmup, default_value = "0,0", help_heading = "Load")]
    pub warmup: WarmupSpec,

    /// Replace the busy-polling pacer with a fixed delay between sends (e.g. "10ms")
    #[clap(long, value_parser = parse_duration, help_heading = "Load")]
    pub send_delay: Option<Duration>,

    /// CPU for the sending thread
    #[clap(short = 'A', long, help_heading = "Affinity")]
    pub affinity_src: Option<usize>,

    /// CPU for the receive thread, bound at begin-of-stream
    #[clap(short = 'a', long, help_heading = "Affinity")]
    pub affinity_rcv: Option<usize>,

    /// Wait this long after the last send before reporting
    #[clap(short = 'l', long, default_value_t = crate::defaults::LINGER_MS)]
    pub linger_ms: u64,

    /// Pause after the priming message before warmup starts
    #[clap(long, value_parser = parse_duration, default_value = crate::defaults::RESOLUTION_PAUSE)]
    pub resolution_pause: Duration,

    /// Where messages are sent
    #[clap(long, default_value = crate::defaults::PING_DEST, help_heading = "Transport")]
    pub dest: SocketAddr,

    /// Local address on which echoes are received
    #[clap(long, default_value = crate::defaults::PING_BIND, help_heading = "Transport")]
    pub bind: SocketAddr,

    /// Interface for multicast send and membership
    #[clap(long, help_heading = "Transport")]
    pub interface: Option<Ipv4Addr>,

    /// Multicast group to join for receiving echoes
    #[clap(long, help_heading = "Transport")]
    pub join: Option<Ipv4Addr>,

    /// Reflect messages in-process instead of using the network
    #[clap(long, default_value_t = false, help_heading = "Transport")]
    pub loopback: bool,

    /// Also write the run as a JSON document
    #[clap(short = 'o', long)]
    pub output_file: Option<PathBuf>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PongArgs {
    /// Local address on which pings are received
    #[clap(long, default_value = crate::defaults::PONG_BIND)]
    pub bind: SocketAddr,

    /// Where echoes are sent
    #[clap(long, default_value = crate::defaults::PONG_DEST)]
    pub dest: SocketAddr,

    #[clap(long)]
    pub interface: Option<Ipv4Addr>,

    /// Multicast group to join for receiving pings
    #[clap(long)]
    pub join: Option<Ipv4Addr>,

    /// CPU for the receive thread, bound at begin-of-stream
    #[clap(short = 'a', long)]
    pub affinity_rcv: Option<usize>,

    /// Exit when the pinger ends its stream
    #[clap(short = 'E', long, default_value_t = false)]
    pub exit_on_eos: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct JitterArgs {
    /// Histogram geometry: num_buckets,ns_per_bucket
    #[clap(short = 'H', long, value_parser = parse_histogram)]
    pub histogram: HistogramSpec,

    /// CPU to run on; calibrated when omitted
    #[clap(short = 'a', long)]
    pub affinity_cpu: Option<usize>,

    /// Destination group for calibration probe traffic
    #[clap(short = 'g', long, default_value = crate::defaults::JITTER_GROUP)]
    pub group: Ipv4Addr,

    /// Interface for multicast send
    #[clap(short = 'i', long)]
    pub interface: Option<Ipv4Addr>,

    /// Length of the jitter loop
    #[clap(short = 'd', long, value_parser = parse_duration, default_value = crate::defaults::JITTER_DURATION)]
    pub duration: Duration,

    /// Untimed probe run before each calibration window
    #[clap(long, value_parser = parse_duration, default_value = crate::defaults::PROBE_WARMUP)]
    pub probe_warmup: Duration,

    /// Timed calibration window per core
    #[clap(long, value_parser = parse_duration, default_value = crate::defaults::PROBE_WINDOW)]
    pub probe_window: Duration,
}

fn parse_histogram(s: &str) -> Result<HistogramSpec, String> {
    s.parse().map_err(|e: crate::error::ConfigError| e.to_string())
}

fn parse_warmup(s: &str) -> Result<WarmupSpec, String> {
    s.parse().map_err(|e: crate::error::ConfigError| e.to_string())
}

/// Parse duration from string (e.g., "500ms", "1.5s", "2m")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix("us") {
        (stripped, "us")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let ns_per_unit = match unit {
        "us" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3600e9,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(Duration::from_nanos((num * ns_per_unit).round() as u64))
}
