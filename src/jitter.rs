//! # Timestamp Jitter
//!
//! Measures the cost of reading the clock: two back-to-back reads are taken
//! in a tight loop and their difference is recorded in the histogram. The
//! tail of that distribution shows how often the thread is preempted or the
//! clock read stalls on the chosen core.
//!
//! Unless a core is given, the tool first calibrates: each candidate core runs
//! an unpaced UDP send loop and the core with the most sends wins.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tracing::info;

use crate::affinity::{Calibrator, CoreAffinityBinder, CoreProbe, CpuBinder};
use crate::cli::JitterArgs;
use crate::clock::{Clock, MonotonicClock};
use crate::histogram::{Histogram, HistogramSpec};
use crate::pacer::probe_throughput;
use crate::report::{self, ParamLine};
use crate::transport::{TransportSend, UdpConfig, UdpTransport};

/// Payload of every calibration probe datagram
pub const PROBE_PAYLOAD: &[u8] = b"um_lat_jitter";

/// Extremes of the clock-read interval over one jitter run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitterStats {
    pub ts_min_ns: Option<u64>,
    pub ts_max_ns: Option<u64>,
}

/// Validated settings for `um-lat jitter`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JitterConfig {
    pub histogram: HistogramSpec,
    pub affinity_cpu: Option<usize>,
    /// Destination of the calibration probe traffic
    pub group: SocketAddr,
    pub interface: Option<Ipv4Addr>,
    pub duration: Duration,
    pub probe_warmup: Duration,
    pub probe_window: Duration,
}

impl JitterConfig {
    pub fn from_args(args: &JitterArgs) -> Result<Self> {
        crate::utils::validate_histogram(&args.histogram)?;
        crate::utils::validate_duration("duration", args.duration)?;
        crate::utils::validate_duration("probe window", args.probe_window)?;
        if let Some(cpu) = args.affinity_cpu {
            crate::utils::validate_cpu(cpu)?;
        }

        Ok(Self {
            histogram: args.histogram,
            affinity_cpu: args.affinity_cpu,
            group: SocketAddr::V4(SocketAddrV4::new(
                args.group,
                crate::defaults::JITTER_PROBE_PORT,
            )),
            interface: args.interface,
            duration: args.duration,
            probe_warmup: args.probe_warmup,
            probe_window: args.probe_window,
        })
    }

    fn param_line(&self) -> ParamLine {
        ParamLine::new()
            .field(
                "o_affinity_cpu",
                self.affinity_cpu.map_or(-1, |cpu| cpu as i64),
            )
            .field("o_histogram", self.histogram)
    }

    fn probe_transport(&self) -> UdpConfig {
        UdpConfig {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            dest: self.group,
            interface: self.interface,
            join_group: None,
            multicast_ttl: crate::defaults::MULTICAST_TTL,
        }
    }
}

/// Everything a jitter run produced
#[derive(Debug, Clone)]
pub struct JitterOutcome {
    pub core: Option<usize>,
    pub probes: Vec<CoreProbe>,
    pub stats: JitterStats,
    pub histogram: Histogram,
}

/// Record back-to-back clock read intervals into `histogram` for `duration`
pub fn timestamp_jitter<C: Clock + ?Sized>(
    clock: &C,
    histogram: &mut Histogram,
    duration: Duration,
) -> JitterStats {
    let duration_ns = duration.as_nanos() as u64;
    let mut ts_min_ns = u64::MAX;
    let mut ts_max_ns = 0u64;

    let start_ns = clock.now_ns();
    // Warm the cache.
    let _ = clock.now_ns();
    let _ = clock.now_ns();

    let mut elapsed_ns = 0u64;
    while elapsed_ns < duration_ns {
        let ts1 = clock.now_ns();
        let ts2 = clock.now_ns();

        let this_ns = ts2.saturating_sub(ts1);
        histogram.record(this_ns);
        ts_min_ns = ts_min_ns.min(this_ns);
        ts_max_ns = ts_max_ns.max(this_ns);

        elapsed_ns = ts2.saturating_sub(start_ns);
    }

    let any = histogram.sample_count() > 0;
    JitterStats {
        ts_min_ns: any.then_some(ts_min_ns),
        ts_max_ns: any.then_some(ts_max_ns),
    }
}

/// Calibrate (unless pinned) and run the jitter loop, writing the report to `out`
pub fn run<W: Write>(config: &JitterConfig, out: &mut W) -> Result<JitterOutcome> {
    run_with_binder(config, CoreAffinityBinder, out)
}

pub fn run_with_binder<B, W>(config: &JitterConfig, binder: B, out: &mut W) -> Result<JitterOutcome>
where
    B: CpuBinder,
    W: Write,
{
    config.param_line().write_to(out)?;

    let clock = MonotonicClock::new();
    let mut histogram =
        Histogram::from_spec(config.histogram).context("failed to create histogram")?;

    let (core, probes) = match config.affinity_cpu {
        Some(cpu) => {
            binder
                .bind_current_thread(cpu)
                .with_context(|| format!("failed to bind to cpu {cpu}"))?;
            (Some(cpu), Vec::new())
        }
        None => {
            let mut sender = UdpTransport::open(&config.probe_transport())
                .context("failed to open probe socket")?
                .into_sender();
            info!(dest = %config.group, "calibrating with {} probe", sender.name());

            let calibration = Calibrator::new(binder).run(|core| {
                probe_throughput(&mut sender, &clock, PROBE_PAYLOAD, config.probe_warmup)?;
                let sends =
                    probe_throughput(&mut sender, &clock, PROBE_PAYLOAD, config.probe_window)?;
                report::write_core_probe(&mut *out, &CoreProbe { core, sends })?;
                Ok(sends)
            })?;
            (Some(calibration.best_core), calibration.probes)
        }
    };

    let stats = timestamp_jitter(&clock, &mut histogram, config.duration);

    report::write_histogram(out, &histogram)?;
    report::write_jitter_stats(out, &stats)?;
    out.flush()?;

    Ok(JitterOutcome {
        core,
        probes,
        stats,
        histogram,
    })
}
