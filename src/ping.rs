//! # Round-Trip Latency (ping)
//!
//! The pinger sends numbered messages at a fixed open-loop rate and records
//! the round-trip time of every echo that carries a send timestamp. A run has
//! three phases:
//!
//! 1. **Priming**: a single untimestamped message, sent only when warmup was
//!    requested, so the path is established before the warmup starts. It is
//!    expected to be lost. A short pause follows.
//! 2. **Warmup**: `loops` untimestamped messages at the warmup rate to load
//!    caches and settle the receive path.
//! 3. **Measured**: the histogram is reset and `num_msgs` timestamped
//!    messages are sent at the target rate.
//!
//! The receive side runs on the transport's thread. It shares the histogram,
//! the flight tracker and the receive counters with the driver.

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::affinity::{CoreAffinityBinder, CpuBinder};
use crate::cli::PingArgs;
use crate::clock::{Clock, MonotonicClock};
use crate::error::ConfigError;
use crate::flight::{EchoCheck, EchoWindow, FlightTracker};
use crate::histogram::{Histogram, HistogramSpec};
use crate::message::PerfHeader;
use crate::metrics::{ReceiveCounts, ReceiveStats, SendMetrics};
use crate::pacer::{DelayPacer, Pacer, SendPlan, SendScheduler};
use crate::report::{self, ParamLine};
use crate::transport::{
    loopback, MessageSink, ReceiveEvent, ReceiverHandle, TransportSend, UdpConfig, UdpTransport,
};

/// Warmup phase, written on the command line as "loops,rate"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupSpec {
    pub loops: u64,
    pub rate: u64,
}

impl fmt::Display for WarmupSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.loops, self.rate)
    }
}

impl FromStr for WarmupSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::Malformed {
            value: s.to_string(),
            expected: "loops,rate",
        };
        let (loops, rate) = s.trim().split_once(',').ok_or_else(malformed)?;
        Ok(Self {
            loops: loops.trim().parse().map_err(|_| malformed())?,
            rate: rate.trim().parse().map_err(|_| malformed())?,
        })
    }
}

/// How ping reaches its echo peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PingTransport {
    Udp(UdpConfig),
    /// In-process reflector, no network involved
    Loopback,
}

impl fmt::Display for PingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PingTransport::Udp(config) => write!(f, "udp:{}", config.dest),
            PingTransport::Loopback => write!(f, "loopback"),
        }
    }
}

/// Validated settings for `um-lat ping`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingConfig {
    pub rate: u64,
    pub num_msgs: u64,
    pub msg_len: usize,
    pub histogram: HistogramSpec,
    pub warmup: WarmupSpec,
    pub affinity_src: Option<usize>,
    pub affinity_rcv: Option<usize>,
    pub linger: Duration,
    /// Pause after the priming message
    pub resolution_pause: Duration,
    /// Fixed inter-send delay instead of catch-up pacing
    pub send_delay: Option<Duration>,
    pub transport: PingTransport,
}

impl PingConfig {
    pub fn from_args(args: &PingArgs) -> Result<Self> {
        crate::utils::validate_positive("rate", args.rate)?;
        crate::utils::validate_positive("number of messages", args.num_msgs)?;
        crate::utils::validate_message_len(args.msg_len)?;
        crate::utils::validate_histogram(&args.histogram)?;
        crate::utils::validate_warmup(args.warmup.loops, args.warmup.rate)?;
        for cpu in [args.affinity_src, args.affinity_rcv].into_iter().flatten() {
            crate::utils::validate_cpu(cpu)?;
        }

        let transport = if args.loopback {
            PingTransport::Loopback
        } else {
            PingTransport::Udp(UdpConfig {
                bind: args.bind,
                dest: args.dest,
                interface: args.interface,
                join_group: args.join,
                multicast_ttl: crate::defaults::MULTICAST_TTL,
            })
        };

        Ok(Self {
            rate: args.rate,
            num_msgs: args.num_msgs,
            msg_len: args.msg_len,
            histogram: args.histogram,
            warmup: args.warmup,
            affinity_src: args.affinity_src,
            affinity_rcv: args.affinity_rcv,
            linger: Duration::from_millis(args.linger_ms),
            resolution_pause: args.resolution_pause,
            send_delay: args.send_delay,
            transport,
        })
    }

    pub fn param_line(&self) -> ParamLine {
        let cpu = |c: Option<usize>| c.map_or(-1, |c| c as i64);
        ParamLine::new()
            .field("o_affinity_src", cpu(self.affinity_src))
            .field("o_affinity_rcv", cpu(self.affinity_rcv))
            .field("o_histogram", self.histogram)
            .field("o_linger_ms", self.linger.as_millis())
            .field("o_msg_len", self.msg_len)
            .field("o_num_msgs", self.num_msgs)
            .field("o_rate", self.rate)
            .field("o_warmup", self.warmup)
            .field("o_transport", &self.transport)
    }
}

/// Receive handler: turns echoed messages into round-trip samples.
///
/// Each message number is confirmed at most once. Repeated echoes (a
/// duplicated datagram, a second reflector) and numbers this session never
/// sent are counted as ignored and do not touch the flight size or the
/// histogram.
pub struct PingReceiver {
    histogram: Arc<Mutex<Histogram>>,
    flight: Arc<FlightTracker>,
    echoes: EchoWindow,
    stats: Arc<ReceiveStats>,
    affinity_rcv: Option<usize>,
    binder: Box<dyn CpuBinder>,
    events: Box<dyn Write + Send>,
}

impl PingReceiver {
    pub fn new(
        histogram: Arc<Mutex<Histogram>>,
        flight: Arc<FlightTracker>,
        stats: Arc<ReceiveStats>,
        events: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            histogram,
            flight,
            echoes: EchoWindow::new(),
            stats,
            affinity_rcv: None,
            binder: Box::new(CoreAffinityBinder),
            events,
        }
    }

    /// Pin the receive thread to `cpu` when a stream begins
    pub fn with_affinity(mut self, cpu: Option<usize>, binder: Box<dyn CpuBinder>) -> Self {
        self.affinity_rcv = cpu;
        self.binder = binder;
        self
    }

    fn on_data(&mut self, payload: &[u8], received_ns: u64, retransmit: bool) {
        let header = match PerfHeader::decode(payload) {
            Ok(header) => header,
            Err(e) => {
                warn!(len = payload.len(), error = %e, "ignoring foreign message");
                return;
            }
        };

        let check = self
            .echoes
            .check(header.msg_num, self.flight.total_sent());
        if check != EchoCheck::Fresh {
            let ignored = self.stats.record_ignored_echo();
            if ignored.is_power_of_two() {
                warn!(
                    msg_num = header.msg_num,
                    reason = ?check,
                    ignored,
                    "ignoring echo that matches no outstanding message"
                );
            }
            return;
        }

        self.stats.record_message(retransmit);
        self.flight.confirm();

        if header.is_timestamped() {
            let recorded = self
                .histogram
                .lock()
                .record_interval(header.send_ts_ns, received_ns);
            if let Err(e) = recorded {
                self.stats.record_rejected_sample();
                warn!(msg_num = header.msg_num, error = %e, "rejected round-trip sample");
            }
        }
    }
}

impl MessageSink for PingReceiver {
    fn deliver(&mut self, event: ReceiveEvent<'_>) {
        match event {
            ReceiveEvent::BeginOfStream { source } => {
                if let Some(cpu) = self.affinity_rcv {
                    if let Err(e) = self.binder.bind_current_thread(cpu) {
                        error!(cpu, error = %e, "failed to bind receive thread");
                    }
                }
                self.stats.reset();
                if let Err(e) = report::write_begin_of_stream(&mut self.events, source) {
                    warn!(error = %e, "failed to report begin of stream");
                }
            }
            ReceiveEvent::Data {
                payload,
                metadata,
                retransmit,
            } => self.on_data(payload, metadata.received_ns, retransmit),
            ReceiveEvent::UnrecoverableLoss => self.stats.record_unrecoverable_loss(),
            ReceiveEvent::EndOfStream { source } => {
                let counts = self.stats.snapshot();
                if let Err(e) = report::write_end_of_stream(&mut self.events, source, &counts) {
                    warn!(error = %e, "failed to report end of stream");
                }
            }
        }
    }
}

/// Everything a ping run produced
#[derive(Debug, Clone)]
pub struct PingOutcome {
    pub metrics: SendMetrics,
    pub counts: ReceiveCounts,
    pub histogram: Histogram,
}

/// Run one ping session, writing the report to `out`.
///
/// Begin/end-of-stream lines are written to `events` from the receive thread.
pub fn run<W: Write>(
    config: &PingConfig,
    out: &mut W,
    events: Box<dyn Write + Send>,
) -> Result<PingOutcome> {
    config.param_line().write_to(out)?;
    out.flush()?;

    let clock = MonotonicClock::new();
    let histogram = Arc::new(Mutex::new(
        Histogram::from_spec(config.histogram).context("failed to create histogram")?,
    ));
    let flight = Arc::new(FlightTracker::new());
    let stats = Arc::new(ReceiveStats::new());

    if let Some(cpu) = config.affinity_src {
        CoreAffinityBinder
            .bind_current_thread(cpu)
            .with_context(|| format!("failed to bind send thread to cpu {cpu}"))?;
    }

    let sink = PingReceiver::new(
        Arc::clone(&histogram),
        Arc::clone(&flight),
        Arc::clone(&stats),
        events,
    )
    .with_affinity(config.affinity_rcv, Box::new(CoreAffinityBinder));

    let (mut sender, receiver) = open_transport(&config.transport, sink, clock)?;
    info!(transport = %config.transport, "ping transport ready");

    let mut scheduler: Box<dyn SendScheduler> = match config.send_delay {
        Some(delay) => Box::new(DelayPacer::new(
            clock,
            Arc::clone(&flight),
            config.msg_len,
            delay,
        )?),
        None => Box::new(Pacer::new(clock, Arc::clone(&flight), config.msg_len)?),
    };

    let mut warmup_loops = config.warmup.loops;
    if warmup_loops > 0 {
        debug!("sending priming message");
        scheduler.run(
            sender.as_mut(),
            SendPlan {
                count: 1,
                rate: crate::defaults::PRIMING_RATE,
                timestamp: false,
            },
        )?;
        warmup_loops -= 1;
    }
    std::thread::sleep(config.resolution_pause);

    if warmup_loops > 0 {
        debug!(loops = warmup_loops, rate = config.warmup.rate, "warming up");
        scheduler.run(
            sender.as_mut(),
            SendPlan {
                count: warmup_loops,
                rate: config.warmup.rate,
                timestamp: false,
            },
        )?;
    }

    histogram.lock().reset();
    let start_ns = clock.now_ns();
    let actual_sends = scheduler.run(
        sender.as_mut(),
        SendPlan {
            count: config.num_msgs,
            rate: config.rate,
            timestamp: true,
        },
    )?;
    let duration_ns = clock.now_ns().saturating_sub(start_ns);

    if !config.linger.is_zero() {
        std::thread::sleep(config.linger);
    }

    sender.close().context("failed to close transport")?;
    receiver
        .shutdown()
        .context("failed to stop receive thread")?;

    let counts = stats.snapshot();
    if counts.num_rcv_msgs == 0 {
        bail!("no messages received");
    }
    if counts.num_ignored_echoes > 0 {
        warn!(
            ignored = counts.num_ignored_echoes,
            "duplicate or unmatched echoes were ignored"
        );
    }
    if counts.num_rejected_samples > 0 {
        warn!(
            rejected = counts.num_rejected_samples,
            "negative round-trip samples were discarded"
        );
    }

    let metrics = SendMetrics::new(
        actual_sends,
        duration_ns,
        scheduler.max_tight_sends(),
        flight.max_outstanding(),
    );
    let histogram = histogram.lock().clone();

    report::write_histogram(out, &histogram)?;
    report::write_send_metrics(out, &metrics)?;
    report::write_receive_counts(out, &counts)?;
    out.flush()?;

    info!(
        rate = %crate::utils::format_message_rate(metrics.result_rate),
        duration = %crate::utils::format_duration_ns(duration_ns),
        "ping complete"
    );

    Ok(PingOutcome {
        metrics,
        counts,
        histogram,
    })
}

fn open_transport<S: MessageSink>(
    transport: &PingTransport,
    sink: S,
    clock: MonotonicClock,
) -> Result<(Box<dyn TransportSend>, ReceiverHandle)> {
    match transport {
        PingTransport::Udp(config) => {
            let (sender, receiver) = UdpTransport::open(config)
                .with_context(|| format!("failed to open udp transport on {}", config.bind))?
                .split()?;
            let handle = receiver.spawn(sink, clock)?;
            Ok((Box::new(sender), handle))
        }
        PingTransport::Loopback => {
            let (sender, handle) = loopback::reflector(sink, clock)?;
            Ok((Box::new(sender), handle))
        }
    }
}
