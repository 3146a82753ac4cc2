//! # Echo Reflector (pong)
//!
//! Every data message received is sent back unchanged to a fixed destination,
//! from the transport's receive thread, so the pinger's send timestamp makes
//! the full round trip. The reflector does not inspect payloads and does not
//! track flight size.
//!
//! The receive thread reports to the main thread over a channel: a failed echo
//! is fatal, and with `-E` the end of the pinger's stream ends the process.

use anyhow::{bail, Context, Result};
use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::affinity::{CoreAffinityBinder, CpuBinder};
use crate::cli::PongArgs;
use crate::clock::MonotonicClock;
use crate::metrics::ReceiveStats;
use crate::report::{self, ParamLine};
use crate::transport::{MessageSink, ReceiveEvent, TransportSend, UdpConfig, UdpTransport};

/// Notifications from the reflector to the thread that owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PongEvent {
    EndOfStream { source: Option<SocketAddr> },
    SendFailed { error: String },
}

/// Validated settings for `um-lat pong`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongConfig {
    pub transport: UdpConfig,
    pub affinity_rcv: Option<usize>,
    pub exit_on_eos: bool,
}

impl PongConfig {
    pub fn from_args(args: &PongArgs) -> Result<Self> {
        if let Some(cpu) = args.affinity_rcv {
            crate::utils::validate_cpu(cpu)?;
        }
        Ok(Self {
            transport: UdpConfig {
                bind: args.bind,
                dest: args.dest,
                interface: args.interface,
                join_group: args.join,
                multicast_ttl: crate::defaults::MULTICAST_TTL,
            },
            affinity_rcv: args.affinity_rcv,
            exit_on_eos: args.exit_on_eos,
        })
    }

    pub fn param_line(&self) -> ParamLine {
        ParamLine::new()
            .field(
                "o_affinity_rcv",
                self.affinity_rcv.map_or(-1, |cpu| cpu as i64),
            )
            .field("o_exit_on_eos", u8::from(self.exit_on_eos))
            .field("o_bind", self.transport.bind)
            .field("o_dest", self.transport.dest)
    }
}

/// Receive handler that echoes each data message through `sender`
pub struct PongReflector<T: TransportSend> {
    sender: T,
    stats: Arc<ReceiveStats>,
    notify: Sender<PongEvent>,
    exit_on_eos: bool,
    affinity_rcv: Option<usize>,
    binder: Box<dyn CpuBinder>,
    events: Box<dyn Write + Send>,
    failed: bool,
}

impl<T: TransportSend + 'static> PongReflector<T> {
    pub fn new(
        sender: T,
        stats: Arc<ReceiveStats>,
        notify: Sender<PongEvent>,
        events: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            sender,
            stats,
            notify,
            exit_on_eos: false,
            affinity_rcv: None,
            binder: Box::new(CoreAffinityBinder),
            events,
            failed: false,
        }
    }

    pub fn exit_on_eos(mut self, exit: bool) -> Self {
        self.exit_on_eos = exit;
        self
    }

    pub fn with_affinity(mut self, cpu: Option<usize>, binder: Box<dyn CpuBinder>) -> Self {
        self.affinity_rcv = cpu;
        self.binder = binder;
        self
    }

    fn notify(&self, event: PongEvent) {
        if let Err(e) = self.notify.send(event) {
            warn!(event = ?e.into_inner(), "nobody is waiting for reflector events");
        }
    }
}

impl<T: TransportSend + 'static> MessageSink for PongReflector<T> {
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
                retransmit,
                ..
            } => {
                self.stats.record_message(retransmit);
                if self.failed {
                    return;
                }
                if let Err(e) = self.sender.send(payload) {
                    error!(
                        num_rcv_msgs = self.stats.snapshot().num_rcv_msgs,
                        error = %e,
                        "echo send failed"
                    );
                    self.failed = true;
                    self.notify(PongEvent::SendFailed {
                        error: e.to_string(),
                    });
                }
            }
            ReceiveEvent::UnrecoverableLoss => self.stats.record_unrecoverable_loss(),
            ReceiveEvent::EndOfStream { source } => {
                let counts = self.stats.snapshot();
                if let Err(e) = report::write_end_of_stream(&mut self.events, source, &counts) {
                    warn!(error = %e, "failed to report end of stream");
                }
                if self.exit_on_eos {
                    self.notify(PongEvent::EndOfStream { source });
                }
            }
        }
    }
}

/// Wait for the reflector to report a fatal failure or the end of stream
pub fn wait_for_exit(events: &Receiver<PongEvent>) -> Result<()> {
    match events.recv() {
        Ok(PongEvent::EndOfStream { source }) => {
            info!(source = ?source, "stream ended, exiting");
            Ok(())
        }
        Ok(PongEvent::SendFailed { error }) => bail!("echo send failed: {error}"),
        Err(_) => bail!("reflector stopped unexpectedly"),
    }
}

/// Run the reflector until the stream ends (with `-E`) or an echo fails
pub fn run<W: Write>(
    config: &PongConfig,
    out: &mut W,
    events: Box<dyn Write + Send>,
) -> Result<()> {
    config.param_line().write_to(out)?;
    out.flush()?;

    let (sender, receiver) = UdpTransport::open(&config.transport)
        .with_context(|| format!("failed to open udp transport on {}", config.transport.bind))?
        .split()?;

    let (notify_tx, notify_rx) = channel::unbounded();
    let reflector = PongReflector::new(sender, Arc::new(ReceiveStats::new()), notify_tx, events)
        .exit_on_eos(config.exit_on_eos)
        .with_affinity(config.affinity_rcv, Box::new(CoreAffinityBinder));

    let handle = receiver.spawn(reflector, MonotonicClock::new())?;
    info!(
        bind = %config.transport.bind,
        dest = %config.transport.dest,
        "pong reflecting"
    );

    let result = wait_for_exit(&notify_rx);
    handle.shutdown().context("failed to stop receive thread")?;
    result
}
