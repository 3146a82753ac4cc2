//! # Transport Capabilities
//!
//! The measurement engine depends on two narrow capabilities only:
//!
//! - [`TransportSend`]: hand an opaque buffer to the transport, synchronously
//!   and with bounded latency. Any failure is fatal to the caller.
//! - [`MessageSink`]: receive events, invoked from a thread the transport owns.
//!
//! Two implementations are provided so the tools run end to end: a UDP
//! datagram transport (unicast or multicast) and an in-process loopback that
//! reflects every buffer straight back to the sink.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

use crate::error::TransportError;

pub mod loopback;
pub mod udp;

pub use loopback::LoopbackSender;
pub use udp::{UdpConfig, UdpReceiver, UdpSender, UdpTransport};

/// How often an idle receive thread checks for shutdown
pub(crate) const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outgoing half of a transport
pub trait TransportSend: Send {
    /// Hand one buffer to the transport
    fn send(&mut self, buf: &[u8]) -> Result<(), TransportError>;

    /// Signal end of stream to the receiving side
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Transport name for logs
    fn name(&self) -> &'static str;
}

impl<T: TransportSend + ?Sized> TransportSend for Box<T> {
    fn send(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        (**self).send(buf)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Per-message metadata captured by the transport on arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrivalMetadata {
    /// Clock reading taken as soon as the buffer was handed over
    pub received_ns: u64,
    pub source: Option<SocketAddr>,
}

/// Events a transport delivers to its sink
#[derive(Debug)]
pub enum ReceiveEvent<'a> {
    /// First message from a new stream
    BeginOfStream { source: Option<SocketAddr> },
    Data {
        payload: &'a [u8],
        metadata: ArrivalMetadata,
        /// Delivered by a recovery path rather than the original send
        retransmit: bool,
    },
    /// The transport gave up on one or more messages
    UnrecoverableLoss,
    EndOfStream { source: Option<SocketAddr> },
}

/// Receiver of transport events; runs on the transport's thread
pub trait MessageSink: Send + 'static {
    fn deliver(&mut self, event: ReceiveEvent<'_>);
}

/// Handle on a transport's receive thread
pub struct ReceiverHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReceiverHandle {
    pub(crate) fn new(stop: Arc<AtomicBool>, thread: JoinHandle<()>) -> Self {
        Self {
            stop,
            thread: Some(thread),
        }
    }

    /// Stop the receive thread once it has drained what is already queued
    pub fn shutdown(mut self) -> Result<(), TransportError> {
        self.stop.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| TransportError::ReceiverPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for ReceiverHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                debug!("receive thread panicked during drop");
            }
        }
    }
}
