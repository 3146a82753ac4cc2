//! UDP datagram transport, unicast or multicast.
//!
//! One socket serves both directions: the sending half writes datagrams to a
//! fixed destination and a cloned handle feeds the receive thread. A
//! zero-length datagram marks end of stream. UDP has no recovery path, so
//! this transport never reports retransmissions or unrecoverable loss.

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

use super::{
    ArrivalMetadata, MessageSink, ReceiveEvent, ReceiverHandle, TransportSend,
    RECEIVE_POLL_INTERVAL,
};
use crate::clock::Clock;
use crate::error::TransportError;

/// Largest datagram the receive thread accepts
const MAX_DATAGRAM: usize = 65_536;

/// Socket configuration for one end of a UDP path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpConfig {
    /// Local address to bind (receive side)
    pub bind: SocketAddr,
    /// Where outgoing datagrams go; may be a multicast group
    pub dest: SocketAddr,
    /// Interface for multicast send and membership
    pub interface: Option<Ipv4Addr>,
    /// Multicast group to join for receiving
    pub join_group: Option<Ipv4Addr>,
    pub multicast_ttl: u32,
}

/// An opened, bound UDP socket
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    dest: SocketAddr,
}

impl UdpTransport {
    /// Create, configure and bind the socket
    pub fn open(config: &UdpConfig) -> Result<Self, TransportError> {
        let socket = Socket::new(
            Domain::for_address(config.bind),
            Type::DGRAM,
            Some(Protocol::UDP),
        )
        .map_err(TransportError::Setup)?;
        socket
            .set_reuse_address(true)
            .map_err(TransportError::Setup)?;

        let interface = config.interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
        if let IpAddr::V4(group) = config.dest.ip() {
            if group.is_multicast() {
                socket
                    .set_multicast_if_v4(&interface)
                    .map_err(TransportError::Setup)?;
                socket
                    .set_multicast_ttl_v4(config.multicast_ttl)
                    .map_err(TransportError::Setup)?;
            }
        }

        socket
            .bind(&config.bind.into())
            .map_err(TransportError::Setup)?;

        if let Some(group) = config.join_group {
            socket
                .join_multicast_v4(&group, &interface)
                .map_err(TransportError::Setup)?;
            debug!(%group, %interface, "joined multicast group");
        }

        debug!(bind = %config.bind, dest = %config.dest, "udp transport open");
        Ok(Self {
            socket: socket.into(),
            dest: config.dest,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket.local_addr().map_err(TransportError::Setup)
    }

    /// Split into a sending half and a receiving half sharing the socket
    pub fn split(self) -> Result<(UdpSender, UdpReceiver), TransportError> {
        let receive_socket = self.socket.try_clone().map_err(TransportError::Setup)?;
        Ok((
            UdpSender {
                socket: self.socket,
                dest: self.dest,
            },
            UdpReceiver {
                socket: receive_socket,
            },
        ))
    }

    /// Send-only use, e.g. the calibration probe
    pub fn into_sender(self) -> UdpSender {
        UdpSender {
            socket: self.socket,
            dest: self.dest,
        }
    }
}

/// Sending half of a UDP transport
#[derive(Debug)]
pub struct UdpSender {
    socket: UdpSocket,
    dest: SocketAddr,
}

impl TransportSend for UdpSender {
    #[inline]
    fn send(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.socket
            .send_to(buf, self.dest)
            .map(|_| ())
            .map_err(TransportError::Send)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.send(&[])
    }

    fn name(&self) -> &'static str {
        "udp"
    }
}

/// Receiving half of a UDP transport
#[derive(Debug)]
pub struct UdpReceiver {
    socket: UdpSocket,
}

impl UdpReceiver {
    /// Start the receive thread, delivering every event to `sink`
    pub fn spawn<S, C>(self, mut sink: S, clock: C) -> Result<ReceiverHandle, TransportError>
    where
        S: MessageSink,
        C: Clock + 'static,
    {
        self.socket
            .set_read_timeout(Some(RECEIVE_POLL_INTERVAL))
            .map_err(TransportError::Setup)?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let socket = self.socket;

        let thread = thread::Builder::new()
            .name("um-lat-udp-rcv".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; MAX_DATAGRAM];
                let mut in_stream = false;

                loop {
                    match socket.recv_from(&mut buf) {
                        Ok((0, source)) => {
                            if in_stream {
                                sink.deliver(ReceiveEvent::EndOfStream {
                                    source: Some(source),
                                });
                                in_stream = false;
                            }
                        }
                        Ok((len, source)) => {
                            let received_ns = clock.now_ns();
                            if !in_stream {
                                sink.deliver(ReceiveEvent::BeginOfStream {
                                    source: Some(source),
                                });
                                in_stream = true;
                            }
                            sink.deliver(ReceiveEvent::Data {
                                payload: &buf[..len],
                                metadata: ArrivalMetadata {
                                    received_ns,
                                    source: Some(source),
                                },
                                retransmit: false,
                            });
                        }
                        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                            if thread_stop.load(Ordering::Acquire) {
                                break;
                            }
                        }
                        Err(e) if e.kind() == ErrorKind::Interrupted => {}
                        Err(e) => {
                            warn!(error = %e, "udp receive failed");
                            if thread_stop.load(Ordering::Acquire) {
                                break;
                            }
                        }
                    }
                }
                debug!("udp receive thread exiting");
            })
            .map_err(TransportError::Setup)?;

        Ok(ReceiverHandle::new(stop, thread))
    }
}
