//! In-process reflector: every buffer sent is delivered straight back to the
//! sink on a dedicated thread, as if an ideal echo peer sat on the other end.
//!
//! Used by `ping --loopback` to measure the engine's own overhead and by the
//! test suite to exercise the full send/receive path without sockets.

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::debug;

use super::{
    ArrivalMetadata, MessageSink, ReceiveEvent, ReceiverHandle, TransportSend,
    RECEIVE_POLL_INTERVAL,
};
use crate::clock::Clock;
use crate::error::TransportError;

/// Sending half of the loopback reflector
#[derive(Debug)]
pub struct LoopbackSender {
    tx: Option<Sender<Vec<u8>>>,
}

impl TransportSend for LoopbackSender {
    fn send(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.tx
            .as_ref()
            .ok_or(TransportError::Disconnected)?
            .send(buf.to_vec())
            .map_err(|_| TransportError::Disconnected)
    }

    /// Dropping the channel ends the stream once queued buffers are delivered
    fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

/// Start a reflector thread feeding `sink`
pub fn reflector<S, C>(mut sink: S, clock: C) -> Result<(LoopbackSender, ReceiverHandle), TransportError>
where
    S: MessageSink,
    C: Clock + 'static,
{
    let (tx, rx) = channel::unbounded::<Vec<u8>>();
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);

    let thread = thread::Builder::new()
        .name("um-lat-loopback".to_string())
        .spawn(move || {
            let mut in_stream = false;
            loop {
                match rx.recv_timeout(RECEIVE_POLL_INTERVAL) {
                    Ok(buf) => {
                        let received_ns = clock.now_ns();
                        if !in_stream {
                            sink.deliver(ReceiveEvent::BeginOfStream { source: None });
                            in_stream = true;
                        }
                        sink.deliver(ReceiveEvent::Data {
                            payload: &buf,
                            metadata: ArrivalMetadata {
                                received_ns,
                                source: None,
                            },
                            retransmit: false,
                        });
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if thread_stop.load(Ordering::Acquire) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        if in_stream {
                            sink.deliver(ReceiveEvent::EndOfStream { source: None });
                        }
                        break;
                    }
                }
            }
            debug!("loopback reflector exiting");
        })
        .map_err(TransportError::Setup)?;

    Ok((LoopbackSender { tx: Some(tx) }, ReceiverHandle::new(stop, thread)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use std::sync::atomic::AtomicU64;

    #[derive(Default)]
    struct Counts {
        begins: AtomicU64,
        data: AtomicU64,
        ends: AtomicU64,
    }

    struct CountingSink(Arc<Counts>);

    impl MessageSink for CountingSink {
        fn deliver(&mut self, event: ReceiveEvent<'_>) {
            let counter = match event {
                ReceiveEvent::BeginOfStream { .. } => &self.0.begins,
                ReceiveEvent::Data { .. } => &self.0.data,
                ReceiveEvent::EndOfStream { .. } => &self.0.ends,
                ReceiveEvent::UnrecoverableLoss => return,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_close_drains_then_ends_stream() {
        let counts = Arc::new(Counts::default());
        let (mut sender, handle) =
            reflector(CountingSink(Arc::clone(&counts)), MonotonicClock::new()).unwrap();

        for _ in 0..100 {
            sender.send(&[0u8; 32]).unwrap();
        }
        sender.close().unwrap();
        handle.shutdown().unwrap();

        assert_eq!(counts.begins.load(Ordering::Relaxed), 1);
        assert_eq!(counts.data.load(Ordering::Relaxed), 100);
        assert_eq!(counts.ends.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_send_after_close_is_disconnected() {
        let counts = Arc::new(Counts::default());
        let (mut sender, _handle) =
            reflector(CountingSink(counts), MonotonicClock::new()).unwrap();
        sender.close().unwrap();
        assert!(matches!(
            sender.send(b"late"),
            Err(TransportError::Disconnected)
        ));
    }
}
