//! # Open-Loop Send Pacing
//!
//! The catch-up scheduler computes, from elapsed time and the target rate, how
//! many messages should have been sent by now and issues the missing ones in a
//! tight burst. It busy-polls the clock instead of sleeping: sleep primitives
//! wake with coarse, platform-dependent granularity, which would either cap the
//! achievable rate or inject scheduler jitter into the send times. The cost is
//! one fully busy core for the duration of the loop.
//!
//! Schedulers sit behind [`SendScheduler`] so a non-latency-critical variant
//! ([`DelayPacer`]) can replace the busy loop without touching measurement.
//!
//! Reference: <http://www.geeky-boy.com/catchup/html/>

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::clock::Clock;
use crate::error::ConfigError;
use crate::flight::FlightTracker;
use crate::message::{self, PerfHeader, FLAG_TIMESTAMP, HEADER_LEN};
use crate::transport::TransportSend;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Load profile for a single scheduler invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPlan {
    pub count: u64,
    /// Messages per second
    pub rate: u64,
    /// Stamp each message with its send time and flag it for recording
    pub timestamp: bool,
}

/// A send loop that drives a transport through one [`SendPlan`]
pub trait SendScheduler {
    /// Run the plan to completion and return the number of messages sent
    fn run(&mut self, sender: &mut dyn TransportSend, plan: SendPlan) -> Result<u64>;

    /// Largest catch-up burst issued during the most recent run
    fn max_tight_sends(&self) -> u64;
}

/// How many sends should have happened after `elapsed_ns`.
///
/// The `+ 1` sends first and then waits, which guarantees progress at
/// `elapsed_ns == 0`.
#[inline]
pub fn should_have_sent(elapsed_ns: u64, rate: u64, count: u64) -> u64 {
    let due = elapsed_ns as u128 * rate as u128 / NANOS_PER_SEC;
    u64::try_from(due)
        .unwrap_or(u64::MAX)
        .saturating_add(1)
        .min(count)
}

/// Busy-polling catch-up scheduler
pub struct Pacer<C: Clock> {
    clock: C,
    flight: Arc<FlightTracker>,
    buffer: Vec<u8>,
    max_tight_sends: u64,
}

impl<C: Clock> Pacer<C> {
    /// Create a pacer sending `msg_len`-byte messages
    pub fn new(clock: C, flight: Arc<FlightTracker>, msg_len: usize) -> Result<Self, ConfigError> {
        if msg_len < HEADER_LEN {
            return Err(ConfigError::MessageTooShort {
                len: msg_len,
                min: HEADER_LEN,
            });
        }
        Ok(Self {
            clock,
            flight,
            buffer: vec![0u8; msg_len],
            max_tight_sends: 0,
        })
    }

    pub fn flight(&self) -> &FlightTracker {
        &self.flight
    }
}

impl<C: Clock> SendScheduler for Pacer<C> {
    fn run(&mut self, sender: &mut dyn TransportSend, plan: SendPlan) -> Result<u64> {
        let flags = if plan.timestamp { FLAG_TIMESTAMP } else { 0 };
        let mut max_tight_sends = 0u64;
        let mut sent = 0u64;

        let start_ns = self.clock.now_ns();
        let mut now_ns = start_ns;

        while sent < plan.count {
            let elapsed_ns = now_ns.saturating_sub(start_ns);
            let due = should_have_sent(elapsed_ns, plan.rate, plan.count);
            max_tight_sends = max_tight_sends.max(due.saturating_sub(sent));

            while sent < due {
                PerfHeader {
                    msg_num: self.flight.next_msg_num(),
                    send_ts_ns: 0,
                    flags,
                }
                .encode_into(&mut self.buffer)?;
                self.flight.sent();
                if plan.timestamp {
                    message::stamp_send_ts(&mut self.buffer, self.clock.now_ns());
                }

                if let Err(e) = sender.send(&self.buffer) {
                    error!(
                        num_sent = sent,
                        max_tight_sends,
                        max_flight_size = self.flight.max_outstanding(),
                        "{} send failed",
                        sender.name()
                    );
                    return Err(e).context("transport send failed during paced loop");
                }
                sent += 1;
            }
            now_ns = self.clock.now_ns();
        }

        self.max_tight_sends = max_tight_sends;
        debug!(sent, max_tight_sends, rate = plan.rate, "paced loop complete");
        Ok(sent)
    }

    fn max_tight_sends(&self) -> u64 {
        self.max_tight_sends
    }
}

/// Fixed inter-send delay; for runs where pacing precision does not matter
pub struct DelayPacer<C: Clock> {
    clock: C,
    flight: Arc<FlightTracker>,
    buffer: Vec<u8>,
    delay: Duration,
    max_tight_sends: u64,
}

impl<C: Clock> DelayPacer<C> {
    pub fn new(
        clock: C,
        flight: Arc<FlightTracker>,
        msg_len: usize,
        delay: Duration,
    ) -> Result<Self, ConfigError> {
        if msg_len < HEADER_LEN {
            return Err(ConfigError::MessageTooShort {
                len: msg_len,
                min: HEADER_LEN,
            });
        }
        Ok(Self {
            clock,
            flight,
            buffer: vec![0u8; msg_len],
            delay,
            max_tight_sends: 0,
        })
    }
}

impl<C: Clock> SendScheduler for DelayPacer<C> {
    /// Sends one message per `delay`; the plan's rate is ignored
    fn run(&mut self, sender: &mut dyn TransportSend, plan: SendPlan) -> Result<u64> {
        let flags = if plan.timestamp { FLAG_TIMESTAMP } else { 0 };
        // One message per wakeup, so a burst is never more than one send.
        let max_tight_sends = plan.count.min(1);

        for sent in 0..plan.count {
            if sent > 0 {
                std::thread::sleep(self.delay);
            }
            PerfHeader {
                msg_num: self.flight.next_msg_num(),
                send_ts_ns: 0,
                flags,
            }
            .encode_into(&mut self.buffer)?;
            self.flight.sent();
            if plan.timestamp {
                message::stamp_send_ts(&mut self.buffer, self.clock.now_ns());
            }

            if let Err(e) = sender.send(&self.buffer) {
                error!(
                    num_sent = sent,
                    max_tight_sends,
                    max_flight_size = self.flight.max_outstanding(),
                    "{} send failed",
                    sender.name()
                );
                return Err(e).context("transport send failed during delayed loop");
            }
        }

        self.max_tight_sends = max_tight_sends;
        debug!(sent = plan.count, delay = ?self.delay, "delayed loop complete");
        Ok(plan.count)
    }

    fn max_tight_sends(&self) -> u64 {
        self.max_tight_sends
    }
}

/// Unpaced send loop used as the calibration workload.
///
/// Issues two sends per clock read until `duration` has elapsed and returns
/// the number of sends completed. Nothing is timestamped or recorded.
pub fn probe_throughput<C: Clock + ?Sized>(
    sender: &mut dyn TransportSend,
    clock: &C,
    payload: &[u8],
    duration: Duration,
) -> Result<u64> {
    let duration_ns = duration.as_nanos() as u64;
    let start_ns = clock.now_ns();
    let mut elapsed_ns = 0u64;
    let mut num_sends = 0u64;

    while elapsed_ns < duration_ns {
        sender.send(payload).context("probe send failed")?;
        sender.send(payload).context("probe send failed")?;
        num_sends += 2;
        elapsed_ns = clock.now_ns().saturating_sub(start_ns);
    }
    Ok(num_sends)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::error::TransportError;
    use std::io;
    use std::time::Instant;

    /// Records decoded headers; optionally fails on the nth send
    #[derive(Default)]
    struct RecordingSender {
        headers: Vec<PerfHeader>,
        fail_at: Option<usize>,
    }

    impl TransportSend for RecordingSender {
        fn send(&mut self, buf: &[u8]) -> Result<(), TransportError> {
            if self.fail_at == Some(self.headers.len()) {
                return Err(TransportError::Send(io::Error::new(
                    io::ErrorKind::Other,
                    "injected failure",
                )));
            }
            self.headers.push(PerfHeader::decode(buf).unwrap());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn pacer() -> Pacer<MonotonicClock> {
        Pacer::new(MonotonicClock::new(), Arc::new(FlightTracker::new()), 64).unwrap()
    }

    #[test]
    fn test_should_have_sent() {
        assert_eq!(should_have_sent(0, 1000, 1000), 1);
        assert_eq!(should_have_sent(999_999, 1000, 1000), 1);
        assert_eq!(should_have_sent(1_000_000, 1000, 1000), 2);
        assert_eq!(should_have_sent(10_000_000_000, 1000, 1000), 1000);
        assert_eq!(should_have_sent(u64::MAX, u64::MAX, 5), 5);
    }

    #[test]
    fn test_rejects_short_messages() {
        let result = Pacer::new(MonotonicClock::new(), Arc::new(FlightTracker::new()), 4);
        assert!(matches!(
            result,
            Err(ConfigError::MessageTooShort { len: 4, .. })
        ));
    }

    #[test]
    fn test_run_respects_rate() {
        let mut pacer = pacer();
        let mut sender = RecordingSender::default();

        let start = Instant::now();
        let sent = pacer
            .run(
                &mut sender,
                SendPlan {
                    count: 1000,
                    rate: 1000,
                    timestamp: true,
                },
            )
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(sent, 1000);
        assert!(
            elapsed >= Duration::from_millis(999),
            "finished in {:?}, faster than the rate allows",
            elapsed
        );
        assert!(pacer.max_tight_sends() >= 1);
        assert_eq!(pacer.flight().outstanding(), 1000);
    }

    #[test]
    fn test_messages_are_numbered_and_flagged() {
        let mut pacer = pacer();
        let mut sender = RecordingSender::default();

        pacer
            .run(
                &mut sender,
                SendPlan {
                    count: 50,
                    rate: 1_000_000,
                    timestamp: true,
                },
            )
            .unwrap();
        pacer
            .run(
                &mut sender,
                SendPlan {
                    count: 5,
                    rate: 1_000_000,
                    timestamp: false,
                },
            )
            .unwrap();

        let (stamped, plain) = sender.headers.split_at(50);
        for (i, header) in stamped.iter().enumerate() {
            assert_eq!(header.msg_num, i as u64);
            assert!(header.is_timestamped());
            assert!(header.send_ts_ns > 0);
        }
        for header in plain {
            assert!(!header.is_timestamped());
            assert_eq!(header.send_ts_ns, 0);
        }
        assert!(stamped.windows(2).all(|w| w[0].send_ts_ns <= w[1].send_ts_ns));
    }

    #[test]
    fn test_send_failure_aborts_loop() {
        let mut pacer = pacer();
        let mut sender = RecordingSender {
            fail_at: Some(3),
            ..Default::default()
        };

        let result = pacer.run(
            &mut sender,
            SendPlan {
                count: 10,
                rate: 1_000_000,
                timestamp: true,
            },
        );
        assert!(result.is_err());
        assert_eq!(sender.headers.len(), 3);
    }

    #[test]
    fn test_delay_pacer_spacing() {
        let flight = Arc::new(FlightTracker::new());
        let mut pacer = DelayPacer::new(
            MonotonicClock::new(),
            Arc::clone(&flight),
            32,
            Duration::from_millis(10),
        )
        .unwrap();
        let mut sender = RecordingSender::default();

        let start = Instant::now();
        let sent = pacer
            .run(
                &mut sender,
                SendPlan {
                    count: 5,
                    rate: 1,
                    timestamp: false,
                },
            )
            .unwrap();

        assert_eq!(sent, 5);
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(flight.outstanding(), 5);
        assert_eq!(pacer.max_tight_sends(), 1);
    }

    #[test]
    fn test_delay_pacer_tracks_runs() {
        let flight = Arc::new(FlightTracker::new());
        let mut pacer =
            DelayPacer::new(MonotonicClock::new(), Arc::clone(&flight), 32, Duration::ZERO)
                .unwrap();
        assert_eq!(pacer.max_tight_sends(), 0);

        let mut sender = RecordingSender {
            fail_at: Some(2),
            ..Default::default()
        };
        let result = pacer.run(
            &mut sender,
            SendPlan {
                count: 4,
                rate: 1,
                timestamp: true,
            },
        );
        assert!(result.is_err());
        assert_eq!(sender.headers.len(), 2);
        assert_eq!(pacer.max_tight_sends(), 0);
        assert_eq!(flight.outstanding(), 3);
    }

    #[test]
    fn test_message_numbers_continue_across_runs() {
        let mut pacer = pacer();
        let mut sender = RecordingSender::default();
        let plan = SendPlan {
            count: 3,
            rate: 1_000_000,
            timestamp: false,
        };

        pacer.run(&mut sender, plan).unwrap();
        pacer.run(&mut sender, plan).unwrap();

        let numbers: Vec<u64> = sender.headers.iter().map(|h| h.msg_num).collect();
        assert_eq!(numbers, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_probe_runs_for_duration() {
        let clock = MonotonicClock::new();
        let mut sender = RecordingSender::default();
        let payload = [0u8; HEADER_LEN];

        let start = Instant::now();
        let sends =
            probe_throughput(&mut sender, &clock, &payload, Duration::from_millis(20)).unwrap();

        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(sends >= 2);
        assert_eq!(sends % 2, 0);
        assert_eq!(sends as usize, sender.headers.len());
    }
}
