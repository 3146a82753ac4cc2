//! # Flight Size Tracking
//!
//! Counts messages handed to the transport that have not yet been confirmed
//! as delivered. The sending thread increments; the transport's receive
//! thread decrements. A negative count means the send/confirm bookkeeping has
//! desynchronised and nothing measured afterwards can be trusted, so it is
//! treated as a fatal assertion.
//!
//! Message numbers are allocated here too, so they are unique for the whole
//! session. [`EchoWindow`] uses that to confirm each number at most once:
//! duplicated datagrams, a second reflector answering the same send, or a
//! stray packet never reach [`FlightTracker::confirm`].

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct FlightTracker {
    outstanding: AtomicI64,
    max_outstanding: AtomicI64,
    total_sent: AtomicU64,
}

impl FlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number for the next message to be sent
    #[inline]
    pub fn next_msg_num(&self) -> u64 {
        self.total_sent.load(Ordering::Relaxed)
    }

    /// Account for one message about to be handed to the transport.
    ///
    /// Must be called before the send so that a confirmation racing back on
    /// the receive thread can never observe a count that excludes it.
    #[inline]
    pub fn sent(&self) -> i64 {
        self.total_sent.fetch_add(1, Ordering::Release);
        let current = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_outstanding.fetch_max(current, Ordering::Relaxed);
        current
    }

    /// Account for one delivery confirmation.
    ///
    /// # Panics
    ///
    /// Panics if the count drops below zero.
    #[inline]
    pub fn confirm(&self) -> i64 {
        let current = self.outstanding.fetch_sub(1, Ordering::AcqRel) - 1;
        assert!(
            current >= 0,
            "flight size went negative ({current}): send/confirm accounting is out of sync"
        );
        current
    }

    pub fn outstanding(&self) -> i64 {
        self.outstanding.load(Ordering::Acquire)
    }

    /// High-water mark of the outstanding count
    pub fn max_outstanding(&self) -> i64 {
        self.max_outstanding.load(Ordering::Relaxed)
    }

    /// Messages handed to the transport so far
    pub fn total_sent(&self) -> u64 {
        self.total_sent.load(Ordering::Acquire)
    }
}

/// Outcome of checking an echoed message number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoCheck {
    /// First echo of a sent message; confirm it
    Fresh,
    /// Already confirmed
    Duplicate,
    /// Too far behind the newest echo to tell; treated as seen
    Stale,
    /// Never sent by this session
    Unsent,
}

/// Echoes tracked below the newest message number
pub const ECHO_WINDOW: u64 = 4096;

const WINDOW_WORDS: usize = (ECHO_WINDOW / 64) as usize;

/// Sliding bitmap of confirmed message numbers
#[derive(Debug, Clone)]
pub struct EchoWindow {
    newest: Option<u64>,
    seen: [u64; WINDOW_WORDS],
}

impl Default for EchoWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoWindow {
    pub fn new() -> Self {
        Self {
            newest: None,
            seen: [0; WINDOW_WORDS],
        }
    }

    /// Classify `msg_num`, marking it seen when fresh.
    ///
    /// `total_sent` is the number of messages sent so far; anything at or
    /// above it cannot be an echo of ours.
    pub fn check(&mut self, msg_num: u64, total_sent: u64) -> EchoCheck {
        if msg_num >= total_sent {
            return EchoCheck::Unsent;
        }

        match self.newest {
            Some(newest) if msg_num <= newest => {
                if newest - msg_num >= ECHO_WINDOW {
                    return EchoCheck::Stale;
                }
                if self.is_set(msg_num) {
                    return EchoCheck::Duplicate;
                }
            }
            Some(newest) => {
                if msg_num - newest >= ECHO_WINDOW {
                    self.seen = [0; WINDOW_WORDS];
                } else {
                    for skipped in newest + 1..msg_num {
                        self.clear(skipped);
                    }
                }
                self.clear(msg_num);
                self.newest = Some(msg_num);
            }
            None => self.newest = Some(msg_num),
        }

        self.set(msg_num);
        EchoCheck::Fresh
    }

    #[inline]
    fn slot(msg_num: u64) -> (usize, u64) {
        let bit = msg_num % ECHO_WINDOW;
        ((bit / 64) as usize, 1 << (bit % 64))
    }

    fn is_set(&self, msg_num: u64) -> bool {
        let (word, mask) = Self::slot(msg_num);
        self.seen[word] & mask != 0
    }

    fn set(&mut self, msg_num: u64) {
        let (word, mask) = Self::slot(msg_num);
        self.seen[word] |= mask;
    }

    fn clear(&mut self, msg_num: u64) {
        let (word, mask) = Self::slot(msg_num);
        self.seen[word] &= !mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_send_confirm_balance() {
        let flight = FlightTracker::new();
        assert_eq!(flight.sent(), 1);
        assert_eq!(flight.sent(), 2);
        assert_eq!(flight.confirm(), 1);
        assert_eq!(flight.sent(), 2);
        assert_eq!(flight.confirm(), 1);
        assert_eq!(flight.confirm(), 0);
        assert_eq!(flight.max_outstanding(), 2);
    }

    #[test]
    #[should_panic(expected = "flight size went negative")]
    fn test_unmatched_confirm_is_fatal() {
        let flight = FlightTracker::new();
        flight.confirm();
    }

    #[test]
    fn test_message_numbers_span_runs() {
        let flight = FlightTracker::new();
        assert_eq!(flight.next_msg_num(), 0);
        flight.sent();
        flight.sent();
        assert_eq!(flight.next_msg_num(), 2);
        assert_eq!(flight.total_sent(), 2);
        flight.confirm();
        assert_eq!(flight.next_msg_num(), 2);
    }

    #[test]
    fn test_echo_window_confirms_each_number_once() {
        let mut window = EchoWindow::new();
        assert_eq!(window.check(0, 3), EchoCheck::Fresh);
        assert_eq!(window.check(0, 3), EchoCheck::Duplicate);
        assert_eq!(window.check(2, 3), EchoCheck::Fresh);
        assert_eq!(window.check(1, 3), EchoCheck::Fresh);
        assert_eq!(window.check(1, 3), EchoCheck::Duplicate);
        assert_eq!(window.check(3, 3), EchoCheck::Unsent);
    }

    #[test]
    fn test_echo_window_slides() {
        let mut window = EchoWindow::new();
        let total = 3 * ECHO_WINDOW;
        assert_eq!(window.check(5, total), EchoCheck::Fresh);
        assert_eq!(window.check(5 + ECHO_WINDOW, total), EchoCheck::Fresh);
        // Same bitmap slot as 5, but a different message.
        assert_eq!(window.check(5 + ECHO_WINDOW - 1, total), EchoCheck::Fresh);
        assert_eq!(window.check(5, total), EchoCheck::Stale);
        assert_eq!(window.check(5 + ECHO_WINDOW, total), EchoCheck::Duplicate);

        assert_eq!(window.check(3 * ECHO_WINDOW - 1, total), EchoCheck::Fresh);
        assert_eq!(window.check(2 * ECHO_WINDOW, total), EchoCheck::Fresh);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// The sender increments before publishing each message; a second
        /// thread confirms every message it sees. Yields at random points
        /// vary the interleaving between the two threads.
        #[test]
        fn interleaved_sends_and_confirms_end_at_zero(
            schedule in prop::collection::vec((any::<bool>(), any::<bool>()), 1..400),
        ) {
            let flight = Arc::new(FlightTracker::new());
            let (tx, rx) = channel::unbounded::<bool>();
            let n = schedule.len();

            let confirmer = {
                let flight = Arc::clone(&flight);
                thread::spawn(move || {
                    let mut lowest = i64::MAX;
                    for yield_now in rx.iter() {
                        if yield_now {
                            thread::yield_now();
                        }
                        lowest = lowest.min(flight.confirm());
                    }
                    lowest
                })
            };

            for &(sender_yield, confirmer_yield) in &schedule {
                flight.sent();
                if sender_yield {
                    thread::yield_now();
                }
                tx.send(confirmer_yield).unwrap();
            }
            drop(tx);

            let lowest = confirmer.join().unwrap();
            prop_assert!(lowest >= 0);
            prop_assert_eq!(flight.outstanding(), 0);
            prop_assert!(flight.max_outstanding() >= 1);
            prop_assert!(flight.max_outstanding() <= n as i64);
        }
    }

    proptest! {
        /// Whatever order and repetition echoes arrive in, each sent number
        /// is confirmed at most once and unsent numbers never are.
        #[test]
        fn echo_window_never_confirms_twice(
            echoes in prop::collection::vec(0u64..300, 0..600),
        ) {
            let total_sent = 250;
            let mut window = EchoWindow::new();
            let mut confirmed = std::collections::HashSet::new();
            for msg_num in echoes {
                if window.check(msg_num, total_sent) == EchoCheck::Fresh {
                    prop_assert!(msg_num < total_sent);
                    prop_assert!(confirmed.insert(msg_num));
                }
            }
        }
    }
}
