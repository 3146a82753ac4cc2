use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of the measured send loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMetrics {
    pub actual_sends: u64,
    pub duration_ns: u64,
    /// Achieved messages per second, not counting the first message
    pub result_rate: f64,
    pub max_tight_sends: u64,
    pub max_flight_size: i64,
}

impl SendMetrics {
    pub fn new(
        actual_sends: u64,
        duration_ns: u64,
        max_tight_sends: u64,
        max_flight_size: i64,
    ) -> Self {
        // The first send happens at t=0, so N sends span N-1 intervals.
        let result_rate = if duration_ns > 0 && actual_sends > 0 {
            (actual_sends - 1) as f64 / (duration_ns as f64 / 1_000_000_000.0)
        } else {
            0.0
        };

        Self {
            actual_sends,
            duration_ns,
            result_rate,
            max_tight_sends,
            max_flight_size,
        }
    }
}

/// Receive-side counters, shared between a sink and the driver that reports them
#[derive(Debug, Default)]
pub struct ReceiveStats {
    num_rcv_msgs: AtomicU64,
    num_rx_msgs: AtomicU64,
    num_unrec_loss: AtomicU64,
    num_rejected_samples: AtomicU64,
    num_ignored_echoes: AtomicU64,
}

/// Snapshot of [`ReceiveStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveCounts {
    pub num_rcv_msgs: u64,
    pub num_rx_msgs: u64,
    pub num_unrec_loss: u64,
    pub num_rejected_samples: u64,
    /// Duplicate, stale or unsent echoes left out of every other count
    #[serde(default)]
    pub num_ignored_echoes: u64,
}

impl ReceiveStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called at begin-of-stream
    pub fn reset(&self) {
        self.num_rcv_msgs.store(0, Ordering::Relaxed);
        self.num_rx_msgs.store(0, Ordering::Relaxed);
        self.num_unrec_loss.store(0, Ordering::Relaxed);
        self.num_rejected_samples.store(0, Ordering::Relaxed);
        self.num_ignored_echoes.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_message(&self, retransmit: bool) {
        self.num_rcv_msgs.fetch_add(1, Ordering::Relaxed);
        if retransmit {
            self.num_rx_msgs.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_unrecoverable_loss(&self) {
        self.num_unrec_loss.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_sample(&self) {
        self.num_rejected_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the running total, including this one
    pub fn record_ignored_echo(&self) -> u64 {
        self.num_ignored_echoes.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> ReceiveCounts {
        ReceiveCounts {
            num_rcv_msgs: self.num_rcv_msgs.load(Ordering::Relaxed),
            num_rx_msgs: self.num_rx_msgs.load(Ordering::Relaxed),
            num_unrec_loss: self.num_unrec_loss.load(Ordering::Relaxed),
            num_rejected_samples: self.num_rejected_samples.load(Ordering::Relaxed),
            num_ignored_echoes: self.num_ignored_echoes.load(Ordering::Relaxed),
        }
    }
}
