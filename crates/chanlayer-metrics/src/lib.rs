//! Counters for the chanlayer stack.
//!
//! [`Counter`] is a relaxed atomic tally. [`DropMeter`] pairs two of them to
//! track a bounded queue: how many items got in, how many were turned away.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A monotonically increasing counter backed by [`AtomicU64`].
///
/// Relaxed ordering: values are statistics, not synchronization.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Counter").field(&self.get()).finish()
    }
}

impl Serialize for Counter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

/// Accepted/dropped tally for one bounded queue.
#[derive(Debug, Default, Serialize)]
pub struct DropMeter {
    accepted: Counter,
    dropped: Counter,
}

impl DropMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one push attempt.
    pub fn record(&self, accepted: bool) {
        if accepted {
            self.accepted.inc();
        } else {
            self.dropped.inc();
        }
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.get()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }

    /// Point-in-time copy of both counters.
    pub fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot {
            accepted: self.accepted(),
            dropped: self.dropped(),
        }
    }
}

/// Plain-value view of a [`DropMeter`], cheap to clone and compare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterSnapshot {
    pub accepted: u64,
    pub dropped: u64,
}

impl MeterSnapshot {
    /// Total push attempts.
    pub fn attempts(&self) -> u64 {
        self.accepted + self.dropped
    }

    /// Fraction of attempts that were dropped, 0.0 when nothing was attempted.
    pub fn drop_ratio(&self) -> f64 {
        match self.attempts() {
            0 => 0.0,
            n => self.dropped as f64 / n as f64,
        }
    }
}
