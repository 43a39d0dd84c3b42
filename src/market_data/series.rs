use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// One accepted data point: the close of a finished kline or a single trade,
/// depending on the configured feed source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Exchange timestamp in milliseconds (kline open time or trade time).
    pub timestamp: i64,
    pub price: f64,
    pub volume: f64,
}

/// Rejection returned by [`BoundedSeries::append`] when a sample would move
/// backwards in time. The series is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("out-of-order sample: timestamp {incoming} precedes last stored {last}")]
pub struct OutOfOrderSample {
    pub incoming: i64,
    pub last: i64,
}

// ---------------------------------------------------------------------------
// BoundedSeries -- fixed-capacity FIFO window of accepted samples
// ---------------------------------------------------------------------------

/// Fixed-capacity FIFO window over the most recent samples.
///
/// Appending past capacity evicts exactly the single oldest entry, and
/// timestamps must never decrease. There is no interior locking: exactly one
/// feed session holds `&mut` access at a time, on loan from the supervisor
/// that owns the series across reconnects.
#[derive(Debug)]
pub struct BoundedSeries {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl BoundedSeries {
    /// Create an empty series that retains at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a sample at the newest end.
    ///
    /// Fails (leaving the series untouched) when `sample.timestamp` is
    /// strictly less than the last stored timestamp. Equal timestamps are
    /// accepted: trade ticks legitimately share a millisecond.
    pub fn append(&mut self, sample: Sample) -> Result<(), OutOfOrderSample> {
        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                return Err(OutOfOrderSample {
                    incoming: sample.timestamp,
                    last: last.timestamp,
                });
            }
        }

        self.samples.push_back(sample);
        // Trim oldest to stay within budget.
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        Ok(())
    }

    /// Immutable ordered view over the current window, for indicator
    /// computation. Nothing can be mutated through it.
    pub fn snapshot(&self) -> SeriesSnapshot<'_> {
        SeriesSnapshot {
            samples: &self.samples,
        }
    }

    /// Return the most recent `n` samples (oldest-first order), or all of
    /// them when fewer than `n` are stored.
    pub fn latest(&self, n: usize) -> Vec<Sample> {
        let start = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(start).copied().collect()
    }

    /// Most recently accepted sample, if any.
    pub fn last(&self) -> Option<Sample> {
        self.samples.back().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// SeriesSnapshot -- read-only borrow of the window
// ---------------------------------------------------------------------------

/// Read-only, ordered view of a [`BoundedSeries`] window.
#[derive(Debug, Clone, Copy)]
pub struct SeriesSnapshot<'a> {
    samples: &'a VecDeque<Sample>,
}

impl<'a> SeriesSnapshot<'a> {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Sample> + 'a {
        self.samples.iter()
    }

    pub fn last(&self) -> Option<Sample> {
        self.samples.back().copied()
    }

    /// Close prices in oldest-first order, materialized for the window math.
    pub fn closes(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.price).collect()
    }

    /// Volumes in oldest-first order, aligned with [`closes`](Self::closes).
    pub fn volumes(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.volume).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
