use std::sync::atomic::{AtomicU64, Ordering};

use super::record::{Transport, TRANSPORT_CARDINALITY};

/// Accepted and rejected input counts for one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeCounts {
    pub accepted: u64,
    pub rejected: u64,
}

/// Lock-free per-Transport decode counters.
///
/// `snapshot()` atomically reads and resets all counters, making it
/// suitable for periodic reporting without contention.
pub struct DecodeStats {
    accepted: [AtomicU64; TRANSPORT_CARDINALITY],
    rejected: [AtomicU64; TRANSPORT_CARDINALITY],
}

impl DecodeStats {
    /// Create a new zeroed DecodeStats.
    pub fn new() -> Self {
        Self {
            accepted: std::array::from_fn(|_| AtomicU64::new(0)),
            rejected: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Count one successfully decoded input.
    pub fn accepted(&self, t: Transport) {
        self.accepted[t as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Count one rejected input.
    pub fn rejected(&self, t: Transport) {
        self.rejected[t as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically read and reset all counters, returning only transports
    /// that saw traffic since the last snapshot.
    pub fn snapshot(&self) -> Vec<(Transport, DecodeCounts)> {
        let mut result = Vec::new();

        for t in Transport::ALL {
            let counts = DecodeCounts {
                accepted: self.accepted[t as usize].swap(0, Ordering::Relaxed),
                rejected: self.rejected[t as usize].swap(0, Ordering::Relaxed),
            };
            if counts != DecodeCounts::default() {
                result.push((t, counts));
            }
        }

        result
    }
}

impl Default for DecodeStats {
    fn default() -> Self {
        Self::new()
    }
}
