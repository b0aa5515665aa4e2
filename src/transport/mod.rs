//! Thin I/O adapters feeding decoded records into the distributor.
//!
//! Each adapter owns its resource, stops at the next wait once its
//! cancellation token fires, and drops the resource on the way out.
//! Decode failures are logged and counted and never stop an adapter.

#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod serial;
pub mod udp;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bus::Publish;
use crate::codec::{CodecError, DecodeStats, Record, Transport};
use crate::metrics::Metrics;

/// Shared decode accounting for all adapters.
#[derive(Clone)]
pub struct IngestCounters {
    stats: Arc<DecodeStats>,
    metrics: Option<Arc<Metrics>>,
}

impl IngestCounters {
    /// Counters backed by `stats` only.
    pub fn new(stats: Arc<DecodeStats>) -> Self {
        Self {
            stats,
            metrics: None,
        }
    }

    /// Also record into the Prometheus metrics.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn accepted(&self, transport: Transport) {
        self.stats.accepted(transport);
        if let Some(ref m) = self.metrics {
            m.decoded(transport);
        }
    }

    pub fn rejected(&self, transport: Transport, err: Option<&CodecError>) {
        self.stats.rejected(transport);
        if let Some(ref m) = self.metrics {
            m.decode_failed(transport, err);
        }
    }
}

impl Default for IngestCounters {
    fn default() -> Self {
        Self::new(Arc::new(DecodeStats::new()))
    }
}

/// Emit a decoded binary input or log and count its rejection.
/// Returns whether a record was emitted.
pub(crate) fn forward(
    transport: Transport,
    decoded: Result<Record, CodecError>,
    bus: &impl Publish,
    counters: &IngestCounters,
) -> bool {
    match decoded {
        Ok(record) => {
            debug!(transport = %transport, record = %record, "decoded record");
            counters.accepted(transport);
            bus.emit(record);
            true
        }
        Err(e) => {
            warn!(transport = %transport, error = %e, "rejected input");
            counters.rejected(transport, Some(&e));
            false
        }
    }
}
