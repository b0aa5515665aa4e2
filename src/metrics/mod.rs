use anyhow::{Context, Result};
use prometheus::{Counter, CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

use crate::bus::BusEvent;
use crate::codec::{CodecError, Transport};
use crate::stats::Metric;

const NAMESPACE: &str = "sensorhub";

/// Prometheus metrics for the collector.
///
/// Owns its own [`Registry`] rather than the process-global default, and is
/// passed down explicitly to the components that record into it.
pub struct Metrics {
    registry: Registry,

    // === Ingest ===
    /// Inputs decoded into a record, by transport.
    pub records_decoded: CounterVec,
    /// Inputs rejected by a decoder, by transport and error_type.
    pub decode_errors: CounterVec,

    // === Distribution ===
    /// Records handed to the distributor.
    pub records_emitted: Counter,
    /// Per-subscriber deliveries missed because the inbox was full.
    pub deliveries_dropped: Counter,
    /// Current distributor members.
    pub subscribers: Gauge,

    // === Statistics ===
    /// Day buckets removed by retention eviction.
    pub buckets_evicted: Counter,
    /// Day buckets currently held, by metric.
    pub tracked_days: GaugeVec,

    // === Web ===
    /// Connected server-sent event clients.
    pub sse_clients: Gauge,
}

impl Metrics {
    /// Creates a new metrics instance with all metrics registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let records_decoded = CounterVec::new(
            Opts::new("records_decoded_total", "Inputs decoded into a record.")
                .namespace(NAMESPACE),
            &["transport"],
        )?;
        let decode_errors = CounterVec::new(
            Opts::new("decode_errors_total", "Inputs rejected by a decoder.")
                .namespace(NAMESPACE),
            &["transport", "error_type"],
        )?;
        let records_emitted = Counter::with_opts(
            Opts::new(
                "records_emitted_total",
                "Records handed to the distributor.",
            )
            .namespace(NAMESPACE),
        )?;
        let deliveries_dropped = Counter::with_opts(
            Opts::new(
                "deliveries_dropped_total",
                "Per-subscriber deliveries missed because the inbox was full.",
            )
            .namespace(NAMESPACE),
        )?;
        let subscribers = Gauge::with_opts(
            Opts::new("subscribers", "Current distributor members.").namespace(NAMESPACE),
        )?;
        let buckets_evicted = Counter::with_opts(
            Opts::new(
                "buckets_evicted_total",
                "Day buckets removed by retention eviction.",
            )
            .namespace(NAMESPACE),
        )?;
        let tracked_days = GaugeVec::new(
            Opts::new("tracked_days", "Day buckets currently held.").namespace(NAMESPACE),
            &["metric"],
        )?;
        let sse_clients = Gauge::with_opts(
            Opts::new("sse_clients", "Connected server-sent event clients.")
                .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(records_decoded.clone()))?;
        registry.register(Box::new(decode_errors.clone()))?;
        registry.register(Box::new(records_emitted.clone()))?;
        registry.register(Box::new(deliveries_dropped.clone()))?;
        registry.register(Box::new(subscribers.clone()))?;
        registry.register(Box::new(buckets_evicted.clone()))?;
        registry.register(Box::new(tracked_days.clone()))?;
        registry.register(Box::new(sse_clients.clone()))?;

        Ok(Self {
            registry,
            records_decoded,
            decode_errors,
            records_emitted,
            deliveries_dropped,
            subscribers,
            buckets_evicted,
            tracked_days,
            sse_clients,
        })
    }

    /// Count one accepted input.
    pub fn decoded(&self, transport: Transport) {
        self.records_decoded
            .with_label_values(&[transport.as_str()])
            .inc();
    }

    /// Count one rejected input. Serial lines have no error taxonomy and
    /// are labelled `unmatched`.
    pub fn decode_failed(&self, transport: Transport, err: Option<&CodecError>) {
        let kind = err.map_or("unmatched", CodecError::kind);
        self.decode_errors
            .with_label_values(&[transport.as_str(), kind])
            .inc();
    }

    /// Apply one distributor event.
    pub fn on_bus_event(&self, event: BusEvent) {
        match event {
            BusEvent::Emitted => self.records_emitted.inc(),
            BusEvent::Dropped => self.deliveries_dropped.inc(),
            BusEvent::Members(n) => self.subscribers.set(n as f64),
        }
    }

    /// Apply one eviction result.
    pub fn on_evicted(&self, metric: Metric, removed: usize, remaining: usize) {
        self.buckets_evicted.inc_by(removed as f64);
        self.set_tracked_days(metric, remaining);
    }

    pub fn set_tracked_days(&self, metric: Metric, days: usize) {
        self.tracked_days
            .with_label_values(&[metric.as_str()])
            .set(days as f64);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn gather_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("encoding metrics")?;

        String::from_utf8(buffer).context("converting metrics to string")
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
