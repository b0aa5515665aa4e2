//! Rolling daily statistics over the record stream.
//!
//! The [`StatsSupervisor`] is a permanent subscriber of the distributor.
//! It keeps the latest record plus one [`Aggregator`] per tracked metric
//! and serves both as a single [`Snapshot`].

pub mod aggregator;
pub mod band;
pub mod cache;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::Subscribe;
use crate::codec::Record;

pub use aggregator::{Aggregator, BandTotals, DailyBucket, SeriesPoint};
pub use band::Band;
pub use cache::{LatestRecord, RecordCache};

/// Record field tracked by an aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Temperature,
    Humidity,
    Pressure,
    Voltage,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Temperature,
        Metric::Humidity,
        Metric::Pressure,
        Metric::Voltage,
    ];

    /// Metrics tracked when none are configured.
    pub const DEFAULT_TRACKED: [Metric; 3] =
        [Metric::Temperature, Metric::Pressure, Metric::Voltage];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::Voltage => "voltage",
        }
    }

    /// The scalar this metric reads from `record`.
    #[inline]
    pub fn value(self, record: &Record) -> f32 {
        match self {
            Self::Temperature => record.temperature,
            Self::Humidity => record.humidity,
            Self::Pressure => record.pressure,
            Self::Voltage => record.voltage,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown metric {s:?}"))
    }
}

/// Current value plus per-metric chart series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// `null` until the first record is accepted.
    pub current: Option<Record>,
    pub chart: BTreeMap<&'static str, Vec<SeriesPoint>>,
}

/// Callback type for eviction results: (metric, days removed, days left).
pub type EvictionCallback = Box<dyn Fn(Metric, usize, usize) + Send + Sync>;

/// Owns the current-value cache and one aggregator per tracked metric.
pub struct StatsSupervisor<C: RecordCache = LatestRecord> {
    cache: C,
    aggregators: Vec<(Metric, Aggregator)>,
    /// Write-held for a whole ingest, read-held by `snapshot`.
    ingest_gate: RwLock<()>,
    on_evict: Option<EvictionCallback>,
}

impl StatsSupervisor<LatestRecord> {
    /// Creates a supervisor tracking `metrics`, bucketing days in `tz`.
    pub fn new(metrics: &[Metric], tz: FixedOffset) -> Self {
        Self::with_cache(LatestRecord::new(), metrics, tz)
    }
}

impl<C: RecordCache> StatsSupervisor<C> {
    /// Creates a supervisor over a caller-provided cache.
    /// Duplicate metrics are tracked once.
    pub fn with_cache(cache: C, metrics: &[Metric], tz: FixedOffset) -> Self {
        let mut aggregators: Vec<(Metric, Aggregator)> = Vec::with_capacity(metrics.len());
        for &metric in metrics {
            if aggregators.iter().all(|(m, _)| *m != metric) {
                aggregators.push((metric, Aggregator::new(tz)));
            }
        }

        Self {
            cache,
            aggregators,
            ingest_gate: RwLock::new(()),
            on_evict: None,
        }
    }

    /// Set a callback invoked per metric after each eviction.
    pub fn with_metrics(mut self, cb: EvictionCallback) -> Self {
        self.on_evict = Some(cb);
        self
    }

    /// Update the cache, then push each tracked scalar.
    pub fn ingest(&self, record: &Record) {
        let _gate = self.ingest_gate.write();
        self.cache.set(*record);
        for (metric, agg) in &self.aggregators {
            agg.push(metric.value(record), record.timestamp);
        }
    }

    /// Consume records from `bus` until cancelled or the stream ends.
    /// The subscription is removed before returning.
    pub async fn run_ingest(&self, ctx: CancellationToken, bus: &impl Subscribe) -> Result<()> {
        let mut sub = bus.subscribe();
        debug!(id = sub.id(), "stats ingest subscribed");

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                next = sub.recv() => match next {
                    Some(record) => self.ingest(&record),
                    None => break,
                },
            }
        }

        bus.unsubscribe(&mut sub);
        debug!("stats ingest stopped");

        Ok(())
    }

    /// Evict days older than `retention` every `interval` until cancelled.
    pub async fn run_eviction(
        &self,
        ctx: CancellationToken,
        interval: Duration,
        retention: Duration,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    let cutoff = retention_cutoff(Utc::now(), retention);
                    let removed = self.evict_before(cutoff);
                    if removed > 0 {
                        info!(removed, cutoff = %cutoff, "evicted expired stats buckets");
                    }
                }
            }
        }
    }

    /// Evict every tracked aggregator. Returns the total days removed.
    pub fn evict_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut total = 0;
        for (metric, agg) in &self.aggregators {
            let removed = agg.evict(cutoff);
            total += removed;
            if let Some(ref cb) = self.on_evict {
                cb(*metric, removed, agg.len());
            }
        }
        total
    }

    /// Compose the current record and every tracked series.
    ///
    /// No ingest runs while the snapshot is taken, so `current` is always
    /// the last record folded into the series. Eviction may still run.
    pub fn snapshot(&self) -> Snapshot {
        let _gate = self.ingest_gate.read();
        Snapshot {
            current: self.cache.get(),
            chart: self
                .aggregators
                .iter()
                .map(|(metric, agg)| (metric.as_str(), agg.series()))
                .collect(),
        }
    }

    pub fn current(&self) -> Option<Record> {
        self.cache.get()
    }

    /// Tracked metrics in configuration order.
    pub fn metrics(&self) -> impl Iterator<Item = Metric> + '_ {
        self.aggregators.iter().map(|(m, _)| *m)
    }

    /// Tracked day count per metric.
    pub fn tracked_days(&self) -> Vec<(Metric, usize)> {
        self.aggregators
            .iter()
            .map(|(m, agg)| (*m, agg.len()))
            .collect()
    }
}

/// `now - retention`, saturating at the earliest representable time.
pub fn retention_cutoff(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|r| now.checked_sub_signed(r))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
