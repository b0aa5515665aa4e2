use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::band::{locate, Band, BAND_CARDINALITY};

/// Running sum and count for one band of one day.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandTotals {
    pub sum: f32,
    pub count: u32,
}

impl BandTotals {
    #[inline]
    fn add(&mut self, value: f32) {
        self.sum += value;
        self.count += 1;
    }

    /// Mean rounded to two decimals, or `None` when empty.
    pub fn mean(&self) -> Option<f32> {
        (self.count > 0).then(|| round2(self.sum / self.count as f32))
    }
}

/// Per-band totals for one calendar day.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DailyBucket {
    bands: [BandTotals; BAND_CARDINALITY],
}

impl DailyBucket {
    pub fn band(&self, band: Band) -> BandTotals {
        self.bands[band as usize]
    }
}

/// One chart point: epoch milliseconds and the band mean.
/// Serializes as `[ms, value]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint(pub i64, pub f32);

/// Thread-safe per-metric accumulator bucketed by day and band.
///
/// `push` and `evict` take the write lock; `series` takes the read lock,
/// so a reader sees each bucket either before or after a push.
pub struct Aggregator {
    tz: FixedOffset,
    days: RwLock<HashMap<i64, DailyBucket>>,
}

impl Aggregator {
    /// Creates an empty aggregator computing days in `tz`.
    pub fn new(tz: FixedOffset) -> Self {
        Self {
            tz,
            days: RwLock::new(HashMap::with_capacity(16)),
        }
    }

    /// Add `value` to the band of `ts` in that day's bucket.
    pub fn push(&self, value: f32, ts: DateTime<Utc>) {
        let (day, band) = locate(ts, self.tz);
        self.days.write().entry(day).or_default().bands[band as usize].add(value);
    }

    /// Band means for every populated band, in timestamp order.
    pub fn series(&self) -> Vec<SeriesPoint> {
        let mut days: Vec<(i64, DailyBucket)> = {
            let guard = self.days.read();
            guard.iter().map(|(&day, &bucket)| (day, bucket)).collect()
        };
        days.sort_unstable_by_key(|&(day, _)| day);

        let mut points = Vec::with_capacity(days.len() * BAND_CARDINALITY);
        for (day, bucket) in days {
            for band in Band::ALL {
                if let Some(mean) = bucket.band(band).mean() {
                    points.push(SeriesPoint(day + band.representative_offset_ms(), mean));
                }
            }
        }

        points
    }

    /// Remove every day whose start precedes `cutoff`. Returns the number
    /// of days removed.
    pub fn evict(&self, cutoff: DateTime<Utc>) -> usize {
        let cutoff_ms = cutoff.timestamp_millis();
        let mut days = self.days.write();
        let before = days.len();
        days.retain(|&day, _| day >= cutoff_ms);
        before - days.len()
    }

    /// Bucket for the day containing `ts`, if any.
    pub fn bucket_at(&self, ts: DateTime<Utc>) -> Option<DailyBucket> {
        let (day, _) = locate(ts, self.tz);
        self.days.read().get(&day).copied()
    }

    /// Number of tracked days.
    pub fn len(&self) -> usize {
        self.days.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[inline]
fn round2(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_same_band_mean() {
        let agg = Aggregator::new(utc());
        agg.push(10.5, at(3, 7, 0));
        agg.push(15.5, at(3, 11, 45));

        let series = agg.series();
        assert_eq!(series.len(), 1);

        let day = at(3, 0, 0).timestamp_millis();
        assert_eq!(series[0], SeriesPoint(day + 8 * 3_600_000, 13.0));
    }

    #[test]
    fn test_bands_kept_separate() {
        let agg = Aggregator::new(utc());
        agg.push(1.0, at(3, 9, 0));
        agg.push(2.0, at(3, 15, 0));
        agg.push(3.0, at(3, 21, 0));
        agg.push(5.0, at(3, 2, 0));

        let values: Vec<f32> = agg.series().iter().map(|p| p.1).collect();
        assert_eq!(values, [1.0, 2.0, 4.0]);

        let bucket = agg.bucket_at(at(3, 12, 0)).unwrap();
        assert_eq!(bucket.band(Band::Evening).count, 2);
        assert_eq!(bucket.band(Band::Morning).count, 1);
    }

    #[test]
    fn test_mean_rounded_on_read_only() {
        let agg = Aggregator::new(utc());
        agg.push(1.0, at(3, 7, 0));
        agg.push(1.0, at(3, 8, 0));
        agg.push(2.0, at(3, 9, 0));

        assert_eq!(agg.series()[0].1, 1.33);
        assert_eq!(agg.series(), agg.series());

        let totals = agg.bucket_at(at(3, 7, 0)).unwrap().band(Band::Morning);
        assert_eq!(totals, BandTotals { sum: 4.0, count: 3 });
    }

    #[test]
    fn test_series_sorted_across_days() {
        let agg = Aggregator::new(utc());
        for day in [9, 2, 5, 1, 7] {
            agg.push(day as f32, at(day, 20, 0));
            agg.push(day as f32, at(day, 7, 0));
            agg.push(day as f32, at(day, 16, 0));
        }

        let series = agg.series();
        assert_eq!(series.len(), 15);
        assert!(series.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_evict_strictly_before_cutoff() {
        let agg = Aggregator::new(utc());
        for day in 1..=5 {
            agg.push(1.0, at(day, 10, 0));
        }

        let removed = agg.evict(at(3, 0, 0));
        assert_eq!(removed, 2);
        assert_eq!(agg.len(), 3);
        assert!(agg.bucket_at(at(2, 10, 0)).is_none());
        assert!(agg.bucket_at(at(3, 10, 0)).is_some());
    }

    #[test]
    fn test_evict_mid_day_cutoff_keeps_that_day() {
        let agg = Aggregator::new(utc());
        agg.push(1.0, at(3, 10, 0));

        // Day start 00:00 precedes a 12:00 cutoff.
        assert_eq!(agg.evict(at(3, 12, 0)), 1);

        agg.push(1.0, at(4, 10, 0));
        assert_eq!(agg.evict(at(4, 0, 0)), 0);
        assert!(!agg.is_empty());
    }

    #[test]
    fn test_month_of_hourly_readings() {
        let agg = Aggregator::new(utc());
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        for day in 0..30 {
            for hour in 0..24 {
                let ts = start + Duration::days(day) + Duration::hours(hour);
                agg.push(hour as f32, ts);
            }
        }

        let series = agg.series();
        assert_eq!(series.len(), 90);
        assert_eq!(agg.len(), 30);

        // Morning hours 6..=13 average 9.5.
        assert_eq!(series[0].1, 9.5);
        // Midday hours 14..=18 average 16.
        assert_eq!(series[1].1, 16.0);
    }

    #[test]
    fn test_reference_zone_shifts_day() {
        let tz = FixedOffset::east_opt(3 * 3600).unwrap();
        let agg = Aggregator::new(tz);

        // 04:00 and 22:00 UTC on the 3rd fall on different local days.
        agg.push(1.0, at(3, 4, 0));
        agg.push(1.0, at(3, 22, 0));
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn test_concurrent_push_and_series() {
        use std::sync::Arc;
        use std::thread;

        let agg = Arc::new(Aggregator::new(utc()));
        let ts = at(3, 9, 0);
        let mut handles = Vec::new();

        for _ in 0..4 {
            let agg = Arc::clone(&agg);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    agg.push(2.0, ts);
                }
            }));
        }

        for _ in 0..2 {
            let agg = Arc::clone(&agg);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    for point in agg.series() {
                        assert_eq!(point.1, 2.0);
                    }
                }
            }));
        }

        for h in handles {
            h.join().expect("thread panicked");
        }

        let totals = agg.bucket_at(ts).expect("bucket exists").band(Band::Morning);
        assert_eq!(totals.count, 4000);
        assert_eq!(totals.sum, 8000.0);
    }

    #[test]
    fn test_series_point_json() {
        let json = serde_json::to_string(&SeriesPoint(1_700_000_000_000, 12.5)).unwrap();
        assert_eq!(json, "[1700000000000,12.5]");
    }
}
