use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};

const SECS_PER_HOUR: i64 = 3600;
const SECS_PER_DAY: i64 = 24 * SECS_PER_HOUR;

/// Time-of-day band a reading is bucketed into.
///
/// The three bands partition the day with no gap or overlap:
/// Morning `[06, 14)`, Midday `[14, 19)`, Evening `[19, 24) + [00, 06)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Band {
    Morning = 0,
    Midday = 1,
    Evening = 2,
}

/// Number of band variants, used for array sizing.
pub const BAND_CARDINALITY: usize = 3;

impl Band {
    /// All bands in series order.
    pub const ALL: [Band; BAND_CARDINALITY] = [Band::Morning, Band::Midday, Band::Evening];

    /// Band containing `hour` (0..24).
    pub const fn from_hour(hour: u32) -> Self {
        match hour {
            6..=13 => Self::Morning,
            14..=18 => Self::Midday,
            _ => Self::Evening,
        }
    }

    /// Offset from day start of the point emitted for this band.
    pub const fn representative_offset_hours(self) -> i64 {
        match self {
            Self::Morning => 8,
            Self::Midday => 14,
            Self::Evening => 19,
        }
    }

    /// Representative offset in milliseconds.
    pub const fn representative_offset_ms(self) -> i64 {
        self.representative_offset_hours() * SECS_PER_HOUR * 1000
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Midday => "midday",
            Self::Evening => "evening",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Day start (epoch ms) and band of `ts`, both in the `tz` reference zone.
pub fn locate(ts: DateTime<Utc>, tz: FixedOffset) -> (i64, Band) {
    let offset = i64::from(tz.local_minus_utc());
    let local = ts.timestamp() + offset;

    let day_local = local.div_euclid(SECS_PER_DAY) * SECS_PER_DAY;
    let hour = (local.rem_euclid(SECS_PER_DAY) / SECS_PER_HOUR) as u32;

    ((day_local - offset) * 1000, Band::from_hour(hour))
}
