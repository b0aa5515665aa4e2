use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Millimetres of mercury per pascal divisor.
pub const PASCAL_PER_MMHG: f32 = 133.322;

/// Canonical decoded sensor reading.
///
/// Produced once per accepted input frame and copied by value to every
/// consumer. Pressure is always stored in mmHg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    /// Degrees Celsius.
    pub temperature: f32,
    /// Relative humidity, percent.
    pub humidity: f32,
    /// Millimetres of mercury.
    pub pressure: f32,
    /// Supply voltage, millivolts.
    pub voltage: f32,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Record{{timestamp={} temperature={:.2} humidity={:.2} pressure={:.2} voltage={:.0}}}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.temperature,
            self.humidity,
            self.pressure,
            self.voltage,
        )
    }
}

/// Convert a pressure reading from pascals to mmHg.
#[inline]
pub fn pascal_to_mmhg(pascal: f32) -> f32 {
    pascal / PASCAL_PER_MMHG
}

/// Transport a record arrived on. Used as a metrics and log label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Transport {
    Udp = 0,
    Serial = 1,
    Mqtt = 2,
}

/// Number of transport variants, used for array sizing.
pub const TRANSPORT_CARDINALITY: usize = 3;

impl Transport {
    pub const ALL: [Transport; TRANSPORT_CARDINALITY] =
        [Transport::Udp, Transport::Serial, Transport::Mqtt];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Serial => "serial",
            Self::Mqtt => "mqtt",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
