//! Sensor wire formats and the canonical [`Record`] they decode into.
//!
//! Three entry points, one per transport:
//! - [`decode_datagram`] for raw UDP float datagrams,
//! - [`decode_frame`] for CRC-protected radio-relay frames carried over MQTT,
//! - [`decode_line`] for tagged text lines read from a serial console.
//!
//! All decoders are pure. Every failure rejects a single input and is never
//! fatal to the caller.

pub mod binary;
pub mod crc;
pub mod line;
pub mod record;
pub mod stats;

use thiserror::Error;

pub use binary::{
    decode_datagram, decode_datagram_at, decode_frame, decode_frame_at, encode_frame,
    FramePayload, DATAGRAM_SIZE, FRAME_SIZE, FRAME_START_FLAG,
};
pub use crc::crc16_le;
pub use line::{decode_line, decode_line_at, parse_line, LineFields};
pub use record::{pascal_to_mmhg, Record, Transport};
pub use stats::DecodeStats;

/// Reasons a binary input is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated input: reading {field} needs {need} bytes, got {got}")]
    TruncatedInput {
        field: &'static str,
        need: usize,
        got: usize,
    },

    #[error("invalid frame size: got {got} bytes, want {want}")]
    InvalidFrameSize { got: usize, want: usize },

    #[error("invalid start flag: 0x{got:02x}")]
    InvalidStartFlag { got: u8 },

    #[error("invalid crc: got=0x{got:04x} want=0x{want:04x}")]
    InvalidCrc { got: u16, want: u16 },

    #[error(
        "invalid sensor data: temp={temperature} hum={humidity} \
         pressurePa={pressure_pa} voltage={voltage}"
    )]
    SensorRange {
        temperature: i32,
        humidity: u16,
        pressure_pa: u32,
        voltage: u16,
    },
}

impl CodecError {
    /// Stable label used for the `error_type` metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TruncatedInput { .. } => "truncated_input",
            Self::InvalidFrameSize { .. } => "invalid_frame_size",
            Self::InvalidStartFlag { .. } => "invalid_start_flag",
            Self::InvalidCrc { .. } => "invalid_crc",
            Self::SensorRange { .. } => "sensor_range",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let cases = [
            (
                CodecError::TruncatedInput {
                    field: "voltage",
                    need: 16,
                    got: 12,
                },
                "truncated input",
            ),
            (
                CodecError::InvalidFrameSize { got: 3, want: 12 },
                "invalid frame size",
            ),
            (
                CodecError::InvalidStartFlag { got: 0x7F },
                "invalid start flag",
            ),
            (
                CodecError::InvalidCrc {
                    got: 0xFFFF,
                    want: 0x1234,
                },
                "invalid crc: got=0xffff want=0x1234",
            ),
            (
                CodecError::SensorRange {
                    temperature: 9001,
                    humidity: 0,
                    pressure_pa: 0,
                    voltage: 0,
                },
                "invalid sensor data: temp=9001",
            ),
        ];

        for (err, want) in cases {
            let msg = err.to_string();
            assert!(msg.contains(want), "{msg:?} does not contain {want:?}");
        }
    }

    #[test]
    fn test_kind_labels_distinct() {
        let kinds = [
            CodecError::TruncatedInput {
                field: "x",
                need: 1,
                got: 0,
            }
            .kind(),
            CodecError::InvalidFrameSize { got: 0, want: 0 }.kind(),
            CodecError::InvalidStartFlag { got: 0 }.kind(),
            CodecError::InvalidCrc { got: 0, want: 0 }.kind(),
            CodecError::SensorRange {
                temperature: 0,
                humidity: 0,
                pressure_pa: 0,
                voltage: 0,
            }
            .kind(),
        ];

        let unique: std::collections::HashSet<_> = kinds.iter().collect();
        assert_eq!(unique.len(), kinds.len());
    }
}
