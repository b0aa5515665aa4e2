//! Binary decoders for the UDP datagram and the radio-relay frame.
//!
//! Both formats are fixed-width little-endian. Lengths are checked once up
//! front, after which fixed-offset reads cannot fail.

use chrono::{DateTime, Utc};

use super::crc::crc16_le;
use super::record::{pascal_to_mmhg, Record};
use super::CodecError;

/// Datagram fields in wire order: temperature, humidity, pressure (Pa), voltage.
const DATAGRAM_FIELDS: [&str; 4] = ["temperature", "humidity", "pressure", "voltage"];

/// Size of one datagram field.
const DATAGRAM_FIELD_SIZE: usize = 4;

/// Minimum datagram size in bytes.
pub const DATAGRAM_SIZE: usize = DATAGRAM_FIELDS.len() * DATAGRAM_FIELD_SIZE;

/// First byte of every radio-relay frame.
pub const FRAME_START_FLAG: u8 = 0x7E;

/// Payload bytes between the start flag and the CRC.
pub const FRAME_PAYLOAD_SIZE: usize = 9;

/// Total frame size: start flag + payload + CRC16.
pub const FRAME_SIZE: usize = 1 + FRAME_PAYLOAD_SIZE + 2;

/// Accepted raw ranges for frame payload fields.
const TEMPERATURE_RANGE: std::ops::RangeInclusive<i32> = -5000..=9000;
const HUMIDITY_RANGE: std::ops::RangeInclusive<u16> = 0..=10000;
const PRESSURE_PA_RANGE: std::ops::RangeInclusive<u32> = 30_000..=120_000;
const VOLTAGE_RANGE: std::ops::RangeInclusive<u16> = 2000..=5000;

/// Raw integer fields carried by a radio-relay frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePayload {
    /// Hundredths of a degree Celsius.
    pub temperature: i16,
    /// Hundredths of a percent.
    pub humidity: u16,
    /// Pascals; only the low 24 bits are carried.
    pub pressure_pa: u32,
    /// Millivolts.
    pub voltage: u16,
}

/// Decode a UDP datagram, stamping it with the current time.
pub fn decode_datagram(data: &[u8]) -> Result<Record, CodecError> {
    decode_datagram_at(data, Utc::now())
}

/// Decode a UDP datagram with an explicit decode time.
///
/// Trailing bytes past the four fields are ignored.
pub fn decode_datagram_at(data: &[u8], now: DateTime<Utc>) -> Result<Record, CodecError> {
    let mut values = [0f32; DATAGRAM_FIELDS.len()];

    for (i, (field, value)) in DATAGRAM_FIELDS.iter().zip(values.iter_mut()).enumerate() {
        let offset = i * DATAGRAM_FIELD_SIZE;
        let raw = data
            .get(offset..offset + DATAGRAM_FIELD_SIZE)
            .ok_or(CodecError::TruncatedInput {
                field,
                need: offset + DATAGRAM_FIELD_SIZE,
                got: data.len(),
            })?;
        *value = f32::from_le_bytes(read_fixed(raw, 0));
    }

    let [temperature, humidity, pressure, voltage] = values;

    Ok(Record {
        timestamp: now,
        temperature,
        humidity,
        pressure: pascal_to_mmhg(pressure),
        voltage,
    })
}

/// Decode a radio-relay frame, stamping it with the current time.
pub fn decode_frame(data: &[u8]) -> Result<Record, CodecError> {
    decode_frame_at(data, Utc::now())
}

/// Decode a radio-relay frame with an explicit decode time.
///
/// Checks run in wire order: size, start flag, CRC, then field ranges.
pub fn decode_frame_at(data: &[u8], now: DateTime<Utc>) -> Result<Record, CodecError> {
    let payload = frame_payload(data)?;

    let want = u16::from_le_bytes(read_fixed(data, 1 + FRAME_PAYLOAD_SIZE));
    let got = crc16_le(payload);
    if got != want {
        return Err(CodecError::InvalidCrc { got, want });
    }

    let fields = unpack_payload(payload);
    check_ranges(&fields)?;

    Ok(Record {
        timestamp: now,
        temperature: f32::from(fields.temperature) / 100.0,
        humidity: f32::from(fields.humidity) / 100.0,
        // Firmware packs pressure in Pa into 3 bytes.
        pressure: pascal_to_mmhg(fields.pressure_pa as f32),
        voltage: f32::from(fields.voltage),
    })
}

/// Build a complete frame (flag, payload, CRC) from raw fields.
pub fn encode_frame(fields: &FramePayload) -> [u8; FRAME_SIZE] {
    let mut frame = [0u8; FRAME_SIZE];
    frame[0] = FRAME_START_FLAG;
    frame[1..3].copy_from_slice(&fields.temperature.to_le_bytes());
    frame[3..5].copy_from_slice(&fields.humidity.to_le_bytes());
    frame[5] = (fields.pressure_pa >> 16) as u8;
    frame[6] = (fields.pressure_pa >> 8) as u8;
    frame[7] = fields.pressure_pa as u8;
    frame[8..10].copy_from_slice(&fields.voltage.to_le_bytes());

    let crc = crc16_le(&frame[1..1 + FRAME_PAYLOAD_SIZE]);
    frame[1 + FRAME_PAYLOAD_SIZE..].copy_from_slice(&crc.to_le_bytes());
    frame
}

fn frame_payload(data: &[u8]) -> Result<&[u8], CodecError> {
    if data.len() != FRAME_SIZE {
        return Err(CodecError::InvalidFrameSize {
            got: data.len(),
            want: FRAME_SIZE,
        });
    }

    if data[0] != FRAME_START_FLAG {
        return Err(CodecError::InvalidStartFlag { got: data[0] });
    }

    Ok(&data[1..1 + FRAME_PAYLOAD_SIZE])
}

fn unpack_payload(payload: &[u8]) -> FramePayload {
    FramePayload {
        temperature: i16::from_le_bytes(read_fixed(payload, 0)),
        humidity: u16::from_le_bytes(read_fixed(payload, 2)),
        pressure_pa: u32::from(payload[4]) << 16
            | u32::from(payload[5]) << 8
            | u32::from(payload[6]),
        voltage: u16::from_le_bytes(read_fixed(payload, 7)),
    }
}

fn check_ranges(fields: &FramePayload) -> Result<(), CodecError> {
    let temperature = i32::from(fields.temperature);

    let in_range = TEMPERATURE_RANGE.contains(&temperature)
        && HUMIDITY_RANGE.contains(&fields.humidity)
        && PRESSURE_PA_RANGE.contains(&fields.pressure_pa)
        && VOLTAGE_RANGE.contains(&fields.voltage);

    if in_range {
        Ok(())
    } else {
        Err(CodecError::SensorRange {
            temperature,
            humidity: fields.humidity,
            pressure_pa: fields.pressure_pa,
            voltage: fields.voltage,
        })
    }
}

/// Copy `N` bytes at `offset`. Callers check lengths before reading.
#[inline(always)]
fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[offset..offset + N]);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
