//! Tagged serial console line scanner.
//!
//! The sensor firmware logs readings as `I (<uptime>) <tag>: t,h,p[,v]`,
//! interleaved with unrelated boot and driver output. Lines that do not match
//! are skipped without an error.

use chrono::{DateTime, Utc};

use super::record::{pascal_to_mmhg, Record};

/// Maximum number of comma-separated fields on a reading line.
const MAX_FIELDS: usize = 4;

/// Minimum number of fields for a line to count as a reading.
const MIN_FIELDS: usize = 3;

/// Raw integer fields scanned from one reading line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineFields {
    /// Hundredths of a degree Celsius.
    pub temperature: i32,
    /// Hundredths of a percent.
    pub humidity: i32,
    /// Pascals.
    pub pressure: i32,
    /// Millivolts, when the firmware reports it.
    pub voltage: Option<i32>,
}

/// Scan `line` for a reading tagged with `tag`.
///
/// Single left-to-right pass with no allocation. Returns `None` when the
/// tag or the colon after it is missing, fewer than three fields are
/// present, or an unexpected character appears in the field list.
pub fn parse_line(line: &str, tag: &str) -> Option<LineFields> {
    if tag.is_empty() {
        return None;
    }

    let after_tag = line.find(tag)? + tag.len();
    let bytes = line.as_bytes();
    let colon = bytes[after_tag..].iter().position(|&b| b == b':')?;

    let mut pos = after_tag + colon + 1;
    while bytes.get(pos) == Some(&b' ') {
        pos += 1;
    }

    let mut fields = [0i32; MAX_FIELDS];
    let mut count = 0;

    loop {
        let (value, next) = scan_int(bytes, pos)?;
        fields[count] = value;
        count += 1;
        pos = next;

        match bytes.get(pos) {
            Some(b',') if count < MAX_FIELDS => pos += 1,
            None => break,
            Some(_) if is_trailing_space(&bytes[pos..]) => break,
            Some(_) => return None,
        }
    }

    if count < MIN_FIELDS {
        return None;
    }

    Some(LineFields {
        temperature: fields[0],
        humidity: fields[1],
        pressure: fields[2],
        voltage: (count == MAX_FIELDS).then_some(fields[3]),
    })
}

/// Scan and convert a reading line, stamping it with the current time.
pub fn decode_line(line: &str, tag: &str) -> Option<Record> {
    decode_line_at(line, tag, Utc::now())
}

/// Scan and convert a reading line with an explicit decode time.
pub fn decode_line_at(line: &str, tag: &str, now: DateTime<Utc>) -> Option<Record> {
    parse_line(line, tag).map(|fields| fields.into_record(now))
}

impl LineFields {
    /// Convert raw fields to a [`Record`]. Missing voltage reads as zero.
    pub fn into_record(self, now: DateTime<Utc>) -> Record {
        Record {
            timestamp: now,
            temperature: self.temperature as f32 / 100.0,
            humidity: self.humidity as f32 / 100.0,
            pressure: pascal_to_mmhg(self.pressure as f32),
            voltage: self.voltage.map_or(0.0, |v| v as f32),
        }
    }
}

/// Parse `-?[0-9]+` at `pos`. Returns the value and the index after it.
#[inline]
fn scan_int(bytes: &[u8], mut pos: usize) -> Option<(i32, usize)> {
    let negative = bytes.get(pos) == Some(&b'-');
    if negative {
        pos += 1;
    }

    let start = pos;
    let mut value: i32 = 0;

    while let Some(&c) = bytes.get(pos) {
        if !c.is_ascii_digit() {
            break;
        }
        value = value.checked_mul(10)?.checked_add(i32::from(c - b'0'))?;
        pos += 1;
    }

    if pos == start {
        return None;
    }

    Some((if negative { -value } else { value }, pos))
}

/// Serial consoles terminate lines with `\r\n`; tolerate the leftover `\r`.
#[inline]
fn is_trailing_space(rest: &[u8]) -> bool {
    rest.iter().all(|b| b.is_ascii_whitespace())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TAG: &str = "qf8mzr";

    #[test]
    fn test_parse_four_fields() {
        let fields = parse_line("I (4041275) qf8mzr: 2314,2834,99819,32", TAG).unwrap();
        assert_eq!(
            fields,
            LineFields {
                temperature: 2314,
                humidity: 2834,
                pressure: 99819,
                voltage: Some(32),
            }
        );
    }

    #[test]
    fn test_parse_three_fields() {
        let fields = parse_line("I (4041275) qf8mzr: 2314,2834,99819", TAG).unwrap();
        assert_eq!(fields.pressure, 99819);
        assert_eq!(fields.voltage, None);
    }

    #[test]
    fn test_too_few_fields() {
        assert!(parse_line("I (4041275) qf8mzr: 2314,2834", TAG).is_none());
        assert!(parse_line("I (4041275) qf8mzr: 2314", TAG).is_none());
        assert!(parse_line("I (4041275) qf8mzr:", TAG).is_none());
    }

    #[test]
    fn test_negative_first_field() {
        let fields = parse_line("I (4041275) qf8mzr: -1,2834,99819,123", TAG).unwrap();
        assert_eq!(fields.temperature, -1);
        assert_eq!(fields.voltage, Some(123));
    }

    #[test]
    fn test_minus_only_at_token_start() {
        assert!(parse_line("I (1) qf8mzr: 1-2,2834,99819", TAG).is_none());
        assert!(parse_line("I (1) qf8mzr: -,2834,99819", TAG).is_none());
        assert!(parse_line("I (1) qf8mzr: --1,2834,99819", TAG).is_none());
    }

    #[test]
    fn test_non_digit_rejected() {
        assert!(parse_line("I (4041275) qf8mzr: abc,2834,99819", TAG).is_none());
        assert!(parse_line("I (4041275) qf8mzr: 2314,28x4,99819", TAG).is_none());
        assert!(parse_line("I (4041275) qf8mzr: 2314,2834,99819,", TAG).is_none());
        assert!(parse_line("I (4041275) qf8mzr: 2314,,99819", TAG).is_none());
    }

    #[test]
    fn test_too_many_fields() {
        assert!(parse_line("I (1) qf8mzr: 1,2,3,4,5", TAG).is_none());
    }

    #[test]
    fn test_missing_tag() {
        assert!(parse_line("I (378) heap_init: At 3FFAE6E0 len 00001920", TAG).is_none());
        assert!(parse_line("", TAG).is_none());
        assert!(parse_line("I (1) other: 1,2,3", TAG).is_none());
    }

    #[test]
    fn test_missing_colon() {
        assert!(parse_line("I (1) qf8mzr 2314,2834,99819", TAG).is_none());
    }

    #[test]
    fn test_empty_tag_never_matches() {
        assert!(parse_line("I (1) qf8mzr: 1,2,3", "").is_none());
    }

    #[test]
    fn test_trailing_carriage_return() {
        assert!(parse_line("I (1) qf8mzr: 2314,2834,99819,3300\r", TAG).is_some());
    }

    #[test]
    fn test_overflow_rejected() {
        assert!(parse_line("I (1) qf8mzr: 99999999999,2834,99819", TAG).is_none());
    }

    #[test]
    fn test_spaces_after_colon_skipped() {
        let fields = parse_line("I (1) qf8mzr:     5,6,7", TAG).unwrap();
        assert_eq!((fields.temperature, fields.humidity, fields.pressure), (5, 6, 7));
    }

    #[test]
    fn test_decode_line_units() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let rec = decode_line_at("I (4041275) qf8mzr: 2314,2834,99819,3300", TAG, now).unwrap();

        assert_eq!(rec.timestamp, now);
        assert_eq!(rec.temperature, 23.14);
        assert_eq!(rec.humidity, 28.34);
        assert_eq!(rec.pressure, 99819.0 / 133.322);
        assert_eq!(rec.voltage, 3300.0);
    }

    #[test]
    fn test_decode_line_missing_voltage_is_zero() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let rec = decode_line_at("I (1) qf8mzr: 2314,2834,99819", TAG, now).unwrap();
        assert_eq!(rec.voltage, 0.0);
    }
}
