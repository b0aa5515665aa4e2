//! CRC-16 used by the radio-relay frame.
//!
//! Reflected polynomial `0x8408` with the sender firmware's calling
//! convention: `esp_crc16_le(0xFFFF, ..)` complements the seed on entry and
//! the register on exit.

/// Reflected CCITT polynomial.
const POLY: u16 = 0x8408;

/// Seed passed by the sender firmware.
pub const SEED: u16 = 0xFFFF;

/// Compute the frame CRC over `data`.
pub fn crc16_le(data: &[u8]) -> u16 {
    let mut crc = !SEED;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    !crc
}
