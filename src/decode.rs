use thiserror::Error;
use tracing::instrument;

use crate::hw::{BatteryLevel, HeartRateSample};

/// Flags bit selecting a 16-bit heart-rate measurement field.
const HEART_RATE_VALUE_FORMAT_U16: u8 = 0x01;

/// Errors returned while decoding characteristic payloads.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("heart-rate payload has {actual} byte(s) but its flags require at least {required}")]
    HeartRateTooShort { required: usize, actual: usize },
    #[error("battery-level payload was empty")]
    EmptyBatteryLevel,
}

/// Decodes fixed-layout GATT characteristic payloads into typed values.
pub struct FrameDecoder;

impl FrameDecoder {
    /// Decodes a Heart Rate Measurement (`0x2A37`) payload.
    ///
    /// Bit 0 of the flags byte selects an 8-bit or a little-endian 16-bit
    /// measurement at offset 1. Sensor-contact, energy-expended and RR-interval
    /// fields are not interpreted.
    ///
    /// ```
    /// use bandlink::FrameDecoder;
    ///
    /// let sample = FrameDecoder::heart_rate(&[0x01, 0x2C, 0x01])?;
    /// assert_eq!(300, u16::from(sample));
    /// # Ok::<(), bandlink::DecodeError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is shorter than the layout selected by
    /// its flags.
    #[instrument(skip(payload), level = "trace", fields(payload_len = payload.len()))]
    pub fn heart_rate(payload: &[u8]) -> Result<HeartRateSample, DecodeError> {
        let Some(&flags) = payload.first() else {
            return Err(DecodeError::HeartRateTooShort {
                required: 2,
                actual: 0,
            });
        };

        let bpm = if flags & HEART_RATE_VALUE_FORMAT_U16 == 0 {
            match payload.get(1) {
                Some(&value) => u16::from(value),
                None => {
                    return Err(DecodeError::HeartRateTooShort {
                        required: 2,
                        actual: payload.len(),
                    });
                }
            }
        } else {
            match payload.get(1..3) {
                Some(&[low, high]) => u16::from_le_bytes([low, high]),
                _ => {
                    return Err(DecodeError::HeartRateTooShort {
                        required: 3,
                        actual: payload.len(),
                    });
                }
            }
        };

        Ok(HeartRateSample::from(bpm))
    }

    /// Decodes a Battery Level (`0x2A19`) payload.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is empty.
    #[instrument(skip(payload), level = "trace", fields(payload_len = payload.len()))]
    pub fn battery_level(payload: &[u8]) -> Result<BatteryLevel, DecodeError> {
        payload
            .first()
            .map(|&percent| BatteryLevel::from(percent))
            .ok_or(DecodeError::EmptyBatteryLevel)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::u8_format(&[0x00, 72], 72)]
    #[case::u8_format_max(&[0x00, 0xFF], 255)]
    #[case::u8_ignores_contact_bits(&[0x06, 61], 61)]
    #[case::u8_ignores_trailing_rr(&[0x10, 64, 0x00, 0x04], 64)]
    #[case::u16_format(&[0x01, 0x48, 0x00], 72)]
    #[case::u16_format_wide(&[0x01, 0x2C, 0x01], 300)]
    #[case::u16_ignores_energy_field(&[0x09, 0x50, 0x00, 0x10, 0x27], 80)]
    fn heart_rate_decodes_both_value_formats(#[case] payload: &[u8], #[case] expected: u16) {
        let sample = FrameDecoder::heart_rate(payload).expect("payload should decode");
        assert_eq!(expected, u16::from(sample));
    }

    #[rstest]
    #[case::empty(&[], 2, 0)]
    #[case::flags_only(&[0x00], 2, 1)]
    #[case::u16_truncated(&[0x01, 0x48], 3, 2)]
    fn heart_rate_rejects_short_payloads(
        #[case] payload: &[u8],
        #[case] required: usize,
        #[case] actual: usize,
    ) {
        let error = FrameDecoder::heart_rate(payload).expect_err("short payload should fail");
        assert_eq!(DecodeError::HeartRateTooShort { required, actual }, error);
    }

    #[test]
    fn battery_level_reads_first_byte() {
        let level = FrameDecoder::battery_level(&[87]).expect("battery payload should decode");
        assert_eq!(87, u8::from(level));
    }

    #[test]
    fn battery_level_rejects_empty_payload() {
        assert_matches!(
            FrameDecoder::battery_level(&[]),
            Err(DecodeError::EmptyBatteryLevel)
        );
    }
}
