//! Sensor Payload Decoding
//!
//! The thermometer pushes a fixed 5-byte notification:
//!
//! ```text
//! [0-1] : Temperature, b0 + b1 * 255, hundredths of a degree Celsius
//! [2]   : Relative humidity, percent
//! [3-4] : Battery, b3 + b4 * 255, millivolts
//! ```
//!
//! The high byte weight is 255, not 256. Do not change it without checking
//! against a real sensor's wire format.

use crate::domain::models::SensorReading;
use thiserror::Error;

/// Exact length of a sensor notification
pub const PAYLOAD_LEN: usize = 5;

/// Weight applied to the high byte of the two-byte fields
const HIGH_BYTE_WEIGHT: u32 = 255;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("invalid payload size: {actual} (expected {expected})")]
    InvalidLength { expected: usize, actual: usize },
}

impl SensorReading {
    /// Decode a raw notification payload
    pub fn from_payload(bytes: &[u8]) -> Result<Self, PayloadError> {
        if bytes.len() != PAYLOAD_LEN {
            return Err(PayloadError::InvalidLength {
                expected: PAYLOAD_LEN,
                actual: bytes.len(),
            });
        }

        let temperature_raw = bytes[0] as u32 + bytes[1] as u32 * HIGH_BYTE_WEIGHT;
        let battery_raw = bytes[3] as u32 + bytes[4] as u32 * HIGH_BYTE_WEIGHT;

        Ok(Self {
            temperature_c: temperature_raw as f64 / 100.0,
            humidity_pct: bytes[2],
            battery_v: battery_raw as f64 / 1000.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reference_payload() {
        let reading = SensorReading::from_payload(&[0x64, 0x00, 0x37, 0x05, 0x00]).unwrap();
        assert_eq!(reading.temperature_c, 1.0);
        assert_eq!(reading.humidity_pct, 55);
        assert_eq!(reading.battery_v, 0.005);
    }

    #[test]
    fn test_high_byte_weight_is_255() {
        // 0x0100 would be 2.56 with a 256 weight
        let reading = SensorReading::from_payload(&[0x00, 0x01, 0x00, 0x00, 0x01]).unwrap();
        assert_eq!(reading.temperature_c, 2.55);
        assert_eq!(reading.battery_v, 0.255);
    }

    #[test]
    fn test_typical_reading() {
        // 2 + 9 * 255 = 2297 -> 22.97 C, 2 + 12 * 255 = 3062 -> 3.062 V
        let reading = SensorReading::from_payload(&[0x02, 0x09, 0x2D, 0x02, 0x0C]).unwrap();
        assert_eq!(reading.temperature_c, 22.97);
        assert_eq!(reading.humidity_pct, 45);
        assert_eq!(reading.battery_v, 3.062);
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert_eq!(
            SensorReading::from_payload(&[0x64, 0x00, 0x37, 0x05]),
            Err(PayloadError::InvalidLength {
                expected: 5,
                actual: 4
            })
        );
        assert!(SensorReading::from_payload(&[0; 6]).is_err());
        assert!(SensorReading::from_payload(&[]).is_err());
    }
}
