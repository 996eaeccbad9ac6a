use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Connection handle assigned by the radio stack
pub type ConnHandle = u16;

/// GATT attribute handle
pub type AttHandle = u16;

/// Bluetooth device address (6 bytes, most significant byte first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BdAddr(pub [u8; 6]);

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid Bluetooth address: {0:?}")]
pub struct AddressParseError(pub String);

impl FromStr for BdAddr {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(AddressParseError(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (byte, part) in bytes.iter_mut().zip(&parts) {
            if part.len() != 2 {
                return Err(AddressParseError(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| AddressParseError(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for BdAddr {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BdAddr> for String {
    fn from(addr: BdAddr) -> Self {
        addr.to_string()
    }
}

/// Address type as reported by the link layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Public,
    Random,
}

/// Peer identity cached from a matching scan result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub address_type: AddressType,
    pub address: BdAddr,
    /// Advertised complete local name, `"?"` when the advertisement carried none
    pub name: String,
}

/// Bluetooth UUID in its short or full form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BleUuid {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128(u128),
}

/// Bluetooth base UUID `00000000-0000-1000-8000-00805F9B34FB`
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

impl BleUuid {
    /// Expand to the 128-bit form so short and full UUIDs compare equal
    pub fn to_u128(self) -> u128 {
        match self {
            Self::Uuid16(v) => BASE_UUID | ((v as u128) << 96),
            Self::Uuid32(v) => BASE_UUID | ((v as u128) << 96),
            Self::Uuid128(v) => v,
        }
    }

    pub fn matches(self, other: BleUuid) -> bool {
        self.to_u128() == other.to_u128()
    }
}

impl fmt::Display for BleUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid16(v) => write!(f, "{:04x}", v),
            Self::Uuid32(v) => write!(f, "{:08x}", v),
            Self::Uuid128(v) => {
                let hex = format!("{:032x}", v);
                write!(
                    f,
                    "{}-{}-{}-{}-{}",
                    &hex[0..8],
                    &hex[8..12],
                    &hex[12..16],
                    &hex[16..20],
                    &hex[20..32]
                )
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid UUID format: {0:?}")]
pub struct UuidParseError(pub String);

impl FromStr for BleUuid {
    type Err = UuidParseError;

    /// Accepts 4, 8 or 32 hex digits; dashes are ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.replace('-', "");
        let err = || UuidParseError(s.to_string());

        match hex.len() {
            4 => u16::from_str_radix(&hex, 16)
                .map(Self::Uuid16)
                .map_err(|_| err()),
            8 => u32::from_str_radix(&hex, 16)
                .map(Self::Uuid32)
                .map_err(|_| err()),
            32 => u128::from_str_radix(&hex, 16)
                .map(Self::Uuid128)
                .map_err(|_| err()),
            _ => Err(err()),
        }
    }
}

/// One decoded reading from the sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Degrees Celsius
    pub temperature_c: f64,
    /// Relative humidity in percent
    pub humidity_pct: u8,
    /// Battery voltage in volts
    pub battery_v: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let addr: BdAddr = "a4:c1:38:82:59:df".parse().unwrap();
        assert_eq!(addr.0, [0xA4, 0xC1, 0x38, 0x82, 0x59, 0xDF]);
        assert_eq!(addr.to_string(), "A4:C1:38:82:59:DF");
    }

    #[test]
    fn test_address_rejects_garbage() {
        assert!("A4:C1:38:82:59".parse::<BdAddr>().is_err());
        assert!("A4:C1:38:82:59:ZZ".parse::<BdAddr>().is_err());
        assert!("A4C1:38:82:59:DF:00".parse::<BdAddr>().is_err());
    }

    #[test]
    fn test_address_serde_as_string() {
        let addr = BdAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"AA:BB:CC:DD:EE:FF\"");
        let back: BdAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_parse_uuid() {
        assert_eq!("2a00".parse::<BleUuid>().unwrap(), BleUuid::Uuid16(0x2a00));
        let full: BleUuid = "00002a00-0000-1000-8000-00805f9b34fb".parse().unwrap();
        assert!(full.matches(BleUuid::Uuid16(0x2a00)));
        assert!(!full.matches(BleUuid::Uuid16(0x2a01)));
        assert!("xyz".parse::<BleUuid>().is_err());
    }

    #[test]
    fn test_uuid_display() {
        assert_eq!(BleUuid::Uuid16(0x181a).to_string(), "181a");
        assert_eq!(
            BleUuid::Uuid128(BleUuid::Uuid16(0x2a6e).to_u128()).to_string(),
            "00002a6e-0000-1000-8000-00805f9b34fb"
        );
    }
}
