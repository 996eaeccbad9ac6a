//! Advertising Payload Decoder
//!
//! Advertising payloads are repeated elements of the form:
//!
//! ```text
//! [len: 1 byte][type: 1 byte][data: len - 1 bytes]
//! ```
//!
//! `len` counts the type byte plus the data. A zero length or an element
//! running past the end of the buffer ends decoding; nothing here panics
//! on malformed input.

use crate::domain::models::BleUuid;

pub const ADV_TYPE_FLAGS: u8 = 0x01;
pub const ADV_TYPE_UUID16_MORE: u8 = 0x02;
pub const ADV_TYPE_UUID16_COMPLETE: u8 = 0x03;
pub const ADV_TYPE_UUID32_MORE: u8 = 0x04;
pub const ADV_TYPE_UUID32_COMPLETE: u8 = 0x05;
pub const ADV_TYPE_UUID128_MORE: u8 = 0x06;
pub const ADV_TYPE_UUID128_COMPLETE: u8 = 0x07;
pub const ADV_TYPE_NAME: u8 = 0x09;
pub const ADV_TYPE_APPEARANCE: u8 = 0x19;

/// Iterator over the well-formed `(type, data)` elements of a payload
#[derive(Debug, Clone)]
pub struct AdFields<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for AdFields<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.payload.get(self.pos)? as usize;
        if len == 0 {
            return None;
        }

        let end = self.pos + 1 + len;
        if end > self.payload.len() {
            // Truncated element: stop here
            self.pos = self.payload.len();
            return None;
        }

        let ad_type = self.payload[self.pos + 1];
        let data = &self.payload[self.pos + 2..end];
        self.pos = end;
        Some((ad_type, data))
    }
}

pub fn fields(payload: &[u8]) -> AdFields<'_> {
    AdFields { payload, pos: 0 }
}

/// Data of the first element with type `ad_type`, or an empty slice
pub fn decode_field(payload: &[u8], ad_type: u8) -> &[u8] {
    fields(payload)
        .find(|(t, _)| *t == ad_type)
        .map(|(_, data)| data)
        .unwrap_or(&[])
}

/// Complete local name, or an empty string if absent or not valid UTF-8
pub fn decode_name(payload: &[u8]) -> String {
    std::str::from_utf8(decode_field(payload, ADV_TYPE_NAME))
        .map(str::to_owned)
        .unwrap_or_default()
}

/// All advertised service UUIDs, complete and incomplete lists alike
pub fn decode_services(payload: &[u8]) -> Vec<BleUuid> {
    let mut services = Vec::new();

    for (ad_type, data) in fields(payload) {
        match ad_type {
            ADV_TYPE_UUID16_MORE | ADV_TYPE_UUID16_COMPLETE => services.extend(
                data.chunks_exact(2)
                    .map(|c| BleUuid::Uuid16(u16::from_le_bytes([c[0], c[1]]))),
            ),
            ADV_TYPE_UUID32_MORE | ADV_TYPE_UUID32_COMPLETE => services.extend(
                data.chunks_exact(4)
                    .map(|c| BleUuid::Uuid32(u32::from_le_bytes([c[0], c[1], c[2], c[3]]))),
            ),
            ADV_TYPE_UUID128_MORE | ADV_TYPE_UUID128_COMPLETE => {
                services.extend(data.chunks_exact(16).map(|c| {
                    let mut bytes = [0u8; 16];
                    bytes.copy_from_slice(c);
                    BleUuid::Uuid128(u128::from_le_bytes(bytes))
                }))
            }
            _ => {}
        }
    }

    services
}

/// Append one element to an advertising payload
pub fn push_field(payload: &mut Vec<u8>, ad_type: u8, data: &[u8]) {
    payload.push((data.len() + 1) as u8);
    payload.push(ad_type);
    payload.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_name() {
        let mut adv = Vec::new();
        push_field(&mut adv, ADV_TYPE_FLAGS, &[0x06]);
        push_field(&mut adv, ADV_TYPE_NAME, b"LYWSD03MMC");
        assert_eq!(decode_name(&adv), "LYWSD03MMC");
    }

    #[test]
    fn test_missing_field_is_empty() {
        let adv = [0x02, ADV_TYPE_FLAGS, 0x06];
        assert!(decode_field(&adv, ADV_TYPE_NAME).is_empty());
        assert_eq!(decode_name(&adv), "");
        assert_eq!(decode_name(&[]), "");
    }

    #[test]
    fn test_truncated_element_stops_decoding() {
        // Name element claims 9 bytes but only 3 follow
        let adv = [0x02, ADV_TYPE_FLAGS, 0x06, 0x0A, ADV_TYPE_NAME, b'a', b'b', b'c'];
        assert!(decode_field(&adv, ADV_TYPE_NAME).is_empty());
        assert_eq!(decode_field(&adv, ADV_TYPE_FLAGS), &[0x06]);
    }

    #[test]
    fn test_zero_length_terminates() {
        let adv = [0x00, ADV_TYPE_NAME, b'x'];
        assert!(decode_field(&adv, ADV_TYPE_NAME).is_empty());
    }

    #[test]
    fn test_invalid_utf8_name_is_empty() {
        let adv = [0x03, ADV_TYPE_NAME, 0xFF, 0xFE];
        assert_eq!(decode_name(&adv), "");
    }

    #[test]
    fn test_first_match_wins() {
        let mut adv = Vec::new();
        push_field(&mut adv, ADV_TYPE_NAME, b"first");
        push_field(&mut adv, ADV_TYPE_NAME, b"second");
        assert_eq!(decode_name(&adv), "first");
    }

    #[test]
    fn test_decode_services() {
        let mut adv = Vec::new();
        push_field(&mut adv, ADV_TYPE_UUID16_COMPLETE, &[0x1A, 0x18, 0x95, 0xFE]);
        push_field(&mut adv, ADV_TYPE_UUID32_MORE, &[0x78, 0x56, 0x34, 0x12]);
        let services = decode_services(&adv);
        assert_eq!(
            services,
            vec![
                BleUuid::Uuid16(0x181A),
                BleUuid::Uuid16(0xFE95),
                BleUuid::Uuid32(0x1234_5678),
            ]
        );
    }

    #[test]
    fn test_decode_services_ignores_odd_trailing_bytes() {
        let adv = [0x04, ADV_TYPE_UUID16_COMPLETE, 0x0F, 0x18, 0x12];
        assert_eq!(decode_services(&adv), vec![BleUuid::Uuid16(0x180F)]);
    }
}
