//! Property tests for the decoders and the central's session filtering.

use ble_sensor_central::domain::models::{
    AddressType, BdAddr, BleUuid, ConnHandle, SensorReading,
};
use ble_sensor_central::domain::sensor::PAYLOAD_LEN;
use ble_sensor_central::infrastructure::bluetooth::advertising::{
    self, ADV_TYPE_FLAGS, ADV_TYPE_NAME,
};
use ble_sensor_central::infrastructure::bluetooth::{
    CentralConfig, CentralState, GattCentral, Radio, RadioCommand, RadioError, RadioEvent,
    ScanParams,
};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const TARGET: BdAddr = BdAddr([0xA4, 0xC1, 0x38, 0x82, 0x59, 0xDF]);
const CONN: ConnHandle = 0x0040;

// ── Advertising payloads ──────────────────────────────────────

proptest! {
    /// Arbitrary bytes never panic and every decoded field lies inside
    /// the payload.
    #[test]
    fn decode_field_stays_in_bounds(
        payload in proptest::collection::vec(any::<u8>(), 0..64),
        ad_type in any::<u8>(),
    ) {
        let field = advertising::decode_field(&payload, ad_type);
        if !field.is_empty() {
            let start = payload.as_ptr() as usize;
            let end = start + payload.len();
            let f_start = field.as_ptr() as usize;
            prop_assert!(f_start >= start && f_start + field.len() <= end);
        }
        let _ = advertising::decode_name(&payload);
        let _ = advertising::decode_services(&payload);
    }

    #[test]
    fn name_survives_encoding(name in "[a-zA-Z0-9 _-]{1,29}") {
        let mut adv = Vec::new();
        advertising::push_field(&mut adv, ADV_TYPE_FLAGS, &[0x06]);
        advertising::push_field(&mut adv, ADV_TYPE_NAME, name.as_bytes());
        prop_assert_eq!(advertising::decode_name(&adv), name);
    }
}

// ── Sensor payloads ──────────────────────────────────────────

proptest! {
    #[test]
    fn any_five_bytes_decode(payload in proptest::array::uniform5(any::<u8>())) {
        let reading = SensorReading::from_payload(&payload).unwrap();
        let temperature = (payload[0] as u32 + payload[1] as u32 * 255) as f64 / 100.0;
        let battery = (payload[3] as u32 + payload[4] as u32 * 255) as f64 / 1000.0;
        prop_assert_eq!(reading.temperature_c, temperature);
        prop_assert_eq!(reading.humidity_pct, payload[2]);
        prop_assert_eq!(reading.battery_v, battery);
    }

    #[test]
    fn other_lengths_are_rejected(
        payload in proptest::collection::vec(any::<u8>(), 0..16)
            .prop_filter("not five bytes", |p| p.len() != PAYLOAD_LEN),
    ) {
        prop_assert!(SensorReading::from_payload(&payload).is_err());
    }
}

// ── Session filtering ─────────────────────────────────────────

struct NullRadio;

impl Radio for NullRadio {
    fn execute(&mut self, _command: RadioCommand) -> Result<(), RadioError> {
        Ok(())
    }
}

fn arb_foreign_event() -> impl Strategy<Value = RadioEvent> {
    let handle = any::<u16>().prop_filter("foreign", |h| *h != CONN);
    let data = proptest::collection::vec(any::<u8>(), 0..8);
    prop_oneof![
        (handle.clone(), data.clone()).prop_map(|(conn_handle, data)| RadioEvent::Notify {
            conn_handle,
            value_handle: 0x0003,
            data,
        }),
        (handle.clone(), data).prop_map(|(conn_handle, data)| RadioEvent::ReadResult {
            conn_handle,
            value_handle: 0x0003,
            data,
        }),
        handle.clone().prop_map(|conn_handle| RadioEvent::WriteDone {
            conn_handle,
            value_handle: 0x0038,
            status: 0,
        }),
        handle.clone().prop_map(|conn_handle| RadioEvent::CharacteristicResult {
            conn_handle,
            def_handle: 0x0002,
            value_handle: 0x0003,
            properties: 0x12,
            uuid: BleUuid::Uuid16(0x2a00),
        }),
        handle.clone().prop_map(|conn_handle| RadioEvent::CharacteristicDone {
            conn_handle,
            status: 0,
        }),
        handle.prop_map(|conn_handle| RadioEvent::PeripheralDisconnect {
            conn_handle,
            address_type: AddressType::Public,
            address: TARGET,
        }),
    ]
}

proptest! {
    /// Events for any other connection handle leave the session alone and
    /// fire no callback.
    #[test]
    fn foreign_events_fire_nothing(
        events in proptest::collection::vec(arb_foreign_event(), 1..32),
    ) {
        let config = CentralConfig {
            target_address: TARGET,
            target_characteristic: BleUuid::Uuid16(0x2a00),
            control_handle: 0x38,
            scan: ScanParams::default(),
        };
        let mut central = GattCentral::new(NullRadio, config);
        let fired = Arc::new(AtomicUsize::new(0));

        let f = fired.clone();
        central.on_notify(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        central
            .connect(Some(AddressType::Public), Some(TARGET), |_| {})
            .unwrap();
        central.handle_event(RadioEvent::PeripheralConnect {
            conn_handle: CONN,
            address_type: AddressType::Public,
            address: TARGET,
        });

        let f = fired.clone();
        central.enable_notifications_then(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let f = fired.clone();
        central
            .discover_characteristics(move || {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        for event in events {
            central.handle_event(event);
        }

        prop_assert_eq!(fired.load(Ordering::SeqCst), 0);
        prop_assert_eq!(central.state(), CentralState::ConnectedUndiscovered);
        prop_assert_eq!(central.session().map(|s| s.conn_handle), Some(CONN));
        prop_assert_eq!(central.value_handle(), None);
    }
}
