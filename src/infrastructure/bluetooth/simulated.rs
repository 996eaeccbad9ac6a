//! Simulated Link Layer
//!
//! In-process [`Radio`] that emulates one or more thermometer peripherals.
//! Commands are answered by pushing the events a real stack would deliver
//! onto the event channel; nothing is dispatched re-entrantly.
//!
//! Behaviour per command:
//!
//! | Command                  | Events                                         |
//! |--------------------------|------------------------------------------------|
//! | start scan               | one scan result per peripheral, scan done when |
//! |                          | the window elapses                             |
//! | stop scan                | scan done                                      |
//! | connect                  | peripheral connect (if the peer accepts),      |
//! |                          | after the peer's connect delay                 |
//! | disconnect               | peripheral disconnect                          |
//! | discover services/chars  | one result + done                              |
//! | read                     | read result + read done                        |
//! | write                    | write done, then a notify with the payload     |
//! |                          | when notifications were enabled                |

use crate::domain::models::{AddressType, AttHandle, BdAddr, BleUuid, ConnHandle};
use crate::domain::settings::SimulatorSettings;
use crate::infrastructure::bluetooth::advertising::{self, ADV_TYPE_FLAGS, ADV_TYPE_NAME};
use crate::infrastructure::bluetooth::central::{CentralConfig, NOTIFY_ENABLE};
use crate::infrastructure::bluetooth::radio::{
    Radio, RadioCommand, RadioError, RadioEvent, ScanParams,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::debug;

/// Environmental sensing service advertised in discovery
const ENV_SENSING_SERVICE: BleUuid = BleUuid::Uuid16(0x181A);

/// Read | Notify
const CHAR_PROPERTIES: u8 = 0x12;

/// Shared record of every command the radio received
pub type CommandLog = Arc<Mutex<Vec<RadioCommand>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedPeripheral {
    pub address_type: AddressType,
    pub address: BdAddr,
    pub name: String,
    pub rssi: i8,
    pub characteristic: BleUuid,
    pub value_handle: AttHandle,
    pub control_handle: AttHandle,
    /// Sent as the notification and as the read response
    pub payload: Vec<u8>,
    pub accepts_connections: bool,
    /// Delay between the connect command and the connect event
    pub connect_delay: Duration,
    /// Push a notification once notifications are enabled
    pub notifies: bool,
}

impl SimulatedPeripheral {
    /// A thermometer matching `config`, reporting 22.97 C / 45 % / 3.062 V
    pub fn thermometer(config: &CentralConfig) -> Self {
        Self {
            address_type: AddressType::Public,
            address: config.target_address,
            name: "LYWSD03MMC".to_string(),
            rssi: -62,
            characteristic: config.target_characteristic,
            value_handle: 0x0003,
            control_handle: config.control_handle,
            payload: vec![0x02, 0x09, 0x2D, 0x02, 0x0C],
            accepts_connections: true,
            connect_delay: Duration::ZERO,
            notifies: true,
        }
    }

    pub fn from_settings(settings: &SimulatorSettings, config: &CentralConfig) -> Self {
        Self {
            name: settings.name.clone(),
            rssi: settings.rssi,
            value_handle: settings.value_handle,
            payload: settings.payload.clone(),
            accepts_connections: settings.accept_connections,
            connect_delay: Duration::from_millis(settings.connect_delay_ms),
            notifies: settings.notify,
            ..Self::thermometer(config)
        }
    }

    fn advertisement(&self) -> Vec<u8> {
        let mut adv = Vec::new();
        advertising::push_field(&mut adv, ADV_TYPE_FLAGS, &[0x06]);
        advertising::push_field(&mut adv, ADV_TYPE_NAME, self.name.as_bytes());
        adv
    }
}

pub struct SimulatedRadio {
    peripherals: Vec<SimulatedPeripheral>,
    events: mpsc::UnboundedSender<RadioEvent>,
    commands: CommandLog,
    /// Generation of the scan currently running, if any
    active_scan: Arc<Mutex<Option<u64>>>,
    scan_generation: u64,
    links: HashMap<ConnHandle, usize>,
    next_conn_handle: ConnHandle,
}

impl SimulatedRadio {
    pub fn new(
        peripherals: Vec<SimulatedPeripheral>,
    ) -> (Self, mpsc::UnboundedReceiver<RadioEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let radio = Self {
            peripherals,
            events,
            commands: Arc::new(Mutex::new(Vec::new())),
            active_scan: Arc::new(Mutex::new(None)),
            scan_generation: 0,
            links: HashMap::new(),
            next_conn_handle: 0x0040,
        };
        (radio, rx)
    }

    pub fn command_log(&self) -> CommandLog {
        self.commands.clone()
    }

    fn emit(&self, event: RadioEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.events.send(event);
    }

    fn link(&self, conn_handle: ConnHandle) -> Result<&SimulatedPeripheral, RadioError> {
        self.links
            .get(&conn_handle)
            .map(|&idx| &self.peripherals[idx])
            .ok_or(RadioError::UnknownConnection(conn_handle))
    }

    fn start_scan(&mut self, params: ScanParams) -> Result<(), RadioError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RadioError::Stack(format!("no async runtime for scan timer: {}", e)))?;

        {
            let mut active = self
                .active_scan
                .lock()
                .map_err(|_| RadioError::Stack("scan state poisoned".to_string()))?;
            if active.is_some() {
                return Err(RadioError::Busy);
            }
            self.scan_generation += 1;
            *active = Some(self.scan_generation);
        }

        for p in &self.peripherals {
            self.emit(RadioEvent::ScanResult {
                address_type: p.address_type,
                address: p.address,
                connectable: p.accepts_connections,
                rssi: p.rssi,
                adv_data: p.advertisement(),
            });
        }

        let generation = self.scan_generation;
        let active = self.active_scan.clone();
        let events = self.events.clone();
        let window = Duration::from_millis(params.duration_ms as u64);
        runtime.spawn(async move {
            tokio::time::sleep(window).await;
            let expired = match active.lock() {
                Ok(mut current) if *current == Some(generation) => {
                    *current = None;
                    true
                }
                _ => false,
            };
            if expired {
                let _ = events.send(RadioEvent::ScanDone);
            }
        });

        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        let stopped = self
            .active_scan
            .lock()
            .map_err(|_| RadioError::Stack("scan state poisoned".to_string()))?
            .take()
            .is_some();
        if stopped {
            self.emit(RadioEvent::ScanDone);
        }
        Ok(())
    }

    fn connect(&mut self, address_type: AddressType, address: BdAddr) -> Result<(), RadioError> {
        let Some(idx) = self
            .peripherals
            .iter()
            .position(|p| p.address == address && p.address_type == address_type)
        else {
            debug!("Simulated connect to {}: no such peripheral", address);
            return Ok(());
        };
        if !self.peripherals[idx].accepts_connections {
            debug!("Simulated connect to {}: peer not accepting", address);
            return Ok(());
        }
        let delay = self.peripherals[idx].connect_delay;
        let runtime = if delay.is_zero() {
            None
        } else {
            Some(tokio::runtime::Handle::try_current().map_err(|e| {
                RadioError::Stack(format!("no async runtime for connect delay: {}", e))
            })?)
        };

        let conn_handle = self.next_conn_handle;
        self.next_conn_handle = self.next_conn_handle.wrapping_add(1);
        self.links.insert(conn_handle, idx);
        let event = RadioEvent::PeripheralConnect {
            conn_handle,
            address_type,
            address,
        };
        match runtime {
            None => self.emit(event),
            Some(runtime) => {
                let events = self.events.clone();
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(event);
                });
            }
        }
        Ok(())
    }

    fn disconnect(&mut self, conn_handle: ConnHandle) -> Result<(), RadioError> {
        let idx = self
            .links
            .remove(&conn_handle)
            .ok_or(RadioError::UnknownConnection(conn_handle))?;
        let p = &self.peripherals[idx];
        self.emit(RadioEvent::PeripheralDisconnect {
            conn_handle,
            address_type: p.address_type,
            address: p.address,
        });
        Ok(())
    }

    fn write(&self, conn_handle: ConnHandle, handle: AttHandle, value: &[u8]) -> Result<(), RadioError> {
        let p = self.link(conn_handle)?;
        self.emit(RadioEvent::WriteDone {
            conn_handle,
            value_handle: handle,
            status: 0,
        });
        if handle == p.control_handle && value == NOTIFY_ENABLE && p.notifies {
            self.emit(RadioEvent::Notify {
                conn_handle,
                value_handle: p.value_handle,
                data: p.payload.clone(),
            });
        }
        Ok(())
    }
}

impl Radio for SimulatedRadio {
    fn execute(&mut self, command: RadioCommand) -> Result<(), RadioError> {
        if let Ok(mut log) = self.commands.lock() {
            log.push(command.clone());
        }

        match command {
            RadioCommand::StartScan(params) => self.start_scan(params),
            RadioCommand::StopScan => self.stop_scan(),
            RadioCommand::Connect {
                address_type,
                address,
            } => self.connect(address_type, address),
            RadioCommand::Disconnect { conn_handle } => self.disconnect(conn_handle),
            RadioCommand::DiscoverServices { conn_handle } => {
                self.link(conn_handle)?;
                self.emit(RadioEvent::ServiceResult {
                    conn_handle,
                    start_handle: 0x0001,
                    end_handle: 0xFFFF,
                    uuid: ENV_SENSING_SERVICE,
                });
                self.emit(RadioEvent::ServiceDone {
                    conn_handle,
                    status: 0,
                });
                Ok(())
            }
            RadioCommand::DiscoverCharacteristics { conn_handle, .. } => {
                let p = self.link(conn_handle)?;
                let (value_handle, uuid) = (p.value_handle, p.characteristic);
                self.emit(RadioEvent::CharacteristicResult {
                    conn_handle,
                    def_handle: value_handle.saturating_sub(1),
                    value_handle,
                    properties: CHAR_PROPERTIES,
                    uuid,
                });
                self.emit(RadioEvent::CharacteristicDone {
                    conn_handle,
                    status: 0,
                });
                Ok(())
            }
            RadioCommand::Read {
                conn_handle,
                value_handle,
            } => {
                let p = self.link(conn_handle)?;
                if value_handle != p.value_handle {
                    return Err(RadioError::InvalidHandle(value_handle));
                }
                let data = p.payload.clone();
                self.emit(RadioEvent::ReadResult {
                    conn_handle,
                    value_handle,
                    data,
                });
                self.emit(RadioEvent::ReadDone {
                    conn_handle,
                    value_handle,
                    status: 0,
                });
                Ok(())
            }
            RadioCommand::Write {
                conn_handle,
                handle,
                value,
                ..
            } => self.write(conn_handle, handle, &value),
            RadioCommand::NotifyLocal { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CentralConfig {
        CentralConfig {
            target_address: BdAddr([0xA4, 0xC1, 0x38, 0x82, 0x59, 0xDF]),
            target_characteristic: BleUuid::Uuid16(0x2a00),
            control_handle: 0x38,
            scan: ScanParams::default(),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RadioEvent>) -> Vec<RadioEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_window_expires() {
        let (mut radio, mut rx) = SimulatedRadio::new(vec![]);
        let params = ScanParams {
            duration_ms: 500,
            ..ScanParams::default()
        };
        radio.execute(RadioCommand::StartScan(params)).unwrap();
        assert_eq!(
            radio.execute(RadioCommand::StartScan(params)),
            Err(RadioError::Busy)
        );
        assert!(drain(&mut rx).is_empty());

        assert_eq!(rx.recv().await, Some(RadioEvent::ScanDone));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_scan_ends_scan_once() {
        let (mut radio, mut rx) = SimulatedRadio::new(vec![SimulatedPeripheral::thermometer(&config())]);
        radio.execute(RadioCommand::StartScan(ScanParams::default())).unwrap();
        radio.execute(RadioCommand::StopScan).unwrap();
        radio.execute(RadioCommand::StopScan).unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        match &events[0] {
            RadioEvent::ScanResult { adv_data, .. } => {
                assert_eq!(advertising::decode_name(adv_data), "LYWSD03MMC");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(events[1], RadioEvent::ScanDone);

        // The window timer must not report a second scan done
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_pushes_payload() {
        let peripheral = SimulatedPeripheral::thermometer(&config());
        let (mut radio, mut rx) = SimulatedRadio::new(vec![peripheral.clone()]);
        radio
            .execute(RadioCommand::Connect {
                address_type: AddressType::Public,
                address: peripheral.address,
            })
            .unwrap();
        let conn_handle = match drain(&mut rx).as_slice() {
            [RadioEvent::PeripheralConnect { conn_handle, .. }] => *conn_handle,
            other => panic!("unexpected events {:?}", other),
        };

        radio
            .execute(RadioCommand::Write {
                conn_handle,
                handle: 0x38,
                value: NOTIFY_ENABLE.to_vec(),
                mode: crate::infrastructure::bluetooth::radio::WriteMode::WithResponse,
            })
            .unwrap();
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                RadioEvent::WriteDone {
                    conn_handle,
                    value_handle: 0x38,
                    status: 0,
                },
                RadioEvent::Notify {
                    conn_handle,
                    value_handle: 0x0003,
                    data: peripheral.payload.clone(),
                },
            ]
        );

        radio
            .execute(RadioCommand::Disconnect { conn_handle })
            .unwrap();
        assert_eq!(
            radio.execute(RadioCommand::Disconnect { conn_handle }),
            Err(RadioError::UnknownConnection(conn_handle))
        );
        assert_eq!(radio.command_log().lock().unwrap().len(), 4);
    }

    #[test]
    fn test_refusing_peer_never_connects() {
        let mut peripheral = SimulatedPeripheral::thermometer(&config());
        peripheral.accepts_connections = false;
        let (mut radio, mut rx) = SimulatedRadio::new(vec![peripheral.clone()]);
        radio
            .execute(RadioCommand::Connect {
                address_type: AddressType::Public,
                address: peripheral.address,
            })
            .unwrap();
        assert!(drain(&mut rx).is_empty());
    }
}
