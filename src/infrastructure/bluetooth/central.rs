//! GATT Central Driver
//!
//! Single-peripheral central state machine. Public operations issue radio
//! commands and arm a continuation; [`GattCentral::handle_event`] is the
//! transition function that matches incoming radio events against the
//! tracked session and fires the armed continuation.
//!
//! ```text
//!  Idle ──scan──▶ Scanning ──match──▶ Found ─────┐
//!                    │                           │ connect
//!                    └──scan done──▶ ScanTimedOut┤
//!                                                ▼
//!                                           Connecting
//!                                                │ peripheral connect
//!                                                ▼
//!                                     ConnectedUndiscovered
//!                                                │ characteristic found
//!                                                ▼
//!                                         ConnectedReady
//!
//!  any connected state ──peripheral disconnect──▶ reset ──▶ Idle
//! ```
//!
//! Continuations for scan, connect, read, write and the two discovery
//! phases are one-shot: taken out of their slot before being invoked.
//! The notification callback is a standing subscription and survives
//! disconnects.

use crate::domain::models::{
    AddressType, AttHandle, BdAddr, BleUuid, ConnHandle, DeviceIdentity, UuidParseError,
};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::advertising;
use crate::infrastructure::bluetooth::radio::{
    Radio, RadioCommand, RadioError, RadioEvent, ScanParams, WriteMode,
};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Client configuration value that enables notifications
pub const NOTIFY_ENABLE: [u8; 2] = 0x0100u16.to_le_bytes();

/// Client configuration value that disables notifications
pub const NOTIFY_DISABLE: [u8; 2] = 0x0000u16.to_le_bytes();

pub type ScanCallback = Box<dyn FnOnce(Option<DeviceIdentity>) + Send>;
pub type ConnectCallback = Box<dyn FnOnce(BdAddr) + Send>;
pub type ReadCallback = Box<dyn FnOnce(Vec<u8>) + Send>;
pub type CompletionCallback = Box<dyn FnOnce() + Send>;
pub type NotifyCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Construction-time configuration of the central
#[derive(Debug, Clone)]
pub struct CentralConfig {
    /// Only scan results from this address are considered
    pub target_address: BdAddr,
    /// Characteristic whose value handle is cached during discovery
    pub target_characteristic: BleUuid,
    /// Handle that receives the notification enable/disable write
    pub control_handle: AttHandle,
    pub scan: ScanParams,
}

impl CentralConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, UuidParseError> {
        Ok(Self {
            target_address: settings.target_address,
            target_characteristic: settings.target_characteristic_uuid.parse()?,
            control_handle: settings.control_handle,
            scan: ScanParams {
                duration_ms: settings.scan.duration_ms,
                interval_us: settings.scan.interval_us,
                window_us: settings.scan.window_us,
                active: settings.scan.active,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CentralState {
    Idle,
    Scanning,
    /// Target seen, scan stop requested
    Found,
    ScanTimedOut,
    Connecting,
    ConnectedUndiscovered,
    /// Value handle of the target characteristic is known
    ConnectedReady,
}

/// The one active link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub conn_handle: ConnHandle,
    pub value_handle: Option<AttHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CentralError {
    #[error("no target address: scan first or pass one explicitly")]
    NoTargetAddress,
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("characteristic value handle not discovered")]
    NoValueHandle,
    #[error(transparent)]
    Radio(#[from] RadioError),
}

/// Result of a write. Failures are logged, never raised; the write
/// continuation of a failed write never fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Issued,
    NotConnected,
    Failed(RadioError),
}

impl WriteOutcome {
    pub fn is_issued(&self) -> bool {
        matches!(self, Self::Issued)
    }
}

#[derive(Default)]
struct Continuations {
    scan: Option<ScanCallback>,
    connect: Option<ConnectCallback>,
    read: Option<ReadCallback>,
    write: Option<CompletionCallback>,
    services_done: Option<CompletionCallback>,
    characteristics_done: Option<CompletionCallback>,
}

#[cfg(test)]
impl Continuations {
    fn is_empty(&self) -> bool {
        self.scan.is_none()
            && self.connect.is_none()
            && self.read.is_none()
            && self.write.is_none()
            && self.services_done.is_none()
            && self.characteristics_done.is_none()
    }
}

pub struct GattCentral<R: Radio> {
    radio: R,
    config: CentralConfig,
    state: CentralState,
    /// Scan result or explicit connect target
    device: Option<DeviceIdentity>,
    session: Option<Session>,
    pending: Continuations,
    notify: Option<NotifyCallback>,
    /// Remote centrals connected to us in the peripheral role
    peer_centrals: Vec<ConnHandle>,
    /// Target of a connect given up on; a late link to it is torn down
    abandoned: Option<(AddressType, BdAddr)>,
}

impl<R: Radio> GattCentral<R> {
    pub fn new(radio: R, config: CentralConfig) -> Self {
        let mut central = Self {
            radio,
            config,
            state: CentralState::Idle,
            device: None,
            session: None,
            pending: Continuations::default(),
            notify: None,
            peer_centrals: Vec::new(),
            abandoned: None,
        };
        central.reset();
        central
    }

    /// Return to Idle. The notification subscription and configuration are kept.
    fn reset(&mut self) {
        self.state = CentralState::Idle;
        self.device = None;
        self.session = None;
        self.pending = Continuations::default();
    }

    pub fn config(&self) -> &CentralConfig {
        &self.config
    }

    pub fn state(&self) -> CentralState {
        self.state
    }

    pub fn device(&self) -> Option<&DeviceIdentity> {
        self.device.as_ref()
    }

    pub fn session(&self) -> Option<Session> {
        self.session
    }

    pub fn value_handle(&self) -> Option<AttHandle> {
        self.session.and_then(|s| s.value_handle)
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Start an active scan for the configured target address.
    ///
    /// `callback` receives the cached identity once the scan ends, or `None`
    /// if the target was not seen within the scan window.
    pub fn scan(
        &mut self,
        callback: impl FnOnce(Option<DeviceIdentity>) + Send + 'static,
    ) -> Result<(), CentralError> {
        if self.is_connected() {
            return Err(CentralError::AlreadyConnected);
        }

        self.device = None;
        self.pending.scan = Some(Box::new(callback));

        info!(
            "Scanning for {} ({} ms)",
            self.config.target_address, self.config.scan.duration_ms
        );
        if let Err(e) = self.radio.execute(RadioCommand::StartScan(self.config.scan)) {
            self.pending.scan = None;
            return Err(e.into());
        }

        self.state = CentralState::Scanning;
        Ok(())
    }

    /// Connect to the given peer, falling back to the cached scan result.
    ///
    /// Fails without touching the radio when no address is known or a
    /// session already exists.
    pub fn connect(
        &mut self,
        address_type: Option<AddressType>,
        address: Option<BdAddr>,
        callback: impl FnOnce(BdAddr) + Send + 'static,
    ) -> Result<(), CentralError> {
        if self.is_connected() {
            warn!("Connect rejected: already connected");
            return Err(CentralError::AlreadyConnected);
        }

        let cached = self.device.as_ref();
        let address_type = address_type.or(cached.map(|d| d.address_type));
        let address = address.or(cached.map(|d| d.address));

        let (Some(address_type), Some(address)) = (address_type, address) else {
            warn!("Connect rejected: no target address");
            return Err(CentralError::NoTargetAddress);
        };

        let name = cached
            .filter(|d| d.address == address)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| "?".to_string());
        self.device = Some(DeviceIdentity {
            address_type,
            address,
            name,
        });
        self.pending.connect = Some(Box::new(callback));
        self.abandoned = None;

        info!("Connecting to {}", address);
        if let Err(e) = self.radio.execute(RadioCommand::Connect {
            address_type,
            address,
        }) {
            self.pending.connect = None;
            return Err(e.into());
        }

        self.state = CentralState::Connecting;
        Ok(())
    }

    /// Give up on a connect that has not completed. The driver returns to
    /// Idle without firing the connect callback; if the link comes up later
    /// it is disconnected immediately.
    pub fn abandon_connect(&mut self) {
        if self.state != CentralState::Connecting {
            return;
        }
        if let Some(device) = self.device.as_ref() {
            debug!("Abandoning connect to {}", device.address);
            self.abandoned = Some((device.address_type, device.address));
        }
        self.reset();
    }

    /// Request link teardown. State is reset when the disconnect event arrives.
    pub fn disconnect(&mut self) {
        let Some(session) = self.session else {
            return;
        };

        debug!("Disconnecting handle {}", session.conn_handle);
        if let Err(e) = self.radio.execute(RadioCommand::Disconnect {
            conn_handle: session.conn_handle,
        }) {
            warn!("Disconnect request failed: {}", e);
        }
    }

    /// Enumerate primary services of the connected peer
    pub fn discover_services(
        &mut self,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<(), CentralError> {
        let session = self.session.ok_or(CentralError::NotConnected)?;

        self.pending.services_done = Some(Box::new(callback));
        if let Err(e) = self.radio.execute(RadioCommand::DiscoverServices {
            conn_handle: session.conn_handle,
        }) {
            self.pending.services_done = None;
            return Err(e.into());
        }
        Ok(())
    }

    /// Enumerate all characteristics, caching the target's value handle
    pub fn discover_characteristics(
        &mut self,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<(), CentralError> {
        let session = self.session.ok_or(CentralError::NotConnected)?;

        self.pending.characteristics_done = Some(Box::new(callback));
        if let Err(e) = self.radio.execute(RadioCommand::DiscoverCharacteristics {
            conn_handle: session.conn_handle,
            start_handle: 0x0001,
            end_handle: 0xFFFF,
        }) {
            self.pending.characteristics_done = None;
            return Err(e.into());
        }
        Ok(())
    }

    /// Read the target characteristic. The callback fires at most once.
    pub fn read(
        &mut self,
        callback: impl FnOnce(Vec<u8>) + Send + 'static,
    ) -> Result<(), CentralError> {
        let session = self.session.ok_or(CentralError::NotConnected)?;
        let value_handle = session.value_handle.ok_or(CentralError::NoValueHandle)?;

        self.pending.read = Some(Box::new(callback));
        if let Err(e) = self.radio.execute(RadioCommand::Read {
            conn_handle: session.conn_handle,
            value_handle,
        }) {
            self.pending.read = None;
            return Err(e.into());
        }
        Ok(())
    }

    /// Register the notification handler, replacing any previous one
    pub fn on_notify(&mut self, callback: impl FnMut(&[u8]) + Send + 'static) {
        self.notify = Some(Box::new(callback));
    }

    pub fn enable_notifications(&mut self) -> WriteOutcome {
        self.write_control(NOTIFY_ENABLE, None)
    }

    /// Like [`Self::enable_notifications`], firing `callback` once the peer
    /// acknowledges the write
    pub fn enable_notifications_then(
        &mut self,
        callback: impl FnOnce() + Send + 'static,
    ) -> WriteOutcome {
        self.write_control(NOTIFY_ENABLE, Some(Box::new(callback)))
    }

    pub fn disable_notifications(&mut self) -> WriteOutcome {
        self.write_control(NOTIFY_DISABLE, None)
    }

    pub fn disable_notifications_then(
        &mut self,
        callback: impl FnOnce() + Send + 'static,
    ) -> WriteOutcome {
        self.write_control(NOTIFY_DISABLE, Some(Box::new(callback)))
    }

    fn write_control(
        &mut self,
        value: [u8; 2],
        callback: Option<CompletionCallback>,
    ) -> WriteOutcome {
        let outcome = self.write(self.config.control_handle, &value, false);
        self.pending.write = if outcome.is_issued() { callback } else { None };
        outcome
    }

    /// Write `value` to `handle` on the connected peer.
    ///
    /// With `notify` set, every central connected to us in the peripheral
    /// role is also told that `handle` changed.
    pub fn write(&mut self, handle: AttHandle, value: &[u8], notify: bool) -> WriteOutcome {
        let outcome = match self.session {
            None => {
                warn!("Write to {:#06x} skipped: not connected", handle);
                WriteOutcome::NotConnected
            }
            Some(session) => match self.radio.execute(RadioCommand::Write {
                conn_handle: session.conn_handle,
                handle,
                value: value.to_vec(),
                mode: WriteMode::WithResponse,
            }) {
                Ok(()) => {
                    debug!("Write {:02X?} to {:#06x}", value, handle);
                    WriteOutcome::Issued
                }
                Err(e) => {
                    warn!("Write to {:#06x} failed: {}", handle, e);
                    WriteOutcome::Failed(e)
                }
            },
        };

        if notify {
            for &conn_handle in &self.peer_centrals {
                if let Err(e) = self
                    .radio
                    .execute(RadioCommand::NotifyLocal { conn_handle, handle })
                {
                    warn!("Local notify to {} failed: {}", conn_handle, e);
                }
            }
        }

        outcome
    }

    // ------------------------------------------------------------------
    // Event dispatch
    // ------------------------------------------------------------------

    /// Transition function. Events that do not belong to the current scan
    /// or session are dropped without side effects.
    pub fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::ScanResult {
                address_type,
                address,
                adv_data,
                ..
            } => self.handle_scan_result(address_type, address, &adv_data),
            RadioEvent::ScanDone => self.handle_scan_done(),
            RadioEvent::PeripheralConnect {
                conn_handle,
                address_type,
                address,
            } => self.handle_peripheral_connect(conn_handle, address_type, address),
            RadioEvent::PeripheralDisconnect { conn_handle, .. } => {
                self.handle_peripheral_disconnect(conn_handle)
            }
            RadioEvent::CentralConnect { conn_handle, .. } => {
                if !self.peer_centrals.contains(&conn_handle) {
                    self.peer_centrals.push(conn_handle);
                }
            }
            RadioEvent::CentralDisconnect { conn_handle, .. } => {
                self.peer_centrals.retain(|&c| c != conn_handle);
            }
            RadioEvent::ServiceResult {
                conn_handle,
                start_handle,
                end_handle,
                uuid,
            } => {
                if self.is_session(conn_handle) {
                    debug!(
                        "Service {} [{:#06x}..{:#06x}]",
                        uuid, start_handle, end_handle
                    );
                }
            }
            RadioEvent::ServiceDone {
                conn_handle,
                status,
            } => {
                if self.accept(conn_handle, "service done") {
                    if status != 0 {
                        warn!("Service discovery finished with status {}", status);
                    }
                    if let Some(callback) = self.pending.services_done.take() {
                        callback();
                    }
                }
            }
            RadioEvent::CharacteristicResult {
                conn_handle,
                value_handle,
                uuid,
                ..
            } => self.handle_characteristic(conn_handle, value_handle, uuid),
            RadioEvent::CharacteristicDone {
                conn_handle,
                status,
            } => {
                if self.accept(conn_handle, "characteristic done") {
                    if status != 0 {
                        warn!("Characteristic discovery finished with status {}", status);
                    }
                    if let Some(callback) = self.pending.characteristics_done.take() {
                        callback();
                    }
                }
            }
            RadioEvent::ReadResult {
                conn_handle,
                value_handle,
                data,
            } => {
                if self.accept(conn_handle, "read result")
                    && self.value_handle() == Some(value_handle)
                {
                    if let Some(callback) = self.pending.read.take() {
                        callback(data);
                    }
                }
            }
            RadioEvent::ReadDone {
                conn_handle,
                value_handle,
                status,
            } => {
                if self.accept(conn_handle, "read done") && status != 0 {
                    warn!("Read of {:#06x} failed with status {}", value_handle, status);
                }
            }
            RadioEvent::WriteDone {
                conn_handle,
                value_handle,
                status,
            } => {
                if self.accept(conn_handle, "write done") {
                    let callback = self.pending.write.take();
                    if status != 0 {
                        warn!("Write to {:#06x} failed with status {}", value_handle, status);
                    } else if let Some(callback) = callback {
                        callback();
                    }
                }
            }
            RadioEvent::Notify {
                conn_handle, data, ..
            } => {
                if self.accept(conn_handle, "notify") {
                    if let Some(callback) = self.notify.as_mut() {
                        callback(&data);
                    }
                }
            }
        }
    }

    fn is_session(&self, conn_handle: ConnHandle) -> bool {
        self.session.map(|s| s.conn_handle) == Some(conn_handle)
    }

    fn accept(&self, conn_handle: ConnHandle, what: &str) -> bool {
        let ok = self.is_session(conn_handle);
        if !ok {
            trace!("Dropping {} for foreign handle {}", what, conn_handle);
        }
        ok
    }

    fn handle_scan_result(&mut self, address_type: AddressType, address: BdAddr, adv: &[u8]) {
        if self.state != CentralState::Scanning || address != self.config.target_address {
            return;
        }

        let name = advertising::decode_name(adv);
        let name = if name.is_empty() { "?".to_string() } else { name };
        info!("Found target {} ({})", address, name);

        self.device = Some(DeviceIdentity {
            address_type,
            address,
            name,
        });
        self.state = CentralState::Found;

        if let Err(e) = self.radio.execute(RadioCommand::StopScan) {
            warn!("Could not stop scan early: {}", e);
        }
    }

    fn handle_scan_done(&mut self) {
        let result = match self.state {
            CentralState::Found => self.device.clone(),
            CentralState::Scanning => {
                info!("Scan finished without seeing {}", self.config.target_address);
                self.state = CentralState::ScanTimedOut;
                None
            }
            _ => {
                trace!("Dropping stale scan done");
                return;
            }
        };

        if let Some(callback) = self.pending.scan.take() {
            callback(result);
        }
    }

    fn handle_peripheral_connect(
        &mut self,
        conn_handle: ConnHandle,
        address_type: AddressType,
        address: BdAddr,
    ) {
        let expected = self.state == CentralState::Connecting
            && self
                .device
                .as_ref()
                .is_some_and(|d| d.address_type == address_type && d.address == address);
        if !expected {
            if self.abandoned == Some((address_type, address)) {
                self.abandoned = None;
                info!("Late link to {} (handle {}), disconnecting", address, conn_handle);
                if let Err(e) = self.radio.execute(RadioCommand::Disconnect { conn_handle }) {
                    warn!("Disconnect of late link failed: {}", e);
                }
            } else {
                trace!("Ignoring connect from {} (handle {})", address, conn_handle);
            }
            return;
        }

        info!("Connected to {} (handle {})", address, conn_handle);
        self.session = Some(Session {
            conn_handle,
            value_handle: None,
        });
        self.state = CentralState::ConnectedUndiscovered;

        if let Some(callback) = self.pending.connect.take() {
            callback(address);
        }
    }

    fn handle_peripheral_disconnect(&mut self, conn_handle: ConnHandle) {
        if !self.accept(conn_handle, "disconnect") {
            return;
        }
        info!("Disconnected (handle {})", conn_handle);
        self.reset();
    }

    fn handle_characteristic(&mut self, conn_handle: ConnHandle, value_handle: AttHandle, uuid: BleUuid) {
        if !self.accept(conn_handle, "characteristic") {
            return;
        }
        if !uuid.matches(self.config.target_characteristic) {
            return;
        }

        debug!("Value handle for {} is {:#06x}", uuid, value_handle);
        if let Some(session) = self.session.as_mut() {
            session.value_handle = Some(value_handle);
        }
        self.state = CentralState::ConnectedReady;
    }
}
