//! Radio / Link-Layer Boundary
//!
//! The link-layer stack is an external collaborator. The central driver
//! talks to it in two directions:
//!
//! - commands go out through [`Radio::execute`] as [`RadioCommand`]s
//! - events come back asynchronously as [`RadioEvent`]s on a channel
//!   that the owner of the driver drains and dispatches

use crate::domain::models::{AddressType, AttHandle, BdAddr, BleUuid, ConnHandle};
use thiserror::Error;

/// Active scan parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParams {
    /// Total scan time in milliseconds
    pub duration_ms: u32,
    /// Scan interval in microseconds
    pub interval_us: u32,
    /// Scan window in microseconds
    pub window_us: u32,
    /// Request scan responses (needed for the local name on most sensors)
    pub active: bool,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            duration_ms: 10_000,
            interval_us: 30_000,
            window_us: 30_000,
            active: true,
        }
    }
}

/// GATT write procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write request, acknowledged with a write-done event
    WithResponse,
}

/// Commands produced by the central driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    StartScan(ScanParams),
    StopScan,
    Connect {
        address_type: AddressType,
        address: BdAddr,
    },
    Disconnect {
        conn_handle: ConnHandle,
    },
    DiscoverServices {
        conn_handle: ConnHandle,
    },
    DiscoverCharacteristics {
        conn_handle: ConnHandle,
        start_handle: AttHandle,
        end_handle: AttHandle,
    },
    Read {
        conn_handle: ConnHandle,
        value_handle: AttHandle,
    },
    Write {
        conn_handle: ConnHandle,
        handle: AttHandle,
        value: Vec<u8>,
        mode: WriteMode,
    },
    /// Peripheral role: tell a subscribed central that a local value changed
    NotifyLocal {
        conn_handle: ConnHandle,
        handle: AttHandle,
    },
}

/// Events delivered by the radio stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    ScanResult {
        address_type: AddressType,
        address: BdAddr,
        connectable: bool,
        rssi: i8,
        adv_data: Vec<u8>,
    },
    ScanDone,
    PeripheralConnect {
        conn_handle: ConnHandle,
        address_type: AddressType,
        address: BdAddr,
    },
    PeripheralDisconnect {
        conn_handle: ConnHandle,
        address_type: AddressType,
        address: BdAddr,
    },
    /// A remote central connected to us (peripheral role)
    CentralConnect {
        conn_handle: ConnHandle,
        address_type: AddressType,
        address: BdAddr,
    },
    CentralDisconnect {
        conn_handle: ConnHandle,
        address_type: AddressType,
        address: BdAddr,
    },
    ServiceResult {
        conn_handle: ConnHandle,
        start_handle: AttHandle,
        end_handle: AttHandle,
        uuid: BleUuid,
    },
    ServiceDone {
        conn_handle: ConnHandle,
        status: u16,
    },
    CharacteristicResult {
        conn_handle: ConnHandle,
        def_handle: AttHandle,
        value_handle: AttHandle,
        properties: u8,
        uuid: BleUuid,
    },
    CharacteristicDone {
        conn_handle: ConnHandle,
        status: u16,
    },
    ReadResult {
        conn_handle: ConnHandle,
        value_handle: AttHandle,
        data: Vec<u8>,
    },
    ReadDone {
        conn_handle: ConnHandle,
        value_handle: AttHandle,
        status: u16,
    },
    WriteDone {
        conn_handle: ConnHandle,
        value_handle: AttHandle,
        status: u16,
    },
    Notify {
        conn_handle: ConnHandle,
        value_handle: AttHandle,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("radio is busy")]
    Busy,
    #[error("no link with connection handle {0}")]
    UnknownConnection(ConnHandle),
    #[error("invalid attribute handle {0:#06x}")]
    InvalidHandle(AttHandle),
    #[error("radio stack error: {0}")]
    Stack(String),
}

/// Command side of the link-layer stack
pub trait Radio {
    /// Submit a command. Completion, if any, arrives later as a [`RadioEvent`].
    fn execute(&mut self, command: RadioCommand) -> Result<(), RadioError>;
}
