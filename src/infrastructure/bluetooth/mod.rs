//! Bluetooth Module
//!
//! BLE central that acquires readings from a single thermometer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              SensorAcquisition              │
//! │  (one cycle: scan, connect, subscribe, read │
//! │   first reading, disconnect, with deadlines)│
//! └──────────────────────┬──────────────────────┘
//!                        │ handle_event / operations
//!                        ▼
//! ┌─────────────────────────────────────────────┐
//! │                 GattCentral                 │
//! │  (state machine, one-shot continuations)    │
//! └──────────┬───────────────────────▲──────────┘
//!  RadioCommand                       RadioEvent
//!            ▼                       │
//! ┌─────────────────────────────────────────────┐
//! │      Radio (SimulatedRadio or a real stack) │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`advertising`] - Advertising payload decoding
//! - [`radio`] - Command/event boundary to the link-layer stack
//! - [`central`] - GATT central driver
//! - [`simulated`] - In-process radio with simulated peripherals
//! - [`service`] - Acquisition orchestrator

pub mod advertising;
pub mod central;
pub mod radio;
pub mod service;
pub mod simulated;

pub use central::{CentralConfig, CentralError, CentralState, GattCentral, WriteOutcome};
pub use radio::{Radio, RadioCommand, RadioError, RadioEvent, ScanParams};
pub use service::{AcquisitionConfig, AcquisitionError, SensorAcquisition};
pub use simulated::{SimulatedPeripheral, SimulatedRadio};
