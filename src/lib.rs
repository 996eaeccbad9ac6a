//! BLE sensor central
//!
//! Scans for one BLE thermometer, connects, subscribes to its readings and
//! decodes the 5-byte notification into temperature, humidity and battery.

pub mod app;
pub mod domain;
pub mod infrastructure;
