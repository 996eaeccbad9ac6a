use crate::domain::models::BdAddr;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_sensor_central".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Active scan parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSettings {
    #[serde(default = "default_scan_duration_ms")]
    pub duration_ms: u32,
    #[serde(default = "default_scan_interval_us")]
    pub interval_us: u32,
    #[serde(default = "default_scan_interval_us")]
    pub window_us: u32,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            duration_ms: default_scan_duration_ms(),
            interval_us: default_scan_interval_us(),
            window_us: default_scan_interval_us(),
            active: true,
        }
    }
}

fn default_scan_duration_ms() -> u32 {
    // Shorter than the connect deadline so a missing sensor is reported
    // as not found rather than as a timeout
    8000
}
fn default_scan_interval_us() -> u32 {
    30_000
}

/// Behaviour of the in-process simulated sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorSettings {
    #[serde(default = "default_sim_name")]
    pub name: String,
    #[serde(default = "default_sim_rssi")]
    pub rssi: i8,
    #[serde(default = "default_sim_value_handle")]
    pub value_handle: u16,
    #[serde(default = "default_sim_payload")]
    pub payload: Vec<u8>,
    #[serde(default = "default_true")]
    pub accept_connections: bool,
    #[serde(default)]
    pub connect_delay_ms: u64,
    #[serde(default = "default_true")]
    pub notify: bool,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            name: default_sim_name(),
            rssi: default_sim_rssi(),
            value_handle: default_sim_value_handle(),
            payload: default_sim_payload(),
            accept_connections: true,
            connect_delay_ms: 0,
            notify: true,
        }
    }
}

fn default_sim_name() -> String {
    "LYWSD03MMC".to_string()
}
fn default_sim_rssi() -> i8 {
    -62
}
fn default_sim_value_handle() -> u16 {
    0x0003
}
fn default_sim_payload() -> Vec<u8> {
    vec![0x02, 0x09, 0x2D, 0x02, 0x0C]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Target Sensor
    #[serde(default = "default_target_address")]
    pub target_address: BdAddr,
    #[serde(default = "default_characteristic_uuid")]
    pub target_characteristic_uuid: String,
    #[serde(default = "default_control_handle")]
    pub control_handle: u16,
    #[serde(default)]
    pub scan: ScanSettings,

    // Acquisition
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_timeout_ticks")]
    pub connect_timeout_ticks: u32,
    #[serde(default = "default_timeout_ticks")]
    pub data_timeout_ticks: u32,
    #[serde(default = "default_period_secs")]
    pub acquisition_period_secs: u64,

    // Reading Log
    #[serde(default = "default_true")]
    pub record_readings: bool,
    #[serde(default)]
    pub readings_file: Option<String>,

    #[serde(default)]
    pub simulator: SimulatorSettings,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_address: default_target_address(),
            target_characteristic_uuid: default_characteristic_uuid(),
            control_handle: default_control_handle(),
            scan: ScanSettings::default(),
            tick_ms: default_tick_ms(),
            connect_timeout_ticks: default_timeout_ticks(),
            data_timeout_ticks: default_timeout_ticks(),
            acquisition_period_secs: default_period_secs(),
            record_readings: true,
            readings_file: None,
            simulator: SimulatorSettings::default(),
            log_settings: LogSettings::default(),
        }
    }
}

fn default_target_address() -> BdAddr {
    BdAddr([0xA4, 0xC1, 0x38, 0x82, 0x59, 0xDF])
}
fn default_characteristic_uuid() -> String {
    "2a00".to_string()
}
fn default_control_handle() -> u16 {
    0x38
}
fn default_tick_ms() -> u64 {
    100
}
fn default_timeout_ticks() -> u32 {
    100
}
fn default_period_secs() -> u64 {
    300
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the user config directory, writing defaults on first run
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        let service = Self::load(settings_path)?;
        Ok(service)
    }

    /// Load from an explicit path. A missing file yields defaults and is
    /// created; an unreadable one yields defaults and is left alone.
    pub fn load(settings_path: PathBuf) -> anyhow::Result<Self> {
        let exists = settings_path.exists();
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                if exists {
                    eprintln!(
                        "Ignoring unreadable settings {}: {}",
                        settings_path.display(),
                        e
                    );
                }
                Settings::default()
            }
        };

        let service = Self {
            settings,
            settings_path,
        };
        if !exists {
            service.save()?;
        }
        Ok(service)
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BleSensorCentral");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("ble_sensor_central_{}_{}", name, std::process::id()))
            .join("settings.json")
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.target_address.to_string(), "A4:C1:38:82:59:DF");
        assert_eq!(settings.target_characteristic_uuid, "2a00");
        assert_eq!(settings.control_handle, 0x38);
        assert_eq!(settings.tick_ms, 100);
        assert_eq!(settings.connect_timeout_ticks, 100);
        assert_eq!(settings.data_timeout_ticks, 100);
        assert_eq!(settings.acquisition_period_secs, 300);
        assert_eq!(settings.scan.interval_us, 30_000);
        assert_eq!(settings.scan.window_us, 30_000);
        assert!(settings.scan.active);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let json = r#"{ "target_address": "11:22:33:44:55:66", "tick_ms": 50 }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.target_address, BdAddr([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]));
        assert_eq!(settings.tick_ms, 50);
        assert_eq!(settings.control_handle, 0x38);
        assert_eq!(settings.log_settings.file_name_prefix, "ble_sensor_central");
        assert_eq!(settings.simulator.payload.len(), 5);
    }

    #[test]
    fn test_bad_address_rejected() {
        let json = r#"{ "target_address": "not-an-address" }"#;
        assert!(serde_json::from_str::<Settings>(json).is_err());
    }

    #[test]
    fn test_first_load_writes_defaults() {
        let path = temp_path("first_load");
        let _ = fs::remove_file(&path);

        let mut service = SettingsService::load(path.clone()).unwrap();
        assert!(path.exists());
        assert_eq!(service.get().tick_ms, 100);

        service.get_mut().tick_ms = 250;
        service.save().unwrap();

        let reloaded = SettingsService::load(path.clone()).unwrap();
        assert_eq!(reloaded.get().tick_ms, 250);
        assert_eq!(reloaded.path(), path.as_path());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
