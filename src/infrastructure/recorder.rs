//! Reading Log
//!
//! Appends each acquired reading as one JSON object per line.

use crate::domain::models::{BdAddr, SensorReading};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedReading {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    pub address: BdAddr,
    #[serde(flatten)]
    pub reading: SensorReading,
}

pub struct ReadingRecorder {
    path: PathBuf,
}

impl ReadingRecorder {
    pub fn new(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// `<data dir>/BleSensorCentral/readings.jsonl`
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        path.push("BleSensorCentral");
        path.push("readings.jsonl");
        Ok(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, address: BdAddr, reading: &SensorReading) -> anyhow::Result<()> {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let entry = RecordedReading {
            timestamp_ms,
            address,
            reading: *reading,
        };

        let line = serde_json::to_string(&entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    pub fn load(&self) -> anyhow::Result<Vec<RecordedReading>> {
        let contents = fs::read_to_string(&self.path)?;
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_json_lines() {
        let dir = std::env::temp_dir().join(format!("ble_sensor_recorder_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let recorder = ReadingRecorder::new(dir.join("readings.jsonl")).unwrap();
        let address: BdAddr = "A4:C1:38:82:59:DF".parse().unwrap();

        let first = SensorReading {
            temperature_c: 22.97,
            humidity_pct: 45,
            battery_v: 3.062,
        };
        let second = SensorReading {
            temperature_c: 1.0,
            humidity_pct: 55,
            battery_v: 0.005,
        };
        recorder.record(address, &first).unwrap();
        recorder.record(address, &second).unwrap();

        let contents = fs::read_to_string(recorder.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("\"address\":\"A4:C1:38:82:59:DF\""));
        assert!(contents.contains("\"humidity_pct\":45"));

        let entries = recorder.load().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].reading, first);
        assert_eq!(entries[1].reading, second);
        assert_eq!(entries[1].address, address);

        let _ = fs::remove_dir_all(&dir);
    }
}
