//! Sensor Acquisition Service
//!
//! Drives one acquisition cycle on top of [`GattCentral`]:
//!
//! 1. scan for the target, connect when it is found
//! 2. enable notifications and wait for the first valid reading
//! 3. disable notifications and disconnect
//!
//! Both waits are bounded by a deadline of `ticks * tick`. The service owns
//! the radio event receiver and is the only place events are dispatched,
//! so central continuations never run concurrently with each other.

use crate::domain::models::{BdAddr, DeviceIdentity, SensorReading};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::central::{CentralConfig, CentralError, GattCentral};
use crate::infrastructure::bluetooth::radio::{Radio, RadioEvent};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionConfig {
    pub tick: Duration,
    pub connect_timeout_ticks: u32,
    pub data_timeout_ticks: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            connect_timeout_ticks: 100,
            data_timeout_ticks: 100,
        }
    }
}

impl AcquisitionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            tick: Duration::from_millis(settings.tick_ms),
            connect_timeout_ticks: settings.connect_timeout_ticks,
            data_timeout_ticks: settings.data_timeout_ticks,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.tick * self.connect_timeout_ticks
    }

    pub fn data_timeout(&self) -> Duration {
        self.tick * self.data_timeout_ticks
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("sensor {0} not found")]
    NotFound(BdAddr),
    #[error("no connection within {0:?}")]
    ConnectTimeout(Duration),
    #[error("no sensor data within {0:?}")]
    DataTimeout(Duration),
    #[error("link lost before any data arrived")]
    LinkLost,
    #[error("radio event stream closed")]
    RadioClosed,
    #[error(transparent)]
    Central(#[from] CentralError),
}

/// Continuation results, funneled back into the acquisition loop
#[derive(Debug)]
enum Signal {
    ScanComplete(Option<DeviceIdentity>),
    Connected(BdAddr),
    Reading(SensorReading),
}

pub struct SensorAcquisition<R: Radio> {
    central: GattCentral<R>,
    events: mpsc::UnboundedReceiver<RadioEvent>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signals: mpsc::UnboundedReceiver<Signal>,
    config: AcquisitionConfig,
}

impl<R: Radio> SensorAcquisition<R> {
    pub fn new(
        radio: R,
        events: mpsc::UnboundedReceiver<RadioEvent>,
        central_config: CentralConfig,
        config: AcquisitionConfig,
    ) -> Self {
        let mut central = GattCentral::new(radio, central_config);
        let (signal_tx, signals) = mpsc::unbounded_channel();

        let tx = signal_tx.clone();
        central.on_notify(move |data| match SensorReading::from_payload(data) {
            Ok(reading) => {
                debug!("Decoded notification {:02X?}", data);
                let _ = tx.send(Signal::Reading(reading));
            }
            Err(e) => warn!("Dropping notification {:02X?}: {}", data, e),
        });

        Self {
            central,
            events,
            signal_tx,
            signals,
            config,
        }
    }

    pub fn central(&self) -> &GattCentral<R> {
        &self.central
    }

    /// Run one acquisition cycle, logging the failure reason if any
    pub async fn read_sensor(&mut self) -> Option<SensorReading> {
        match self.acquire().await {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!("No reading: {}", e);
                None
            }
        }
    }

    /// Run one acquisition cycle
    pub async fn acquire(&mut self) -> Result<SensorReading, AcquisitionError> {
        self.flush();
        self.wait_connected().await?;
        self.wait_reading().await
    }

    /// Dispatch events that arrived between cycles and drop stale signals
    fn flush(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.central.handle_event(event);
        }
        while let Ok(signal) = self.signals.try_recv() {
            trace!("Discarding stale {:?}", signal);
        }
    }

    /// Dispatch the next radio event. Returns `false` once `deadline` passes.
    async fn next_event(&mut self, deadline: Instant) -> Result<bool, AcquisitionError> {
        match time::timeout_at(deadline, self.events.recv()).await {
            Ok(Some(event)) => {
                self.central.handle_event(event);
                Ok(true)
            }
            Ok(None) => Err(AcquisitionError::RadioClosed),
            Err(_) => Ok(false),
        }
    }

    async fn wait_connected(&mut self) -> Result<(), AcquisitionError> {
        let tx = self.signal_tx.clone();
        self.central.scan(move |device| {
            let _ = tx.send(Signal::ScanComplete(device));
        })?;

        let timeout = self.config.connect_timeout();
        let deadline = Instant::now() + timeout;

        loop {
            if self.central.is_connected() {
                return Ok(());
            }

            if !self.next_event(deadline).await? {
                // No disconnect here: there is no link yet. A link that comes
                // up later is torn down by the central.
                warn!("No connection within {:?}", timeout);
                self.central.abandon_connect();
                return Err(AcquisitionError::ConnectTimeout(timeout));
            }

            while let Ok(signal) = self.signals.try_recv() {
                match signal {
                    Signal::ScanComplete(Some(device)) => {
                        info!("Sensor {} ({}) found, connecting", device.address, device.name);
                        let tx = self.signal_tx.clone();
                        self.central.connect(None, None, move |address| {
                            let _ = tx.send(Signal::Connected(address));
                        })?;
                    }
                    Signal::ScanComplete(None) => {
                        return Err(AcquisitionError::NotFound(
                            self.central.config().target_address,
                        ));
                    }
                    Signal::Connected(address) => debug!("Link to {} is up", address),
                    Signal::Reading(_) => trace!("Reading before subscription, ignored"),
                }
            }
        }
    }

    async fn wait_reading(&mut self) -> Result<SensorReading, AcquisitionError> {
        if !self.central.enable_notifications().is_issued() {
            warn!("Could not subscribe, waiting for data anyway");
        }

        let timeout = self.config.data_timeout();
        let deadline = Instant::now() + timeout;
        let mut reading: Option<SensorReading> = None;

        loop {
            if !self.central.is_connected() {
                return match reading {
                    Some(reading) => Ok(reading),
                    None => Err(AcquisitionError::LinkLost),
                };
            }

            if !self.next_event(deadline).await? {
                if let Some(reading) = reading {
                    warn!("Disconnect not confirmed within {:?}", timeout);
                    return Ok(reading);
                }
                warn!("No sensor data within {:?}", timeout);
                self.central.disconnect();
                return Err(AcquisitionError::DataTimeout(timeout));
            }

            while let Ok(signal) = self.signals.try_recv() {
                if let Signal::Reading(r) = signal {
                    if reading.is_none() {
                        info!(
                            "Temp: {:.2} C, Hum: {} %, Batt: {:.3} V",
                            r.temperature_c, r.humidity_pct, r.battery_v
                        );
                        reading = Some(r);
                        self.central.disable_notifications();
                        self.central.disconnect();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlines_scale_with_tick() {
        let config = AcquisitionConfig {
            tick: Duration::from_millis(50),
            connect_timeout_ticks: 20,
            data_timeout_ticks: 4,
        };
        assert_eq!(config.connect_timeout(), Duration::from_secs(1));
        assert_eq!(config.data_timeout(), Duration::from_millis(200));
    }

    #[test]
    fn test_default_matches_settings_default() {
        let from_settings = AcquisitionConfig::from_settings(&Settings::default());
        assert_eq!(from_settings, AcquisitionConfig::default());
        assert_eq!(from_settings.connect_timeout(), Duration::from_secs(10));
    }
}
