use ble_sensor_central::app::SensorMonitor;
use ble_sensor_central::domain::settings::SettingsService;
use ble_sensor_central::infrastructure::bluetooth::{
    AcquisitionConfig, CentralConfig, SensorAcquisition, SimulatedPeripheral, SimulatedRadio,
};
use ble_sensor_central::infrastructure::logging::init_logger;
use ble_sensor_central::infrastructure::recorder::ReadingRecorder;
use std::path::PathBuf;
use tokio::time::Duration;
use tracing::info;

fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _log_guard = match init_logger(&settings.log_settings) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };
    info!(
        "Starting BLE sensor central (settings: {})",
        settings_service.path().display()
    );

    let central_config = CentralConfig::from_settings(&settings)?;
    let acquisition_config = AcquisitionConfig::from_settings(&settings);

    // No link-layer stack is bundled; readings come from the simulated sensor
    let peripheral = SimulatedPeripheral::from_settings(&settings.simulator, &central_config);

    let recorder = if settings.record_readings {
        let path = match &settings.readings_file {
            Some(file) => PathBuf::from(file),
            None => ReadingRecorder::default_path()?,
        };
        info!("Recording readings to {}", path.display());
        Some(ReadingRecorder::new(path)?)
    } else {
        None
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let (radio, events) = SimulatedRadio::new(vec![peripheral]);
        let acquisition =
            SensorAcquisition::new(radio, events, central_config, acquisition_config);
        let mut monitor = SensorMonitor::new(
            acquisition,
            recorder,
            Duration::from_secs(settings.acquisition_period_secs),
        );
        monitor.run().await
    })?;

    info!("Stopped");
    Ok(())
}
