//! Periodic acquisition loop
//!
//! Runs an acquisition cycle every period until Ctrl-C, recording each
//! successful reading.

use crate::domain::models::SensorReading;
use crate::infrastructure::bluetooth::radio::Radio;
use crate::infrastructure::bluetooth::service::SensorAcquisition;
use crate::infrastructure::recorder::ReadingRecorder;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{error, info};

pub struct SensorMonitor<R: Radio> {
    acquisition: SensorAcquisition<R>,
    recorder: Option<ReadingRecorder>,
    period: Duration,
}

impl<R: Radio> SensorMonitor<R> {
    pub fn new(
        acquisition: SensorAcquisition<R>,
        recorder: Option<ReadingRecorder>,
        period: Duration,
    ) -> Self {
        Self {
            acquisition,
            recorder,
            period,
        }
    }

    /// One acquisition cycle. A failed cycle is logged and yields `None`.
    pub async fn poll_once(&mut self) -> Option<SensorReading> {
        let reading = self.acquisition.read_sensor().await?;

        if let Some(recorder) = &self.recorder {
            let address = self.acquisition.central().config().target_address;
            if let Err(e) = recorder.record(address, &reading) {
                error!("Failed to record reading to {}: {}", recorder.path().display(), e);
            }
        }
        Some(reading)
    }

    /// Poll every period until `shutdown` resolves
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: std::future::Future<Output = ()>,
    {
        let mut interval = time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    return;
                }
                _ = interval.tick() => {}
            }

            // A cycle in flight is allowed to finish; its deadlines bound it
            self.poll_once().await;
        }
    }

    /// Poll every period until Ctrl-C
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!("Polling every {:?}, press Ctrl-C to stop", self.period);
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Ctrl-C handler failed, running until killed: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
        Ok(())
    }
}
