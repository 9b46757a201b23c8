//! Control loop for pvsurplus
//!
//! A single task owns the devices, the rolling windows and the controller.
//! Two timers drive it: the fast tick samples every device and publishes a
//! snapshot, the slow tick averages the windows and decides. Both are arms of
//! the same `select!`, so they never overlap and the windows need no locks.

use crate::aggregator::Aggregator;
use crate::config::Config;
use crate::controls::{ControlState, OperatingMode, SurplusController};
use crate::devices::Devices;
use crate::error::{PvSurplusError, Result};
use crate::logging::{StructuredLogger, get_logger};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at, timeout};

mod actuation;
mod evaluation;
mod sampling;
pub mod shared;
pub mod snapshot;

#[cfg(test)]
mod tests;

pub use actuation::{ActuationPlan, plan_actuation};
pub use shared::SharedState;
pub use snapshot::{ActuatorHealth, LiveSnapshot, SourceHealth, SourcesHealth};

/// The surplus charging control loop
pub struct SurplusDriver {
    config: Config,
    devices: Devices,
    controller: SurplusController,
    aggregator: Aggregator,
    control_state: ControlState,
    shared: SharedState,
    /// Working copy; a clone is published each tick
    snapshot: LiveSnapshot,
    mode: OperatingMode,
    mode_rx: watch::Receiver<OperatingMode>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
    logger: StructuredLogger,
}

impl SurplusDriver {
    /// Create the loop; fails on controller parameters that cannot be honoured
    pub fn new(config: Config, devices: Devices, shared: SharedState) -> Result<Self> {
        let controller = SurplusController::new(config.controller_params())?;
        let aggregator = Aggregator::new(config.timing.window());
        let mut mode_rx = shared.subscribe_mode();
        let mode = *mode_rx.borrow_and_update();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

        let snapshot = LiveSnapshot::initial(mode);
        shared.publish(snapshot.clone());

        Ok(Self {
            config,
            devices,
            controller,
            aggregator,
            control_state: ControlState::default(),
            shared,
            snapshot,
            mode,
            mode_rx,
            shutdown_tx,
            shutdown_rx,
            logger: get_logger("driver"),
        })
    }

    /// Handle that stops `run` after the in-flight tick
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<()> {
        self.shutdown_tx.clone()
    }

    /// Run until a shutdown signal arrives
    pub async fn run(&mut self) -> Result<()> {
        let timing = self.config.timing.clone();
        self.logger.info(&format!(
            "Starting control loop: sampling every {} ms, evaluating every {} s over a {} s window, mode {}",
            timing.sample_interval_ms, timing.evaluation_interval_secs, timing.window_secs, self.mode
        ));

        let mut fast = interval(timing.sample_interval());
        fast.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First evaluation once a full interval of samples exists
        let mut slow = interval_at(
            Instant::now() + timing.evaluation_interval(),
            timing.evaluation_interval(),
        );
        slow.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = fast.tick() => {
                    self.fast_tick().await;
                }
                _ = slow.tick() => {
                    self.slow_tick().await;
                }
                Ok(()) = self.mode_rx.changed() => {
                    self.on_mode_changed().await;
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }

        self.logger.info("Control loop stopped");
        Ok(())
    }

    fn publish(&mut self) {
        self.snapshot.last_updated = chrono::Utc::now();
        self.shared.publish(self.snapshot.clone());
    }

    fn device_timeout(&self) -> Duration {
        self.config.timing.device_timeout()
    }
}

/// Bound a device call by the configured timeout
async fn bounded<T, F>(limit: Duration, what: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PvSurplusError::timeout(format!(
            "{} did not answer within {} ms",
            what,
            limit.as_millis()
        ))),
    }
}
