use super::actuation::{ActuationPlan, plan_actuation};
use super::{SurplusDriver, bounded};
use crate::controls::{ChargeDecision, ControlState, OperatingMode, Phase};
use crate::devices::VehicleState;
use crate::error::{PvSurplusError, Result};
use chrono::Utc;
use tokio::time::Instant;

impl SurplusDriver {
    /// Average the windows, decide, and apply the decision unless monitoring
    pub(crate) async fn slow_tick(&mut self) {
        let average = self.aggregator.average(Instant::now());
        if average.sample_count == 0 {
            self.snapshot.skipped_evaluations = self.snapshot.skipped_evaluations.saturating_add(1);
            self.logger
                .warn("No grid samples in the window; skipping evaluation");
            self.publish();
            return;
        }

        let decision = self.controller.decide(
            average.mean_grid_watts,
            average.mean_wallbox_watts,
            self.control_state,
        );
        // Each evaluation starts from an empty window
        self.aggregator.reset();

        let mode = *self.mode_rx.borrow();
        self.mode = mode;
        self.snapshot.mode = mode;

        self.logger.info(&format!(
            "Evaluation over {} samples: grid={:.0}W wallbox={:.0}W -> {} ({})",
            average.sample_count,
            average.mean_grid_watts,
            average.mean_wallbox_watts,
            decision.branch,
            decision.reason
        ));

        match mode {
            OperatingMode::PvSurplus => match self.apply(&decision).await {
                Ok(()) => self.control_state = decision.next_state(),
                Err(e) => {
                    // The wallbox keeps whatever it was doing
                    let actuator = &mut self.snapshot.actuator;
                    actuator.failures = actuator.failures.saturating_add(1);
                    actuator.last_error = Some(e.to_string());
                    self.logger.error(&format!("Failed to apply decision: {}", e));
                }
            },
            OperatingMode::MonitorOnly => {
                self.logger.info(&format!(
                    "Monitor only: would charge={} phase={} current={:.0}A",
                    decision.charging_enabled, decision.phase, decision.current_amps
                ));
                self.control_state = decision.next_state();
            }
        }

        self.snapshot.last_average = Some(average);
        self.snapshot.last_decision = Some(decision);
        self.snapshot.evaluations = self.snapshot.evaluations.saturating_add(1);
        self.publish();
    }

    /// Query the charger and send the command the vehicle state calls for
    async fn apply(&mut self, decision: &ChargeDecision) -> Result<()> {
        let limit = self.device_timeout();
        let status = bounded(limit, "charger", self.devices.charger.status())
            .await
            .map_err(|e| PvSurplusError::actuator(format!("charger status unreadable: {}", e)))?;
        self.snapshot.vehicle_state = status.vehicle_state;

        let plan = plan_actuation(status.vehicle_state, decision);
        let sent = match plan {
            ActuationPlan::Nothing => {
                self.logger.debug(&format!(
                    "Vehicle {:?}: nothing to send",
                    status.vehicle_state
                ));
                return Ok(());
            }
            ActuationPlan::Stop => bounded(limit, "charger", self.devices.charger.stop()).await,
            ActuationPlan::Apply { phase, amps } => {
                bounded(limit, "charger", self.devices.charger.set(phase, amps)).await
            }
        };
        sent.map_err(|e| match e {
            PvSurplusError::ActuatorFailure { .. } => e,
            other => PvSurplusError::actuator(other.to_string()),
        })?;

        if let ActuationPlan::Apply { phase, amps } = plan {
            self.snapshot.phase = Some(phase);
            self.snapshot.current_amps = Some(amps.floor());
        }
        let actuator = &mut self.snapshot.actuator;
        actuator.last_action = Some(plan.to_string());
        actuator.last_action_at = Some(Utc::now());
        self.logger.info(&format!("Applied: {}", plan));
        Ok(())
    }

    /// React to a mode written through the shared state
    pub(crate) async fn on_mode_changed(&mut self) {
        let new_mode = *self.mode_rx.borrow_and_update();
        let previous = self.mode;
        if new_mode == previous {
            return;
        }
        self.mode = new_mode;
        self.snapshot.mode = new_mode;
        self.logger
            .info(&format!("Mode changed from {} to {}", previous, new_mode));

        if previous == OperatingMode::MonitorOnly && new_mode == OperatingMode::PvSurplus {
            // The hypothetical monitor state is discarded; start from what
            // the wallbox is actually doing
            self.control_state = ControlState {
                phase: self.snapshot.phase.unwrap_or(Phase::One),
                charging_enabled: self.snapshot.vehicle_state == VehicleState::Charging,
            };
            self.logger.debug(&format!(
                "Controller state seeded from wallbox: charging={} phase={}",
                self.control_state.charging_enabled, self.control_state.phase
            ));
            if self.aggregator.grid_samples() > 0 {
                self.logger.info("Evaluating immediately after switching to pv_surplus");
                self.slow_tick().await;
                return;
            }
        }
        self.publish();
    }
}
