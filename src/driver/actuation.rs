use crate::controls::{ChargeDecision, Phase};
use crate::devices::VehicleState;
use std::fmt;

/// What to send to the wallbox for a decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuationPlan {
    Nothing,
    Stop,
    Apply { phase: Phase, amps: f64 },
}

impl fmt::Display for ActuationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuationPlan::Nothing => f.write_str("none"),
            ActuationPlan::Stop => f.write_str("stop"),
            ActuationPlan::Apply { phase, amps } => {
                write!(f, "set {} phase(s) at {:.0} A", phase, amps)
            }
        }
    }
}

/// Pick the command for the reported vehicle state.
///
/// Without a vehicle, or with an unknown state, nothing is sent. A connected
/// vehicle that is not charging is released when the decision is enabled.
pub fn plan_actuation(vehicle: VehicleState, decision: &ChargeDecision) -> ActuationPlan {
    match (vehicle, decision.charging_enabled) {
        (VehicleState::Charging, false) => ActuationPlan::Stop,
        (VehicleState::Charging | VehicleState::Waiting | VehicleState::Finished, true) => {
            ActuationPlan::Apply {
                phase: decision.phase,
                amps: decision.current_amps,
            }
        }
        (VehicleState::Waiting | VehicleState::Finished, false)
        | (VehicleState::Idle | VehicleState::Unknown, _) => ActuationPlan::Nothing,
    }
}
