//! Surplus charging control for pvsurplus
//!
//! Turns averaged grid and wallbox power into a charging setpoint: whether to
//! charge at all, on how many phases, and at which current. The controller is
//! a pure decision function; the control loop owns the state it is fed.

use crate::config::ControlsConfig;
use crate::error::{PvSurplusError, Result};
use crate::logging::{StructuredLogger, get_logger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Process-wide operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Decisions are applied to the wallbox
    #[default]
    PvSurplus,

    /// Decisions are computed and recorded only
    MonitorOnly,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::PvSurplus => "pv_surplus",
            OperatingMode::MonitorOnly => "monitor_only",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingMode {
    type Err = PvSurplusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pv_surplus" => Ok(OperatingMode::PvSurplus),
            "monitor_only" => Ok(OperatingMode::MonitorOnly),
            other => Err(PvSurplusError::validation(
                "mode".to_string(),
                format!("Unknown mode '{other}', expected pv_surplus or monitor_only"),
            )),
        }
    }
}

/// Number of phases the wallbox charges on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Phase {
    One,
    Three,
}

impl Phase {
    pub fn count(&self) -> u8 {
        match self {
            Phase::One => 1,
            Phase::Three => 3,
        }
    }
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> Self {
        phase.count()
    }
}

impl TryFrom<u8> for Phase {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Phase::One),
            3 => Ok(Phase::Three),
            other => Err(format!("invalid phase count {other}, expected 1 or 3")),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.count())
    }
}

/// Which branch of the decision table produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionBranch {
    /// Was off, surplus reached the start threshold
    Start,
    /// Was on, keeps charging on the same phase count
    Continue,
    /// Was on 1 phase, surplus reached the 1 -> 3 threshold
    SwitchToThree,
    /// Was on 3 phases, surplus fell below the 3 -> 1 threshold
    SwitchToOne,
    /// Was on, surplus fell below the stop threshold
    Stop,
    /// Was off, surplus below the start threshold
    StayOff,
}

impl fmt::Display for DecisionBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionBranch::Start => "start",
            DecisionBranch::Continue => "continue",
            DecisionBranch::SwitchToThree => "switch_to_three",
            DecisionBranch::SwitchToOne => "switch_to_one",
            DecisionBranch::Stop => "stop",
            DecisionBranch::StayOff => "stay_off",
        };
        f.write_str(s)
    }
}

/// State the controller decides from. Owned by the control loop and replaced
/// by `ChargeDecision::next_state` after every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlState {
    pub phase: Phase,
    pub charging_enabled: bool,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            phase: Phase::One,
            charging_enabled: false,
        }
    }
}

/// Output of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeDecision {
    pub phase: Phase,
    /// Setpoint in A; 0 when charging is disabled
    pub current_amps: f64,
    pub charging_enabled: bool,
    /// Surplus the decision was computed from
    pub surplus_watts: f64,
    pub branch: DecisionBranch,
    pub reason: String,
    pub decided_at: DateTime<Utc>,
}

impl ChargeDecision {
    pub fn next_state(&self) -> ControlState {
        ControlState {
            phase: self.phase,
            charging_enabled: self.charging_enabled,
        }
    }
}

/// Resolved controller thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerParams {
    pub voltage: f64,
    pub min_current_amps: f64,
    pub max_current_amps: f64,
    pub current_step_amps: f64,
    pub start_threshold_watts: f64,
    pub start_stop_margin_watts: f64,
    pub phase_switch_margin_watts: f64,
    pub initial_three_phase_watts: f64,
    pub safety_margin_watts: f64,
}

impl From<&ControlsConfig> for ControllerParams {
    fn from(cfg: &ControlsConfig) -> Self {
        let p1_min = cfg.min_current_amps * cfg.voltage;
        let p3_min = 3.0 * p1_min;
        Self {
            voltage: cfg.voltage,
            min_current_amps: cfg.min_current_amps,
            max_current_amps: cfg.max_current_amps,
            current_step_amps: cfg.current_step_amps,
            start_threshold_watts: cfg
                .start_threshold_watts
                .unwrap_or(p1_min + cfg.start_stop_margin_watts),
            start_stop_margin_watts: cfg.start_stop_margin_watts,
            phase_switch_margin_watts: cfg.phase_switch_margin_watts,
            initial_three_phase_watts: cfg
                .initial_three_phase_watts
                .unwrap_or(p3_min + cfg.phase_switch_margin_watts),
            safety_margin_watts: cfg.safety_margin_watts,
        }
    }
}

impl Default for ControllerParams {
    fn default() -> Self {
        Self::from(&ControlsConfig::default())
    }
}

impl ControllerParams {
    /// Power drawn at minimum current on the given phase count
    pub fn phase_min_power(&self, phase: Phase) -> f64 {
        self.min_current_amps * f64::from(phase.count()) * self.voltage
    }

    pub fn stop_threshold_watts(&self) -> f64 {
        self.start_threshold_watts - self.start_stop_margin_watts
    }

    /// 1 -> 3 switch threshold
    pub fn three_phase_up_watts(&self) -> f64 {
        self.phase_min_power(Phase::Three) + self.phase_switch_margin_watts
    }

    /// 3 -> 1 switch threshold
    pub fn three_phase_down_watts(&self) -> f64 {
        self.phase_min_power(Phase::Three) - self.phase_switch_margin_watts
    }

    /// Reject parameter sets the decision table cannot honour
    pub fn validate(&self) -> Result<()> {
        if !(self.voltage > 0.0) {
            return Err(PvSurplusError::config(format!(
                "voltage must be positive, got {}",
                self.voltage
            )));
        }
        if !(self.min_current_amps > 0.0) {
            return Err(PvSurplusError::config(format!(
                "min_current_amps must be positive, got {}",
                self.min_current_amps
            )));
        }
        if self.max_current_amps < self.min_current_amps {
            return Err(PvSurplusError::config(format!(
                "max_current_amps ({}) is below min_current_amps ({})",
                self.max_current_amps, self.min_current_amps
            )));
        }
        if !(self.current_step_amps > 0.0) {
            return Err(PvSurplusError::config(format!(
                "current_step_amps must be positive, got {}",
                self.current_step_amps
            )));
        }
        for (name, value) in [
            ("start_stop_margin_watts", self.start_stop_margin_watts),
            ("phase_switch_margin_watts", self.phase_switch_margin_watts),
            ("safety_margin_watts", self.safety_margin_watts),
        ] {
            if !(value >= 0.0) {
                return Err(PvSurplusError::config(format!(
                    "{name} must not be negative, got {value}"
                )));
            }
        }
        let p1_min = self.phase_min_power(Phase::One);
        if self.stop_threshold_watts() < p1_min {
            return Err(PvSurplusError::config(format!(
                "stop threshold {:.0} W (start {:.0} W minus margin {:.0} W) is below the 1-phase minimum of {:.0} W",
                self.stop_threshold_watts(),
                self.start_threshold_watts,
                self.start_stop_margin_watts,
                p1_min
            )));
        }
        if self.initial_three_phase_watts < self.phase_min_power(Phase::Three) {
            return Err(PvSurplusError::config(format!(
                "initial_three_phase_watts {:.0} W is below the 3-phase minimum of {:.0} W",
                self.initial_three_phase_watts,
                self.phase_min_power(Phase::Three)
            )));
        }
        Ok(())
    }
}

/// Surplus-to-setpoint decision function
#[derive(Debug, Clone)]
pub struct SurplusController {
    params: ControllerParams,
    logger: StructuredLogger,
}

impl SurplusController {
    /// Create a controller; fails on parameters that cannot be honoured
    pub fn new(params: ControllerParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            logger: get_logger("controls"),
        })
    }

    pub fn params(&self) -> &ControllerParams {
        &self.params
    }

    /// Surplus available to the wallbox. Grid is signed (+ import), so export
    /// adds to what the wallbox already draws.
    pub fn surplus_watts(&self, grid_watts: f64, wallbox_watts: f64) -> f64 {
        (wallbox_watts - grid_watts - self.params.safety_margin_watts).max(0.0)
    }

    /// Largest step-aligned current within bounds for the given surplus
    pub fn current_for(&self, surplus_watts: f64, phase: Phase) -> f64 {
        let p = &self.params;
        let raw = surplus_watts / (f64::from(phase.count()) * p.voltage);
        let stepped = (raw / p.current_step_amps).floor() * p.current_step_amps;
        stepped.clamp(p.min_current_amps, p.max_current_amps)
    }

    /// Decide from averaged power and the previous state
    pub fn decide(
        &self,
        mean_grid_watts: f64,
        mean_wallbox_watts: f64,
        state: ControlState,
    ) -> ChargeDecision {
        let p = &self.params;
        let surplus = self.surplus_watts(mean_grid_watts, mean_wallbox_watts);

        let (branch, phase, reason) = if state.charging_enabled {
            if surplus < p.stop_threshold_watts() {
                (
                    DecisionBranch::Stop,
                    state.phase,
                    format!(
                        "surplus {:.0} W below stop threshold {:.0} W",
                        surplus,
                        p.stop_threshold_watts()
                    ),
                )
            } else {
                match state.phase {
                    Phase::One if surplus >= p.three_phase_up_watts() => (
                        DecisionBranch::SwitchToThree,
                        Phase::Three,
                        format!(
                            "surplus {:.0} W reached 1->3 threshold {:.0} W",
                            surplus,
                            p.three_phase_up_watts()
                        ),
                    ),
                    Phase::Three if surplus < p.three_phase_down_watts() => (
                        DecisionBranch::SwitchToOne,
                        Phase::One,
                        format!(
                            "surplus {:.0} W below 3->1 threshold {:.0} W",
                            surplus,
                            p.three_phase_down_watts()
                        ),
                    ),
                    phase => (
                        DecisionBranch::Continue,
                        phase,
                        format!("surplus {:.0} W, staying on {} phase(s)", surplus, phase),
                    ),
                }
            }
        } else if surplus >= p.start_threshold_watts {
            let phase = if surplus >= p.initial_three_phase_watts {
                Phase::Three
            } else {
                Phase::One
            };
            (
                DecisionBranch::Start,
                phase,
                format!(
                    "surplus {:.0} W reached start threshold {:.0} W, starting on {} phase(s)",
                    surplus, p.start_threshold_watts, phase
                ),
            )
        } else {
            (
                DecisionBranch::StayOff,
                state.phase,
                format!(
                    "surplus {:.0} W below start threshold {:.0} W",
                    surplus, p.start_threshold_watts
                ),
            )
        };

        let charging_enabled = !matches!(branch, DecisionBranch::Stop | DecisionBranch::StayOff);
        let current_amps = if charging_enabled {
            self.current_for(surplus, phase)
        } else {
            0.0
        };
        let reason = if charging_enabled {
            format!("{reason}; {current_amps:.0} A")
        } else {
            reason
        };

        self.logger.debug(&format!(
            "Decision {}: grid={:.0}W wallbox={:.0}W surplus={:.0}W -> phase={} current={:.1}A enabled={}",
            branch, mean_grid_watts, mean_wallbox_watts, surplus, phase, current_amps, charging_enabled
        ));

        ChargeDecision {
            phase,
            current_amps,
            charging_enabled,
            surplus_watts: surplus,
            branch,
            reason,
            decided_at: Utc::now(),
        }
    }
}
