use crate::aggregator::Average;
use crate::controls::{ChargeDecision, OperatingMode, Phase};
use crate::devices::VehicleState;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Read health of one polled device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceHealth {
    /// The published value is not from the latest tick
    pub stale: bool,
    pub consecutive_failures: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

impl SourceHealth {
    pub fn new() -> Self {
        // Nothing read yet
        Self {
            stale: true,
            consecutive_failures: 0,
            total_failures: 0,
            last_error: None,
            last_success: None,
        }
    }

    pub fn record_success(&mut self) {
        self.stale = false;
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
    }

    pub fn record_failure(&mut self, error: String) {
        self.stale = true;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.total_failures = self.total_failures.saturating_add(1);
        self.last_error = Some(error);
    }
}

impl Default for SourceHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SourcesHealth {
    pub pv: SourceHealth,
    pub grid: SourceHealth,
    pub wallbox: SourceHealth,
    /// Charger status poll
    pub charger: SourceHealth,
}

/// Outcome of commands sent to the wallbox
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ActuatorHealth {
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_action: Option<String>,
    pub last_action_at: Option<DateTime<Utc>>,
}

/// Everything the query surface can see, replaced wholesale each tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveSnapshot {
    pub pv_watts: f64,
    /// Signed: + import, - export
    pub grid_watts: f64,
    pub wallbox_watts: f64,
    pub surplus_watts: f64,
    pub house_load_watts: f64,
    pub phase: Option<Phase>,
    pub current_amps: Option<f64>,
    pub vehicle_state: VehicleState,
    pub mode: OperatingMode,
    pub last_decision: Option<ChargeDecision>,
    pub last_average: Option<Average>,
    pub sources: SourcesHealth,
    pub actuator: ActuatorHealth,
    pub total_ticks: u64,
    pub evaluations: u64,
    pub skipped_evaluations: u64,
    pub last_updated: DateTime<Utc>,
    pub version: String,
}

impl LiveSnapshot {
    /// Zero/unknown snapshot published before the first tick
    pub fn initial(mode: OperatingMode) -> Self {
        Self {
            pv_watts: 0.0,
            grid_watts: 0.0,
            wallbox_watts: 0.0,
            surplus_watts: 0.0,
            house_load_watts: 0.0,
            phase: None,
            current_amps: None,
            vehicle_state: VehicleState::Unknown,
            mode,
            last_decision: None,
            last_average: None,
            sources: SourcesHealth::default(),
            actuator: ActuatorHealth::default(),
            total_ticks: 0,
            evaluations: 0,
            skipped_evaluations: 0,
            last_updated: Utc::now(),
            version: crate::APP_VERSION.to_string(),
        }
    }
}

/// House consumption without the wallbox
pub fn house_load_watts(pv_watts: f64, grid_watts: f64, wallbox_watts: f64) -> f64 {
    (pv_watts + grid_watts - wallbox_watts).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_health_transitions() {
        let mut health = SourceHealth::new();
        assert!(health.stale);

        health.record_success();
        assert!(!health.stale);
        assert!(health.last_success.is_some());

        health.record_failure("timeout".to_string());
        health.record_failure("timeout".to_string());
        assert!(health.stale);
        assert_eq!(health.consecutive_failures, 2);
        assert_eq!(health.total_failures, 2);

        health.record_success();
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.total_failures, 2);
        assert_eq!(health.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_house_load() {
        // 4 kW PV, exporting 1 kW, wallbox 2 kW -> house 1 kW
        assert_eq!(house_load_watts(4000.0, -1000.0, 2000.0), 1000.0);
        assert_eq!(house_load_watts(0.0, 0.0, 100.0), 0.0);
    }

    #[test]
    fn test_initial_snapshot_serializes() {
        let snap = LiveSnapshot::initial(OperatingMode::MonitorOnly);
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["mode"], "monitor_only");
        assert_eq!(value["vehicle_state"], "unknown");
        assert!(value["last_decision"].is_null());
        assert_eq!(value["sources"]["grid"]["stale"], true);
    }
}
