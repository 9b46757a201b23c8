use super::*;
use crate::aggregator::{Reading, SourceKind};
use crate::controls::Phase;
use crate::devices::{ChargeActuator, ChargerStatus, PowerSource, VehicleState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Probe {
    watts: Arc<Mutex<Option<f64>>>,
    hang: Arc<AtomicBool>,
}

impl Probe {
    fn set(&self, watts: f64) {
        *self.watts.lock().unwrap() = Some(watts);
    }

    fn fail(&self) {
        *self.watts.lock().unwrap() = None;
    }

    fn hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }
}

struct MockSource {
    kind: SourceKind,
    probe: Probe,
}

#[async_trait::async_trait]
impl PowerSource for MockSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn read(&mut self) -> Result<Reading> {
        if self.probe.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let value = *self.probe.watts.lock().unwrap();
        value
            .map(|w| Reading::new(self.kind, w))
            .ok_or_else(|| PvSurplusError::network("connection refused"))
    }
}

#[derive(Clone, Default)]
struct ChargerProbe {
    status: Arc<Mutex<ChargerStatus>>,
    calls: Arc<Mutex<Vec<String>>>,
    fail_commands: Arc<AtomicBool>,
}

impl ChargerProbe {
    fn vehicle(&self, state: VehicleState) {
        self.status.lock().unwrap().vehicle_state = state;
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

struct MockCharger {
    probe: ChargerProbe,
}

#[async_trait::async_trait]
impl ChargeActuator for MockCharger {
    async fn status(&mut self) -> Result<ChargerStatus> {
        Ok(self.probe.status.lock().unwrap().clone())
    }

    async fn set(&mut self, phase: Phase, amps: f64) -> Result<()> {
        self.probe
            .calls
            .lock()
            .unwrap()
            .push(format!("set {} {}", phase, amps));
        if self.probe.fail_commands.load(Ordering::SeqCst) {
            return Err(PvSurplusError::network("wallbox unreachable"));
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.probe.calls.lock().unwrap().push("stop".to_string());
        if self.probe.fail_commands.load(Ordering::SeqCst) {
            return Err(PvSurplusError::network("wallbox unreachable"));
        }
        Ok(())
    }
}

struct Rig {
    driver: SurplusDriver,
    shared: SharedState,
    pv: Probe,
    grid: Probe,
    wallbox: Probe,
    charger: ChargerProbe,
}

fn rig(mode: OperatingMode) -> Rig {
    let pv = Probe::default();
    let grid = Probe::default();
    let wallbox = Probe::default();
    let charger = ChargerProbe::default();
    pv.set(0.0);
    grid.set(0.0);
    wallbox.set(0.0);

    let devices = Devices {
        pv: Box::new(MockSource {
            kind: SourceKind::Pv,
            probe: pv.clone(),
        }),
        grid: Box::new(MockSource {
            kind: SourceKind::Grid,
            probe: grid.clone(),
        }),
        wallbox: Box::new(MockSource {
            kind: SourceKind::Wallbox,
            probe: wallbox.clone(),
        }),
        charger: Box::new(MockCharger {
            probe: charger.clone(),
        }),
    };
    let shared = SharedState::new(mode);
    let driver = SurplusDriver::new(Config::default(), devices, shared.clone()).unwrap();
    Rig {
        driver,
        shared,
        pv,
        grid,
        wallbox,
        charger,
    }
}

impl Rig {
    async fn ticks(&mut self, n: usize) {
        for _ in 0..n {
            self.driver.fast_tick().await;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn fast_tick_publishes_readings() {
    let mut r = rig(OperatingMode::PvSurplus);
    r.pv.set(4000.0);
    r.grid.set(-1500.0);
    r.wallbox.set(500.0);
    r.charger.vehicle(VehicleState::Charging);

    r.ticks(1).await;

    let snap = r.shared.snapshot();
    assert_eq!(snap.pv_watts, 4000.0);
    assert_eq!(snap.grid_watts, -1500.0);
    assert_eq!(snap.wallbox_watts, 500.0);
    assert_eq!(snap.surplus_watts, 2000.0);
    assert_eq!(snap.house_load_watts, 2000.0);
    assert_eq!(snap.vehicle_state, VehicleState::Charging);
    assert_eq!(snap.total_ticks, 1);
    assert!(!snap.sources.pv.stale);
    assert!(!snap.sources.grid.stale);
    assert!(!snap.sources.wallbox.stale);
}

#[tokio::test(start_paused = true)]
async fn source_timeout_flags_only_the_failed_source() {
    let mut r = rig(OperatingMode::PvSurplus);
    r.pv.set(4000.0);
    r.grid.set(-1000.0);
    r.ticks(1).await;

    r.pv.hang(true);
    r.grid.set(-1200.0);
    r.ticks(1).await;

    let snap = r.shared.snapshot();
    assert_eq!(snap.pv_watts, 4000.0);
    assert!(snap.sources.pv.stale);
    assert_eq!(snap.sources.pv.consecutive_failures, 1);
    assert!(
        snap.sources
            .pv
            .last_error
            .as_deref()
            .unwrap_or_default()
            .contains("did not answer")
    );
    assert_eq!(snap.grid_watts, -1200.0);
    assert!(!snap.sources.grid.stale);
    assert!(!snap.sources.wallbox.stale);
    assert_eq!(snap.total_ticks, 2);
}

#[tokio::test(start_paused = true)]
async fn source_error_keeps_previous_value() {
    let mut r = rig(OperatingMode::PvSurplus);
    r.grid.set(-800.0);
    r.ticks(1).await;
    r.grid.fail();
    r.ticks(2).await;

    let snap = r.shared.snapshot();
    assert_eq!(snap.grid_watts, -800.0);
    assert_eq!(snap.sources.grid.consecutive_failures, 2);
    assert_eq!(snap.sources.grid.total_failures, 2);
    let err = snap.sources.grid.last_error.clone().unwrap_or_default();
    assert!(err.contains("Source unavailable: grid"));
}

#[tokio::test(start_paused = true)]
async fn slow_tick_applies_decision_in_pv_surplus() {
    let mut r = rig(OperatingMode::PvSurplus);
    r.grid.set(-2000.0);
    r.charger.vehicle(VehicleState::Waiting);
    r.ticks(3).await;

    r.driver.slow_tick().await;

    assert_eq!(r.charger.calls(), vec!["set 1 8".to_string()]);
    let snap = r.shared.snapshot();
    let decision = snap.last_decision.clone().unwrap();
    assert!(decision.charging_enabled);
    assert_eq!(decision.current_amps, 8.0);
    assert_eq!(snap.last_average.unwrap().sample_count, 3);
    assert_eq!(snap.evaluations, 1);
    assert_eq!(snap.actuator.last_action.as_deref(), Some("set 1 phase(s) at 8 A"));
    assert_eq!(r.driver.aggregator.grid_samples(), 0);
    assert!(r.driver.control_state.charging_enabled);
}

#[tokio::test(start_paused = true)]
async fn charging_vehicle_is_stopped_without_surplus() {
    let mut r = rig(OperatingMode::PvSurplus);
    r.grid.set(500.0);
    r.charger.vehicle(VehicleState::Charging);
    r.ticks(2).await;

    r.driver.slow_tick().await;

    assert_eq!(r.charger.calls(), vec!["stop".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn idle_wallbox_receives_nothing() {
    let mut r = rig(OperatingMode::PvSurplus);
    r.grid.set(-3000.0);
    r.charger.vehicle(VehicleState::Idle);
    r.ticks(2).await;

    r.driver.slow_tick().await;

    assert!(r.charger.calls().is_empty());
    assert!(r.shared.snapshot().last_decision.is_some());
}

#[tokio::test(start_paused = true)]
async fn monitor_only_records_without_actuation() {
    let mut r = rig(OperatingMode::MonitorOnly);
    r.grid.set(-2000.0);
    r.charger.vehicle(VehicleState::Waiting);
    r.ticks(2).await;

    r.driver.slow_tick().await;

    assert!(r.charger.calls().is_empty());
    let snap = r.shared.snapshot();
    assert!(snap.last_decision.as_ref().unwrap().charging_enabled);
    assert_eq!(snap.mode, OperatingMode::MonitorOnly);
}

#[tokio::test(start_paused = true)]
async fn switching_to_monitor_stops_actuation_at_next_evaluation() {
    let mut r = rig(OperatingMode::PvSurplus);
    r.grid.set(-2000.0);
    r.charger.vehicle(VehicleState::Waiting);
    r.ticks(2).await;
    r.driver.slow_tick().await;
    assert_eq!(r.charger.calls().len(), 1);

    r.shared.set_mode(OperatingMode::MonitorOnly);
    r.grid.set(500.0);
    r.charger.vehicle(VehicleState::Charging);
    r.ticks(2).await;
    r.driver.slow_tick().await;

    assert_eq!(r.charger.calls().len(), 1);
    let snap = r.shared.snapshot();
    assert_eq!(snap.evaluations, 2);
    assert!(!snap.last_decision.as_ref().unwrap().charging_enabled);
    assert_eq!(snap.mode, OperatingMode::MonitorOnly);
}

#[tokio::test(start_paused = true)]
async fn switching_to_pv_surplus_evaluates_immediately() {
    let mut r = rig(OperatingMode::MonitorOnly);
    r.grid.set(-2000.0);
    r.charger.vehicle(VehicleState::Waiting);
    r.ticks(3).await;

    r.shared.set_mode(OperatingMode::PvSurplus);
    r.driver.on_mode_changed().await;

    assert_eq!(r.charger.calls(), vec!["set 1 8".to_string()]);
    let snap = r.shared.snapshot();
    assert_eq!(snap.mode, OperatingMode::PvSurplus);
    assert_eq!(snap.evaluations, 1);
}

#[tokio::test(start_paused = true)]
async fn switching_without_samples_waits_for_next_evaluation() {
    let mut r = rig(OperatingMode::MonitorOnly);
    r.shared.set_mode(OperatingMode::PvSurplus);
    r.driver.on_mode_changed().await;

    assert!(r.charger.calls().is_empty());
    let snap = r.shared.snapshot();
    assert_eq!(snap.mode, OperatingMode::PvSurplus);
    assert_eq!(snap.evaluations, 0);
}

#[tokio::test(start_paused = true)]
async fn evaluation_skipped_without_grid_samples() {
    let mut r = rig(OperatingMode::PvSurplus);
    r.grid.fail();
    r.charger.vehicle(VehicleState::Charging);
    r.ticks(2).await;

    r.driver.slow_tick().await;

    let snap = r.shared.snapshot();
    assert!(snap.last_decision.is_none());
    assert_eq!(snap.skipped_evaluations, 1);
    assert!(r.charger.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn actuator_failure_is_counted_and_state_kept() {
    let mut r = rig(OperatingMode::PvSurplus);
    r.grid.set(-2000.0);
    r.charger.vehicle(VehicleState::Waiting);
    r.charger.fail_commands.store(true, Ordering::SeqCst);
    r.ticks(2).await;

    r.driver.slow_tick().await;

    let snap = r.shared.snapshot();
    assert_eq!(snap.actuator.failures, 1);
    assert!(
        snap.actuator
            .last_error
            .as_deref()
            .unwrap_or_default()
            .starts_with("Actuator failure")
    );
    assert!(snap.last_decision.is_some());
    assert!(!r.driver.control_state.charging_enabled);
}

#[tokio::test(start_paused = true)]
async fn run_loop_ticks_follows_mode_and_stops() {
    let r = rig(OperatingMode::PvSurplus);
    let Rig {
        mut driver,
        shared,
        grid,
        ..
    } = r;
    grid.set(-500.0);
    let shutdown = driver.shutdown_handle();
    let handle = tokio::spawn(async move { driver.run().await });

    tokio::time::sleep(Duration::from_millis(3500)).await;
    shared.set_mode(OperatingMode::MonitorOnly);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snap = shared.snapshot();
    assert!(snap.total_ticks >= 3);
    assert_eq!(snap.mode, OperatingMode::MonitorOnly);

    shutdown.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn run_loop_evaluates_on_its_own_timer() {
    let Rig {
        mut driver,
        shared,
        grid,
        charger,
        ..
    } = rig(OperatingMode::PvSurplus);
    grid.set(-2000.0);
    charger.vehicle(VehicleState::Waiting);
    let shutdown = driver.shutdown_handle();
    let handle = tokio::spawn(async move { driver.run().await });

    tokio::time::sleep(Duration::from_secs(299)).await;
    assert_eq!(shared.snapshot().evaluations, 0);
    assert!(charger.calls().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let snap = shared.snapshot();
    assert_eq!(snap.evaluations, 1);
    // 1 s sampling into a half-open 300 s window; the sample taken at the
    // same instant as the evaluation may land on either side of it
    let samples = snap.last_average.unwrap().sample_count;
    assert!((299..=300).contains(&samples), "got {samples} samples");

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(shared.snapshot().evaluations, 2);
    assert_eq!(
        charger.calls(),
        vec!["set 1 8".to_string(), "set 1 8".to_string()]
    );

    shutdown.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn switching_to_pv_surplus_keeps_a_charging_car_charging() {
    let mut r = rig(OperatingMode::MonitorOnly);
    // Inside the hysteresis band: enough to continue, not enough to start
    r.grid.set(-1500.0);
    r.charger.vehicle(VehicleState::Charging);
    r.charger.status.lock().unwrap().phase = Some(Phase::One);
    r.ticks(3).await;

    r.shared.set_mode(OperatingMode::PvSurplus);
    r.driver.on_mode_changed().await;

    assert_eq!(r.charger.calls(), vec!["set 1 6".to_string()]);
    let snap = r.shared.snapshot();
    assert_eq!(
        snap.last_decision.as_ref().unwrap().branch,
        crate::controls::DecisionBranch::Continue
    );
}
