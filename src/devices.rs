//! Device adapters
//!
//! Power sources (PV inverter, grid meter, wallbox meter) and the wallbox
//! charge actuator sit behind two traits so the control loop never sees a
//! vendor protocol. Concrete variants are chosen from the configuration.

use crate::aggregator::{Reading, SourceKind};
use crate::config::{Config, WallboxSourceKind};
use crate::controls::Phase;
use crate::error::{PvSurplusError, Result};
use crate::modbus::ModbusClient;
use serde::Serialize;
use std::time::Duration;

pub mod goe;
pub mod grid_meter;
pub mod pv_inverter;
pub mod wallbox;

pub use goe::GoeCharger;
pub use grid_meter::TasmotaGridMeter;
pub use pv_inverter::KostalInverter;
pub use wallbox::{GoeHttpPower, GoeModbusPower};

/// A polled device returning one power value per read
#[async_trait::async_trait]
pub trait PowerSource: Send {
    fn kind(&self) -> SourceKind;

    async fn read(&mut self) -> Result<Reading>;
}

/// Wallbox control surface
#[async_trait::async_trait]
pub trait ChargeActuator: Send {
    /// Current vehicle state, phase mode and allowed current
    async fn status(&mut self) -> Result<ChargerStatus>;

    /// Select phase count and current, and release charging
    async fn set(&mut self, phase: Phase, amps: f64) -> Result<()>;

    /// Stop charging
    async fn stop(&mut self) -> Result<()>;
}

/// Vehicle state as reported by the wallbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VehicleState {
    /// Ready, no vehicle connected
    Idle,
    Charging,
    /// Vehicle connected, waiting for release
    Waiting,
    /// Vehicle connected, charge complete
    Finished,
    #[default]
    Unknown,
}

impl VehicleState {
    /// Map a go-e `car` code
    pub fn from_car_code(code: i64) -> Self {
        match code {
            1 => VehicleState::Idle,
            2 => VehicleState::Charging,
            3 => VehicleState::Waiting,
            4 => VehicleState::Finished,
            _ => VehicleState::Unknown,
        }
    }
}

/// Normalized charger status
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ChargerStatus {
    pub vehicle_state: VehicleState,
    pub phase: Option<Phase>,
    pub ampere_allowed: Option<f64>,
}

/// The full device set the control loop drives
pub struct Devices {
    pub pv: Box<dyn PowerSource>,
    pub grid: Box<dyn PowerSource>,
    pub wallbox: Box<dyn PowerSource>,
    pub charger: Box<dyn ChargeActuator>,
}

/// Build the configured device variants
pub fn build_devices(config: &Config) -> Result<Devices> {
    let timeout = config.timing.device_timeout();

    let pv = Box::new(KostalInverter::new(
        Box::new(ModbusClient::new(&config.pv.modbus, timeout)),
        config.pv.total_power_register,
    ));
    let grid = Box::new(TasmotaGridMeter::new(
        &format!("http://{}", config.grid.ip),
        &config.grid.meter_key,
        &config.grid.power_field,
        timeout,
    )?);
    let wallbox: Box<dyn PowerSource> = match config.wallbox.source {
        WallboxSourceKind::Modbus => Box::new(GoeModbusPower::new(
            Box::new(ModbusClient::new(&config.wallbox.modbus, timeout)),
            config.wallbox.power_register,
            config.wallbox.max_plausible_watts,
        )),
        WallboxSourceKind::Http => Box::new(GoeHttpPower::new(
            &format!("http://{}", config.charger.ip),
            config.wallbox.max_plausible_watts,
            timeout,
        )?),
    };
    let charger = Box::new(GoeCharger::new(
        &format!("http://{}", config.charger.ip),
        timeout,
    )?);

    Ok(Devices {
        pv,
        grid,
        wallbox,
        charger,
    })
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| PvSurplusError::config(format!("Failed to build HTTP client: {}", e)))
}

/// Read a JSON number that some firmware versions send as a string
pub(crate) fn json_f64(value: &serde_json::Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
}
