//! # pvsurplus - PV surplus charging controller for go-e wallboxes
//!
//! Samples a PV inverter, a grid meter and a wallbox, averages the readings
//! over a rolling window and periodically decides whether the car should
//! charge, on how many phases and at what current, so that only surplus solar
//! power ends up in the battery.
//!
//! ## Architecture
//!
//! - `aggregator`: Rolling windows over timestamped power readings
//! - `controls`: The surplus decision (start/stop, phase switching, current)
//! - `devices`: Power sources and the charge actuator (Kostal, Tasmota, go-e)
//! - `driver`: The control loop and the shared state it publishes
//! - `modbus`: Modbus TCP register access and word decoding
//! - `web`: HTTP query surface (status, SSE stream, mode switch)
//! - `config`, `logging`, `error`: Ambient plumbing

pub mod aggregator;
pub mod config;
pub mod controls;
pub mod devices;
pub mod driver;
pub mod error;
pub mod logging;
pub mod modbus;
pub mod web;

#[cfg(test)]
mod web_tests;

/// Version string baked in by the build script
pub const APP_VERSION: &str = env!("APP_VERSION");

// Re-export commonly used types
pub use config::Config;
pub use driver::{SharedState, SurplusDriver};
pub use error::{PvSurplusError, Result};
