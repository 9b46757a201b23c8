use super::{PowerSource, http_client, json_f64};
use crate::aggregator::{Reading, SourceKind};
use crate::error::{PvSurplusError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::modbus::{RegisterReader, decode_u32};
use std::time::Duration;

/// Index of total power in the go-e `nrg` array
const NRG_TOTAL_POWER: usize = 11;

/// Clamp implausible wallbox readings to 0 W
fn plausible(watts: f64, max_plausible_watts: f64) -> f64 {
    if (0.0..=max_plausible_watts).contains(&watts) {
        watts
    } else {
        0.0
    }
}

/// go-e charging power over Modbus TCP: u32 in 0.01 W across two input
/// registers, high word first
pub struct GoeModbusPower {
    registers: Box<dyn RegisterReader>,
    power_register: u16,
    max_plausible_watts: f64,
    logger: StructuredLogger,
}

impl GoeModbusPower {
    pub fn new(
        registers: Box<dyn RegisterReader>,
        power_register: u16,
        max_plausible_watts: f64,
    ) -> Self {
        Self {
            registers,
            power_register,
            max_plausible_watts,
            logger: get_logger_with_context(
                LogContext::new("devices").with_device("goe_modbus"),
            ),
        }
    }
}

/// Convert the raw register pair to W, dropping implausible values
pub fn wallbox_watts_from_registers(registers: &[u16], max_plausible_watts: f64) -> Result<f64> {
    let raw = decode_u32(registers)?;
    Ok(plausible(f64::from(raw) * 0.01, max_plausible_watts))
}

#[async_trait::async_trait]
impl PowerSource for GoeModbusPower {
    fn kind(&self) -> SourceKind {
        SourceKind::Wallbox
    }

    async fn read(&mut self) -> Result<Reading> {
        let registers = self
            .registers
            .read_input_registers(self.power_register, 2)
            .await?;
        let watts = wallbox_watts_from_registers(&registers, self.max_plausible_watts)?;
        self.logger.trace(&format!(
            "Wallbox power {:.0} W (registers {:?})",
            watts, registers
        ));
        Ok(Reading::new(SourceKind::Wallbox, watts))
    }
}

/// go-e charging power over HTTP API v2
pub struct GoeHttpPower {
    base_url: String,
    client: reqwest::Client,
    max_plausible_watts: f64,
    logger: StructuredLogger,
}

impl GoeHttpPower {
    pub fn new(base_url: &str, max_plausible_watts: f64, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(timeout)?,
            max_plausible_watts,
            logger: get_logger_with_context(LogContext::new("devices").with_device("goe_http")),
        })
    }
}

/// Extract total power from a go-e status body
pub fn parse_nrg_power(body: &serde_json::Value) -> Result<f64> {
    body.get("nrg")
        .and_then(|n| n.as_array())
        .and_then(|n| n.get(NRG_TOTAL_POWER))
        .and_then(json_f64)
        .ok_or_else(|| {
            PvSurplusError::source_unavailable(
                "wallbox",
                format!("nrg[{}] missing from go-e status", NRG_TOTAL_POWER),
            )
        })
}

#[async_trait::async_trait]
impl PowerSource for GoeHttpPower {
    fn kind(&self) -> SourceKind {
        SourceKind::Wallbox
    }

    async fn read(&mut self) -> Result<Reading> {
        let resp = self
            .client
            .get(format!("{}/api/status", self.base_url))
            .query(&[("filter", "nrg")])
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        let watts = plausible(parse_nrg_power(&body)?, self.max_plausible_watts);
        self.logger.trace(&format!("Wallbox power {:.0} W", watts));
        Ok(Reading::new(SourceKind::Wallbox, watts))
    }
}
