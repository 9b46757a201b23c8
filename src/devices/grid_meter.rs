use super::{PowerSource, http_client, json_f64};
use crate::aggregator::{Reading, SourceKind};
use crate::error::{PvSurplusError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use std::time::Duration;

/// Tasmota SML reader on the utility meter. Power is signed: positive while
/// importing, negative while exporting.
pub struct TasmotaGridMeter {
    base_url: String,
    client: reqwest::Client,
    meter_key: String,
    power_field: String,
    logger: StructuredLogger,
}

impl TasmotaGridMeter {
    pub fn new(base_url: &str, meter_key: &str, power_field: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(timeout)?,
            meter_key: meter_key.to_string(),
            power_field: power_field.to_string(),
            logger: get_logger_with_context(LogContext::new("devices").with_device("tasmota")),
        })
    }
}

/// Extract `StatusSNS.<meter>.<field>` from a `status 10` response
pub fn parse_grid_power(body: &serde_json::Value, meter_key: &str, power_field: &str) -> Result<f64> {
    let value = body
        .get("StatusSNS")
        .and_then(|s| s.get(meter_key))
        .and_then(|m| m.get(power_field))
        .ok_or_else(|| {
            PvSurplusError::source_unavailable(
                "grid",
                format!("StatusSNS.{}.{} missing from response", meter_key, power_field),
            )
        })?;
    json_f64(value).ok_or_else(|| {
        PvSurplusError::source_unavailable(
            "grid",
            format!("{} is not a number: {}", power_field, value),
        )
    })
}

#[async_trait::async_trait]
impl PowerSource for TasmotaGridMeter {
    fn kind(&self) -> SourceKind {
        SourceKind::Grid
    }

    async fn read(&mut self) -> Result<Reading> {
        let resp = self
            .client
            .get(format!("{}/cm", self.base_url))
            .query(&[("cmnd", "status 10")])
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        let watts = parse_grid_power(&body, &self.meter_key, &self.power_field)?;
        self.logger.trace(&format!("Grid power {:.0} W", watts));
        Ok(Reading::new(SourceKind::Grid, watts))
    }
}
