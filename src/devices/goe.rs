use super::{ChargeActuator, ChargerStatus, VehicleState, http_client, json_f64};
use crate::controls::Phase;
use crate::error::{PvSurplusError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use std::time::Duration;

/// `frc` values of the go-e API v2
const FORCE_OFF: u8 = 1;
const FORCE_ON: u8 = 2;

/// go-e charger driven through the local HTTP API v2
pub struct GoeCharger {
    base_url: String,
    client: reqwest::Client,
    /// Phase mode last reported or applied; `psm` is only sent on change
    last_phase: Option<Phase>,
    logger: StructuredLogger,
}

impl GoeCharger {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(timeout)?,
            last_phase: None,
            logger: get_logger_with_context(LogContext::new("devices").with_device("goe")),
        })
    }

    async fn set_param(&self, key: &str, value: String) -> Result<()> {
        self.logger.debug(&format!("go-e set {}={}", key, value));
        let resp = self
            .client
            .get(format!("{}/api/set", self.base_url))
            .query(&[(key, value.as_str())])
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(PvSurplusError::actuator(format!(
                "go-e rejected {}={}: HTTP {} {}",
                key,
                value,
                status,
                body.trim()
            )));
        }
        check_set_response(key, &body)
    }
}

/// The set endpoint answers `{"<key>": true}` on success and a string
/// explaining the problem otherwise
pub fn check_set_response(key: &str, body: &str) -> Result<()> {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(body) else {
        // Older firmware answers with an empty body
        return Ok(());
    };
    match parsed.get(key) {
        Some(serde_json::Value::Bool(false)) => Err(PvSurplusError::actuator(format!(
            "go-e did not accept {}",
            key
        ))),
        Some(serde_json::Value::String(reason)) => Err(PvSurplusError::actuator(format!(
            "go-e rejected {}: {}",
            key, reason
        ))),
        _ => Ok(()),
    }
}

/// Normalize a `/api/status` body
pub fn parse_status(body: &serde_json::Value) -> Result<ChargerStatus> {
    let car = body
        .get("car")
        .and_then(json_f64)
        .ok_or_else(|| PvSurplusError::actuator("go-e status without 'car' field"))?;
    let phase = match body.get("psm").and_then(json_f64).map(|v| v as i64) {
        Some(1) => Some(Phase::One),
        Some(2) => Some(Phase::Three),
        _ => None,
    };
    let ampere_allowed = body.get("amp").and_then(json_f64);
    Ok(ChargerStatus {
        vehicle_state: VehicleState::from_car_code(car as i64),
        phase,
        ampere_allowed,
    })
}

/// `psm` value for a phase count
pub fn psm_for(phase: Phase) -> u8 {
    match phase {
        Phase::One => 1,
        Phase::Three => 2,
    }
}

#[async_trait::async_trait]
impl ChargeActuator for GoeCharger {
    async fn status(&mut self) -> Result<ChargerStatus> {
        let resp = self
            .client
            .get(format!("{}/api/status", self.base_url))
            .query(&[("filter", "car,psm,amp")])
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        let status = parse_status(&body)?;
        if status.phase.is_some() {
            self.last_phase = status.phase;
        }
        Ok(status)
    }

    async fn set(&mut self, phase: Phase, amps: f64) -> Result<()> {
        if self.last_phase != Some(phase) {
            self.set_param("psm", psm_for(phase).to_string()).await?;
            self.last_phase = Some(phase);
            self.logger
                .info(&format!("Phase mode switched to {} phase(s)", phase));
        }
        // go-e takes whole amperes
        let whole_amps = amps.floor().max(0.0) as u32;
        self.set_param("amp", whole_amps.to_string()).await?;
        self.set_param("frc", FORCE_ON.to_string()).await?;
        self.logger
            .info(&format!("Charging released at {} A on {} phase(s)", whole_amps, phase));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.set_param("frc", FORCE_OFF.to_string()).await?;
        self.logger.info("Charging stopped");
        Ok(())
    }
}
