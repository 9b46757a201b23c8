use super::PowerSource;
use crate::aggregator::{Reading, SourceKind};
use crate::error::{PvSurplusError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::modbus::{RegisterReader, decode_32bit_float_word_swapped};

/// Kostal inverter: total AC power as a word-swapped float32 in two holding
/// registers
pub struct KostalInverter {
    registers: Box<dyn RegisterReader>,
    power_register: u16,
    logger: StructuredLogger,
}

impl KostalInverter {
    pub fn new(registers: Box<dyn RegisterReader>, power_register: u16) -> Self {
        Self {
            registers,
            power_register,
            logger: get_logger_with_context(LogContext::new("devices").with_device("kostal")),
        }
    }
}

/// Convert the decoded register value to a production reading in W
pub fn pv_watts_from_registers(registers: &[u16]) -> Result<f64> {
    let value = decode_32bit_float_word_swapped(registers)?;
    if !value.is_finite() {
        return Err(PvSurplusError::modbus(format!(
            "Inverter returned non-finite power {}",
            value
        )));
    }
    // Standby consumption shows up as a small negative value at night
    Ok(f64::from(value).max(0.0))
}

#[async_trait::async_trait]
impl PowerSource for KostalInverter {
    fn kind(&self) -> SourceKind {
        SourceKind::Pv
    }

    async fn read(&mut self) -> Result<Reading> {
        let registers = self
            .registers
            .read_holding_registers(self.power_register, 2)
            .await?;
        let watts = pv_watts_from_registers(&registers)?;
        self.logger.trace(&format!("PV power {:.0} W", watts));
        Ok(Reading::new(SourceKind::Pv, watts))
    }
}
