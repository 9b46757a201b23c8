//! Modbus TCP client for the PV inverter and the wallbox
//!
//! One `ModbusClient` per device endpoint. The connection is opened lazily on
//! the first read and dropped after any transport failure, so the next
//! sampling tick reconnects. There are no retries inside a read.

use crate::config::ModbusConfig;
use crate::error::{PvSurplusError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::{Context, tcp};
use tokio_modbus::prelude::*;

/// Register access used by the Modbus device adapters
#[async_trait::async_trait]
pub trait RegisterReader: Send {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;
}

#[derive(Debug, Clone, Copy)]
enum RegisterBank {
    Holding,
    Input,
}

/// Modbus TCP client bound to one endpoint and unit id
pub struct ModbusClient {
    client: Option<Context>,
    config: ModbusConfig,
    connection_timeout: Duration,
    operation_timeout: Duration,
    logger: StructuredLogger,
}

impl ModbusClient {
    /// Create a new Modbus client
    pub fn new(config: &ModbusConfig, operation_timeout: Duration) -> Self {
        let logger = get_logger_with_context(
            LogContext::new("modbus")
                .with_field("endpoint", format!("{}:{}", config.ip, config.port))
                .with_field("unit", config.unit_id.to_string()),
        );
        Self {
            client: None,
            config: config.clone(),
            connection_timeout: operation_timeout,
            operation_timeout,
            logger,
        }
    }

    /// Connect to the Modbus server
    pub async fn connect(&mut self) -> Result<()> {
        let address = format!("{}:{}", self.config.ip, self.config.port);
        let socket_addr = resolve(&address).await?;

        self.logger
            .debug(&format!("Connecting to Modbus server at {}", socket_addr));

        match timeout(
            self.connection_timeout,
            tcp::connect_slave(socket_addr, Slave(self.config.unit_id)),
        )
        .await
        {
            Ok(Ok(ctx)) => {
                self.client = Some(ctx);
                self.logger.info("Connected to Modbus server");
                Ok(())
            }
            Ok(Err(e)) => Err(PvSurplusError::modbus(format!(
                "Failed to connect to {}: {}",
                address, e
            ))),
            Err(_) => Err(PvSurplusError::timeout(format!(
                "Connection to {} timed out",
                address
            ))),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn read(&mut self, bank: RegisterBank, address: u16, count: u16) -> Result<Vec<u16>> {
        if self.client.is_none() {
            self.connect().await?;
        }
        // Held outside `self` while in flight; a cancelled call leaves no
        // half-read context behind and the next read reconnects
        let mut ctx = self
            .client
            .take()
            .ok_or_else(|| PvSurplusError::modbus("Not connected to Modbus server"))?;

        let outcome = match bank {
            RegisterBank::Holding => {
                timeout(self.operation_timeout, ctx.read_holding_registers(address, count)).await
            }
            RegisterBank::Input => {
                timeout(self.operation_timeout, ctx.read_input_registers(address, count)).await
            }
        };
        if matches!(outcome, Ok(Ok(_))) {
            self.client = Some(ctx);
        } else {
            self.logger.debug("Dropping Modbus connection after failed read");
        }

        match outcome {
            Ok(Ok(Ok(registers))) => {
                self.logger.trace(&format!(
                    "Read {:?} registers {}..{}: {:?}",
                    bank,
                    address,
                    address.saturating_add(count),
                    registers
                ));
                if registers.len() < count as usize {
                    return Err(PvSurplusError::modbus(format!(
                        "Short read: expected {} registers, got {}",
                        count,
                        registers.len()
                    )));
                }
                Ok(registers)
            }
            // The device answered; the connection stays usable
            Ok(Ok(Err(exception))) => Err(PvSurplusError::modbus(format!(
                "Device returned exception for register {}: {:?}",
                address, exception
            ))),
            Ok(Err(e)) => Err(PvSurplusError::modbus(format!(
                "Failed to read register {}: {}",
                address, e
            ))),
            Err(_) => Err(PvSurplusError::timeout(format!(
                "Read of register {} timed out",
                address
            ))),
        }
    }
}

#[async_trait::async_trait]
impl RegisterReader for ModbusClient {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.read(RegisterBank::Holding, address, count).await
    }

    async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.read(RegisterBank::Input, address, count).await
    }
}

async fn resolve(address: &str) -> Result<SocketAddr> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    tokio::net::lookup_host(address)
        .await
        .map_err(|e| PvSurplusError::modbus(format!("Invalid socket address {}: {}", address, e)))?
        .next()
        .ok_or_else(|| PvSurplusError::modbus(format!("Invalid socket address {}", address)))
}

/// Decode a float32 stored low word first (Kostal byte order)
pub fn decode_32bit_float_word_swapped(registers: &[u16]) -> Result<f32> {
    if registers.len() < 2 {
        return Err(PvSurplusError::modbus(
            "Insufficient registers for 32-bit float",
        ));
    }
    let [hi_a, hi_b] = registers[1].to_be_bytes();
    let [lo_a, lo_b] = registers[0].to_be_bytes();
    Ok(f32::from_be_bytes([hi_a, hi_b, lo_a, lo_b]))
}

/// Decode an unsigned 32-bit value stored high word first
pub fn decode_u32(registers: &[u16]) -> Result<u32> {
    if registers.len() < 2 {
        return Err(PvSurplusError::modbus(
            "Insufficient registers for 32-bit integer",
        ));
    }
    Ok((u32::from(registers[0]) << 16) | u32::from(registers[1]))
}
