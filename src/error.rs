//! Error types and handling for pvsurplus
//!
//! This module defines the error types used throughout the application.
//! Device adapters return the transport-level variants; the control loop
//! folds them into `SourceUnavailable` / `ActuatorFailure` at the tick
//! boundary so nothing escapes a tick.

use thiserror::Error;

/// Result type alias for pvsurplus operations
pub type Result<T> = std::result::Result<T, PvSurplusError>;

/// Main error type for pvsurplus
#[derive(Debug, Error)]
pub enum PvSurplusError {
    /// Configuration-related errors (fatal at startup)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors for a single configuration field
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// A power source could not be read (timeout, malformed response)
    #[error("Source unavailable: {source_kind} - {message}")]
    SourceUnavailable {
        source_kind: String,
        message: String,
    },

    /// A command to the wallbox did not apply
    #[error("Actuator failure: {message}")]
    ActuatorFailure { message: String },

    /// Modbus communication errors
    #[error("Modbus error: {message}")]
    Modbus { message: String },

    /// Network/HTTP client errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl PvSurplusError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        PvSurplusError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        PvSurplusError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new source-unavailable error
    pub fn source_unavailable<K: Into<String>, S: Into<String>>(source_kind: K, message: S) -> Self {
        PvSurplusError::SourceUnavailable {
            source_kind: source_kind.into(),
            message: message.into(),
        }
    }

    /// Create a new actuator failure
    pub fn actuator<S: Into<String>>(message: S) -> Self {
        PvSurplusError::ActuatorFailure {
            message: message.into(),
        }
    }

    /// Create a new Modbus error
    pub fn modbus<S: Into<String>>(message: S) -> Self {
        PvSurplusError::Modbus {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        PvSurplusError::Network {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        PvSurplusError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        PvSurplusError::Io {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for PvSurplusError {
    fn from(err: std::io::Error) -> Self {
        PvSurplusError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for PvSurplusError {
    fn from(err: serde_yaml::Error) -> Self {
        PvSurplusError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for PvSurplusError {
    fn from(err: serde_json::Error) -> Self {
        PvSurplusError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for PvSurplusError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PvSurplusError::timeout(err.to_string())
        } else {
            PvSurplusError::network(err.to_string())
        }
    }
}
