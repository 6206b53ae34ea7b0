//! Unified error handling for Flexline
//!
//! This crate provides a single error type used across all Flexline components.
//! Variants follow the failure taxonomy of the acquisition and detection path:
//! connection, configuration, grab, recovery, dispatch, actuator and persistence errors.

use std::io;
use std::path::PathBuf;

/// Result type alias using FlexlineError
pub type Result<T> = std::result::Result<T, FlexlineError>;

/// Unified error type for all Flexline operations
#[derive(thiserror::Error, Debug)]
pub enum FlexlineError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Camera Errors
    // ============================================================================
    #[error("Failed to connect to camera {device}: {reason}")]
    Connection {
        device: String,
        reason: String,
    },

    #[error("Camera {device} rejected {parameter}: {reason}")]
    Configuration {
        device: String,
        parameter: String,
        reason: String,
    },

    #[error("Grab timed out after {timeout_ms} ms")]
    GrabTimeout {
        timeout_ms: u64,
    },

    #[error("Grab failed: {0}")]
    GrabFailure(String),

    #[error("Max retries ({max_retries}) exceeded - attempting camera restart")]
    RetryBudgetExceeded {
        max_retries: u32,
    },

    #[error("Failed to restart camera: {0}")]
    RestartFailure(String),

    #[error("Camera is already in use by another slot: {0}")]
    DeviceInUse(String),

    #[error("Camera not found: {0}")]
    DeviceNotFound(String),

    #[error("Camera slot {0} is already running")]
    SlotBusy(String),

    // ============================================================================
    // Detection Errors
    // ============================================================================
    #[error("Detection dispatch failed: {0}")]
    DispatchFailure(String),

    #[error("Detection model not loaded: {0}")]
    ModelNotLoaded(String),

    // ============================================================================
    // Actuator Errors
    // ============================================================================
    #[error("Relay error: {0}")]
    Actuator(String),

    #[error("Serial port error on {port}: {reason}")]
    Serial {
        port: String,
        reason: String,
    },

    // ============================================================================
    // Persistence Errors
    // ============================================================================
    #[error("Fault database error: {0}")]
    Persistence(String),

    #[error("Failed to export faults to {path}: {reason}")]
    Export {
        path: PathBuf,
        reason: String,
    },

    // ============================================================================
    // Configuration and Settings Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl FlexlineError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error for a device
    pub fn connection(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a configuration error for a rejected camera parameter
    pub fn configuration(
        device: impl Into<String>,
        parameter: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::Configuration {
            device: device.into(),
            parameter: parameter.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a persistence error from anything printable
    pub fn persistence(reason: impl ToString) -> Self {
        Self::Persistence(reason.to_string())
    }

    /// Create an export error
    pub fn export(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Export {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a worker should give up on its slot after this error
    pub fn is_fatal_for_slot(&self) -> bool {
        matches!(
            self,
            Self::RestartFailure(_) | Self::Connection { .. } | Self::Configuration { .. }
        )
    }
}

// Allow converting from String to FlexlineError
impl From<String> for FlexlineError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to FlexlineError
impl From<&str> for FlexlineError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_failure_is_fatal() {
        assert!(FlexlineError::RestartFailure("gone".into()).is_fatal_for_slot());
        assert!(!FlexlineError::GrabFailure("crc".into()).is_fatal_for_slot());
        assert!(!FlexlineError::GrabTimeout { timeout_ms: 5000 }.is_fatal_for_slot());
    }

    #[test]
    fn test_retry_budget_message() {
        let err = FlexlineError::RetryBudgetExceeded { max_retries: 3 };
        assert_eq!(
            err.to_string(),
            "Max retries (3) exceeded - attempting camera restart"
        );
    }
}
