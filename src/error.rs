//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures the logger can run into, from configuration
//! issues to instrument and storage problems.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically parse or type errors in the
//!   TOML file or the environment overrides.
//! - **`Configuration`**: Semantic errors in an otherwise well-formed configuration
//!   (e.g. a non-positive NPLC). Raised by `Settings::validate`.
//! - **`Io`**: Wraps `std::io::Error`, covering both socket and file I/O.
//! - **`Instrument`**: A general category for errors originating from a meter session.
//! - **`Timeout`** / **`ConnectionClosed`**: Transport faults of a single exchange.
//! - **`Storage`** / **`Csv`**: Failures of the day-keyed log store.
//!
//! Malformed numeric replies are not represented here: the acquisition loop
//! substitutes zero for them and only logs the event.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Every failure the acquisition pipeline can surface.
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Timed out after {timeout:?} waiting for '{device}' to answer '{command}'")]
    Timeout {
        device: String,
        command: String,
        timeout: Duration,
    },

    #[error("Connection to '{0}' closed by device")]
    ConnectionClosed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether the failure belongs to a single request/response exchange.
    ///
    /// Those are the faults the acquisition loop tolerates (up to a limit) by
    /// substituting zero for the missing reading.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            DaqError::Io(_) | DaqError::Timeout { .. } | DaqError::ConnectionClosed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_device_and_command() {
        let err = DaqError::Timeout {
            device: "voltmeter".into(),
            command: "FETCH?".into(),
            timeout: Duration::from_millis(250),
        };
        let message = err.to_string();
        assert!(message.contains("voltmeter"));
        assert!(message.contains("FETCH?"));
        assert!(message.contains("250ms"));
    }

    #[test]
    fn classifies_transport_faults() {
        assert!(DaqError::ConnectionClosed("ammeter".into()).is_transport_fault());
        assert!(DaqError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            .is_transport_fault());
        assert!(!DaqError::Configuration("nplc".into()).is_transport_fault());
        assert!(!DaqError::Storage("disk full".into()).is_transport_fault());
    }
}
