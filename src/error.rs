//! Custom error types for the application.
//!
//! This module defines the primary error type, `CoaterError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of errors that can occur,
//! from configuration issues to serial I/O failures.
//!
//! ## Error Hierarchy
//!
//! `CoaterError` is an enum that consolidates various error sources:
//!
//! - **`Config`**: Wraps errors from the `config` crate, typically related to
//!   file parsing or format issues in the configuration file.
//! - **`Configuration`**: Represents semantic errors in the configuration,
//!   values that pass parsing but are logically incorrect (e.g. a force range
//!   whose minimum exceeds its maximum). Caught during the validation step.
//! - **`Io`**: Wraps standard `std::io::Error`, covering stdin and other I/O.
//! - **`Serial`**: Wraps `serialport::Error` for port enumeration and open
//!   failures.
//! - **`PortNotFound`**: No attached serial port matched the expected
//!   USB-to-serial descriptor during discovery.
//! - **`OutOfRange`**: An operator-entered run parameter fell outside its
//!   allowed range. Recoverable; the run is aborted and the loop restarts.
//!
//! By using `#[from]`, `CoaterError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the application with
//! the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, CoaterError>;

#[derive(Error, Debug)]
pub enum CoaterError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("No serial port matching the machine descriptor was found")]
    PortNotFound,

    #[error("Serial port not connected")]
    NotConnected,

    #[error("{what} {value} outside allowed range [{min}, {max}]")]
    OutOfRange {
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoaterError::Configuration("baud rate must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration validation error: baud rate must be positive"
        );
    }

    #[test]
    fn test_out_of_range_display() {
        let err = CoaterError::OutOfRange {
            what: "force",
            value: 6.0,
            min: 0.5,
            max: 5.0,
        };
        assert_eq!(err.to_string(), "force 6 outside allowed range [0.5, 5]");
    }
}
