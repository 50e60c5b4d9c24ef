//! Port-specific error types.
//!
//! Kept separate from transport-level errors: a `PortError` describes what the
//! operating system (or the mock) reported, the transport decides whether that
//! is a timeout, a retryable I/O fault or a lost device.

use thiserror::Error;

/// Errors that can occur during serial port operations.
#[derive(Debug, Error)]
pub enum PortError {
    /// The specified serial port was not found on the system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// An I/O error occurred during port operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port configuration failed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// True when the error only means "no data arrived yet".
    pub fn is_idle(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// True when the device is gone and the link cannot be used any more.
    ///
    /// A broken pipe is deliberately not included: it is reported as a
    /// plain I/O failure and left to the retry policy.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::NotConnected | std::io::ErrorKind::NotFound
            ),
            Self::Serial(e) => e.kind() == serialport::ErrorKind::NoDevice,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display() {
        let err = PortError::not_found("/dev/ttyACM0");
        assert_eq!(err.to_string(), "Serial port not found: /dev/ttyACM0");

        let err = PortError::config("Invalid baud rate");
        assert_eq!(err.to_string(), "Configuration error: Invalid baud rate");
    }

    #[test]
    fn test_idle_classification() {
        let would_block = PortError::Io(io::Error::new(io::ErrorKind::WouldBlock, "empty"));
        let timed_out = PortError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        let broken = PortError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));

        assert!(would_block.is_idle());
        assert!(timed_out.is_idle());
        assert!(!broken.is_idle());
    }

    #[test]
    fn test_disconnect_classification() {
        let gone = PortError::Io(io::Error::new(io::ErrorKind::NotConnected, "unplugged"));
        let broken = PortError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));

        assert!(gone.is_disconnect());
        assert!(PortError::not_found("/dev/ttyACM0").is_disconnect());
        assert!(!broken.is_disconnect());
        assert!(!PortError::config("x").is_disconnect());
    }
}
