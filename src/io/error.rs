// src/io/error.rs
//
// Transport error type shared by every bus driver.

use thiserror::Error;

/// Error raised by a bus source or sender.
///
/// Every variant carries the device label (e.g. `socketcan(can0)`) so that a
/// message surfaced in the status line identifies where it came from.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum IoError {
    /// Opening or configuring the device failed.
    #[error("{device}: connection failed: {message}")]
    Connection { device: String, message: String },
    /// The device went away while frames were being read.
    #[error("{device}: disconnected")]
    Disconnected { device: String },
    /// The device produced or was handed something it cannot represent.
    #[error("{device}: {message}")]
    Protocol { device: String, message: String },
    /// A frame could not be written.
    #[error("{device}: transmit failed: {message}")]
    Transmit { device: String, message: String },
}

impl IoError {
    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn disconnected(device: &str) -> Self {
        IoError::Disconnected {
            device: device.to_string(),
        }
    }

    pub fn protocol(device: &str, message: impl Into<String>) -> Self {
        IoError::Protocol {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn transmit(device: &str, message: impl Into<String>) -> Self {
        IoError::Transmit {
            device: device.to_string(),
            message: message.into(),
        }
    }

    /// Device label the error was raised for.
    pub fn device(&self) -> &str {
        match self {
            IoError::Connection { device, .. }
            | IoError::Disconnected { device }
            | IoError::Protocol { device, .. }
            | IoError::Transmit { device, .. } => device,
        }
    }

    /// True when the error means the link itself is gone (reconnect may help).
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            IoError::Disconnected { .. } | IoError::Connection { .. }
        )
    }
}
