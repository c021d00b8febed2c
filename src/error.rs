//! Error types for serial-udp-bridge.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error on the serial line or the UDP socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured.
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// JSON config file could not be parsed.
    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Cooperative shutdown in progress.
    #[error("Cancelled")]
    Cancelled,

    /// No terminator observed within the cycle bound.
    #[error("Timed out after {} ms waiting for a complete frame", .waited.as_millis())]
    Timeout { waited: Duration },

    /// Frame would exceed the buffer capacity before a terminator was seen.
    #[error("Frame exceeds maximum size of {capacity} bytes")]
    Overflow { capacity: usize },

    /// UDP send reported a byte count different from the frame length.
    #[error("While sending {frame}, expected length = {expected} but sent {actual}")]
    DeliveryMismatch {
        frame: String,
        expected: usize,
        actual: usize,
    },

    /// Serial stream reached end-of-file.
    #[error("Serial transport closed")]
    TransportClosed,
}

impl BridgeError {
    /// Conditions the bridge loop absorbs without ending the process.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::Cancelled
                | BridgeError::Timeout { .. }
                | BridgeError::Overflow { .. }
                | BridgeError::DeliveryMismatch { .. }
        )
    }
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
