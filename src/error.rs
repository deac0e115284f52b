//! # Error Types
//!
//! Custom error types for VTX Bridge using `thiserror`.
//!
//! Protocol-level noise (bad preamble, bad CRC, out-of-order responses) is
//! deliberately *not* represented here. The receivers count it in per-backend
//! statistics and resynchronize; these variants cover the outer surface only
//! (configuration loading, serial port setup).

use thiserror::Error;

/// Main error type for VTX Bridge
#[derive(Debug, Error)]
pub enum VtxBridgeError {
    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Serial port could not be found/opened
    #[error("Serial port not found: {0}")]
    SerialPortNotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for VTX Bridge
pub type Result<T> = std::result::Result<T, VtxBridgeError>;
