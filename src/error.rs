//! Error types for the bthome-ws-bridge crate.

use std::net::SocketAddr;

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The WebSocket listener could not bind its address.
    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: SocketAddr,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The network link could not be brought up.
    #[error("Network link failed: {reason}")]
    LinkFailed {
        /// Description of why the link failed.
        reason: String,
    },

    /// A bounded retry loop gave up.
    #[error("Gave up after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::RetriesExhausted { attempts: 3 };
        assert_eq!(err.to_string(), "Gave up after 3 attempts");

        let err = Error::InvalidParameter {
            name: "BRIDGE_PORT".to_string(),
            value: "eighty".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid parameter: BRIDGE_PORT = eighty");
    }
}
