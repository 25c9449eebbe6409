//! Error types for the transmitter-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Another operation already holds the operation slot.
    ///
    /// Operations are never queued; issuing one while another is
    /// outstanding is a caller bug and is reported immediately.
    #[error("Another BLE operation is already in flight")]
    Busy,

    /// The operation did not settle before its deadline.
    #[error("Operation timed out")]
    Timeout,

    /// The peripheral link was lost while the operation was outstanding.
    #[error("Peripheral disconnected")]
    Disconnected,

    /// The BLE stack reported a failure for the operation.
    #[error("Protocol error: {reason}")]
    Protocol {
        /// Description of the failure reported by the stack.
        reason: String,
    },

    /// A payload was received but its leading byte was not the expected one.
    #[error("Unexpected value: got {got:#04x}, expected {expected:#04x}")]
    UnexpectedValue {
        /// The leading byte that was received.
        got: u8,
        /// The leading byte that was expected.
        expected: u8,
    },

    /// The characteristic has not been discovered on the current peripheral.
    #[error("Characteristic not discovered: {identifier}")]
    NotDiscovered {
        /// Name of the characteristic that was looked up.
        identifier: String,
    },

    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The session configuration was rejected.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration is invalid.
        reason: String,
    },

    /// The session lifecycle task is already running.
    #[error("Session already running")]
    AlreadyRunning,
}

impl Error {
    /// Build a protocol error from anything printable.
    pub(crate) fn protocol(reason: impl std::fmt::Display) -> Self {
        Self::Protocol {
            reason: reason.to_string(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
