//! # Error Types
//!
//! Custom error types for the mLRS transmitter core using `thiserror`.

use thiserror::Error;

use crate::link::diversity::Antenna;

/// Main error type for the transmitter core
#[derive(Debug, Error)]
pub enum TxError {
    /// MBridge protocol errors
    #[error("MBridge protocol error: {0}")]
    MBridgeProtocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(String),

    /// None of the candidate serial ports could be opened
    #[error("No serial port found (tried: {0})")]
    SerialPortNotFound(String),

    /// Radio setup errors
    #[error("Radio error: {0}")]
    Radio(String),

    /// Received frame carried a foreign sync word. The two link ends do not
    /// agree on the channel selection, this is a logic fault.
    #[error("Frame sync word mismatch on {0:?}")]
    SyncWord(Antenna),

    /// Radio reported a completion that does not fit the current link state
    #[error("Unexpected radio IRQ 0x{status:04X} on {antenna:?}")]
    UnexpectedIrq { antenna: Antenna, status: u16 },

    /// Parameter index outside of the parameter table
    #[error("Parameter index {0} out of range")]
    ParamIndex(u8),

    /// Parameter value rejected by the table
    #[error("Parameter '{name}' rejected: {reason}")]
    ParamRejected { name: String, reason: String },
}

/// Result type alias for the transmitter core
pub type Result<T> = std::result::Result<T, TxError>;
