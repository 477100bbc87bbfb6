//! Error types for the ProWaveDAQ logger

use thiserror::Error;

/// Error type for acquisition, transport, configuration and storage
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration file could not be read or deserialized
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration was readable but holds an unusable value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serial port could not be opened
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Filesystem or stream I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV output error
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    /// The device did not answer within the serial timeout
    #[error("Transport timeout waiting for response to function 0x{function:02X}")]
    Timeout { function: u8 },

    /// The device answered with a Modbus exception response
    #[error("Modbus exception: function 0x{function:02X}, code 0x{code:02X}")]
    Exception { function: u8, code: u8 },

    /// Response frame failed its CRC check
    #[error("CRC mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    CrcMismatch { expected: u16, received: u16 },

    /// Response frame was well-formed but did not match the request
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Transport used after it was closed
    #[error("Device is not connected")]
    NotConnected,

    /// `start_reading` called while the acquisition worker is running
    #[error("Reading is already running")]
    AlreadyReading,

    /// The acquisition worker thread panicked before it could be joined
    #[error("Acquisition worker panicked")]
    WorkerPanicked,
}

/// Result type for ProWaveDAQ operations
pub type Result<T> = std::result::Result<T, DaqError>;
