//! Error types for the tmesh core crate.

use thiserror::Error;

/// Configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Device id outside the assignable range
    #[error("device id {0} outside 1..=99")]
    InvalidDeviceId(u8),

    /// Shared key has the wrong length
    #[error("cipher key must be 19 bytes, got {0}")]
    KeyLength(usize),

    /// Allowed message type set is unusable
    #[error("allowed message types: {0}")]
    AllowedTypes(String),

    /// Scheduling parameter out of range
    #[error("schedule: {0}")]
    Schedule(String),

    /// Simulation topology does not match the node set
    #[error("topology: {0}")]
    Topology(String),

    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be rendered as TOML
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Radio transport error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// The transport refused the buffer (queue full, socket would block)
    #[error("transmit refused: {0}")]
    TxRefused(String),

    /// The transport is gone
    #[error("radio unavailable: {0}")]
    Unavailable(String),
}

/// Sensor bus (I2C) error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// No device acknowledged the address
    #[error("no acknowledge from device 0x{0:02x}")]
    Nack(u8),

    /// Transfer failed part way
    #[error("bus transfer failed: {0}")]
    Transfer(String),
}

/// Sensor acquisition error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// Underlying bus failure
    #[error("sensor bus: {0}")]
    Bus(#[from] BusError),

    /// Too many consecutive calibration failures; the node must restart
    #[error("sensor calibration failed {failures} times in a row")]
    CalibrationExhausted {
        /// Consecutive failures counted
        failures: u32,
    },
}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert!(ConfigError::KeyLength(4).to_string().contains("19 bytes"));
        let err = SensorError::CalibrationExhausted { failures: 10 };
        assert!(err.to_string().contains("10 times"));
        let err: SensorError = BusError::Nack(0x38).into();
        assert!(err.to_string().contains("0x38"));
    }
}
