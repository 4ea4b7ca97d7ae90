//! Error types for the signal mapping layer.
//!
//! Nothing in this crate is fatal to the host: every variant describes a
//! condition the caller logs and recovers from locally (drop a signal,
//! skip a poll cycle, retry a write).

use thiserror::Error;

/// Result alias used throughout the crate.
pub type MapResult<T> = Result<T, MapError>;

/// Errors raised while parsing signals, polling read maps or executing writes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapError {
    /// A signal configuration string could not be parsed. The signal is dropped.
    #[error("Malformed config for signal '{signal}': {message}")]
    MalformedConfig { signal: String, message: String },

    /// The link could not be opened.
    #[error("Transport unavailable: {message}")]
    TransportUnavailable { message: String },

    /// A chunk of the planned span could not be read. The poll cycle is aborted.
    #[error("Chunk read failed at address {address} (count {count}): {message}")]
    ChunkReadFailure {
        address: u16,
        count: u16,
        message: String,
    },

    /// A raw or engineering value fell outside its configured band.
    #[error("Value {value} outside permissible limits [{min}; {max}]")]
    RangeRejected { value: f64, min: f64, max: f64 },

    /// A write request outlived its deadline or was cancelled.
    #[error("Write request for '{signal}' expired")]
    WriteExpired { signal: String },

    /// Error reported by the transport collaborator.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Data could not be encoded or decoded.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// A map was used before `init`.
    #[error("Map not initialized")]
    NotInitialized,

    /// No map owns the named signal.
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),
}

impl MapError {
    /// Create a malformed config error.
    pub fn malformed(signal: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedConfig {
            signal: signal.into(),
            message: message.into(),
        }
    }

    /// Create a transport unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::TransportUnavailable {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create an invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a range rejection.
    pub fn out_of_range(value: f64, min: f64, max: f64) -> Self {
        Self::RangeRejected { value, min, max }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = MapError::malformed("pump_speed", "missing reg");
        assert_eq!(
            err.to_string(),
            "Malformed config for signal 'pump_speed': missing reg"
        );

        let err = MapError::out_of_range(150.0, 0.0, 100.0);
        assert_eq!(
            err.to_string(),
            "Value 150 outside permissible limits [0; 100]"
        );

        let err = MapError::ChunkReadFailure {
            address: 14,
            count: 4,
            message: "timeout".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Chunk read failed at address 14 (count 4): timeout"
        );
    }
}
