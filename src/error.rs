//! Error taxonomy for the telemetry and routing engine
//!
//! Every variant is recoverable somewhere below the engine: none of them
//! terminates the process. Only an explicit stop ends a session for good.

use std::time::Duration;
use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Device path invalid, busy or absent
    #[error("failed to open serial port '{path}' at {baud_rate} baud: {reason}")]
    TransportOpenFailed {
        path: String,
        baud_rate: u32,
        reason: String,
    },

    /// Mid-session read/write failure
    #[error("serial I/O error: {0}")]
    TransportIo(#[from] std::io::Error),

    /// No telemetry answered the liveness requests
    #[error("device silent for {missed_ticks} consecutive poll ticks")]
    LivenessTimeout { missed_ticks: u32 },

    /// Device closed the stream
    #[error("serial stream closed by device")]
    TransportClosed,

    /// Buffered partial line grew past the configured limit
    #[error("frame overflow: {buffered} bytes buffered without a line terminator (limit {limit})")]
    FrameOverflow { buffered: usize, limit: usize },

    /// A single line could not be decoded; the line is dropped
    #[error("malformed telemetry line {line:?}: field {field} ({token:?}) is not an integer")]
    MalformedTelemetry {
        line: String,
        field: usize,
        token: String,
    },

    #[error("volume sink failed for '{target}': {reason}")]
    SinkCallFailed { target: String, reason: String },

    #[error("volume sink timed out for '{target}' after {timeout:?}")]
    SinkCallTimeout { target: String, timeout: Duration },

    /// A new configuration was rejected; the previous routing table stays active
    #[error("invalid routing configuration: {0}")]
    InvalidRoutingConfig(String),
}

impl EngineError {
    /// Errors that end the current transport session and force a reconnect
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::TransportIo(_)
                | EngineError::TransportClosed
                | EngineError::LivenessTimeout { .. }
                | EngineError::FrameOverflow { .. }
        )
    }
}
