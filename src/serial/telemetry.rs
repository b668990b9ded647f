//! Telemetry line decoding
//!
//! Wire format: `v0|v1|...|vN`, one integer per slider channel. Values are
//! usually 0-100 but the decoder does not range-check them.

use crate::error::{EngineError, EngineResult};

/// Field delimiter used by the slider firmware
pub const FIELD_DELIMITER: char = '|';

/// Decoder for a single, already framed, telemetry line
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryDecoder {
    /// Number of tracked slider channels, `None` to accept every field
    channels: Option<usize>,
}

impl TelemetryDecoder {
    pub fn new(channels: Option<usize>) -> Self {
        Self { channels }
    }

    /// Decode a line into readings ordered by slider index.
    ///
    /// Fields past the tracked channel count are ignored without being
    /// parsed. Short lines yield fewer readings; the missing channels are
    /// simply not reported this cycle. Any unparsable tracked field rejects
    /// the whole line.
    pub fn decode(&self, line: &str) -> EngineResult<Vec<i32>> {
        let limit = self.channels.unwrap_or(usize::MAX);

        line.split(FIELD_DELIMITER)
            .take(limit)
            .enumerate()
            .map(|(field, token)| {
                token
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| EngineError::MalformedTelemetry {
                        line: line.to_string(),
                        field,
                        token: token.to_string(),
                    })
            })
            .collect()
    }
}

/// Render readings in wire format (without terminator)
pub fn encode_line(values: &[i32]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(FIELD_DELIMITER.to_string().as_str())
}
