//! Volume sinks - whatever applies a level to a target on this machine
//!
//! The engine only needs "set volume of X to Y". Which OS API or utility does
//! the work is a backend detail.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::SinkConfig;
use crate::routing::Target;

pub mod command;
pub mod console;

pub use command::CommandSink;
pub use console::ConsoleSink;

/// Volume sink trait - all audio backends implement this
///
/// Note: methods take &self so sinks can be shared as `Arc<dyn VolumeSink>`.
#[async_trait]
pub trait VolumeSink: Send + Sync {
    /// Backend name for logs (e.g., "console", "command")
    fn name(&self) -> &str;

    /// Apply `level` (linear, 0.0-1.0) to `target`.
    ///
    /// A target that is not currently running is not an error; the call is
    /// a no-op for it.
    async fn set_volume(&self, target: &Target, level: f32) -> Result<()>;
}

/// Build the sink selected by configuration
pub fn build_sink(config: &SinkConfig) -> Arc<dyn VolumeSink> {
    match config {
        SinkConfig::Console => Arc::new(ConsoleSink::new()),
        SinkConfig::Command(cmd) => Arc::new(CommandSink::new(cmd.clone())),
    }
}
