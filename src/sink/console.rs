//! Console sink - logs every volume command for testing and debugging
//!
//! Useful for:
//! - Checking slider routing without touching the system mixer
//! - Developing on machines without the target applications

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::VolumeSink;
use crate::routing::Target;

pub struct ConsoleSink {
    /// Execution counter for debugging
    execution_count: AtomicU64,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            execution_count: AtomicU64::new(0),
        }
    }

    /// Number of volume commands seen so far
    pub fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::Relaxed)
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VolumeSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn set_volume(&self, target: &Target, level: f32) -> Result<()> {
        let exec_num = self.execution_count.fetch_add(1, Ordering::Relaxed) + 1;

        info!(
            "🎚️ [{}] {} → {:.0}% [exec #{}]",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            target,
            level * 100.0,
            exec_num
        );

        debug!(
            target_name = %target,
            level,
            master = target.is_master(),
            exec_count = exec_num,
            "ConsoleSink execution"
        );

        Ok(())
    }
}
