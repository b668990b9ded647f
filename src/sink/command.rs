//! External command sink
//!
//! Runs a volume utility once per target, e.g. `nircmd setappvolume
//! discord.exe 0.45` on Windows or `pactl`/`amixer` wrappers elsewhere.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::VolumeSink;
use crate::config::CommandSinkConfig;
use crate::routing::Target;

pub struct CommandSink {
    config: CommandSinkConfig,
}

impl CommandSink {
    pub fn new(config: CommandSinkConfig) -> Self {
        Self { config }
    }

    /// Arguments for one invocation, placeholders substituted
    fn render_args(&self, target: &Target, level: f32) -> Vec<String> {
        let template = if target.is_master() {
            &self.config.master_args
        } else {
            &self.config.app_args
        };

        let level = level.clamp(0.0, 1.0);
        let level_str = format!("{:.2}", level);
        let percent_str = format!("{}", (level * 100.0).round() as u32);
        let target_str = target.to_string();

        template
            .iter()
            .map(|arg| {
                arg.replace("{target}", &target_str)
                    .replace("{level}", &level_str)
                    .replace("{percent}", &percent_str)
            })
            .collect()
    }
}

#[async_trait]
impl VolumeSink for CommandSink {
    fn name(&self) -> &str {
        "command"
    }

    async fn set_volume(&self, target: &Target, level: f32) -> Result<()> {
        let args = self.render_args(target, level);
        debug!("Running {} {:?}", self.config.program, args);

        // Abandoned calls (timeout, shutdown) must not leave the child behind
        let output = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn '{}'", self.config.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "'{}' exited with {}: {}",
                self.config.program,
                output.status,
                stderr.trim()
            );
        }

        Ok(())
    }
}
