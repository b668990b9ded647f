//! Configuration management for Slider GW
//!
//! Handles loading, validating, creating and hot-reloading the YAML
//! configuration file.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::routing::RoutingTable;
use crate::serial::frame::DEFAULT_MAX_FRAME_LEN;
use crate::serial::transport::TransportParams;

pub use watcher::ConfigWatcher;

/// Root configuration structure
///
/// Every field has a default, so a partial file is merged over the defaults
/// field by field (a configured `slider_mapping` replaces the default one
/// as a whole).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial device path (`COM15`, `/dev/ttyACM0`, ...)
    pub port: String,
    #[serde(alias = "baudRate")]
    pub baud_rate: u32,
    /// Slider index → target name or list of target names
    pub slider_mapping: BTreeMap<i64, SliderTargets>,
    pub engine: EngineConfig,
    pub sink: SinkConfig,
}

/// One or several target names for a slider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SliderTargets {
    One(String),
    Many(Vec<String>),
}

impl SliderTargets {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        let names: &[String] = match self {
            SliderTargets::One(name) => std::slice::from_ref(name),
            SliderTargets::Many(names) => names,
        };
        names.iter().map(String::as_str)
    }
}

/// Timing and protocol knobs for the telemetry engine
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Poll tick driving liveness requests
    pub poll_interval_ms: u64,
    /// Consecutive silent ticks tolerated before the link is declared dead
    pub liveness_max_missed_ticks: u32,
    /// Request line the device answers with a telemetry line
    pub liveness_command: String,
    /// Largest partial line buffered before the session is reset
    pub max_frame_len: usize,
    /// Upper bound for a single volume sink call
    pub sink_timeout_ms: u64,
    /// First delay between reconnect attempts
    pub reconnect_delay_ms: u64,
    /// Cap for the doubling reconnect delay
    pub reconnect_max_delay_ms: u64,
    /// Number of slider channels on the device; extra fields are ignored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<usize>,
}

/// Volume sink backend selection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Log every volume command without touching the OS
    #[default]
    Console,
    /// Run an external volume utility once per target
    Command(CommandSinkConfig),
}

/// External command backend.
///
/// Arguments may contain `{target}`, `{level}` (0.0-1.0) and `{percent}`
/// (0-100) placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandSinkConfig {
    pub program: String,
    #[serde(default)]
    pub master_args: Vec<String>,
    #[serde(default)]
    pub app_args: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut slider_mapping = BTreeMap::new();
        slider_mapping.insert(0, SliderTargets::One("master".to_string()));
        slider_mapping.insert(1, SliderTargets::One("discord.exe".to_string()));
        slider_mapping.insert(
            2,
            SliderTargets::Many(vec!["chrome.exe".to_string(), "brave.exe".to_string()]),
        );
        slider_mapping.insert(
            3,
            SliderTargets::Many(vec![
                "pathofexile_x64.exe".to_string(),
                "rocketleague.exe".to_string(),
            ]),
        );

        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            slider_mapping,
            engine: EngineConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            liveness_max_missed_ticks: 15,
            liveness_command: "vol\n".to_string(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            sink_timeout_ms: 500,
            reconnect_delay_ms: 1000,
            reconnect_max_delay_ms: 10_000,
            channels: None,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms.max(self.reconnect_delay_ms))
    }
}

impl AppConfig {
    /// Parse configuration from YAML text with validation
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        // An empty file deserializes to unit; treat it as "all defaults"
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml_str(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load the configuration, writing the defaults first if the file is missing
    pub async fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            return Self::load(path).await;
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let config = AppConfig::default();
        config.save(path).await?;
        info!("Created default config at {}", path.display());
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> EngineResult<()> {
        if self.port.trim().is_empty() {
            return Err(invalid("port cannot be empty"));
        }
        if self.baud_rate == 0 {
            return Err(invalid("baud_rate must be greater than zero"));
        }

        let engine = &self.engine;
        if engine.poll_interval_ms == 0 {
            return Err(invalid("engine.poll_interval_ms must be greater than zero"));
        }
        if engine.liveness_max_missed_ticks == 0 {
            return Err(invalid("engine.liveness_max_missed_ticks must be greater than zero"));
        }
        if engine.max_frame_len == 0 {
            return Err(invalid("engine.max_frame_len must be greater than zero"));
        }
        if engine.sink_timeout_ms == 0 {
            return Err(invalid("engine.sink_timeout_ms must be greater than zero"));
        }
        if engine.reconnect_delay_ms == 0 {
            return Err(invalid("engine.reconnect_delay_ms must be greater than zero"));
        }
        if engine.channels == Some(0) {
            return Err(invalid("engine.channels must be greater than zero when set"));
        }

        if let SinkConfig::Command(cmd) = &self.sink {
            if cmd.program.trim().is_empty() {
                return Err(invalid("sink.program cannot be empty for the command sink"));
            }
        }

        // Builds and discards the table; catches bad indices and target names
        self.routing_table().map(|_| ())
    }

    /// Build the routing table described by `slider_mapping`
    pub fn routing_table(&self) -> EngineResult<RoutingTable> {
        RoutingTable::from_mapping(&self.slider_mapping)
    }

    /// Serial parameters for the connection supervisor
    pub fn transport_params(&self) -> TransportParams {
        TransportParams {
            path: self.port.clone(),
            baud_rate: self.baud_rate,
        }
    }

    /// Default configuration rendered as YAML
    pub fn default_yaml() -> Result<String> {
        serde_yaml::to_string(&AppConfig::default()).context("Failed to serialize default config")
    }
}

fn invalid(reason: &str) -> EngineError {
    EngineError::InvalidRoutingConfig(reason.to_string())
}

// Default value functions
fn default_port() -> String { "COM15".to_string() }
fn default_baud_rate() -> u32 { 9600 }
