//! Engine - owns the routing table, the volume sink and the connection
//! supervisor, and applies configuration reloads as a unit.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{AppConfig, SinkConfig};
use crate::dispatch::VolumeDispatcher;
use crate::error::EngineResult;
use crate::routing::{RoutingTable, SharedRoutingTable};
use crate::serial::supervisor::{ConnectionState, ConnectionSupervisor, SupervisorHandle, SupervisorSettings};
use crate::serial::transport::{Connector, SerialPortConnector};
use crate::sink::{self, VolumeSink};

/// Bounded wait for a session to wind down on stop
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Builds a sink from configuration (set when the engine owns its sink)
type SinkBuilder = fn(&SinkConfig) -> Arc<dyn VolumeSink>;

/// Result of applying a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Identical to the active configuration; nothing touched
    Unchanged,
    /// Routing swapped and the serial session restarted
    Applied,
}

pub struct Engine {
    config: AppConfig,
    routing: SharedRoutingTable,
    sink: Arc<dyn VolumeSink>,
    sink_builder: Option<SinkBuilder>,
    connector: Arc<dyn Connector>,
    state_tx: watch::Sender<ConnectionState>,
    supervisor: Option<SupervisorHandle>,
}

impl Engine {
    /// Engine with an injected transport connector and volume sink
    pub fn new(
        config: AppConfig,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn VolumeSink>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let routing = SharedRoutingTable::new(config.routing_table()?);
        let (state_tx, _) = watch::channel(ConnectionState::Closed);

        Ok(Self {
            config,
            routing,
            sink,
            sink_builder: None,
            connector,
            state_tx,
            supervisor: None,
        })
    }

    /// Engine on a real serial port with the sink chosen by configuration
    pub fn from_config(config: AppConfig) -> EngineResult<Self> {
        let sink = sink::build_sink(&config.sink);
        let mut engine = Self::new(config, Arc::new(SerialPortConnector), sink)?;
        engine.sink_builder = Some(sink::build_sink);
        Ok(engine)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn routing(&self) -> &SharedRoutingTable {
        &self.routing
    }

    /// Observe the serial link state across sessions and restarts
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_some()
    }

    /// Start a supervisor session with the active configuration
    pub fn start(&mut self) {
        if self.supervisor.is_some() {
            return;
        }

        let dispatcher = VolumeDispatcher::new(
            self.routing.clone(),
            Arc::clone(&self.sink),
            self.config.engine.sink_timeout(),
        );
        let supervisor = ConnectionSupervisor::new(
            Arc::clone(&self.connector),
            SupervisorSettings::from_config(&self.config),
            dispatcher,
            self.state_tx.clone(),
        );

        info!(
            "Engine starting on {} with {} routed sliders (sink: {})",
            self.config.transport_params(),
            self.routing.snapshot().len(),
            self.sink.name()
        );
        self.supervisor = Some(supervisor.spawn());
    }

    /// Stop the supervisor: no further reconnects, transport closed
    pub async fn stop(&mut self) {
        if let Some(handle) = self.supervisor.take() {
            handle.stop(STOP_GRACE).await;
            info!("Engine stopped");
        }
    }

    /// Apply a new configuration.
    ///
    /// The routing table is validated and built before anything changes; on
    /// error the active table and session stay as they are. Otherwise the
    /// running session is stopped, the table swapped and a fresh session
    /// started with the new transport parameters.
    pub async fn apply_config(&mut self, new_config: AppConfig) -> EngineResult<ReloadOutcome> {
        if new_config == self.config {
            info!("Configuration unchanged, keeping current session");
            return Ok(ReloadOutcome::Unchanged);
        }

        let table = match Self::prepare(&new_config) {
            Ok(table) => table,
            Err(e) => {
                warn!("⚠️  Rejected configuration (keeping old routing): {}", e);
                return Err(e);
            }
        };

        let was_running = self.is_running();
        self.stop().await;

        if new_config.sink != self.config.sink {
            if let Some(build) = self.sink_builder {
                self.sink = build(&new_config.sink);
            }
        }

        self.routing.replace(table);
        self.config = new_config;

        if was_running {
            self.start();
        }

        Ok(ReloadOutcome::Applied)
    }

    fn prepare(config: &AppConfig) -> EngineResult<RoutingTable> {
        config.validate()?;
        config.routing_table()
    }
}
