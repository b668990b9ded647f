//! Slider → audio target routing
//!
//! A [`RoutingTable`] is immutable once built. Hot reload replaces the whole
//! table behind [`SharedRoutingTable`]; a dispatch cycle takes one snapshot
//! up front and never sees a later swap.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::SliderTargets;
use crate::error::{EngineError, EngineResult};

/// Literal naming the system master output
pub const MASTER: &str = "master";

/// An audio endpoint a slider controls
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// System master output
    Master,
    /// A running application, e.g. `discord.exe`
    App(AppId),
}

impl Target {
    /// Parse a configured target name
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidRoutingConfig(
                "target name cannot be empty".to_string(),
            ));
        }
        if name.eq_ignore_ascii_case(MASTER) {
            Ok(Target::Master)
        } else {
            Ok(Target::App(AppId::new(name)))
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, Target::Master)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Master => f.write_str(MASTER),
            Target::App(app) => f.write_str(app.as_str()),
        }
    }
}

/// Application identifier compared case-insensitively.
///
/// Process names change case between launches (`Discord.exe` vs
/// `discord.exe`), so equality and hashing use the lowercased key while the
/// configured spelling is kept for logs and sinks.
#[derive(Debug, Clone)]
pub struct AppId {
    name: String,
    key: String,
}

impl AppId {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let key = name.to_lowercase();
        Self { name, key }
    }

    /// Name as configured
    pub fn as_str(&self) -> &str {
        &self.name
    }

}

impl PartialEq for AppId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for AppId {}

impl Hash for AppId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

/// Immutable slider index → targets mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    entries: BTreeMap<usize, Vec<Target>>,
}

impl RoutingTable {
    /// Build and validate a table from configured slider mappings
    pub fn from_mapping(mapping: &BTreeMap<i64, SliderTargets>) -> EngineResult<Self> {
        let mut entries = BTreeMap::new();

        for (&raw_index, targets) in mapping {
            let index = usize::try_from(raw_index).map_err(|_| {
                EngineError::InvalidRoutingConfig(format!(
                    "slider index {} must be a non-negative integer",
                    raw_index
                ))
            })?;

            let mut resolved: Vec<Target> = Vec::new();
            for name in targets.names() {
                let target = Target::parse(name).map_err(|_| {
                    EngineError::InvalidRoutingConfig(format!(
                        "slider {} has an empty target name",
                        index
                    ))
                })?;
                // Same app listed twice under one slider gets one command
                if !resolved.contains(&target) {
                    resolved.push(target);
                }
            }

            if !resolved.is_empty() {
                entries.insert(index, resolved);
            }
        }

        Ok(Self { entries })
    }

    /// Targets for a slider; empty if the slider is unmapped
    pub fn resolve(&self, index: usize) -> &[Target] {
        self.entries.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[Target])> {
        self.entries.iter().map(|(i, t)| (*i, t.as_slice()))
    }
}

/// The single active routing table, swappable as a unit.
///
/// Readers clone the inner `Arc` and release the lock immediately, so a
/// replacement never blocks on an in-flight dispatch and no reader can
/// observe a partially updated table.
#[derive(Debug, Clone, Default)]
pub struct SharedRoutingTable {
    inner: Arc<RwLock<Arc<RoutingTable>>>,
}

impl SharedRoutingTable {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(table))),
        }
    }

    /// Current table; stays valid even if a swap happens afterwards
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        Arc::clone(&self.inner.read())
    }

    /// Make `table` the active one starting with the next dispatch cycle
    pub fn replace(&self, table: RoutingTable) {
        for (index, targets) in table.iter() {
            let names: Vec<String> = targets.iter().map(ToString::to_string).collect();
            debug!("Slider {} → {}", index, names.join(", "));
        }
        let sliders = table.len();
        *self.inner.write() = Arc::new(table);
        info!(sliders, "Routing table replaced");
    }
}
