//! Volume dispatcher
//!
//! Turns slider deltas into volume commands: resolve targets through the
//! active routing table, scale the reading to 0.0-1.0 and call the sink once
//! per target. Target failures are logged and never block other targets.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::filter::SliderDelta;
use crate::routing::{SharedRoutingTable, Target};
use crate::sink::VolumeSink;

/// Full-scale slider reading
const READING_SCALE: f32 = 100.0;

/// One volume update issued to the sink
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeCommand {
    pub target: Target,
    /// Linear level, 0.0-1.0
    pub level: f32,
}

/// Outcome counters for one dispatch cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub applied: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl DispatchReport {
    pub fn commands(&self) -> usize {
        self.applied + self.failed + self.timed_out
    }
}

/// Convert a raw slider reading to the sink's linear scale
pub fn level_from_reading(value: i32) -> f32 {
    (value as f32 / READING_SCALE).clamp(0.0, 1.0)
}

#[derive(Clone)]
pub struct VolumeDispatcher {
    routing: SharedRoutingTable,
    sink: Arc<dyn VolumeSink>,
    call_timeout: Duration,
}

impl VolumeDispatcher {
    pub fn new(routing: SharedRoutingTable, sink: Arc<dyn VolumeSink>, call_timeout: Duration) -> Self {
        Self {
            routing,
            sink,
            call_timeout,
        }
    }

    /// Volume commands a set of deltas maps to, in dispatch order
    pub fn plan(&self, deltas: &[SliderDelta]) -> Vec<VolumeCommand> {
        // One snapshot per cycle: a concurrent swap applies from the next cycle
        let table = self.routing.snapshot();

        deltas
            .iter()
            .flat_map(|delta| {
                let level = level_from_reading(delta.value);
                table
                    .resolve(delta.index)
                    .iter()
                    .map(move |target| VolumeCommand {
                        target: target.clone(),
                        level,
                    })
            })
            .collect()
    }

    /// Apply deltas (ascending slider order) through the sink
    pub async fn dispatch(&self, deltas: &[SliderDelta]) -> DispatchReport {
        let mut report = DispatchReport::default();

        for command in self.plan(deltas) {
            info!(
                "set volume to {:.0}% for {}",
                command.level * READING_SCALE,
                command.target
            );

            match timeout(self.call_timeout, self.sink.set_volume(&command.target, command.level)).await {
                Ok(Ok(())) => report.applied += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    let err = EngineError::SinkCallFailed {
                        target: command.target.to_string(),
                        reason: format!("{:#}", e),
                    };
                    warn!(sink = self.sink.name(), "{}", err);
                }
                Err(_) => {
                    report.timed_out += 1;
                    let err = EngineError::SinkCallTimeout {
                        target: command.target.to_string(),
                        timeout: self.call_timeout,
                    };
                    warn!(sink = self.sink.name(), "{}", err);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SliderTargets;
    use crate::routing::RoutingTable;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// Sink recording every call; fails or hangs for chosen targets
    #[derive(Default)]
    struct ScriptedSink {
        calls: Mutex<Vec<(String, f32)>>,
        fail: Vec<String>,
        hang: Vec<String>,
    }

    #[async_trait]
    impl VolumeSink for ScriptedSink {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn set_volume(&self, target: &Target, level: f32) -> Result<()> {
            let name = target.to_string();
            self.calls.lock().push((name.clone(), level));
            if self.hang.contains(&name) {
                std::future::pending::<()>().await;
            }
            if self.fail.contains(&name) {
                bail!("session not found");
            }
            Ok(())
        }
    }

    fn table(entries: &[(i64, SliderTargets)]) -> RoutingTable {
        let mapping: BTreeMap<_, _> = entries.iter().cloned().collect();
        RoutingTable::from_mapping(&mapping).unwrap()
    }

    fn one(name: &str) -> SliderTargets {
        SliderTargets::One(name.into())
    }

    fn delta(index: usize, value: i32) -> SliderDelta {
        SliderDelta { index, value }
    }

    fn dispatcher(routing: &SharedRoutingTable, sink: Arc<ScriptedSink>) -> VolumeDispatcher {
        VolumeDispatcher::new(routing.clone(), sink, Duration::from_millis(50))
    }

    #[test]
    fn test_level_scaling() {
        assert_eq!(level_from_reading(0), 0.0);
        assert_eq!(level_from_reading(50), 0.5);
        assert_eq!(level_from_reading(100), 1.0);
        assert_eq!(level_from_reading(250), 1.0);
        assert_eq!(level_from_reading(-3), 0.0);
    }

    #[tokio::test]
    async fn test_one_slider_many_targets() {
        let routing = SharedRoutingTable::new(table(&[(
            2,
            SliderTargets::Many(vec!["chrome.exe".into(), "brave.exe".into()]),
        )]));
        let sink = Arc::new(ScriptedSink::default());

        let report = dispatcher(&routing, sink.clone()).dispatch(&[delta(2, 70)]).await;

        assert_eq!(report.applied, 2);
        assert_eq!(
            *sink.calls.lock(),
            vec![("chrome.exe".to_string(), 0.7), ("brave.exe".to_string(), 0.7)]
        );
    }

    #[tokio::test]
    async fn test_unmapped_slider_is_inert() {
        let routing = SharedRoutingTable::new(table(&[(0, one("master"))]));
        let sink = Arc::new(ScriptedSink::default());

        let report = dispatcher(&routing, sink.clone()).dispatch(&[delta(5, 10)]).await;

        assert_eq!(report, DispatchReport::default());
        assert!(sink.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_same_target_follows_slider_order() {
        // Two sliders aliasing one app: the higher index is applied last
        let routing = SharedRoutingTable::new(table(&[(0, one("vlc.exe")), (1, one("VLC.exe"))]));
        let sink = Arc::new(ScriptedSink::default());

        dispatcher(&routing, sink.clone())
            .dispatch(&[delta(0, 20), delta(1, 80)])
            .await;

        let calls = sink.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1, 0.8);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_targets() {
        let routing = SharedRoutingTable::new(table(&[
            (0, one("master")),
            (1, SliderTargets::Many(vec!["broken.exe".into(), "discord.exe".into()])),
        ]));
        let sink = Arc::new(ScriptedSink {
            fail: vec!["broken.exe".into()],
            ..Default::default()
        });

        let report = dispatcher(&routing, sink.clone())
            .dispatch(&[delta(0, 10), delta(1, 20)])
            .await;

        assert_eq!(report.applied, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(sink.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_hung_call_times_out() {
        let routing = SharedRoutingTable::new(table(&[
            (0, SliderTargets::Many(vec!["stuck.exe".into(), "master".into()])),
        ]));
        let sink = Arc::new(ScriptedSink {
            hang: vec!["stuck.exe".into()],
            ..Default::default()
        });

        let report = dispatcher(&routing, sink.clone()).dispatch(&[delta(0, 40)]).await;

        assert_eq!(report.timed_out, 1);
        assert_eq!(report.applied, 1);
        assert_eq!(report.commands(), 2);
    }

    #[tokio::test]
    async fn test_swap_applies_from_next_cycle() {
        let routing = SharedRoutingTable::new(table(&[(0, one("master"))]));
        let sink = Arc::new(ScriptedSink::default());
        let dispatcher = dispatcher(&routing, sink.clone());

        let before = dispatcher.plan(&[delta(0, 10)]);
        routing.replace(table(&[(0, one("spotify.exe"))]));
        let after = dispatcher.plan(&[delta(0, 10)]);

        assert_eq!(before[0].target, Target::Master);
        assert_eq!(after[0].target.to_string(), "spotify.exe");
    }
}
