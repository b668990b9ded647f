//! Shared fakes for integration tests: an in-memory serial connector and a
//! recording volume sink.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use slider_gw::config::{AppConfig, SliderTargets};
use slider_gw::error::{EngineError, EngineResult};
use slider_gw::routing::Target;
use slider_gw::serial::transport::{BoxedSerial, Connector, TransportParams};
use slider_gw::sink::VolumeSink;

pub const WAIT: Duration = Duration::from_secs(3);

/// Connector handing out in-memory pipes; the device end of every opened
/// pipe is delivered to the test.
pub struct MemoryConnector {
    devices: mpsc::UnboundedSender<DuplexStream>,
    opens: AtomicUsize,
    fail_first: usize,
}

impl MemoryConnector {
    pub fn new(fail_first: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (devices, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            devices,
            opens: AtomicUsize::new(0),
            fail_first,
        });
        (connector, rx)
    }

    /// Open attempts so far, failed ones included
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, params: &TransportParams) -> EngineResult<BoxedSerial> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(EngineError::TransportOpenFailed {
                path: params.path.clone(),
                baud_rate: params.baud_rate,
                reason: "device busy".into(),
            });
        }

        let (host, device) = tokio::io::duplex(4096);
        let _ = self.devices.send(device);
        Ok(Box::new(host))
    }
}

/// Sink forwarding every call to the test
pub struct RecordingSink {
    calls: mpsc::UnboundedSender<(String, f32)>,
}

impl RecordingSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, f32)>) {
        let (calls, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { calls }), rx)
    }
}

#[async_trait]
impl VolumeSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn set_volume(&self, target: &Target, level: f32) -> Result<()> {
        let _ = self.calls.send((target.to_string(), level));
        Ok(())
    }
}

/// Sink that takes `delay` per call, then records it
pub struct SlowSink {
    pub delay: Duration,
    pub calls: mpsc::UnboundedSender<(String, f32)>,
}

#[async_trait]
impl VolumeSink for SlowSink {
    fn name(&self) -> &str {
        "slow"
    }

    async fn set_volume(&self, target: &Target, level: f32) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        let _ = self.calls.send((target.to_string(), level));
        Ok(())
    }
}

/// Sink that never completes
pub struct HangingSink {
    pub entered: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl VolumeSink for HangingSink {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn set_volume(&self, _target: &Target, _level: f32) -> Result<()> {
        let _ = self.entered.send(());
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Fast-ticking config with the given routing and liveness effectively off
pub fn test_config(mapping: &[(i64, &[&str])]) -> AppConfig {
    let mut config = AppConfig::default();
    config.port = "memory".into();
    config.slider_mapping = mapping
        .iter()
        .map(|(index, targets)| {
            let targets = if targets.len() == 1 {
                SliderTargets::One(targets[0].to_string())
            } else {
                SliderTargets::Many(targets.iter().map(|t| t.to_string()).collect())
            };
            (*index, targets)
        })
        .collect::<BTreeMap<_, _>>();
    config.engine.poll_interval_ms = 20;
    config.engine.liveness_max_missed_ticks = 10_000;
    config.engine.reconnect_delay_ms = 10;
    config.engine.reconnect_max_delay_ms = 40;
    config.engine.sink_timeout_ms = 200;
    config
}

pub async fn next_device(rx: &mut mpsc::UnboundedReceiver<DuplexStream>) -> DuplexStream {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

pub async fn next_command(rx: &mut mpsc::UnboundedReceiver<(String, f32)>) -> (String, f32) {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a volume command")
        .expect("sink dropped")
}

pub async fn expect_quiet(rx: &mut mpsc::UnboundedReceiver<(String, f32)>, window: Duration) {
    if let Ok(Some(cmd)) = tokio::time::timeout(window, rx.recv()).await {
        panic!("unexpected volume command {:?}", cmd);
    }
}

pub async fn send(device: &mut DuplexStream, bytes: &str) {
    device.write_all(bytes.as_bytes()).await.expect("device write");
    device.flush().await.expect("device flush");
}

pub fn cmd(target: &str, level: f32) -> (String, f32) {
    (target.to_string(), level)
}
