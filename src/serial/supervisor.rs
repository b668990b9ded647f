//! Connection supervisor
//!
//! Owns the serial transport for its whole lifetime and drives the
//! `Closed → Opening → Open → Degraded → Closed` cycle until stopped.
//!
//! Inside a session, transport reads and poll ticks are produced by two small
//! tasks and merged into one channel. A single consumer runs framing,
//! decoding, change filtering and dispatch for each event in arrival order, so
//! slider state needs no locking.
//!
//! At most one tick is outstanding. The tick task waits for the consumer to
//! finish a tick before the next poll period starts, so every liveness request
//! gets a full period to be answered even after a slow dispatch.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::frame::LineFramer;
use super::telemetry::TelemetryDecoder;
use super::transport::{BoxedSerial, Connector, TransportParams};
use crate::config::AppConfig;
use crate::dispatch::VolumeDispatcher;
use crate::error::{EngineError, EngineResult};
use crate::filter::ChangeFilter;

/// Size of one transport read
const READ_CHUNK: usize = 256;

/// Pending reads/ticks before producers wait on the consumer
const EVENT_QUEUE: usize = 64;

/// Link state published to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport; waiting for the reconnect delay, or stopped
    Closed,
    /// Open in progress
    Opening,
    /// Transport open and serving telemetry
    Open,
    /// Session failed; transport is being torn down
    Degraded,
}

/// Everything a session needs, taken from configuration at start
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub params: TransportParams,
    pub poll_interval: Duration,
    pub liveness_max_missed_ticks: u32,
    pub liveness_command: Bytes,
    pub max_frame_len: usize,
    pub channels: Option<usize>,
    pub reconnect_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let engine = &config.engine;
        Self {
            params: config.transport_params(),
            poll_interval: engine.poll_interval(),
            liveness_max_missed_ticks: engine.liveness_max_missed_ticks,
            liveness_command: Bytes::from(engine.liveness_command.clone().into_bytes()),
            max_frame_len: engine.max_frame_len,
            channels: engine.channels,
            reconnect_delay: engine.reconnect_delay(),
            reconnect_max_delay: engine.reconnect_max_delay(),
        }
    }
}

/// Doubling reconnect delay, capped
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: None,
            attempts: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.initial,
            Some(current) => (current * 2).min(self.max),
        };
        self.current = Some(delay);
        self.attempts += 1;
        delay
    }

    /// Failed attempts since the last successful open
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.attempts = 0;
    }
}

/// Open failures since the last successful open. Kept apart from the
/// backoff counter, which also advances after a session drops.
#[derive(Debug, Default)]
struct OpenFailures(u32);

impl OpenFailures {
    /// Count a failure; true for the first one in a streak
    fn record(&mut self) -> bool {
        self.0 += 1;
        self.0 == 1
    }

    fn clear(&mut self) {
        self.0 = 0;
    }
}

/// Per-session counters, logged when the session ends
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub lines: u64,
    pub malformed: u64,
    pub deltas: u64,
    pub commands: u64,
    pub sink_failures: u64,
}

enum SessionEvent {
    Data(Bytes),
    ReadError(std::io::Error),
    Eof,
    Tick,
}

enum SessionEnd {
    Stopped,
    Failed(EngineError),
}

/// State scoped to one open transport. Rebuilt on every reconnect, which
/// drops any partial line and resets every slider to "unknown".
struct Session {
    framer: LineFramer,
    decoder: TelemetryDecoder,
    filter: ChangeFilter,
    line_seen: bool,
    missed_ticks: u32,
    stats: SessionStats,
}

impl Session {
    fn new(settings: &SupervisorSettings) -> Self {
        Self {
            framer: LineFramer::new(settings.max_frame_len),
            decoder: TelemetryDecoder::new(settings.channels),
            filter: ChangeFilter::new(),
            line_seen: false,
            missed_ticks: 0,
            stats: SessionStats::default(),
        }
    }
}

pub struct ConnectionSupervisor {
    connector: Arc<dyn Connector>,
    settings: SupervisorSettings,
    dispatcher: VolumeDispatcher,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionSupervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        settings: SupervisorSettings,
        dispatcher: VolumeDispatcher,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            connector,
            settings,
            dispatcher,
            state_tx,
        }
    }

    /// Start the supervisor loop on the runtime
    pub fn spawn(self) -> SupervisorHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stop_rx));
        SupervisorHandle { stop_tx, task }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Serial link {:?} → {:?}", previous, state);
        }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let params = self.settings.params.clone();
        let mut backoff = Backoff::new(self.settings.reconnect_delay, self.settings.reconnect_max_delay);
        let mut session_id: u64 = 0;
        let mut open_failures = OpenFailures::default();

        info!("Connection supervisor started for {}", params);

        loop {
            self.set_state(ConnectionState::Opening);

            let opened = tokio::select! {
                biased;
                _ = stopped(&mut stop_rx) => break,
                opened = self.connector.open(&params) => opened,
            };

            match opened {
                Ok(io) => {
                    session_id += 1;
                    backoff.reset();
                    open_failures.clear();
                    self.set_state(ConnectionState::Open);
                    info!(session = session_id, "🔌 Serial port {} open", params);

                    let (end, stats) = self.run_session(io, &mut stop_rx).await;
                    info!(
                        session = session_id,
                        lines = stats.lines,
                        malformed = stats.malformed,
                        deltas = stats.deltas,
                        commands = stats.commands,
                        sink_failures = stats.sink_failures,
                        "Serial session ended"
                    );

                    match end {
                        SessionEnd::Stopped => break,
                        SessionEnd::Failed(err) => {
                            self.set_state(ConnectionState::Degraded);
                            match err {
                                EngineError::FrameOverflow { .. } => {
                                    error!("Serial session reset: {} (protocol mismatch?)", err)
                                }
                                _ => warn!("Serial session reset: {}", err),
                            }
                        }
                    }
                }
                Err(err) => {
                    // Absent devices fail every attempt; only the first one is loud
                    if open_failures.record() {
                        warn!("{}", err);
                    } else {
                        debug!("{}", err);
                    }
                }
            }

            self.set_state(ConnectionState::Closed);
            let delay = backoff.next_delay();
            debug!("⏳ Serial reconnect #{} in {:?}", backoff.attempts(), delay);

            tokio::select! {
                biased;
                _ = stopped(&mut stop_rx) => break,
                _ = sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Closed);
        info!("Connection supervisor stopped");
    }

    async fn run_session(
        &self,
        io: BoxedSerial,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> (SessionEnd, SessionStats) {
        let (mut reader, mut writer) = tokio::io::split(io);
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_QUEUE);

        let read_tx = event_tx.clone();
        let reader_task = tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                let event = match reader.read(&mut buf).await {
                    Ok(0) => SessionEvent::Eof,
                    Ok(n) => SessionEvent::Data(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) => SessionEvent::ReadError(e),
                };
                let last = !matches!(event, SessionEvent::Data(_));
                if read_tx.send(event).await.is_err() || last {
                    break;
                }
            }
        });

        let period = self.settings.poll_interval;
        let tick_done = Arc::new(Notify::new());
        let tick_ack = Arc::clone(&tick_done);
        let tick_task = tokio::spawn(async move {
            loop {
                sleep(period).await;
                if event_tx.send(SessionEvent::Tick).await.is_err() {
                    break;
                }
                tick_ack.notified().await;
            }
        });

        let mut session = Session::new(&self.settings);

        let end = 'session: loop {
            let event = tokio::select! {
                biased;
                _ = stopped(stop_rx) => break 'session SessionEnd::Stopped,
                event = event_rx.recv() => event,
            };

            let step = match event {
                Some(SessionEvent::Data(chunk)) => {
                    // A slow sink must not hold up shutdown
                    tokio::select! {
                        biased;
                        _ = stopped(stop_rx) => break 'session SessionEnd::Stopped,
                        step = self.handle_chunk(&mut session, &chunk) => step,
                    }
                }
                Some(SessionEvent::Tick) => {
                    let step = self.handle_tick(&mut session, &mut writer).await;
                    tick_done.notify_one();
                    step
                }
                Some(SessionEvent::ReadError(e)) => Err(EngineError::TransportIo(e)),
                Some(SessionEvent::Eof) | None => Err(EngineError::TransportClosed),
            };

            if let Err(err) = step {
                break 'session SessionEnd::Failed(err);
            }
        };

        tick_task.abort();
        reader_task.abort();
        // Wait for the read half to drop so the port is really closed before
        // the next open (serial devices are usually exclusive)
        let _ = reader_task.await;
        drop(writer);

        (end, session.stats)
    }

    /// Frame → decode → filter → dispatch for one chunk of bytes
    async fn handle_chunk(&self, session: &mut Session, chunk: &[u8]) -> EngineResult<()> {
        for line in session.framer.feed(chunk) {
            let line = line?;
            session.stats.lines += 1;
            session.line_seen = true;

            let readings = match session.decoder.decode(&line) {
                Ok(readings) => readings,
                Err(err) => {
                    session.stats.malformed += 1;
                    debug!("Dropping line: {}", err);
                    continue;
                }
            };

            let deltas = session.filter.apply(&readings);
            if deltas.is_empty() {
                continue;
            }

            session.stats.deltas += deltas.len() as u64;
            let report = self.dispatcher.dispatch(&deltas).await;
            session.stats.commands += report.commands() as u64;
            session.stats.sink_failures += (report.failed + report.timed_out) as u64;
        }
        Ok(())
    }

    /// Liveness bookkeeping and the periodic status request
    async fn handle_tick(
        &self,
        session: &mut Session,
        writer: &mut WriteHalf<BoxedSerial>,
    ) -> EngineResult<()> {
        if std::mem::take(&mut session.line_seen) {
            session.missed_ticks = 0;
        } else {
            session.missed_ticks += 1;
            if session.missed_ticks >= self.settings.liveness_max_missed_ticks {
                return Err(EngineError::LivenessTimeout {
                    missed_ticks: session.missed_ticks,
                });
            }
        }

        let request = async {
            writer.write_all(&self.settings.liveness_command).await?;
            writer.flush().await?;
            Ok::<_, std::io::Error>(())
        };

        match timeout(self.settings.poll_interval, request).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(EngineError::TransportIo(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "liveness request write timed out",
            ))),
        }
    }
}

/// Resolves once a stop was requested or the handle is gone
async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stop| *stop).await;
}

/// Controls a running supervisor. Dropping the handle also stops it.
pub struct SupervisorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Request a stop and wait up to `grace` for the transport to close.
    ///
    /// In-flight sink calls are abandoned. If the loop still has not exited
    /// after `grace`, the task is aborted.
    pub async fn stop(self, grace: Duration) {
        let Self { stop_tx, mut task } = self;
        let _ = stop_tx.send(true);

        if timeout(grace, &mut task).await.is_err() {
            warn!("Connection supervisor did not stop within {:?}, aborting", grace);
            task.abort();
            let _ = task.await;
        }
    }
}
