// src/monitor.rs - Session owner task, command intents and the ingestion loop
//
// A single task owns the MonitoringSession and the driver. Commands from the
// command surface and samples from the driver are serialized through it, so
// history reads and writes never race with alarm emission.

use crate::alarms::AlarmEvent;
use crate::config::Config;
use crate::error::{MonitorError, Result};
use crate::protocol::{ProtocolDriver, RawSample};
use crate::session::MonitoringSession;
use crate::supervisor::{ConnectionSupervisor, Liveness};
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ============================================================================
// COMMANDS AND STATUS
// ============================================================================

/// Intent sent from the command surface to the session owner
#[derive(Debug)]
pub enum Command {
    StartMonitoring {
        reply: oneshot::Sender<Result<PathBuf>>,
    },
    StopMonitoring {
        reply: oneshot::Sender<bool>,
    },
    ReloadConfiguration {
        reply: oneshot::Sender<Result<usize>>,
    },
    SetDecimalPrecision {
        decimals: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    AcknowledgeAlarm {
        index: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    ExportCsv {
        reply: oneshot::Sender<Result<Option<PathBuf>>>,
    },
    ListAlarms {
        reply: oneshot::Sender<Vec<AlarmEvent>>,
    },
    Exit,
}

/// How a monitoring run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Stopped on request
    Stopped,
    /// Reconnect attempts ran out
    ConnectionExhausted,
    /// The monitor itself is shutting down
    Shutdown,
}

/// Observable state of the monitor task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorStatus {
    Idle,
    Connecting,
    Monitoring { history_file: PathBuf },
    Reconnecting,
    Finished(SessionOutcome),
    Exited,
}

// ============================================================================
// HANDLE
// ============================================================================

/// Cloneable front end of the monitor task
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
    status: watch::Receiver<MonitorStatus>,
}

impl MonitorHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| MonitorError::ChannelClosed)?;
        rx.await.map_err(|_| MonitorError::ChannelClosed)
    }

    /// Connect, subscribe and start ingesting; returns the history file path
    pub async fn start_monitoring(&self) -> Result<PathBuf> {
        self.request(|reply| Command::StartMonitoring { reply }).await?
    }

    /// Stop the running session; `false` when none was running
    pub async fn stop_monitoring(&self) -> Result<bool> {
        self.request(|reply| Command::StopMonitoring { reply }).await
    }

    /// Reload the configuration file; returns the number of sensors
    pub async fn reload_configuration(&self) -> Result<usize> {
        self.request(|reply| Command::ReloadConfiguration { reply }).await?
    }

    /// Change the precision of formatted values; at most `MAX_DECIMALS`
    pub async fn set_decimal_precision(&self, decimals: usize) -> Result<()> {
        self.request(|reply| Command::SetDecimalPrecision { decimals, reply })
            .await?
    }

    /// Acknowledge an alarm by 0-based history index
    ///
    /// The server is asked first; the local record is marked either way.
    pub async fn acknowledge_alarm(&self, index: usize) -> Result<()> {
        self.request(|reply| Command::AcknowledgeAlarm { index, reply })
            .await?
    }

    pub async fn export_csv(&self) -> Result<Option<PathBuf>> {
        self.request(|reply| Command::ExportCsv { reply }).await?
    }

    /// Snapshot of the alarm history
    pub async fn alarms(&self) -> Result<Vec<AlarmEvent>> {
        self.request(|reply| Command::ListAlarms { reply }).await
    }

    /// Ask the monitor to finish the current session and exit
    pub async fn exit(&self) -> Result<()> {
        self.commands
            .send(Command::Exit)
            .await
            .map_err(|_| MonitorError::ChannelClosed)
    }

    /// Cancel everything at the next safe point
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn status(&self) -> MonitorStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<MonitorStatus> {
        self.status.clone()
    }
}

// ============================================================================
// MONITOR TASK
// ============================================================================

/// Owner of the session, the driver and the sample stream
pub struct Monitor<D> {
    session: MonitoringSession,
    driver: D,
    samples: mpsc::Receiver<RawSample>,
    commands: mpsc::Receiver<Command>,
    supervisor: ConnectionSupervisor,
    config_path: PathBuf,
    status: watch::Sender<MonitorStatus>,
    shutdown: CancellationToken,
    running: Option<CancellationToken>,
}

/// Comment attached to server-side acknowledgments
const ACK_COMMENT: &str = "Acknowledged via vigil";

enum Control {
    Continue,
    Exit,
}

impl<D: ProtocolDriver> Monitor<D> {
    pub fn new(
        session: MonitoringSession,
        config_path: impl Into<PathBuf>,
        driver: D,
        samples: mpsc::Receiver<RawSample>,
    ) -> (Self, MonitorHandle) {
        let (command_tx, commands) = mpsc::channel(32);
        let (status, status_rx) = watch::channel(MonitorStatus::Idle);
        let shutdown = CancellationToken::new();
        let supervisor = ConnectionSupervisor::new(&session.config().connection);

        let handle = MonitorHandle {
            commands: command_tx,
            shutdown: shutdown.clone(),
            status: status_rx,
        };
        let monitor = Self {
            session,
            driver,
            samples,
            commands,
            supervisor,
            config_path: config_path.into(),
            status,
            shutdown,
            running: None,
        };
        (monitor, handle)
    }

    /// Serve commands until exit, cancellation or every handle is dropped
    pub async fn run(mut self) {
        info!("Monitor ready ({} sensors)", self.session.config().sensors.len());
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if let Control::Exit = self.handle_idle(command).await {
                        break;
                    }
                }
            }
        }
        self.set_status(MonitorStatus::Exited);
        info!("Monitor stopped");
    }

    async fn handle_idle(&mut self, command: Command) -> Control {
        match command {
            Command::Exit => return Control::Exit,
            Command::StartMonitoring { reply } => match self.start_session().await {
                Ok(path) => {
                    let _ = reply.send(Ok(path));
                    let outcome = self.ingest().await;
                    self.finish_session(outcome).await;
                    if outcome == SessionOutcome::Shutdown {
                        return Control::Exit;
                    }
                }
                Err(e) => {
                    error!("Monitoring not started: {}", e);
                    self.set_status(MonitorStatus::Idle);
                    let _ = reply.send(Err(e));
                }
            },
            Command::StopMonitoring { reply } => {
                let _ = reply.send(false);
            }
            Command::ReloadConfiguration { reply } => {
                let _ = reply.send(self.reload());
            }
            other => self.handle_shared(other).await,
        }
        Control::Continue
    }

    /// Commands served identically whether or not a session is running
    async fn handle_shared(&mut self, command: Command) {
        match command {
            Command::SetDecimalPrecision { decimals, reply } => {
                let result = self.session.set_decimal_precision(decimals);
                if let Err(e) = &result {
                    warn!("Precision unchanged: {}", e);
                }
                let _ = reply.send(result);
            }
            Command::AcknowledgeAlarm { index, reply } => {
                let result = self.acknowledge(index).await;
                if let Err(e) = &result {
                    warn!("Acknowledge failed: {}", e);
                }
                let _ = reply.send(result);
            }
            Command::ExportCsv { reply } => {
                let result = self.session.export_csv();
                if let Err(e) = &result {
                    warn!("CSV export failed: {}", e);
                }
                let _ = reply.send(result);
            }
            Command::ListAlarms { reply } => {
                let _ = reply.send(self.session.history().events().to_vec());
            }
            Command::StartMonitoring { reply } => {
                let _ = reply.send(Err(MonitorError::SessionActive));
            }
            Command::ReloadConfiguration { reply } => {
                let _ = reply.send(Err(MonitorError::SessionActive));
            }
            Command::StopMonitoring { reply } => {
                let _ = reply.send(false);
            }
            Command::Exit => {}
        }
    }

    /// Server-side acknowledge first, then the local record
    async fn acknowledge(&mut self, index: usize) -> Result<()> {
        let (node_id, event_id) = {
            let event = self.session.history().unacknowledged(index)?;
            (event.node_id.clone(), event.timestamp.to_rfc3339())
        };

        if self.driver.is_connected() {
            match self.driver.acknowledge(&node_id, &event_id, ACK_COMMENT).await {
                Ok(()) => info!("Server acknowledged alarm {} on {}", index + 1, node_id),
                Err(e) => warn!("Server acknowledgment failed, marking locally: {}", e),
            }
        }
        self.session.acknowledge(index)
    }

    fn reload(&mut self) -> Result<usize> {
        let config = Config::from_file(&self.config_path).map_err(|e| {
            error!("Reload failed, keeping current configuration: {}", e);
            e
        })?;
        let sensors = config.sensors.len();
        self.supervisor = ConnectionSupervisor::new(&config.connection);
        self.session.reload(config);
        info!("Configuration reloaded: {} sensors", sensors);
        Ok(sensors)
    }

    // ========================================================================
    // SESSION LIFECYCLE
    // ========================================================================

    async fn start_session(&mut self) -> Result<PathBuf> {
        self.set_status(MonitorStatus::Connecting);
        self.supervisor.connect(&mut self.driver).await?;

        let history_file = self.session.begin(Utc::now());
        self.subscribe_all().await;
        self.read_initial_values().await;

        self.running = Some(self.shutdown.child_token());
        self.set_status(MonitorStatus::Monitoring {
            history_file: history_file.clone(),
        });
        Ok(history_file)
    }

    async fn subscribe_all(&mut self) {
        let config = self.session.config().clone();
        for sensor in &config.sensors {
            let interval = Duration::from_millis(sensor.scan_rate_ms);
            match self.driver.subscribe(&sensor.node_id, interval).await {
                Ok(()) => info!("Subscribed to {} ({})", sensor.name, sensor.node_id),
                Err(MonitorError::AccessDenied(node)) => {
                    warn!("[PERMISSION ERROR] {}: cannot subscribe to {}", sensor.name, node)
                }
                Err(e) => warn!("Failed to subscribe to {}: {}", sensor.name, e),
            }
        }
    }

    async fn read_initial_values(&mut self) {
        let config = self.session.config().clone();
        for sensor in &config.sensors {
            let result = match self.driver.read_value(&sensor.node_id).await {
                Ok(value) => self.session.record_initial_value(&sensor.name, &value),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!("Initial read of {} failed: {}", sensor.name, e);
            }
        }
    }

    /// The ingestion loop: samples, commands and heartbeats until the run ends
    async fn ingest(&mut self) -> SessionOutcome {
        let stop = match &self.running {
            Some(token) => token.clone(),
            None => return SessionOutcome::Stopped,
        };
        let period = Duration::from_millis(
            self.session.config().connection.heartbeat_interval_ms.max(1),
        );
        let mut heartbeat = tokio::time::interval(period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.reset();

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    return if self.shutdown.is_cancelled() {
                        SessionOutcome::Shutdown
                    } else {
                        SessionOutcome::Stopped
                    };
                }
                sample = self.samples.recv() => match sample {
                    Some(sample) => {
                        self.session.ingest(sample);
                    }
                    None => {
                        error!("Sample stream closed by the driver");
                        return SessionOutcome::Stopped;
                    }
                },
                command = self.commands.recv() => match command {
                    None | Some(Command::Exit) => return SessionOutcome::Shutdown,
                    Some(Command::StopMonitoring { reply }) => {
                        let _ = reply.send(true);
                        return SessionOutcome::Stopped;
                    }
                    Some(other) => self.handle_shared(other).await,
                },
                _ = heartbeat.tick() => {
                    if self.supervisor.in_cooldown() {
                        continue;
                    }
                    if self.supervisor.check_liveness(&mut self.driver).await == Liveness::Unhealthy {
                        if let Err(e) = self.recover().await {
                            error!("Monitoring terminated: {}", e);
                            return SessionOutcome::ConnectionExhausted;
                        }
                    }
                }
            }
        }
    }

    async fn recover(&mut self) -> Result<()> {
        self.set_status(MonitorStatus::Reconnecting);
        self.supervisor.reconnect(&mut self.driver).await?;
        self.subscribe_all().await;
        self.read_initial_values().await;

        if let Some(history_file) = self.session.history_path().map(|p| p.to_path_buf()) {
            self.set_status(MonitorStatus::Monitoring { history_file });
        }
        info!("Reconnected and resubscribed");
        Ok(())
    }

    async fn finish_session(&mut self, outcome: SessionOutcome) {
        self.running = None;
        if let Err(e) = self.driver.disconnect().await {
            debug!("Ignoring disconnect error at session end: {}", e);
        }
        let mut stale = 0usize;
        while self.samples.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("Discarded {} samples queued after the session ended", stale);
        }
        self.session.persist();
        if let Some(path) = self.session.history_path() {
            info!("Alarm history saved to {}", path.display());
        }
        info!("Monitoring session ended: {:?}", outcome);
        self.set_status(MonitorStatus::Finished(outcome));
    }

    fn set_status(&self, status: MonitorStatus) {
        self.status.send_replace(status);
    }
}
