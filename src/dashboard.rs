// src/dashboard.rs - Best-effort push of live values and alarms to a dashboard
//
// Ingestion never blocks on the dashboard: messages go through a bounded
// queue with `try_send`, and a separate worker drains it into a sink.

use crate::alarms::AlarmEvent;
use crate::error::{MonitorError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Message pushed to dashboard clients
///
/// Serialized as `{"event": "update" | "alarm", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum DashboardMessage {
    /// Latest value of every sensor that has reported
    Update(BTreeMap<String, f64>),
    /// A single activation or clear
    Alarm(AlarmEvent),
}

impl DashboardMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Producer side of the dashboard queue
#[derive(Debug, Clone)]
pub struct DashboardNotifier {
    tx: mpsc::Sender<DashboardMessage>,
    dropped: Arc<AtomicU64>,
}

impl DashboardNotifier {
    /// Create a notifier and the receiving end of its queue
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DashboardMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Enqueue without waiting; a full or closed queue drops the message
    pub fn notify(&self, message: DashboardMessage) -> Result<()> {
        self.tx.try_send(message).map_err(|e| {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "dashboard worker stopped",
            };
            MonitorError::Persistence(format!(
                "dashboard message dropped ({}), {} dropped so far",
                reason, total
            ))
        })
    }

    /// Messages dropped since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Destination of dashboard messages
#[async_trait]
pub trait DashboardSink: Send {
    async fn deliver(&mut self, message: &DashboardMessage) -> Result<()>;
}

/// Sink that only logs, used when no web dashboard is served
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl DashboardSink for LogSink {
    async fn deliver(&mut self, message: &DashboardMessage) -> Result<()> {
        match message {
            DashboardMessage::Update(values) => debug!("Dashboard update: {:?}", values),
            DashboardMessage::Alarm(event) => info!(
                "Dashboard alarm: {} {} value={} active={}",
                event.sensor, event.level, event.value, event.active
            ),
        }
        Ok(())
    }
}

/// Drains the dashboard queue into a sink until every notifier is dropped
pub struct DashboardWorker<S> {
    rx: mpsc::Receiver<DashboardMessage>,
    sink: S,
}

impl<S: DashboardSink + 'static> DashboardWorker<S> {
    pub fn new(rx: mpsc::Receiver<DashboardMessage>, sink: S) -> Self {
        Self { rx, sink }
    }

    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            if let Err(e) = self.sink.deliver(&message).await {
                warn!("Dashboard delivery failed: {}", e);
            }
        }
        debug!("Dashboard worker stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
