// src/protocol.rs - Telemetry driver interface and the built-in simulated server
use crate::error::{MonitorError, Result};
use crate::value::Value;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Data-change notification delivered by a driver
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    /// Address of the node that changed
    pub address: String,
    pub value: Value,
    /// Server-side timestamp, when the server supplies one
    pub source_timestamp: Option<DateTime<Utc>>,
}

impl RawSample {
    pub fn new(address: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            address: address.into(),
            value: value.into(),
            source_timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.source_timestamp = Some(timestamp);
        self
    }
}

/// Session with a telemetry server
///
/// Subscriptions deliver [`RawSample`]s through the channel handed to the
/// driver when it is built; reads are one-shot.
///
/// # Examples
///
/// ```rust
/// use vigil::protocol::ProtocolDriver;
/// use vigil::Value;
/// use async_trait::async_trait;
/// use std::time::Duration;
///
/// struct Fixed {
///     connected: bool,
/// }
///
/// #[async_trait]
/// impl ProtocolDriver for Fixed {
///     async fn connect(&mut self) -> vigil::Result<()> {
///         self.connected = true;
///         Ok(())
///     }
///
///     async fn disconnect(&mut self) -> vigil::Result<()> {
///         self.connected = false;
///         Ok(())
///     }
///
///     async fn subscribe(&mut self, _address: &str, _interval: Duration) -> vigil::Result<()> {
///         Ok(())
///     }
///
///     async fn read_value(&mut self, _address: &str) -> vigil::Result<Value> {
///         Ok(Value::Float(23.5))
///     }
///
///     fn is_connected(&self) -> bool {
///         self.connected
///     }
///
///     fn protocol_name(&self) -> &'static str {
///         "fixed"
///     }
/// }
/// ```
#[async_trait]
pub trait ProtocolDriver: Send {
    /// Open the session
    async fn connect(&mut self) -> Result<()>;

    /// Close the session and drop every subscription
    async fn disconnect(&mut self) -> Result<()>;

    /// Subscribe to data changes of `address` at the given cadence
    async fn subscribe(&mut self, address: &str, interval: Duration) -> Result<()>;

    /// Read the current value of `address`
    async fn read_value(&mut self, address: &str) -> Result<Value>;

    /// Acknowledge the alarm condition at `address` on the server
    ///
    /// `event_id` identifies the alarm occurrence. Drivers without
    /// server-side alarm conditions keep this default.
    async fn acknowledge(&mut self, address: &str, event_id: &str, comment: &str) -> Result<()> {
        let _ = (event_id, comment);
        Err(MonitorError::Unsupported(format!(
            "{} alarm acknowledge on {}",
            self.protocol_name(),
            address
        )))
    }

    fn is_connected(&self) -> bool;

    fn protocol_name(&self) -> &'static str;
}

// ============================================================================
// SIMULATED SERVER
// ============================================================================

/// Waveform produced for one simulated node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalProfile {
    pub offset: f64,
    pub amplitude: f64,
    pub period_secs: f64,
    pub noise: f64,
}

impl Default for SignalProfile {
    fn default() -> Self {
        Self {
            offset: 50.0,
            amplitude: 40.0,
            period_secs: 60.0,
            noise: 0.5,
        }
    }
}

impl SignalProfile {
    fn sample(&self, elapsed_secs: f64) -> f64 {
        let phase = 2.0 * std::f64::consts::PI * elapsed_secs / self.period_secs.max(f64::EPSILON);
        let noise = if self.noise > 0.0 {
            rand::thread_rng().gen_range(-self.noise..=self.noise)
        } else {
            0.0
        };
        self.offset + self.amplitude * phase.sin() + noise
    }
}

/// Switch that takes the simulated server off the network
#[derive(Debug, Clone)]
pub struct SimulationControl {
    online: Arc<AtomicBool>,
}

impl SimulationControl {
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        info!("Simulated server {}", if online { "online" } else { "offline" });
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// In-process server producing sine-plus-noise signals
pub struct SimulatedDriver {
    endpoint: String,
    samples: mpsc::Sender<RawSample>,
    profiles: HashMap<String, SignalProfile>,
    online: Arc<AtomicBool>,
    connected: bool,
    started: Instant,
    tasks: Vec<JoinHandle<()>>,
}

impl SimulatedDriver {
    pub fn new(endpoint: impl Into<String>, samples: mpsc::Sender<RawSample>) -> Self {
        Self {
            endpoint: endpoint.into(),
            samples,
            profiles: HashMap::new(),
            online: Arc::new(AtomicBool::new(true)),
            connected: false,
            started: Instant::now(),
            tasks: Vec::new(),
        }
    }

    /// Override the waveform of one node
    pub fn with_profile(mut self, address: impl Into<String>, profile: SignalProfile) -> Self {
        self.profiles.insert(address.into(), profile);
        self
    }

    pub fn control(&self) -> SimulationControl {
        SimulationControl {
            online: self.online.clone(),
        }
    }

    fn profile(&self, address: &str) -> SignalProfile {
        self.profiles.get(address).copied().unwrap_or_default()
    }

    fn ensure_link(&self) -> Result<()> {
        if !self.connected {
            return Err(MonitorError::Connection("session not established".into()));
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(MonitorError::Connection(format!("{} unreachable", self.endpoint)));
        }
        Ok(())
    }

    fn stop_subscriptions(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl ProtocolDriver for SimulatedDriver {
    async fn connect(&mut self) -> Result<()> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(MonitorError::Connection(format!("{} unreachable", self.endpoint)));
        }
        self.connected = true;
        info!("Connected to simulated server at {}", self.endpoint);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.stop_subscriptions();
        if self.connected {
            self.connected = false;
            info!("Disconnected from {}", self.endpoint);
        }
        Ok(())
    }

    async fn subscribe(&mut self, address: &str, interval: Duration) -> Result<()> {
        self.ensure_link()?;

        let profile = self.profile(address);
        let address = address.to_string();
        let samples = self.samples.clone();
        let online = self.online.clone();
        let started = self.started;

        debug!("Subscribing to {} every {:?}", address, interval);
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !online.load(Ordering::SeqCst) {
                    // A real server stops publishing when the link drops.
                    continue;
                }
                let value = profile.sample(started.elapsed().as_secs_f64());
                let sample = RawSample::new(address.clone(), value).at(Utc::now());
                if samples.send(sample).await.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn read_value(&mut self, address: &str) -> Result<Value> {
        self.ensure_link()?;
        if address.starts_with("i=") {
            // Standard server nodes (status, time) answer with the clock
            return Ok(Value::Text(Utc::now().to_rfc3339()));
        }
        Ok(Value::Float(self.profile(address).sample(self.started.elapsed().as_secs_f64())))
    }

    fn is_connected(&self) -> bool {
        self.connected && self.online.load(Ordering::SeqCst)
    }

    fn protocol_name(&self) -> &'static str {
        "simulated"
    }
}

impl Drop for SimulatedDriver {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            warn!("Simulated driver dropped with {} live subscriptions", self.tasks.len());
            self.stop_subscriptions();
        }
    }
}
