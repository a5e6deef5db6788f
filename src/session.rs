// src/session.rs - MonitoringSession: every piece of mutable monitoring state
//
// One owner mutates the session; the monitor task serializes commands and
// samples onto it, so no locking is needed here.

use crate::alarms::{AlarmEngine, AlarmEvent};
use crate::buffer::RollingBuffer;
use crate::config::{check_decimals, Config};
use crate::dashboard::{DashboardMessage, DashboardNotifier};
use crate::error::{MonitorError, Result};
use crate::history::{AlarmHistory, HistoryStore};
use crate::protocol::RawSample;
use crate::trend::{Trend, TrendDetector};
use crate::value::{format_number, Value};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Aggregate owning configuration, buffers, trend/alarm state and history
pub struct MonitoringSession {
    config: Arc<Config>,
    buffers: HashMap<String, RollingBuffer>,
    trends: TrendDetector,
    engine: AlarmEngine,
    history: AlarmHistory,
    latest: BTreeMap<String, f64>,
    decimals: usize,
    store: Option<HistoryStore>,
    dashboard: DashboardNotifier,
}

impl MonitoringSession {
    pub fn new(config: Config, dashboard: DashboardNotifier) -> Self {
        let config = Arc::new(config);
        Self {
            buffers: build_buffers(&config),
            trends: TrendDetector::new(config.trend_settings.clone()),
            engine: AlarmEngine::from_config(&config),
            history: AlarmHistory::new(),
            latest: BTreeMap::new(),
            decimals: config.history.decimals,
            store: None,
            dashboard,
            config,
        }
    }

    /// Replace every piece of state with a fresh one built from `config`
    ///
    /// The configuration is already validated, so nothing here can fail
    /// halfway through. The current decimal precision is kept.
    pub fn reload(&mut self, config: Config) {
        let dashboard = self.dashboard.clone();
        let decimals = self.decimals;
        *self = Self::new(config, dashboard);
        self.decimals = decimals;
        self.engine.set_decimal_precision(decimals);
        info!("Monitoring state reset for {} sensors", self.config.sensors.len());
    }

    /// Start a history file for a new monitoring run
    pub fn begin(&mut self, started: DateTime<Utc>) -> PathBuf {
        let store = HistoryStore::for_session(&self.config.history.directory, started);
        let path = store.path().to_path_buf();
        info!("Alarm history will be saved to {}", path.display());
        self.store = Some(store);
        path
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    /// Process one data-change notification
    ///
    /// Returns the alarm events it produced. Unknown addresses and
    /// non-numeric values produce none.
    pub fn ingest(&mut self, sample: RawSample) -> Vec<AlarmEvent> {
        let config = Arc::clone(&self.config);
        let Some(sensor) = config.sensor_by_node(&sample.address) else {
            debug!("Ignoring sample from unmonitored node {}", sample.address);
            return Vec::new();
        };
        let Some(value) = sample.value.as_number() else {
            warn!(
                "{}: non-numeric value {} ({}) skipped",
                sensor.name, sample.value, sample.value.type_name()
            );
            return Vec::new();
        };
        let timestamp = sample.source_timestamp.unwrap_or_else(Utc::now);

        self.buffer_value(&sensor.name, value);
        self.latest.insert(sensor.name.clone(), value);
        self.notify(DashboardMessage::Update(self.latest.clone()));

        let reading = self.trends.observe(&sensor.name, value, timestamp);
        match reading.trend {
            Trend::RapidRise => info!(
                "{}: rapid rise detected ({:.3}/s)",
                sensor.name,
                reading.rate.unwrap_or_default()
            ),
            Trend::RapidFall => info!(
                "{}: rapid fall detected ({:.3}/s)",
                sensor.name,
                reading.rate.unwrap_or_default()
            ),
            Trend::None => {}
        }

        let events = self.engine.evaluate(sensor, value, timestamp);
        for event in &events {
            self.apply_event(event);
        }
        events
    }

    /// Buffer a value read right after subscribing, without alarm evaluation
    pub fn record_initial_value(&mut self, sensor: &str, value: &Value) -> Result<()> {
        if self.config.sensor(sensor).is_none() {
            return Err(MonitorError::Config(format!("Unknown sensor '{}'", sensor)));
        }
        let number = value.as_number().ok_or_else(|| {
            MonitorError::protocol(sensor, format!("non-numeric initial value {}", value))
        })?;

        self.buffer_value(sensor, number);
        self.latest.insert(sensor.to_string(), number);
        info!("{}: initial value {}", sensor, format_number(number, self.decimals));
        Ok(())
    }

    fn buffer_value(&mut self, sensor: &str, value: f64) {
        let Some(buffer) = self.buffers.get_mut(sensor) else {
            return;
        };
        buffer.push(value);
        if let Some(stats) = buffer.stats() {
            debug!(
                "{}: {} (min {}, max {}, mean {}, buffer {}/{})",
                sensor,
                format_number(value, self.decimals),
                format_number(stats.min, self.decimals),
                format_number(stats.max, self.decimals),
                format_number(stats.mean, self.decimals),
                stats.count,
                stats.capacity
            );
        }
    }

    fn apply_event(&mut self, event: &AlarmEvent) {
        if event.active {
            info!(
                "ALARM ACTIVE: {} {} value={} threshold={}",
                event.sensor, event.level, event.value, event.threshold
            );
        } else {
            info!(
                "ALARM CLEAR: {} {} value={} duration={:.3}s",
                event.sensor,
                event.level,
                event.value,
                event.duration.unwrap_or_default()
            );
        }

        if !self.history.record(event) {
            warn!("{} {}: clear had no matching active record", event.sensor, event.level);
        }
        self.persist();
        self.notify(DashboardMessage::Alarm(event.clone()));

        if let Some(node) = &self.config.alarm_settings.notification_node {
            debug!("Skipping write of alarm status to {}", node);
        }
    }

    fn notify(&self, message: DashboardMessage) {
        if let Err(e) = self.dashboard.notify(message) {
            warn!("{}", e);
        }
    }

    // ========================================================================
    // HISTORY OPERATIONS
    // ========================================================================

    /// Write the history file; failures are logged and swallowed
    pub fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(&self.history) {
            warn!("Failed to save alarm history to {}: {}", store.path().display(), e);
        }
    }

    /// Acknowledge the alarm at `index` (0-based) and persist
    pub fn acknowledge(&mut self, index: usize) -> Result<()> {
        self.history.acknowledge(index)?;
        info!("Alarm {} acknowledged", index + 1);
        self.persist();
        Ok(())
    }

    /// Export the history beside the session file
    pub fn export_csv(&self) -> Result<Option<PathBuf>> {
        match &self.store {
            Some(store) => store.export_csv(&self.history),
            None => HistoryStore::for_session(&self.config.history.directory, Utc::now())
                .export_csv(&self.history),
        }
    }

    pub fn set_decimal_precision(&mut self, decimals: usize) -> Result<()> {
        check_decimals(decimals)?;
        self.decimals = decimals;
        self.engine.set_decimal_precision(decimals);
        info!("Decimal precision set to {}", decimals);
        Ok(())
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn history(&self) -> &AlarmHistory {
        &self.history
    }

    pub fn engine(&self) -> &AlarmEngine {
        &self.engine
    }

    pub fn trends(&self) -> &TrendDetector {
        &self.trends
    }

    pub fn buffer(&self, sensor: &str) -> Option<&RollingBuffer> {
        self.buffers.get(sensor)
    }

    pub fn latest_values(&self) -> &BTreeMap<String, f64> {
        &self.latest
    }

    pub fn decimals(&self) -> usize {
        self.decimals
    }

    pub fn history_path(&self) -> Option<&std::path::Path> {
        self.store.as_ref().map(|s| s.path())
    }
}

fn build_buffers(config: &Config) -> HashMap<String, RollingBuffer> {
    config
        .sensors
        .iter()
        .map(|s| (s.name.clone(), RollingBuffer::new(s.buffer_capacity())))
        .collect()
}
