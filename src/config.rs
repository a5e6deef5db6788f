// src/config.rs - Monitor configuration: sensors, alarm, trend and connection settings

use crate::alarms::AlarmLevel;
use crate::error::{MonitorError, Result};
use crate::value::MAX_DECIMALS;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Fastest sample interval a sensor may request (ms)
pub const MIN_SCANRATE: u64 = 100;

/// Slowest sample interval a sensor may request (ms)
pub const MAX_SCANRATE: u64 = 10_000;

/// Span of the rolling statistics window (5 minutes, in ms)
pub const BUFFER_WINDOW_MS: u64 = 5 * 60 * 1000;

/// Shortest spacing allowed between reconnect runs (ms)
pub const MIN_RECONNECT_COOLDOWN_MS: u64 = 2000;

/// Server used when the configuration does not name one
pub const DEFAULT_ENDPOINT: &str = "opc.tcp://localhost:53530/OPCUA/SimulationServer";

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Main VIGIL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Telemetry server endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Monitored sensors
    pub sensors: Vec<SensorConfig>,

    /// Alarm engine settings
    #[serde(default)]
    pub alarm_settings: AlarmSettings,

    /// Trend detector settings
    #[serde(default)]
    pub trend_settings: TrendSettings,

    /// Connect/reconnect policy and heartbeat
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Alarm history persistence
    #[serde(default)]
    pub history: HistoryConfig,

    /// Dashboard push channel
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

impl Config {
    /// Load a configuration file, JSON or YAML by extension
    ///
    /// The returned configuration is normalized and validated; on any error
    /// the caller's existing state is left untouched.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                MonitorError::Config(format!("Configuration file '{}' not found", path.display()))
            }
            _ => MonitorError::Io(e),
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let config = if is_yaml {
            Self::from_yaml(&text)?
        } else {
            Self::from_json(&text)?
        };

        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json(text: &str) -> Result<Self> {
        let mut config: Config = serde_json::from_str(text)
            .map_err(|e| MonitorError::Config(format!("Malformed JSON configuration: {}", e)))?;
        config.normalize()?;
        Ok(config)
    }

    /// Parse and validate a YAML configuration document
    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(text)
            .map_err(|e| MonitorError::Config(format!("Malformed YAML configuration: {}", e)))?;
        config.normalize()?;
        Ok(config)
    }

    /// Clamp scan rates and reject configurations that cannot be monitored
    pub fn normalize(&mut self) -> Result<()> {
        if self.sensors.is_empty() {
            return Err(MonitorError::Config("No sensors found in configuration".into()));
        }

        let mut names = HashSet::new();
        for sensor in &mut self.sensors {
            if !names.insert(sensor.name.clone()) {
                return Err(MonitorError::Config(format!(
                    "Duplicate sensor name '{}'",
                    sensor.name
                )));
            }
            if !sensor.deadband.is_finite() || sensor.deadband < 0.0 {
                return Err(MonitorError::Config(format!(
                    "Sensor '{}' has invalid deadband {}",
                    sensor.name, sensor.deadband
                )));
            }

            sensor.clamp_scan_rate();
            sensor.alarms.warn_if_misordered(&sensor.name);

            info!(
                "Sensor: {}, NodeId: {}, ScanRate: {}ms",
                sensor.name, sensor.node_id, sensor.scan_rate_ms
            );
        }

        let delay = self.alarm_settings.time_delay_secs;
        if !delay.is_finite() || delay < 0.0 {
            return Err(MonitorError::Config(format!("Invalid alarm timeDelay {}", delay)));
        }
        if self.trend_settings.fall_rate > 0.0 {
            warn!(
                "trendSettings.fallRate is positive ({}); rapid fall detection expects a negative rate",
                self.trend_settings.fall_rate
            );
        }
        if self.connection.max_retries == 0 {
            return Err(MonitorError::Config("connection.maxRetries must be at least 1".into()));
        }
        if self.connection.reconnect_cooldown_ms < MIN_RECONNECT_COOLDOWN_MS {
            warn!(
                "connection.reconnectCooldownMs {} below minimum, clamped to {}",
                self.connection.reconnect_cooldown_ms, MIN_RECONNECT_COOLDOWN_MS
            );
            self.connection.reconnect_cooldown_ms = MIN_RECONNECT_COOLDOWN_MS;
        }
        check_decimals(self.history.decimals)?;
        if self.dashboard.queue_capacity == 0 {
            return Err(MonitorError::Config("dashboard.queueCapacity must be at least 1".into()));
        }

        Ok(())
    }

    /// Find a sensor by its protocol address
    pub fn sensor_by_node(&self, node_id: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.node_id == node_id)
    }

    /// Find a sensor by name
    pub fn sensor(&self, name: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.name == name)
    }
}

// ============================================================================
// SENSOR CONFIGURATION
// ============================================================================

/// One monitored sensor, immutable after load
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorConfig {
    /// Sensor name (unique identifier)
    pub name: String,

    /// Protocol address of the node
    pub node_id: String,

    /// Engineering unit label
    #[serde(default)]
    pub unit: String,

    /// Offset an active alarm must additionally cross before clearing
    #[serde(default)]
    pub deadband: f64,

    /// Sample interval in milliseconds
    #[serde(rename = "scanRate", default = "default_scan_rate")]
    pub scan_rate_ms: u64,

    /// Optional alarm thresholds
    #[serde(default)]
    pub alarms: Thresholds,
}

impl SensorConfig {
    /// Rolling buffer capacity: a five minute window at this sensor's cadence
    pub fn buffer_capacity(&self) -> usize {
        let rate = self.scan_rate_ms.max(1);
        BUFFER_WINDOW_MS.div_ceil(rate) as usize
    }

    fn clamp_scan_rate(&mut self) {
        if self.scan_rate_ms > MAX_SCANRATE {
            warn!(
                "{} requested scan rate {}ms exceeds MAX_SCANRATE ({}ms). Clamping to maximum.",
                self.name, self.scan_rate_ms, MAX_SCANRATE
            );
        }
        if self.scan_rate_ms < MIN_SCANRATE {
            warn!(
                "{} requested scan rate {}ms is below MIN_SCANRATE ({}ms). Clamping to minimum.",
                self.name, self.scan_rate_ms, MIN_SCANRATE
            );
        }
        self.scan_rate_ms = self.scan_rate_ms.clamp(MIN_SCANRATE, MAX_SCANRATE);
    }
}

/// Alarm thresholds, any of which may be unset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default)]
    pub high_high: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub low_low: Option<f64>,
}

impl Thresholds {
    /// Threshold configured for `level`
    pub fn get(&self, level: AlarmLevel) -> Option<f64> {
        match level {
            AlarmLevel::HighHigh => self.high_high,
            AlarmLevel::High => self.high,
            AlarmLevel::Low => self.low,
            AlarmLevel::LowLow => self.low_low,
        }
    }

    /// True when the configured thresholds respect `lowLow < low < high < highHigh`
    pub fn is_ordered(&self) -> bool {
        let present: Vec<f64> = [self.low_low, self.low, self.high, self.high_high]
            .into_iter()
            .flatten()
            .collect();
        present.windows(2).all(|pair| pair[0] < pair[1])
    }

    // Misordered thresholds are kept as configured.
    fn warn_if_misordered(&self, sensor: &str) {
        if !self.is_ordered() {
            warn!(
                "Sensor '{}' thresholds are not ordered lowLow < low < high < highHigh: {:?}",
                sensor, self
            );
        }
    }
}

// ============================================================================
// ENGINE SETTINGS
// ============================================================================

/// Alarm engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmSettings {
    /// Debounce delay in seconds shared by every sensor and level
    #[serde(rename = "timeDelay", default)]
    pub time_delay_secs: f64,

    /// Server node that would receive alarm status writes
    #[serde(default)]
    pub notification_node: Option<String>,
}

impl AlarmSettings {
    /// Debounce delay as a duration
    pub fn debounce(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.time_delay_secs * 1000.0).round() as i64)
    }
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            time_delay_secs: 0.0,
            notification_node: None,
        }
    }
}

/// Trend detector settings, in engineering units per second
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendSettings {
    #[serde(default = "default_rise_rate")]
    pub rise_rate: f64,

    #[serde(default = "default_fall_rate")]
    pub fall_rate: f64,
}

impl Default for TrendSettings {
    fn default() -> Self {
        Self {
            rise_rate: default_rise_rate(),
            fall_rate: default_fall_rate(),
        }
    }
}

/// Connection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Attempts per connect or reconnect run
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between attempts
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Minimum spacing between reconnect runs
    #[serde(default = "default_reconnect_cooldown")]
    pub reconnect_cooldown_ms: u64,

    /// Diagnostic node read by the liveness check
    #[serde(default = "default_heartbeat_node")]
    pub heartbeat_node: String,

    /// Liveness check period
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            reconnect_cooldown_ms: default_reconnect_cooldown(),
            heartbeat_node: default_heartbeat_node(),
            heartbeat_interval_ms: default_heartbeat_interval(),
        }
    }
}

/// Alarm history persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    /// Directory receiving `alarm_history_<timestamp>.json` files
    #[serde(default = "default_history_dir")]
    pub directory: PathBuf,

    /// Decimal precision of formatted values
    #[serde(default = "default_decimals")]
    pub decimals: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            directory: default_history_dir(),
            decimals: default_decimals(),
        }
    }
}

/// Dashboard push channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardConfig {
    /// Bounded queue between ingestion and the dashboard worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Listen address of the WebSocket dashboard
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            bind_address: default_bind_address(),
        }
    }
}

/// Reject a decimal precision `format_number` cannot honour
pub fn check_decimals(decimals: usize) -> Result<()> {
    if decimals > MAX_DECIMALS {
        return Err(MonitorError::Config(format!(
            "Decimal precision {} exceeds the maximum of {}",
            decimals, MAX_DECIMALS
        )));
    }
    Ok(())
}

// ============================================================================
// DEFAULT VALUE FUNCTIONS
// ============================================================================

fn default_endpoint() -> String { DEFAULT_ENDPOINT.to_string() }
fn default_scan_rate() -> u64 { MIN_SCANRATE }
fn default_rise_rate() -> f64 { 1.0 }
fn default_fall_rate() -> f64 { -1.0 }
fn default_max_retries() -> u32 { 20 }
fn default_retry_delay() -> u64 { 3000 }
fn default_reconnect_cooldown() -> u64 { 2000 }
fn default_heartbeat_node() -> String { "i=1008".to_string() }
fn default_heartbeat_interval() -> u64 { 1000 }
fn default_history_dir() -> PathBuf { PathBuf::from("./history") }
fn default_decimals() -> usize { 2 }
fn default_queue_capacity() -> usize { 256 }
fn default_bind_address() -> String { "127.0.0.1:5000".to_string() }

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "sensors": [
            {"name": "Temp1", "nodeId": "ns=3;i=1001", "unit": "C", "deadband": 2,
             "scanRate": 1000, "alarms": {"high": 80, "high_high": 90}},
            {"name": "Press1", "nodeId": "ns=3;i=1002", "scanRate": 50}
        ],
        "alarmSettings": {"timeDelay": 3},
        "trendSettings": {"riseRate": 2.5}
    }"#;

    #[test]
    fn test_parse_and_defaults() {
        let config = Config::from_json(SAMPLE).unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.sensors.len(), 2);

        let temp = config.sensor("Temp1").unwrap();
        assert_eq!(temp.alarms.get(AlarmLevel::High), Some(80.0));
        assert_eq!(temp.alarms.get(AlarmLevel::Low), None);
        assert_eq!(temp.buffer_capacity(), 300);

        assert_eq!(config.alarm_settings.debounce(), chrono::Duration::seconds(3));
        assert_eq!(config.trend_settings.rise_rate, 2.5);
        assert_eq!(config.trend_settings.fall_rate, -1.0);
        assert_eq!(config.connection.max_retries, 20);
        assert_eq!(config.history.decimals, 2);
    }

    #[test]
    fn test_scan_rate_clamped() {
        let config = Config::from_json(SAMPLE).unwrap();
        let press = config.sensor_by_node("ns=3;i=1002").unwrap();
        assert_eq!(press.scan_rate_ms, MIN_SCANRATE);
        assert_eq!(press.buffer_capacity(), 3000);

        let slow = Config::from_json(
            r#"{"sensors": [{"name": "a", "nodeId": "n", "scanRate": 60000}]}"#,
        )
        .unwrap();
        assert_eq!(slow.sensors[0].scan_rate_ms, MAX_SCANRATE);
        assert_eq!(slow.sensors[0].buffer_capacity(), 30);
    }

    #[test]
    fn test_buffer_capacity_rounds_up() {
        let config = Config::from_json(
            r#"{"sensors": [{"name": "a", "nodeId": "n", "scanRate": 7000}]}"#,
        )
        .unwrap();
        assert_eq!(config.sensors[0].buffer_capacity(), 43);
    }

    #[test]
    fn test_rejects_bad_configs() {
        assert!(matches!(Config::from_json("{not json"), Err(MonitorError::Config(_))));
        assert!(matches!(
            Config::from_json(r#"{"sensors": []}"#),
            Err(MonitorError::Config(_))
        ));
        assert!(matches!(
            Config::from_json(
                r#"{"sensors": [{"name": "a", "nodeId": "1"}, {"name": "a", "nodeId": "2"}]}"#
            ),
            Err(MonitorError::Config(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"sensors": [{"name": "a", "nodeId": "1", "deadband": -1}]}"#),
            Err(MonitorError::Config(_))
        ));
    }

    #[test]
    fn test_reconnect_cooldown_has_floor() {
        let config = Config::from_json(
            r#"{"sensors": [{"name": "a", "nodeId": "1"}],
                "connection": {"reconnectCooldownMs": 0}}"#,
        )
        .unwrap();
        assert_eq!(config.connection.reconnect_cooldown_ms, MIN_RECONNECT_COOLDOWN_MS);

        let relaxed = Config::from_json(
            r#"{"sensors": [{"name": "a", "nodeId": "1"}],
                "connection": {"reconnectCooldownMs": 5000}}"#,
        )
        .unwrap();
        assert_eq!(relaxed.connection.reconnect_cooldown_ms, 5000);
    }

    #[test]
    fn test_decimal_precision_bounded() {
        let err = Config::from_json(
            r#"{"sensors": [{"name": "a", "nodeId": "1"}], "history": {"decimals": 70000}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
        assert!(check_decimals(MAX_DECIMALS).is_ok());
        assert!(check_decimals(MAX_DECIMALS + 1).is_err());
    }

    #[test]
    fn test_misordered_thresholds_are_kept() {
        let config = Config::from_json(
            r#"{"sensors": [{"name": "a", "nodeId": "1", "alarms": {"low": 50, "high": 40}}]}"#,
        )
        .unwrap();
        let alarms = &config.sensors[0].alarms;
        assert!(!alarms.is_ordered());
        assert_eq!(alarms.low, Some(50.0));
        assert_eq!(alarms.high, Some(40.0));
    }

    #[test]
    fn test_yaml_config() {
        let yaml = r#"
endpoint: "opc.tcp://plant:4840"
sensors:
  - name: Level
    nodeId: "ns=2;s=Level"
    deadband: 0.5
    alarms:
      low: 10
      low_low: 5
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.endpoint, "opc.tcp://plant:4840");
        assert_eq!(config.sensors[0].alarms.low_low, Some(5.0));
        assert_eq!(config.sensors[0].scan_rate_ms, MIN_SCANRATE);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }
}
