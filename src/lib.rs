//! VIGIL - sensor alarm, trend and history monitor
//!
//! Subscribes to numeric sensor nodes on a telemetry server, keeps a rolling
//! five-minute window per sensor, flags rapid rises and falls, and runs a
//! per-level hysteresis/debounce alarm engine whose history is persisted
//! after every transition.
//!
//! # Feature Flags
//!
//! - **web**: serves the live dashboard over WebSocket (`/ws`)
//!
//! # Examples
//!
//! ```rust,no_run
//! use vigil::{Config, DashboardNotifier, Monitor, MonitoringSession, SimulatedDriver};
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> vigil::Result<()> {
//! let config = Config::from_file("config.json")?;
//! let (notifier, _dashboard_rx) = DashboardNotifier::channel(config.dashboard.queue_capacity);
//! let (sample_tx, sample_rx) = mpsc::channel(1024);
//! let driver = SimulatedDriver::new(config.endpoint.clone(), sample_tx);
//!
//! let session = MonitoringSession::new(config, notifier);
//! let (monitor, handle) = Monitor::new(session, "config.json", driver, sample_rx);
//! tokio::spawn(monitor.run());
//!
//! handle.start_monitoring().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error taxonomy and the crate `Result` alias
pub mod error;

/// Raw telemetry values
pub mod value;

/// Configuration loading and validation
pub mod config;

/// Rolling per-sensor statistics window
pub mod buffer;

/// Rate-of-change classification
pub mod trend;

/// Alarm levels, events and the hysteresis/debounce engine
pub mod alarms;

/// Alarm history, counters, JSON persistence and CSV export
pub mod history;

// ============================================================================
// RUNTIME MODULES
// ============================================================================

/// Telemetry driver seam and the simulated server
pub mod protocol;

/// Bounded connect/reconnect and liveness checks
pub mod supervisor;

/// Best-effort dashboard notifications
pub mod dashboard;

/// Aggregate of all mutable monitoring state
pub mod session;

/// Session owner task and command surface
pub mod monitor;

/// WebSocket dashboard server
#[cfg(feature = "web")]
pub mod web;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use alarms::{AlarmEngine, AlarmEvent, AlarmLevel, AlarmLevelState, AlarmState};
pub use buffer::{BufferStats, RollingBuffer};
pub use config::{Config, SensorConfig, Thresholds};
pub use dashboard::{DashboardMessage, DashboardNotifier, DashboardSink, DashboardWorker, LogSink};
pub use error::{MonitorError, Result};
pub use history::{AlarmHistory, AlarmStatistics, HistoryStore};
pub use monitor::{Command, Monitor, MonitorHandle, MonitorStatus, SessionOutcome};
pub use protocol::{ProtocolDriver, RawSample, SimulatedDriver, SimulationControl};
pub use session::MonitoringSession;
pub use supervisor::{ConnectionSupervisor, Liveness, RetryPolicy};
pub use trend::{Trend, TrendDetector, TrendReading};
pub use value::{Value, MAX_DECIMALS};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
