// src/history.rs - Alarm history, statistics and on-disk persistence
use crate::alarms::{AlarmEvent, AlarmLevel};
use crate::error::{MonitorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ============================================================================
// STATISTICS
// ============================================================================

/// Appended alarm counts per level, keyed by level code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    #[serde(rename = "HH")]
    pub high_high: u64,
    #[serde(rename = "H")]
    pub high: u64,
    #[serde(rename = "L")]
    pub low: u64,
    #[serde(rename = "LL")]
    pub low_low: u64,
}

impl LevelCounts {
    pub fn get(&self, level: AlarmLevel) -> u64 {
        match level {
            AlarmLevel::HighHigh => self.high_high,
            AlarmLevel::High => self.high,
            AlarmLevel::Low => self.low,
            AlarmLevel::LowLow => self.low_low,
        }
    }

    fn increment(&mut self, level: AlarmLevel) {
        let slot = match level {
            AlarmLevel::HighHigh => &mut self.high_high,
            AlarmLevel::High => &mut self.high,
            AlarmLevel::Low => &mut self.low,
            AlarmLevel::LowLow => &mut self.low_low,
        };
        *slot += 1;
    }
}

/// Aggregate counters kept alongside the history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmStatistics {
    pub total_alarms: u64,
    pub active_alarms: u64,
    pub by_type: LevelCounts,
}

// ============================================================================
// HISTORY
// ============================================================================

/// Ordered alarm records of the current session
///
/// Activations append; clears flip the most recent matching active record
/// in place, so a cleared alarm keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmHistory {
    alarms: Vec<AlarmEvent>,
    statistics: AlarmStatistics,
}

impl AlarmHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an engine event; returns whether the history changed
    pub fn record(&mut self, event: &AlarmEvent) -> bool {
        if event.active {
            self.append(event.clone());
            true
        } else {
            self.clear(&event.sensor, event.level, event.duration.unwrap_or(0.0))
        }
    }

    /// Append a newly activated alarm
    pub fn append(&mut self, event: AlarmEvent) {
        self.statistics.total_alarms += 1;
        if event.active {
            self.statistics.active_alarms += 1;
        }
        self.statistics.by_type.increment(event.level);
        self.alarms.push(event);
    }

    /// Mark the most recent active record of `sensor`/`level` as cleared
    pub fn clear(&mut self, sensor: &str, level: AlarmLevel, duration: f64) -> bool {
        self.clear_matching(|e| e.sensor == sensor && e.level == level, duration)
    }

    /// Mark the most recent active record satisfying `predicate` as cleared
    pub fn clear_matching<F>(&mut self, predicate: F, duration: f64) -> bool
    where
        F: Fn(&AlarmEvent) -> bool,
    {
        let found = self
            .alarms
            .iter_mut()
            .rev()
            .find(|e| e.active && predicate(e));

        match found {
            Some(event) => {
                event.active = false;
                event.duration = Some(duration);
                self.recompute_statistics();
                true
            }
            None => {
                debug!("No active history record to clear");
                false
            }
        }
    }

    /// The record at `index` (0-based), if it can still be acknowledged
    pub fn unacknowledged(&self, index: usize) -> Result<&AlarmEvent> {
        let event = self
            .alarms
            .get(index)
            .ok_or(MonitorError::AlarmNotFound(index))?;
        if event.acknowledged {
            return Err(MonitorError::AlreadyAcknowledged(index));
        }
        Ok(event)
    }

    /// Acknowledge the record at `index` (0-based)
    pub fn acknowledge(&mut self, index: usize) -> Result<()> {
        self.unacknowledged(index)?;
        self.alarms[index].acknowledged = true;
        Ok(())
    }

    /// Rebuild every counter from the records
    pub fn recompute_statistics(&mut self) {
        let mut statistics = AlarmStatistics {
            total_alarms: self.alarms.len() as u64,
            ..Default::default()
        };
        for event in &self.alarms {
            if event.active {
                statistics.active_alarms += 1;
            }
            statistics.by_type.increment(event.level);
        }
        self.statistics = statistics;
    }

    pub fn reset(&mut self) {
        self.alarms.clear();
        self.statistics = AlarmStatistics::default();
    }

    pub fn events(&self) -> &[AlarmEvent] {
        &self.alarms
    }

    pub fn statistics(&self) -> &AlarmStatistics {
        &self.statistics
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

/// Session history file plus its CSV sibling
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<directory>/alarm_history_<YYYYmmdd_HHMMSS>.json`
    pub fn for_session(directory: &Path, started: DateTime<Utc>) -> Self {
        let name = format!("alarm_history_{}.json", started.format("%Y%m%d_%H%M%S"));
        Self::new(directory.join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Export path: same stem, `.csv` extension
    pub fn csv_path(&self) -> PathBuf {
        self.path.with_extension("csv")
    }

    /// Rewrite the whole history file
    ///
    /// Writes to a sibling temp file first so a failed write leaves the
    /// previous contents intact.
    pub fn save(&self, history: &AlarmHistory) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(history)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        debug!("Alarm history saved to {}", self.path.display());
        Ok(())
    }

    /// Read a previously saved history file
    pub fn load(&self) -> Result<AlarmHistory> {
        let text = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Export every record as CSV; `None` when there is nothing to export
    pub fn export_csv(&self, history: &AlarmHistory) -> Result<Option<PathBuf>> {
        if history.is_empty() {
            info!("No alarm history to export");
            return Ok(None);
        }

        let path = self.csv_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut writer = csv::Writer::from_path(&path)?;
        for event in history.events() {
            writer.serialize(event)?;
        }
        writer.flush()?;

        info!("Exported {} alarms to {}", history.len(), path.display());
        Ok(Some(path))
    }
}
