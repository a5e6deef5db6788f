// File: src/alarms.rs
// Per-sensor, per-level alarm evaluation with deadband hysteresis and debounce
//
// Each (sensor, level) pair runs an independent state machine:
//
//   Cleared --activate--> Pending --debounce elapsed--> Active
//      ^                     |                            |
//      +--condition lost-----+                            |
//      +-------------clear condition (deadband crossed)---+

use crate::config::{Config, SensorConfig};
use crate::value::format_number;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ==========================================
// SECTION 1: ALARM LEVELS
// ==========================================

/// Alarm severity classification, evaluated independently per sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlarmLevel {
    #[serde(rename = "H")]
    High,
    #[serde(rename = "HH")]
    HighHigh,
    #[serde(rename = "L")]
    Low,
    #[serde(rename = "LL")]
    LowLow,
}

impl AlarmLevel {
    /// Fixed evaluation (and therefore output) order
    pub const EVALUATION_ORDER: [AlarmLevel; 4] = [
        AlarmLevel::High,
        AlarmLevel::HighHigh,
        AlarmLevel::Low,
        AlarmLevel::LowLow,
    ];

    /// Short code used in history records and exports
    pub fn code(&self) -> &'static str {
        match self {
            AlarmLevel::High => "H",
            AlarmLevel::HighHigh => "HH",
            AlarmLevel::Low => "L",
            AlarmLevel::LowLow => "LL",
        }
    }

    /// Severity ranking: LL=4, HH=3, L=2, H=1
    pub fn priority(&self) -> u8 {
        match self {
            AlarmLevel::LowLow => 4,
            AlarmLevel::HighHigh => 3,
            AlarmLevel::Low => 2,
            AlarmLevel::High => 1,
        }
    }

    pub fn is_high_side(&self) -> bool {
        matches!(self, AlarmLevel::High | AlarmLevel::HighHigh)
    }
}

impl fmt::Display for AlarmLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ==========================================
// SECTION 2: RUNTIME STATE
// ==========================================

/// Derived state of one (sensor, level) machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlarmState {
    Cleared,
    Pending,
    Active,
}

/// Mutable state of one (sensor, level) machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlarmLevelState {
    pub active: bool,
    pub pending_since: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
}

impl AlarmLevelState {
    pub fn state(&self) -> AlarmState {
        if self.active {
            AlarmState::Active
        } else if self.pending_since.is_some() {
            AlarmState::Pending
        } else {
            AlarmState::Cleared
        }
    }
}

/// Alarm record, as emitted, persisted and exported
///
/// Field order is the export column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub timestamp: DateTime<Utc>,
    pub sensor: String,
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(rename = "type")]
    pub level: AlarmLevel,
    pub priority: u8,
    /// Measured value, formatted to the configured precision
    pub value: String,
    pub threshold: f64,
    /// Seconds the alarm was active, set once cleared
    pub duration: Option<f64>,
    pub active: bool,
    pub acknowledged: bool,
}

// ==========================================
// SECTION 3: ALARM ENGINE
// ==========================================

/// Hysteresis/debounce alarm engine
///
/// Owns every [`AlarmLevelState`]; state only changes inside [`evaluate`].
///
/// [`evaluate`]: AlarmEngine::evaluate
#[derive(Debug, Clone)]
pub struct AlarmEngine {
    debounce: Duration,
    decimals: usize,
    states: HashMap<String, HashMap<AlarmLevel, AlarmLevelState>>,
}

impl AlarmEngine {
    pub fn new(debounce: Duration, decimals: usize) -> Self {
        Self {
            debounce,
            decimals,
            states: HashMap::new(),
        }
    }

    /// Engine with every configured sensor in the cleared state
    pub fn from_config(config: &Config) -> Self {
        let mut engine = Self::new(config.alarm_settings.debounce(), config.history.decimals);
        for sensor in &config.sensors {
            engine.states.insert(sensor.name.clone(), HashMap::new());
        }
        engine
    }

    pub fn set_decimal_precision(&mut self, decimals: usize) {
        self.decimals = decimals;
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Evaluate one sample against every configured level of `sensor`
    ///
    /// Returns the activation and clear events produced, in H, HH, L, LL
    /// order. Clearing takes priority over re-activation within a level.
    pub fn evaluate(
        &mut self,
        sensor: &SensorConfig,
        value: f64,
        now: DateTime<Utc>,
    ) -> Vec<AlarmEvent> {
        let mut events = Vec::new();
        let deadband = sensor.deadband;
        let levels = self.states.entry(sensor.name.clone()).or_default();

        for level in AlarmLevel::EVALUATION_ORDER {
            let Some(threshold) = sensor.alarms.get(level) else {
                continue;
            };
            let state = levels.entry(level).or_default();

            let (activate, clear) = if level.is_high_side() {
                (value >= threshold, value <= threshold - deadband)
            } else {
                (value <= threshold, value >= threshold + deadband)
            };

            if state.active {
                if clear {
                    let duration = state.started_at.map(|start| clamp_duration(now - start));
                    *state = AlarmLevelState::default();
                    events.push(build_event(sensor, level, value, threshold, now, self.decimals, duration));
                }
                // Already active: holding, or inside the deadband.
                continue;
            }

            if activate {
                let since = *state.pending_since.get_or_insert(now);
                if now - since >= self.debounce {
                    *state = AlarmLevelState {
                        active: true,
                        pending_since: None,
                        started_at: Some(now),
                    };
                    events.push(build_event(sensor, level, value, threshold, now, self.decimals, None));
                }
            } else {
                state.pending_since = None;
            }
        }

        events
    }

    /// Current state of one (sensor, level) machine
    pub fn level_state(&self, sensor: &str, level: AlarmLevel) -> AlarmLevelState {
        self.states
            .get(sensor)
            .and_then(|levels| levels.get(&level))
            .copied()
            .unwrap_or_default()
    }

    pub fn state(&self, sensor: &str, level: AlarmLevel) -> AlarmState {
        self.level_state(sensor, level).state()
    }

    /// Number of (sensor, level) machines currently active
    pub fn active_count(&self) -> usize {
        self.states
            .values()
            .flat_map(|levels| levels.values())
            .filter(|s| s.active)
            .count()
    }
}

fn build_event(
    sensor: &SensorConfig,
    level: AlarmLevel,
    value: f64,
    threshold: f64,
    now: DateTime<Utc>,
    decimals: usize,
    duration: Option<f64>,
) -> AlarmEvent {
    AlarmEvent {
        timestamp: now,
        sensor: sensor.name.clone(),
        node_id: sensor.node_id.clone(),
        level,
        priority: level.priority(),
        value: format_number(value, decimals),
        threshold,
        active: duration.is_none(),
        duration,
        acknowledged: false,
    }
}

/// Seconds, clamped at zero and rounded to the millisecond
fn clamp_duration(elapsed: Duration) -> f64 {
    let micros = elapsed.num_microseconds().unwrap_or(i64::MAX).max(0);
    (micros as f64 / 1000.0).round() / 1000.0
}

// ==========================================
// SECTION 4: TESTS
// ==========================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn sensor(deadband: f64, alarms: Thresholds) -> SensorConfig {
        SensorConfig {
            name: "Temp1".to_string(),
            node_id: "ns=3;i=1001".to_string(),
            unit: "C".to_string(),
            deadband,
            scan_rate_ms: 1000,
            alarms,
        }
    }

    fn high(threshold: f64) -> Thresholds {
        Thresholds {
            high: Some(threshold),
            ..Default::default()
        }
    }

    #[test]
    fn test_alarm_priority_ranking() {
        assert_eq!(AlarmLevel::LowLow.priority(), 4);
        assert_eq!(AlarmLevel::HighHigh.priority(), 3);
        assert_eq!(AlarmLevel::Low.priority(), 2);
        assert_eq!(AlarmLevel::High.priority(), 1);
    }

    #[test]
    fn test_activation_without_debounce() {
        let s = sensor(2.0, high(80.0));
        let mut engine = AlarmEngine::new(Duration::zero(), 2);

        assert!(engine.evaluate(&s, 79.0, t(0)).is_empty());
        let events = engine.evaluate(&s, 80.0, t(1));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, AlarmLevel::High);
        assert_eq!(events[0].value, "80.00");
        assert_eq!(events[0].threshold, 80.0);
        assert!(events[0].active);
        assert_eq!(events[0].duration, None);

        // Holding above the threshold does not re-announce
        assert!(engine.evaluate(&s, 81.0, t(2)).is_empty());
        assert_eq!(engine.state("Temp1", AlarmLevel::High), AlarmState::Active);
    }

    #[test]
    fn test_clear_requires_deadband() {
        let s = sensor(2.0, high(80.0));
        let mut engine = AlarmEngine::new(Duration::zero(), 2);
        engine.evaluate(&s, 80.0, t(0));

        assert!(engine.evaluate(&s, 80.0, t(1)).is_empty());
        assert!(engine.evaluate(&s, 79.0, t(2)).is_empty());
        let events = engine.evaluate(&s, 78.0, t(3));
        assert_eq!(events.len(), 1);
        assert!(!events[0].active);
        assert_eq!(events[0].duration, Some(3.0));
        assert_eq!(engine.level_state("Temp1", AlarmLevel::High), AlarmLevelState::default());
    }

    #[test]
    fn test_debounce_suppresses_transients() {
        let s = sensor(0.0, high(50.0));
        let mut engine = AlarmEngine::new(Duration::seconds(5), 2);

        assert!(engine.evaluate(&s, 55.0, t(0)).is_empty());
        assert_eq!(engine.state("Temp1", AlarmLevel::High), AlarmState::Pending);
        assert!(engine.evaluate(&s, 56.0, t(4)).is_empty());
        assert!(engine.evaluate(&s, 40.0, t(5)).is_empty());
        assert_eq!(engine.state("Temp1", AlarmLevel::High), AlarmState::Cleared);

        // Pending timer restarts after the gap
        assert!(engine.evaluate(&s, 55.0, t(6)).is_empty());
        assert!(engine.evaluate(&s, 55.0, t(10)).is_empty());
        let events = engine.evaluate(&s, 55.0, t(11));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, t(11));
    }

    #[test]
    fn test_low_side_levels() {
        let s = sensor(
            1.0,
            Thresholds {
                low: Some(10.0),
                low_low: Some(5.0),
                ..Default::default()
            },
        );
        let mut engine = AlarmEngine::new(Duration::zero(), 1);

        let events = engine.evaluate(&s, 4.0, t(0));
        let levels: Vec<_> = events.iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![AlarmLevel::Low, AlarmLevel::LowLow]);
        assert_eq!(events[1].priority, 4);
        assert_eq!(events[1].value, "4.0");

        // LL clears at 6 (5 + 1), L still active until 11
        let events = engine.evaluate(&s, 6.0, t(2));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, AlarmLevel::LowLow);
        assert!(engine.evaluate(&s, 10.5, t(3)).is_empty());
        let events = engine.evaluate(&s, 11.0, t(4));
        assert_eq!(events[0].level, AlarmLevel::Low);
        assert_eq!(events[0].duration, Some(4.0));
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn test_output_order_high_before_high_high() {
        let s = sensor(
            0.0,
            Thresholds {
                high: Some(80.0),
                high_high: Some(90.0),
                ..Default::default()
            },
        );
        let mut engine = AlarmEngine::new(Duration::zero(), 2);
        let events = engine.evaluate(&s, 95.0, t(0));
        let levels: Vec<_> = events.iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![AlarmLevel::High, AlarmLevel::HighHigh]);
    }

    #[test]
    fn test_unset_levels_are_skipped() {
        let s = sensor(0.0, Thresholds::default());
        let mut engine = AlarmEngine::new(Duration::zero(), 2);
        assert!(engine.evaluate(&s, 1e9, t(0)).is_empty());
        assert!(engine.evaluate(&s, -1e9, t(1)).is_empty());
    }

    #[test]
    fn test_duration_never_negative() {
        assert_eq!(clamp_duration(Duration::seconds(-3)), 0.0);
        assert_eq!(clamp_duration(Duration::microseconds(1_234_567)), 1.235);
    }
}
