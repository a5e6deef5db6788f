// src/trend.rs - Rate-of-change estimation from the last two samples
use crate::config::TrendSettings;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Classification of the latest rate of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    None,
    RapidRise,
    RapidFall,
}

/// Outcome of one observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendReading {
    pub trend: Trend,
    /// Units per second, `None` when no rate could be computed
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct TrendState {
    last: (f64, DateTime<Utc>),
    prev: Option<(f64, DateTime<Utc>)>,
}

/// Per-sensor rate-of-change detector
#[derive(Debug, Clone)]
pub struct TrendDetector {
    settings: TrendSettings,
    states: HashMap<String, TrendState>,
}

impl TrendDetector {
    pub fn new(settings: TrendSettings) -> Self {
        Self {
            settings,
            states: HashMap::new(),
        }
    }

    /// Classify `value` against the previous sample of `sensor`
    ///
    /// The stored pair is updated on every call, whatever the outcome.
    /// Non-positive elapsed time suppresses the check.
    pub fn observe(&mut self, sensor: &str, value: f64, timestamp: DateTime<Utc>) -> TrendReading {
        let previous = self.states.get(sensor).map(|s| s.last);

        let rate = previous.and_then(|(prev_value, prev_ts)| {
            let elapsed = (timestamp - prev_ts).num_microseconds()? as f64 / 1_000_000.0;
            (elapsed > 0.0).then(|| (value - prev_value) / elapsed)
        });

        let trend = match rate {
            Some(r) if r >= self.settings.rise_rate => Trend::RapidRise,
            Some(r) if r <= self.settings.fall_rate => Trend::RapidFall,
            _ => Trend::None,
        };

        self.states.insert(
            sensor.to_string(),
            TrendState {
                last: (value, timestamp),
                prev: previous,
            },
        );

        TrendReading { trend, rate }
    }

    /// Last observed `(value, timestamp)` of a sensor
    pub fn last_sample(&self, sensor: &str) -> Option<(f64, DateTime<Utc>)> {
        self.states.get(sensor).map(|s| s.last)
    }

    /// Sample observed before the last one
    pub fn previous_sample(&self, sensor: &str) -> Option<(f64, DateTime<Utc>)> {
        self.states.get(sensor).and_then(|s| s.prev)
    }

    pub fn settings(&self) -> &TrendSettings {
        &self.settings
    }
}
