// src/value.rs - Raw telemetry values delivered by the protocol driver
use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw value as read from, or notified by, a telemetry node
///
/// Nodes may publish anything; only values that normalize to a finite
/// number take part in statistics, trend detection and alarming.
///
/// # Examples
///
/// ```rust
/// use vigil::Value;
///
/// assert_eq!(Value::Int(42).as_number(), Some(42.0));
/// assert_eq!(Value::Bool(true).as_number(), Some(1.0));
/// assert_eq!(Value::Text("21.5".into()).as_number(), Some(21.5));
/// assert_eq!(Value::Float(f64::NAN).as_number(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Boolean value
    Bool(bool),
    /// Integer value (64-bit)
    Int(i64),
    /// Floating-point value (64-bit)
    Float(f64),
    /// Text value
    Text(String),
}

impl Value {
    /// Normalize to a finite number if possible
    ///
    /// Booleans map to 0/1, integers widen, text is parsed. NaN and
    /// infinities are rejected.
    pub fn as_number(&self) -> Option<f64> {
        let number = match self {
            Value::Float(f) => *f,
            Value::Int(i) => *i as f64,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        number.is_finite().then_some(number)
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Largest decimal precision accepted for formatted values
///
/// An `f64` carries at most 17 significant decimal digits.
pub const MAX_DECIMALS: usize = 17;

/// Format a measurement with a fixed number of decimals.
///
/// Precision is capped at [`MAX_DECIMALS`]. Non-finite numbers fall back
/// to their plain representation.
pub fn format_number(value: f64, decimals: usize) -> String {
    if value.is_finite() {
        format!("{:.*}", decimals.min(MAX_DECIMALS), value)
    } else {
        value.to_string()
    }
}
