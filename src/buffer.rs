// src/buffer.rs - Fixed-capacity rolling window of samples per sensor
use serde::Serialize;
use std::collections::VecDeque;

/// Live statistics over the current window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BufferStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
    pub capacity: usize,
}

/// Bounded FIFO of numeric samples
///
/// Capacity is fixed at creation; once full, each push evicts the oldest
/// sample.
///
/// # Examples
///
/// ```rust
/// use vigil::RollingBuffer;
///
/// let mut buffer = RollingBuffer::new(2);
/// buffer.push(1.0);
/// buffer.push(2.0);
/// buffer.push(3.0);
/// assert_eq!(buffer.values().collect::<Vec<_>>(), vec![2.0, 3.0]);
/// ```
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest when full
    ///
    /// Non-finite samples are rejected; returns whether the sample was kept.
    pub fn push(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
        true
    }

    /// Min/max/mean over the window, `None` while empty
    pub fn stats(&self) -> Option<BufferStats> {
        if self.values.is_empty() {
            return None;
        }

        let min = self.values.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max = self.values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let mean = self.values.iter().sum::<f64>() / self.values.len() as f64;

        Some(BufferStats {
            min,
            max,
            mean,
            count: self.values.len(),
            capacity: self.capacity,
        })
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
