//! Bounded sample history
//!
//! Sliding window over the most recent biofeedback samples. Charts and the
//! session report read from it; the scheduler reads the latest entry.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::types::BiofeedbackSample;

/// Samples kept per session (6 seconds at 20 Hz)
pub const HISTORY_CAPACITY: usize = 120;

/// Time-ordered FIFO of samples, oldest dropped first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleHistory {
    samples: VecDeque<BiofeedbackSample>,
    capacity: usize,
}

impl Default for SampleHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl SampleHistory {
    /// Create a history holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest beyond capacity
    pub fn push(&mut self, sample: BiofeedbackSample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&BiofeedbackSample> {
        self.samples.back()
    }

    pub fn oldest(&self) -> Option<&BiofeedbackSample> {
        self.samples.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BiofeedbackSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Mean heart rate over the window
    pub fn mean_heart_rate(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|s| s.heart_rate as f64).sum();
        Some(sum / self.samples.len() as f64)
    }
}
