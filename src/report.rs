//! Session report
//!
//! Compares the start-metrics snapshot against the final sample of a session
//! and condenses the change into a 0-100 vagal score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::BiofeedbackSample;

/// Score for a session with no change in heart rate or HRV
const NEUTRAL_VAGAL_SCORE: f64 = 50.0;
/// Points per unit of HRV gained or bpm lost
const VAGAL_DELTA_WEIGHT: f64 = 2.0;

/// Raw material for a completion report, produced when a session stops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub pattern_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Whole seconds between start and stop
    pub duration_seconds: u64,
    /// Start-metrics snapshot, or the first retained sample
    pub initial: Option<BiofeedbackSample>,
    /// Latest sample at stop
    pub last: Option<BiofeedbackSample>,
}

/// Completion report shown to the user and saved to the session log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub pattern_name: String,
    pub duration_seconds: u64,
    pub initial_heart_rate: u32,
    pub final_heart_rate: u32,
    pub initial_hrv: u32,
    pub final_hrv: u32,
    /// Final minus initial heart rate (bpm); negative is calmer
    pub heart_rate_delta: i64,
    /// Final minus initial HRV
    pub hrv_delta: i64,
    /// 0-100, 50 means no change
    pub vagal_score: f64,
}

/// `clamp(50 + 2 * hrv_delta - 2 * hr_delta, 0, 100)`
pub fn vagal_score(heart_rate_delta: i64, hrv_delta: i64) -> f64 {
    let score = NEUTRAL_VAGAL_SCORE + VAGAL_DELTA_WEIGHT * hrv_delta as f64
        - VAGAL_DELTA_WEIGHT * heart_rate_delta as f64;
    score.clamp(0.0, 100.0)
}

impl SessionSummary {
    /// Build the report, or `None` if the session produced no samples
    pub fn report(&self) -> Option<SessionReport> {
        let initial = self.initial.as_ref()?;
        let last = self.last.as_ref()?;

        let heart_rate_delta = last.heart_rate as i64 - initial.heart_rate as i64;
        let hrv_delta = last.hrv as i64 - initial.hrv as i64;

        Some(SessionReport {
            pattern_name: self.pattern_name.clone(),
            duration_seconds: self.duration_seconds,
            initial_heart_rate: initial.heart_rate,
            final_heart_rate: last.heart_rate,
            initial_hrv: initial.hrv,
            final_hrv: last.hrv,
            heart_rate_delta,
            hrv_delta,
            vagal_score: vagal_score(heart_rate_delta, hrv_delta),
        })
    }
}

impl SessionReport {
    /// Human-readable duration, e.g. `3m 20s`
    pub fn duration_label(&self) -> String {
        format!("{}m {}s", self.duration_seconds / 60, self.duration_seconds % 60)
    }
}
