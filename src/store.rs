//! Session log
//!
//! Finished session summaries, newest first, persisted as a JSON file under
//! the storage namespace. Aggregated stats (totals, streak, average score)
//! are computed from the log on demand.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::BreathError;
use crate::report::SessionReport;

/// Storage namespace for the session log
pub const STORAGE_NAMESPACE: &str = "respiro_sessions_v1";

/// Default file name for the session log
pub fn default_file_name() -> String {
    format!("{STORAGE_NAMESPACE}.json")
}

/// One finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSession {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: u64,
    pub pattern_name: String,
    pub vagal_score: f64,
}

/// Totals across the whole log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStats {
    pub total_sessions: usize,
    /// Whole minutes practiced
    pub total_minutes: u64,
    /// Consecutive days with practice ending today or yesterday
    pub current_streak: u32,
    pub last_session_at: Option<DateTime<Utc>>,
    /// Rounded mean vagal score, 0 for an empty log
    pub average_vagal_score: f64,
}

/// Newest-first list of saved sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionLog {
    sessions: Vec<SavedSession>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend a finished session and return the saved entry
    pub fn record(&mut self, report: &SessionReport, at: DateTime<Utc>) -> SavedSession {
        let saved = SavedSession {
            id: Uuid::new_v4(),
            timestamp: at,
            duration_seconds: report.duration_seconds,
            pattern_name: report.pattern_name.clone(),
            vagal_score: report.vagal_score,
        };
        self.sessions.insert(0, saved.clone());
        debug!(id = %saved.id, score = saved.vagal_score, "session recorded");
        saved
    }

    pub fn sessions(&self) -> &[SavedSession] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Compute totals, streak and average score as of `today`
    pub fn aggregated_stats(&self, today: NaiveDate) -> AggregatedStats {
        let total_sessions = self.sessions.len();
        let total_seconds: u64 = self.sessions.iter().map(|s| s.duration_seconds).sum();

        let average_vagal_score = if total_sessions > 0 {
            let sum: f64 = self.sessions.iter().map(|s| s.vagal_score).sum();
            (sum / total_sessions as f64).round()
        } else {
            0.0
        };

        AggregatedStats {
            total_sessions,
            total_minutes: total_seconds / 60,
            current_streak: self.current_streak(today),
            last_session_at: self.sessions.first().map(|s| s.timestamp),
            average_vagal_score,
        }
    }

    fn current_streak(&self, today: NaiveDate) -> u32 {
        let mut days: Vec<NaiveDate> = self
            .sessions
            .iter()
            .map(|s| s.timestamp.date_naive())
            .collect();
        days.sort_unstable_by(|a, b| b.cmp(a));
        days.dedup();

        let Some(&latest) = days.first() else {
            return 0;
        };
        if latest != today && latest != today - Duration::days(1) {
            return 0;
        }

        let mut streak = 1;
        let mut expected = latest;
        for &day in &days[1..] {
            if day == expected - Duration::days(1) {
                streak += 1;
                expected = day;
            } else {
                break;
            }
        }
        streak
    }

    /// Load a log from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the log to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Load a log from disk; a missing file is an empty log
    pub fn load(path: &Path) -> Result<Self, BreathError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }

    /// Write the log to disk
    pub fn save(&self, path: &Path) -> Result<(), BreathError> {
        fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), sessions = self.len(), "session log saved");
        Ok(())
    }
}
