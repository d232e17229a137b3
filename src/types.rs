//! Core types for the Synheart Breath engine
//!
//! This module defines the data that flows between the pattern catalog, the
//! signal generator, the phase scheduler and the session engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BreathError;

/// Breathing phase, cycled in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Inhale,
    HoldIn,
    Exhale,
    HoldOut,
}

impl Phase {
    /// All phases in cycle order
    pub const ALL: [Phase; 4] = [Phase::Inhale, Phase::HoldIn, Phase::Exhale, Phase::HoldOut];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Inhale => "INHALE",
            Phase::HoldIn => "HOLD_IN",
            Phase::Exhale => "EXHALE",
            Phase::HoldOut => "HOLD_OUT",
        }
    }

    /// True for either breath-hold phase
    pub fn is_hold(&self) -> bool {
        matches!(self, Phase::HoldIn | Phase::HoldOut)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Autonomic arousal classification derived from the simulated signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArousalState {
    HyperArousal,
    Balanced,
    HypoArousal,
    Disengaged,
}

impl ArousalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArousalState::HyperArousal => "hyper_arousal",
            ArousalState::Balanced => "balanced",
            ArousalState::HypoArousal => "hypo_arousal",
            ArousalState::Disengaged => "disengaged",
        }
    }
}

/// One synthetic biofeedback reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiofeedbackSample {
    /// When the sample was produced
    pub timestamp: DateTime<Utc>,
    /// Heart rate (bpm)
    pub heart_rate: u32,
    /// Derived heart rate variability metric
    pub hrv: u32,
    /// Peak-to-trough heart rate swing over the last breath (bpm, one decimal)
    pub rsa_amplitude: f64,
    /// Classified arousal state
    pub arousal_state: ArousalState,
}

/// Identifier of a catalog breathing pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternId {
    Coherent,
    Box,
    #[serde(rename = "relax_478")]
    Relax478,
    Soldier,
    Performance,
    PanicRescue,
}

impl PatternId {
    /// All catalog identifiers in display order
    pub const ALL: [PatternId; 6] = [
        PatternId::Coherent,
        PatternId::Box,
        PatternId::Relax478,
        PatternId::Soldier,
        PatternId::Performance,
        PatternId::PanicRescue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternId::Coherent => "coherent",
            PatternId::Box => "box",
            PatternId::Relax478 => "relax_478",
            PatternId::Soldier => "soldier",
            PatternId::Performance => "performance",
            PatternId::PanicRescue => "panic_rescue",
        }
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternId {
    type Err = BreathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PatternId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| BreathError::UnknownPattern(s.to_string()))
    }
}

/// Per-phase durations in seconds. A phase with zero duration is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub inhale: f64,
    pub hold_in: f64,
    pub exhale: f64,
    pub hold_out: f64,
}

impl PhaseTimings {
    pub const fn new(inhale: f64, hold_in: f64, exhale: f64, hold_out: f64) -> Self {
        Self {
            inhale,
            hold_in,
            exhale,
            hold_out,
        }
    }

    /// Base duration of a phase in seconds
    pub fn get(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Inhale => self.inhale,
            Phase::HoldIn => self.hold_in,
            Phase::Exhale => self.exhale,
            Phase::HoldOut => self.hold_out,
        }
    }

    /// Full cycle length in seconds
    pub fn total_seconds(&self) -> f64 {
        self.inhale + self.hold_in + self.exhale + self.hold_out
    }

    /// Breaths per minute for one full cycle
    pub fn breaths_per_minute(&self) -> f64 {
        let total = self.total_seconds();
        if total > 0.0 {
            60.0 / total
        } else {
            0.0
        }
    }
}

/// Shortest non-zero phase a pattern may declare (seconds)
pub const MIN_PHASE_SECS: f64 = 0.1;

/// Longest phase a pattern may declare (seconds)
pub const MAX_PHASE_SECS: f64 = 300.0;

/// Breathing pattern definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreathingPattern {
    pub id: PatternId,
    /// Display name
    pub name: String,
    pub description: String,
    /// Physiological mechanism the pattern targets (e.g. "Vagal")
    pub mechanism: String,
    /// Display color (hex)
    pub color: String,
    /// Base phase timings
    pub timings: PhaseTimings,
}

impl BreathingPattern {
    /// Check that the pattern can be scheduled.
    ///
    /// Every duration must be finite and non-negative, and both INHALE and
    /// EXHALE must be non-zero so each cycle has a phase to land on. Non-zero
    /// durations must lie within [`MIN_PHASE_SECS`, `MAX_PHASE_SECS`].
    pub fn validate(&self) -> Result<(), BreathError> {
        for phase in Phase::ALL {
            let secs = self.timings.get(phase);
            if !secs.is_finite() || secs < 0.0 {
                return Err(BreathError::InvalidPattern(format!(
                    "{}: {} duration must be a non-negative number, got {}",
                    self.name, phase, secs
                )));
            }
            if secs > 0.0 && secs < MIN_PHASE_SECS {
                return Err(BreathError::InvalidPattern(format!(
                    "{}: {} duration must be 0 or at least {}s, got {}",
                    self.name, phase, MIN_PHASE_SECS, secs
                )));
            }
            if secs > MAX_PHASE_SECS {
                return Err(BreathError::InvalidPattern(format!(
                    "{}: {} duration must be at most {}s, got {}",
                    self.name, phase, MAX_PHASE_SECS, secs
                )));
            }
        }
        if self.timings.inhale == 0.0 || self.timings.exhale == 0.0 {
            return Err(BreathError::InvalidPattern(format!(
                "{}: INHALE and EXHALE durations must be greater than zero",
                self.name
            )));
        }
        Ok(())
    }

    /// Parse and validate a pattern from JSON
    pub fn from_json(json: &str) -> Result<Self, BreathError> {
        let pattern: BreathingPattern = serde_json::from_str(json)?;
        pattern.validate()?;
        Ok(pattern)
    }

    /// Serialize the pattern to JSON
    pub fn to_json(&self) -> Result<String, BreathError> {
        Ok(serde_json::to_string(self)?)
    }
}
