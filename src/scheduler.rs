//! Phase scheduling
//!
//! Decides which phase follows the current one and how long it lasts. The
//! transition table is a pure function of the pattern timings; durations are
//! the base timing, optionally stretched by 500 ms from the latest
//! biofeedback sample when adaptive pacing is on.

use serde::{Deserialize, Serialize};

use crate::patterns::COHERENT_PATTERN;
use crate::types::{BiofeedbackSample, BreathingPattern, Phase, PhaseTimings};

/// Extra time granted to a phase by adaptive pacing (ms)
pub const ADAPTIVE_STRETCH_MS: u64 = 500;

/// Heart rate assumed when no sample has been produced yet (bpm)
const FALLBACK_HEART_RATE: u32 = 70;

/// Heart rate above which, with a flat RSA, the user is treated as in acute distress
const DISTRESS_HEART_RATE: u32 = 95;
/// RSA amplitude below which, with a high heart rate, the user is treated as in acute distress
const DISTRESS_RSA: f64 = 3.0;
/// Heart rate above which the exhale is lengthened
const SLOW_EXHALE_HEART_RATE: u32 = 75;
/// Heart rate below which the inhale is lengthened
const SLOW_INHALE_HEART_RATE: u32 = 55;

/// Next phase in the cycle, skipping hold phases with zero base duration.
pub fn next_phase(current: Phase, timings: &PhaseTimings) -> Phase {
    match current {
        Phase::Inhale if timings.hold_in > 0.0 => Phase::HoldIn,
        Phase::Inhale | Phase::HoldIn => Phase::Exhale,
        Phase::Exhale if timings.hold_out > 0.0 => Phase::HoldOut,
        Phase::Exhale | Phase::HoldOut => Phase::Inhale,
    }
}

/// The first `count` phases visited starting at INHALE
pub fn cycle_sequence(timings: &PhaseTimings, count: usize) -> Vec<Phase> {
    let mut sequence = Vec::with_capacity(count);
    let mut phase = Phase::Inhale;
    for _ in 0..count {
        sequence.push(phase);
        phase = next_phase(phase, timings);
    }
    sequence
}

fn secs_to_ms(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs * 1000.0).round() as u64
    } else {
        0
    }
}

/// Pacing settings that shape phase durations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseScheduler {
    /// Stretch phases from the latest biofeedback sample
    pub adaptive: bool,
    /// Full breath length for the coherent pattern (seconds)
    pub breath_cycle_secs: f64,
}

impl Default for PhaseScheduler {
    fn default() -> Self {
        Self {
            adaptive: true,
            breath_cycle_secs: 10.0,
        }
    }
}

impl PhaseScheduler {
    pub fn new(adaptive: bool, breath_cycle_secs: f64) -> Self {
        Self {
            adaptive,
            breath_cycle_secs,
        }
    }

    /// Effective duration of `phase` in milliseconds.
    ///
    /// The coherent pattern splits the configured breath cycle evenly and
    /// ignores its own timings. Otherwise the result is the base duration, or
    /// the base plus [`ADAPTIVE_STRETCH_MS`] when adaptive pacing applies.
    pub fn effective_duration_ms(
        &self,
        pattern: &BreathingPattern,
        phase: Phase,
        latest: Option<&BiofeedbackSample>,
    ) -> u64 {
        if pattern.id == COHERENT_PATTERN {
            return secs_to_ms(self.breath_cycle_secs / 2.0);
        }

        let base_ms = secs_to_ms(pattern.timings.get(phase));
        if !self.adaptive || base_ms == 0 {
            return base_ms;
        }

        let heart_rate = latest.map_or(FALLBACK_HEART_RATE, |s| s.heart_rate);
        let rsa = latest.map_or(0.0, |s| s.rsa_amplitude);

        // A highly aroused user keeps a fixed rhythm
        if heart_rate > DISTRESS_HEART_RATE && rsa < DISTRESS_RSA {
            return base_ms;
        }

        match phase {
            Phase::Exhale if heart_rate > SLOW_EXHALE_HEART_RATE => base_ms + ADAPTIVE_STRETCH_MS,
            Phase::Inhale if heart_rate < SLOW_INHALE_HEART_RATE => base_ms + ADAPTIVE_STRETCH_MS,
            _ => base_ms,
        }
    }
}
