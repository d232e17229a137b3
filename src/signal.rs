//! Simulated biofeedback signal
//!
//! Generates a synthetic heart-rate trace with respiratory sinus arrhythmia:
//! heart rate climbs during inhale and falls during exhale, with an amplitude
//! that shrinks as simulated stress rises. The generator carries a smoothed
//! baseline and the last local extrema between calls, so one instance belongs
//! to one session and must be `reset()` before reuse.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::types::{ArousalState, BiofeedbackSample, Phase};

/// Heart rate the generator starts from (bpm)
pub const INITIAL_HEART_RATE: f64 = 75.0;

/// Resting heart rate at zero stress (bpm)
const BASELINE_FLOOR_BPM: f64 = 60.0;
/// Additional baseline heart rate at full stress (bpm)
const BASELINE_STRESS_SPAN_BPM: f64 = 40.0;
/// Fraction of the gap to the target baseline closed per sample
const BASELINE_DRIFT: f64 = 0.02;
/// RSA amplitude at full stress (bpm)
const RSA_MIN_BPM: f64 = 2.0;
/// RSA amplitude gained from stress 1 to stress 0 (bpm)
const RSA_STRESS_SPAN_BPM: f64 = 15.0;
/// Heart rate drift over a full breath hold (bpm)
const HOLD_DRIFT_BPM: f64 = 2.0;

/// Baseline and extrema carried between samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneratorState {
    /// Smoothed baseline heart rate (bpm)
    pub baseline_hr: f64,
    /// Heart rate at the end of the latest inhale (bpm)
    pub last_max_hr: f64,
    /// Heart rate at the end of the latest exhale (bpm)
    pub last_min_hr: f64,
}

impl Default for GeneratorState {
    fn default() -> Self {
        Self {
            baseline_hr: INITIAL_HEART_RATE,
            last_max_hr: INITIAL_HEART_RATE,
            last_min_hr: INITIAL_HEART_RATE,
        }
    }
}

/// Heart rate the baseline drifts toward at a given stress level
pub fn target_baseline(stress: f64) -> f64 {
    BASELINE_FLOOR_BPM + stress * BASELINE_STRESS_SPAN_BPM
}

/// Model RSA amplitude for a stress level: 17 bpm relaxed down to 2 bpm stressed
pub fn rsa_amplitude(stress: f64) -> f64 {
    (1.0 - stress) * RSA_STRESS_SPAN_BPM + RSA_MIN_BPM
}

/// Classify arousal from stress and model RSA amplitude. First match wins.
#[allow(clippy::if_same_then_else)]
pub fn classify_arousal(stress: f64, rsa: f64) -> ArousalState {
    if stress > 0.7 {
        ArousalState::HyperArousal
    } else if stress < 0.2 && rsa < 5.0 {
        ArousalState::HypoArousal
    } else if stress < 0.4 && rsa > 10.0 {
        ArousalState::Balanced
    } else {
        ArousalState::Balanced
    }
}

/// Stateful synthetic heart-rate generator
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    state: GeneratorState,
    rng: StdRng,
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalGenerator {
    /// Create a generator seeded from OS entropy
    pub fn new() -> Self {
        Self {
            state: GeneratorState::default(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a generator with a fixed seed for reproducible traces
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: GeneratorState::default(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Current carried state
    pub fn state(&self) -> GeneratorState {
        self.state
    }

    /// Forget the baseline and extrema of the previous session
    pub fn reset(&mut self) {
        self.state = GeneratorState::default();
    }

    /// Produce one sample for the given phase, stress level and in-phase progress.
    ///
    /// `stress` and `progress` are clamped to `[0, 1]`.
    pub fn generate(
        &mut self,
        phase: Phase,
        stress: f64,
        progress: f64,
        timestamp: DateTime<Utc>,
    ) -> BiofeedbackSample {
        let stress = clamp_unit(stress);
        let progress = clamp_unit(progress);

        let target = target_baseline(stress);
        self.state.baseline_hr += (target - self.state.baseline_hr) * BASELINE_DRIFT;

        let rsa = rsa_amplitude(stress);

        let current_hr = match phase {
            Phase::Inhale => {
                let hr = self.state.baseline_hr + progress * rsa;
                self.state.last_max_hr = hr;
                hr
            }
            Phase::Exhale => {
                let hr = self.state.last_max_hr - progress * rsa;
                self.state.last_min_hr = hr;
                hr
            }
            Phase::HoldIn => self.state.last_max_hr - progress * HOLD_DRIFT_BPM,
            Phase::HoldOut => self.state.last_min_hr + progress * HOLD_DRIFT_BPM,
        };

        let noise: f64 = self.rng.gen_range(-1.0..1.0);
        let heart_rate = (current_hr + noise).round().max(0.0) as u32;

        let hrv_jitter: f64 = self.rng.gen_range(0.0..10.0);
        let hrv = (rsa * 5.0 + hrv_jitter).round() as u32;

        let measured_amplitude = (self.state.last_max_hr - self.state.last_min_hr).abs();

        BiofeedbackSample {
            timestamp,
            heart_rate,
            hrv,
            rsa_amplitude: round_to_tenth(measured_amplitude),
            arousal_state: classify_arousal(stress, rsa),
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
