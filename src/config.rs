//! Session configuration
//!
//! The options a host sets on a breathing session. Core options shape pacing
//! and the simulated signal; the effect toggles only gate the external
//! collaborators (audio, voice, haptics) and are never read by the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BreathError;
use crate::patterns::DEFAULT_PATTERN;
use crate::scheduler::PhaseScheduler;
use crate::types::PatternId;

/// Sampling clock period (ms). 20 Hz.
pub const SAMPLE_INTERVAL_MS: i64 = 50;

/// Shortest coherent breath cycle (seconds)
pub const MIN_BREATH_CYCLE_SECS: f64 = 1.0;

/// Longest coherent breath cycle (seconds)
pub const MAX_BREATH_CYCLE_SECS: f64 = 120.0;

/// The sample (1-based) captured as the session's start metrics
pub const START_METRICS_SAMPLE: usize = 6;

/// Noise color of the background sound layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundType {
    #[default]
    Pink,
    White,
    Brown,
}

impl SoundType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoundType::Pink => "pink",
            SoundType::White => "white",
            SoundType::Brown => "brown",
        }
    }
}

impl fmt::Display for SoundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SoundType {
    type Err = BreathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pink" => Ok(SoundType::Pink),
            "white" => Ok(SoundType::White),
            "brown" => Ok(SoundType::Brown),
            other => Err(BreathError::InvalidConfig(format!(
                "unknown sound type '{other}' (expected pink, white or brown)"
            ))),
        }
    }
}

/// Which external collaborators act on phase cues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectToggles {
    pub audio: bool,
    pub voice: bool,
    pub haptics: bool,
    /// Noise color handed to the audio collaborator
    pub sound: SoundType,
}

impl Default for EffectToggles {
    fn default() -> Self {
        Self {
            audio: false,
            voice: false,
            haptics: true,
            sound: SoundType::Pink,
        }
    }
}

/// Recognised session options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Start/stop trigger
    pub is_playing: bool,
    /// Active catalog pattern
    pub pattern: PatternId,
    /// Stretch phases from the simulated signal
    pub is_adaptive: bool,
    /// Full breath length for the coherent pattern (seconds)
    pub breath_cycle_secs: f64,
    /// Surrogate stress level, 0 (calm) to 1 (panic)
    pub simulated_stress: f64,
    pub effects: EffectToggles,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            is_playing: false,
            pattern: DEFAULT_PATTERN,
            is_adaptive: true,
            breath_cycle_secs: 10.0,
            simulated_stress: 0.5,
            effects: EffectToggles::default(),
        }
    }
}

impl SessionConfig {
    /// Check option ranges
    pub fn validate(&self) -> Result<(), BreathError> {
        validate_stress(self.simulated_stress)?;
        validate_breath_cycle(self.breath_cycle_secs)?;
        Ok(())
    }

    /// Pacing settings derived from this configuration
    pub fn scheduler(&self) -> PhaseScheduler {
        PhaseScheduler::new(self.is_adaptive, self.breath_cycle_secs)
    }

    /// Parse and validate a configuration from JSON. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, BreathError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, BreathError> {
        Ok(serde_json::to_string(self)?)
    }
}

pub(crate) fn validate_stress(stress: f64) -> Result<(), BreathError> {
    if !stress.is_finite() || !(0.0..=1.0).contains(&stress) {
        return Err(BreathError::InvalidConfig(format!(
            "simulated_stress must be within [0, 1], got {stress}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_breath_cycle(secs: f64) -> Result<(), BreathError> {
    if !secs.is_finite() || !(MIN_BREATH_CYCLE_SECS..=MAX_BREATH_CYCLE_SECS).contains(&secs) {
        return Err(BreathError::InvalidConfig(format!(
            "breath_cycle_secs must be within [{MIN_BREATH_CYCLE_SECS}, {MAX_BREATH_CYCLE_SECS}], got {secs}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert!(!config.is_playing);
        assert_eq!(config.pattern, PatternId::Coherent);
        assert!(config.is_adaptive);
        assert_eq!(config.breath_cycle_secs, 10.0);
        assert_eq!(config.simulated_stress, 0.5);
        assert_eq!(
            config.effects,
            EffectToggles {
                audio: false,
                voice: false,
                haptics: true,
                sound: SoundType::Pink,
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = SessionConfig::from_json(r#"{"pattern": "box", "simulated_stress": 0.9}"#)
            .unwrap();
        assert_eq!(config.pattern, PatternId::Box);
        assert_eq!(config.simulated_stress, 0.9);
        assert_eq!(config.breath_cycle_secs, 10.0);
        assert!(config.effects.haptics);
    }

    #[test]
    fn test_rejects_out_of_range_stress() {
        let result = SessionConfig::from_json(r#"{"simulated_stress": 1.5}"#);
        assert!(matches!(result, Err(BreathError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_cycle() {
        let config = SessionConfig {
            breath_cycle_secs: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unbounded_cycle() {
        for secs in [MAX_BREATH_CYCLE_SECS + 1.0, 1e14, 1e300, f64::INFINITY] {
            let config = SessionConfig {
                breath_cycle_secs: secs,
                ..Default::default()
            };
            assert!(
                matches!(config.validate(), Err(BreathError::InvalidConfig(_))),
                "{secs} accepted"
            );
        }
        let longest = SessionConfig {
            breath_cycle_secs: MAX_BREATH_CYCLE_SECS,
            ..Default::default()
        };
        assert!(longest.validate().is_ok());
        assert!(SessionConfig::from_json(r#"{"breath_cycle_secs": 1e300}"#).is_err());
    }

    #[test]
    fn test_sound_type_in_effects() {
        let config =
            SessionConfig::from_json(r#"{"effects": {"audio": true, "sound": "brown"}}"#).unwrap();
        assert!(config.effects.audio);
        assert!(config.effects.haptics);
        assert_eq!(config.effects.sound, SoundType::Brown);
        assert_eq!("white".parse::<SoundType>().unwrap(), SoundType::White);
        assert!("violet".parse::<SoundType>().is_err());
        assert!(SessionConfig::from_json(r#"{"effects": {"sound": "violet"}}"#).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = SessionConfig {
            pattern: PatternId::Relax478,
            is_adaptive: false,
            ..Default::default()
        };
        let loaded = SessionConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unknown_pattern_is_an_error() {
        assert!(SessionConfig::from_json(r#"{"pattern": "square"}"#).is_err());
    }
}
