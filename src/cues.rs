//! Phase cues and external effects
//!
//! The engine announces every phase change and every sample to its
//! observers. Rendering, audio, voice and haptics sit behind capability
//! traits; [`EffectDispatcher`] maps a phase to what each device should do,
//! skips disabled devices, and logs device failures instead of surfacing them.
//! The audio layer is started once per pattern and sound type, then shaped
//! phase by phase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::warn;

use crate::config::{EffectToggles, SoundType};
use crate::error::CapabilityError;
use crate::types::{BiofeedbackSample, PatternId, Phase};

/// Announcement of a phase change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseCue {
    /// Pattern being paced
    pub pattern: PatternId,
    pub phase: Phase,
    /// Effective duration of the phase (ms)
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl PhaseCue {
    pub fn duration_secs(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }
}

/// Receiver of engine output. All methods default to no-ops.
pub trait SessionObserver {
    /// A phase began (including the initial INHALE of a session)
    fn on_phase(&mut self, _cue: &PhaseCue) {}

    /// A sample was appended to the history
    fn on_sample(&mut self, _sample: &BiofeedbackSample) {}

    /// The session stopped
    fn on_stop(&mut self) {}
}

/// Vibration cue for a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HapticCue {
    /// Short, crisp pulse to start an action
    Inhale,
    /// Two brief pulses meaning "stop"
    Hold,
    /// Longer, softer pulse
    Exhale,
}

impl HapticCue {
    pub fn for_phase(phase: Phase) -> Self {
        if phase.is_hold() {
            return HapticCue::Hold;
        }
        match phase {
            Phase::Exhale => HapticCue::Exhale,
            _ => HapticCue::Inhale,
        }
    }

    /// Alternating vibrate/pause durations (ms)
    pub fn pattern(&self) -> &'static [u32] {
        match self {
            HapticCue::Inhale => &[50],
            HapticCue::Hold => &[30, 50, 30],
            HapticCue::Exhale => &[80],
        }
    }
}

/// Short spoken prompt for a phase
pub fn voice_prompt(phase: Phase) -> &'static str {
    if phase.is_hold() {
        return "Hold";
    }
    match phase {
        Phase::Exhale => "Breathe out",
        _ => "Breathe in",
    }
}

/// Left-ear carrier of the binaural drone (Hz)
pub const DRONE_CARRIER_HZ: f64 = 110.0;

/// Binaural beat for a pattern (Hz): delta for sleep, alpha for focus,
/// beta for activation, theta otherwise
pub fn binaural_beat_hz(pattern: PatternId) -> f64 {
    match pattern {
        PatternId::Relax478 => 3.0,
        PatternId::Box => 10.0,
        PatternId::Performance => 15.0,
        PatternId::Coherent | PatternId::Soldier | PatternId::PanicRescue => 5.5,
    }
}

/// Background layer the audio collaborator sets up for a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoundScape {
    pub pattern: PatternId,
    /// Noise color of the breath layer
    pub sound: SoundType,
    /// Drone carriers: left ear and right ear (Hz)
    pub left_hz: f64,
    pub right_hz: f64,
}

impl SoundScape {
    pub fn new(pattern: PatternId, sound: SoundType) -> Self {
        Self {
            pattern,
            sound,
            left_hz: DRONE_CARRIER_HZ,
            right_hz: DRONE_CARRIER_HZ + binaural_beat_hz(pattern),
        }
    }
}

/// Linear or exponential move to `target` over `over_secs`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ramp {
    pub target: f64,
    pub over_secs: f64,
}

/// First-order approach of the breath-noise gain toward `target`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainTarget {
    pub target: f64,
    /// Delay before the approach starts (seconds)
    pub start_after_secs: f64,
    pub time_constant_secs: f64,
}

/// Envelope targets for the breath-noise layer over one phase
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioEnvelope {
    pub gain: GainTarget,
    /// Low-pass cutoff ramp (Hz), exponential
    pub filter_hz: Option<Ramp>,
    /// Stereo pan ramp (-1..1), linear
    pub pan: Option<Ramp>,
}

impl AudioEnvelope {
    /// Inhale opens the sound, exhale closes it, holds fade out quickly.
    pub fn for_phase(phase: Phase, duration_secs: f64) -> Self {
        match phase {
            Phase::Inhale => AudioEnvelope {
                gain: GainTarget {
                    target: 0.4,
                    start_after_secs: 0.0,
                    time_constant_secs: duration_secs * 0.25,
                },
                filter_hz: Some(Ramp {
                    target: 750.0,
                    over_secs: duration_secs,
                }),
                pan: Some(Ramp {
                    target: 0.15,
                    over_secs: duration_secs,
                }),
            },
            Phase::Exhale => AudioEnvelope {
                gain: GainTarget {
                    target: 0.0,
                    start_after_secs: duration_secs * 0.7,
                    time_constant_secs: 0.25,
                },
                filter_hz: Some(Ramp {
                    target: 80.0,
                    over_secs: duration_secs,
                }),
                pan: Some(Ramp {
                    target: -0.15,
                    over_secs: duration_secs,
                }),
            },
            Phase::HoldIn | Phase::HoldOut => AudioEnvelope {
                gain: GainTarget {
                    target: 0.0,
                    start_after_secs: 0.0,
                    time_constant_secs: 0.1,
                },
                filter_hz: None,
                pan: None,
            },
        }
    }
}

/// Vibration motor
pub trait HapticDevice {
    fn vibrate(&mut self, pattern: &[u32]) -> Result<(), CapabilityError>;
}

/// Speech synthesizer
pub trait VoiceOutput {
    fn speak(&mut self, text: &str) -> Result<(), CapabilityError>;
    /// Drop any utterance in flight
    fn cancel(&mut self) -> Result<(), CapabilityError>;
}

/// Breath-noise audio graph
pub trait AudioModulator {
    /// Build the drone and noise layers; replaces any running layer
    fn start(&mut self, scape: &SoundScape) -> Result<(), CapabilityError>;
    fn modulate(&mut self, envelope: &AudioEnvelope) -> Result<(), CapabilityError>;
    fn stop(&mut self) -> Result<(), CapabilityError>;
}

/// Forwards phase cues to the enabled collaborators
pub struct EffectDispatcher {
    toggles: Rc<Cell<EffectToggles>>,
    haptics: Option<Box<dyn HapticDevice>>,
    voice: Option<Box<dyn VoiceOutput>>,
    audio: Option<Box<dyn AudioModulator>>,
    /// Layer the audio collaborator is currently playing
    playing_scape: Option<SoundScape>,
}

impl EffectDispatcher {
    pub fn new(toggles: EffectToggles) -> Self {
        Self {
            toggles: Rc::new(Cell::new(toggles)),
            haptics: None,
            voice: None,
            audio: None,
            playing_scape: None,
        }
    }

    pub fn with_haptics(mut self, device: Box<dyn HapticDevice>) -> Self {
        self.haptics = Some(device);
        self
    }

    pub fn with_voice(mut self, device: Box<dyn VoiceOutput>) -> Self {
        self.voice = Some(device);
        self
    }

    pub fn with_audio(mut self, device: Box<dyn AudioModulator>) -> Self {
        self.audio = Some(device);
        self
    }

    /// Shared toggle cell; the host flips it while the dispatcher is owned by an engine
    pub fn toggles(&self) -> Rc<Cell<EffectToggles>> {
        Rc::clone(&self.toggles)
    }
}

fn report(collaborator: &str, result: Result<(), CapabilityError>) {
    if let Err(e) = result {
        warn!(collaborator, error = %e, "effect collaborator failed");
    }
}

impl SessionObserver for EffectDispatcher {
    fn on_phase(&mut self, cue: &PhaseCue) {
        let toggles = self.toggles.get();

        if toggles.haptics {
            if let Some(device) = self.haptics.as_mut() {
                report("haptics", device.vibrate(HapticCue::for_phase(cue.phase).pattern()));
            }
        }

        if toggles.voice {
            if let Some(device) = self.voice.as_mut() {
                report("voice", device.speak(voice_prompt(cue.phase)));
            }
        }

        if let Some(device) = self.audio.as_mut() {
            if toggles.audio {
                let scape = SoundScape::new(cue.pattern, toggles.sound);
                if self.playing_scape != Some(scape) {
                    match device.start(&scape) {
                        Ok(()) => self.playing_scape = Some(scape),
                        Err(e) => report("audio", Err(e)),
                    }
                }
                let envelope = AudioEnvelope::for_phase(cue.phase, cue.duration_secs());
                report("audio", device.modulate(&envelope));
            } else if self.playing_scape.take().is_some() {
                report("audio", device.stop());
            }
        }
    }

    fn on_stop(&mut self) {
        if let Some(device) = self.voice.as_mut() {
            report("voice", device.cancel());
        }
        if let Some(device) = self.audio.as_mut() {
            self.playing_scape = None;
            report("audio", device.stop());
        }
    }
}

/// Everything a [`CueRecorder`] has seen
#[derive(Debug, Clone, Default)]
pub struct CueLog {
    pub phases: Vec<PhaseCue>,
    pub samples: Vec<BiofeedbackSample>,
    pub stops: usize,
}

/// Observer that records cues into a shared log
#[derive(Debug, Clone, Default)]
pub struct CueRecorder {
    log: Rc<RefCell<CueLog>>,
}

impl CueRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far
    pub fn snapshot(&self) -> CueLog {
        self.log.borrow().clone()
    }

    /// Take and clear the recorded entries
    pub fn drain(&self) -> CueLog {
        std::mem::take(&mut *self.log.borrow_mut())
    }
}

impl SessionObserver for CueRecorder {
    fn on_phase(&mut self, cue: &PhaseCue) {
        self.log.borrow_mut().phases.push(cue.clone());
    }

    fn on_sample(&mut self, sample: &BiofeedbackSample) {
        self.log.borrow_mut().samples.push(sample.clone());
    }

    fn on_stop(&mut self) {
        self.log.borrow_mut().stops += 1;
    }
}
