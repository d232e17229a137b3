//! Synheart Breath - Guided-breathing engine with simulated biofeedback
//!
//! Breath paces a user through a breathing pattern (INHALE, HOLD_IN, EXHALE,
//! HOLD_OUT) while generating a synthetic heart-rate signal that reacts to the
//! current phase and a simulated stress level. Phase durations stretch
//! adaptively from that signal.
//!
//! ## Modules
//!
//! - **Pattern catalog**: built-in patterns and their base timings
//! - **Signal generator**: RSA-modulated heart rate, HRV and arousal state
//! - **Phase scheduler**: phase order and effective (adaptive) durations
//! - **Session engine**: 50 ms sampling clock plus a variable phase clock on
//!   one timer queue, driven by host-supplied time
//! - **Cues**: observer hooks and the haptic/voice/audio effect dispatcher
//! - **Report & store**: completion report, vagal score and session log

pub mod config;
pub mod cues;
pub mod engine;
pub mod error;
pub mod history;
pub mod patterns;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod signal;
pub mod store;
pub mod timer;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::{EffectToggles, SessionConfig, SoundType};
pub use cues::{EffectDispatcher, PhaseCue, SessionObserver};
pub use engine::{EngineSnapshot, SessionEngine};
pub use error::{BreathError, CapabilityError};
pub use history::SampleHistory;
pub use report::{SessionReport, SessionSummary};
pub use signal::SignalGenerator;
pub use store::SessionLog;
pub use types::{ArousalState, BiofeedbackSample, BreathingPattern, PatternId, Phase};

/// Breath version embedded in reports and the FFI
pub const BREATH_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for exported payloads
pub const PRODUCER_NAME: &str = "synheart-breath";
