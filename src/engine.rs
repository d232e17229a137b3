//! Session engine
//!
//! Runs a breathing session on two clocks sharing one timer queue:
//!
//! - **Sampling clock**: fixed 50 ms period. Each tick generates a biofeedback
//!   sample for the current phase and appends it to the bounded history.
//! - **Phase clock**: one-shot, re-armed after every transition with the
//!   effective duration of the phase just entered.
//!
//! The engine never reads the wall clock. Hosts call [`SessionEngine::advance_to`]
//! with the current instant and every due timer fires at its own deadline, so
//! transitions land on exact phase boundaries however coarsely time advances.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::{
    validate_breath_cycle, validate_stress, SessionConfig, SAMPLE_INTERVAL_MS,
    START_METRICS_SAMPLE,
};
use crate::cues::{PhaseCue, SessionObserver};
use crate::error::BreathError;
use crate::history::SampleHistory;
use crate::patterns;
use crate::report::SessionSummary;
use crate::scheduler::{next_phase, PhaseScheduler};
use crate::signal::SignalGenerator;
use crate::timer::TimerQueue;
use crate::types::{BiofeedbackSample, BreathingPattern, PatternId, Phase};

/// Timers the engine arms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineTimer {
    Sample,
    PhaseSwitch,
}

/// Point-in-time view of the engine for hosts and bindings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub is_playing: bool,
    pub pattern: PatternId,
    pub phase: Phase,
    pub phase_duration_ms: u64,
    pub phase_started_at: Option<DateTime<Utc>>,
    pub session_started_at: Option<DateTime<Utc>>,
    pub history_len: usize,
    /// Mean heart rate over the retained history (bpm)
    pub mean_heart_rate: Option<f64>,
    pub latest_sample: Option<BiofeedbackSample>,
}

/// Orchestrates the signal generator and the phase scheduler over time
pub struct SessionEngine {
    pattern: BreathingPattern,
    scheduler: PhaseScheduler,
    stress: f64,
    generator: SignalGenerator,
    history: SampleHistory,
    timers: TimerQueue<EngineTimer>,
    phase: Phase,
    phase_duration_ms: u64,
    phase_started_at: Option<DateTime<Utc>>,
    session_started_at: Option<DateTime<Utc>>,
    start_metrics: Option<BiofeedbackSample>,
    session_samples: usize,
    playing: bool,
    observers: Vec<Box<dyn SessionObserver>>,
}

/// Instant `ms` milliseconds after `at`, or an error past the calendar range
fn deadline_after(at: DateTime<Utc>, ms: u64) -> Result<DateTime<Utc>, BreathError> {
    i64::try_from(ms)
        .ok()
        .and_then(|ms| at.checked_add_signed(Duration::milliseconds(ms)))
        .ok_or_else(|| {
            BreathError::InvalidTimer(format!("deadline {ms} ms after {at} is out of range"))
        })
}

impl SessionEngine {
    /// Create a stopped engine from a configuration.
    ///
    /// `is_playing` is not acted on here; pass the configuration to
    /// [`SessionEngine::apply_config`] with the current instant to start.
    pub fn new(config: &SessionConfig) -> Result<Self, BreathError> {
        Self::with_pattern(patterns::pattern(config.pattern), config)
    }

    /// Create a stopped engine running a custom pattern
    pub fn with_pattern(
        pattern: BreathingPattern,
        config: &SessionConfig,
    ) -> Result<Self, BreathError> {
        config.validate()?;
        pattern.validate()?;
        Ok(Self {
            pattern,
            scheduler: config.scheduler(),
            stress: config.simulated_stress,
            generator: SignalGenerator::new(),
            history: SampleHistory::default(),
            timers: TimerQueue::new(),
            phase: Phase::Inhale,
            phase_duration_ms: 0,
            phase_started_at: None,
            session_started_at: None,
            start_metrics: None,
            session_samples: 0,
            playing: false,
            observers: Vec::new(),
        })
    }

    /// Replace the signal generator, e.g. with a seeded one
    pub fn with_generator(mut self, generator: SignalGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start (or restart) the session at `now`.
    ///
    /// A new session records its start time, resets the generator and drops
    /// samples left over from a previous session. A start time that is
    /// already recorded is kept.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), BreathError> {
        let fresh = self.session_started_at.is_none();
        if fresh {
            self.session_started_at = Some(now);
            self.generator.reset();
            self.history.clear();
            self.start_metrics = None;
            self.session_samples = 0;
            info!(pattern = %self.pattern.id, stress = self.stress, "session started");
        }
        let armed = self.arm(now);
        if armed.is_err() && fresh {
            self.session_started_at = None;
        }
        armed
    }

    /// Stop the session. Both clocks are cancelled before this returns.
    ///
    /// Returns the summary for the completion report, or `None` if the
    /// session was not playing. History is retained until [`SessionEngine::reset`].
    pub fn stop(&mut self, now: DateTime<Utc>) -> Option<SessionSummary> {
        if !self.playing {
            return None;
        }

        self.timers.cancel_all();
        self.playing = false;
        self.phase_started_at = None;
        for observer in &mut self.observers {
            observer.on_stop();
        }

        let started_at = self.session_started_at.take().unwrap_or(now);
        let duration_seconds = (now - started_at).num_seconds().max(0) as u64;
        info!(duration_seconds, samples = self.session_samples, "session stopped");

        Some(SessionSummary {
            pattern_name: self.pattern.name.clone(),
            started_at,
            ended_at: now,
            duration_seconds,
            initial: self
                .start_metrics
                .clone()
                .or_else(|| self.history.oldest().cloned()),
            last: self.history.latest().cloned(),
        })
    }

    /// Clear history, start metrics and start time after a report is consumed
    pub fn reset(&mut self) {
        self.history.clear();
        self.start_metrics = None;
        self.session_started_at = None;
        self.session_samples = 0;
        info!("session reset");
    }

    /// Apply every option of `config`, starting or stopping on `is_playing`.
    ///
    /// A pattern or breath-cycle change while playing restarts the phase
    /// cycle. Returns the summary when this call stopped the session.
    pub fn apply_config(
        &mut self,
        config: &SessionConfig,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionSummary>, BreathError> {
        config.validate()?;

        let pattern_changed = config.pattern != self.pattern.id;
        let cycle_changed = config.breath_cycle_secs != self.scheduler.breath_cycle_secs;

        if pattern_changed {
            self.pattern = patterns::pattern(config.pattern);
        }
        self.scheduler = config.scheduler();
        self.stress = config.simulated_stress;

        match (config.is_playing, self.playing) {
            (true, false) => {
                self.start(now)?;
                Ok(None)
            }
            (false, true) => Ok(self.stop(now)),
            (true, true) if pattern_changed || cycle_changed => {
                self.arm(now)?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Live settings
    // ------------------------------------------------------------------

    /// Switch pattern; restarts the cycle at INHALE when playing
    pub fn set_pattern(
        &mut self,
        pattern: BreathingPattern,
        now: DateTime<Utc>,
    ) -> Result<(), BreathError> {
        pattern.validate()?;
        info!(pattern = %pattern.id, "pattern changed");
        self.pattern = pattern;
        if self.playing {
            self.arm(now)?;
        }
        Ok(())
    }

    /// Switch to a catalog pattern
    pub fn set_pattern_id(&mut self, id: PatternId, now: DateTime<Utc>) -> Result<(), BreathError> {
        self.set_pattern(patterns::pattern(id), now)
    }

    /// Change the coherent breath cycle; restarts the cycle when playing
    pub fn set_breath_cycle_secs(
        &mut self,
        secs: f64,
        now: DateTime<Utc>,
    ) -> Result<(), BreathError> {
        validate_breath_cycle(secs)?;
        self.scheduler.breath_cycle_secs = secs;
        if self.playing {
            self.arm(now)?;
        }
        Ok(())
    }

    /// Toggle adaptive pacing; applies from the next transition
    pub fn set_adaptive(&mut self, adaptive: bool) {
        self.scheduler.adaptive = adaptive;
    }

    /// Change simulated stress; applies from the next sample
    pub fn set_stress(&mut self, stress: f64) -> Result<(), BreathError> {
        validate_stress(stress)?;
        self.stress = stress;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------

    /// Fire every timer due at or before `now`, in deadline order.
    ///
    /// Returns the number of timers fired. A phase deadline that cannot be
    /// represented halts both clocks and is returned as an error.
    pub fn advance_to(&mut self, now: DateTime<Utc>) -> Result<usize, BreathError> {
        let mut fired = 0;
        while let Some(timer) = self.timers.pop_due(now) {
            match timer.kind {
                EngineTimer::Sample => self.on_sample_tick(timer.deadline),
                EngineTimer::PhaseSwitch => {
                    if let Err(e) = self.on_phase_tick(timer.deadline) {
                        self.halt();
                        return Err(e);
                    }
                }
            }
            fired += 1;
        }
        Ok(fired)
    }

    /// Earliest pending timer deadline
    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        self.timers.next_deadline()
    }

    /// Number of armed timers (0 when stopped)
    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    /// Fraction of the current phase elapsed at `at`, clamped to `[0, 1]`
    pub fn phase_progress(&self, at: DateTime<Utc>) -> f64 {
        let Some(started) = self.phase_started_at else {
            return 0.0;
        };
        if self.phase_duration_ms == 0 {
            return 1.0;
        }
        let elapsed_ms = (at - started).num_milliseconds() as f64;
        (elapsed_ms / self.phase_duration_ms as f64).clamp(0.0, 1.0)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn phase_duration_ms(&self) -> u64 {
        self.phase_duration_ms
    }

    pub fn phase_started_at(&self) -> Option<DateTime<Utc>> {
        self.phase_started_at
    }

    pub fn session_started_at(&self) -> Option<DateTime<Utc>> {
        self.session_started_at
    }

    pub fn pattern(&self) -> &BreathingPattern {
        &self.pattern
    }

    pub fn scheduler(&self) -> PhaseScheduler {
        self.scheduler
    }

    pub fn stress(&self) -> f64 {
        self.stress
    }

    pub fn history(&self) -> &SampleHistory {
        &self.history
    }

    pub fn latest_sample(&self) -> Option<&BiofeedbackSample> {
        self.history.latest()
    }

    /// Snapshot of the sixth sample of the session
    pub fn start_metrics(&self) -> Option<&BiofeedbackSample> {
        self.start_metrics.as_ref()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            is_playing: self.playing,
            pattern: self.pattern.id,
            phase: self.phase,
            phase_duration_ms: self.phase_duration_ms,
            phase_started_at: self.phase_started_at,
            session_started_at: self.session_started_at,
            history_len: self.history.len(),
            mean_heart_rate: self.history.mean_heart_rate(),
            latest_sample: self.history.latest().cloned(),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Cancel both clocks and re-arm them from INHALE at `now`.
    ///
    /// On error nothing is armed and the engine is left stopped.
    fn arm(&mut self, now: DateTime<Utc>) -> Result<(), BreathError> {
        self.timers.cancel_all();

        let duration_ms =
            self.scheduler
                .effective_duration_ms(&self.pattern, Phase::Inhale, self.history.latest());
        let period = Duration::milliseconds(SAMPLE_INTERVAL_MS);
        let armed = deadline_after(now, duration_ms).and_then(|switch_at| {
            let first_sample = now.checked_add_signed(period).ok_or_else(|| {
                BreathError::InvalidTimer(format!("first sample after {now} is out of range"))
            })?;
            self.timers.schedule_once(switch_at, EngineTimer::PhaseSwitch);
            self.timers
                .schedule_repeating(first_sample, period, EngineTimer::Sample)?;
            Ok(())
        });
        if let Err(e) = armed {
            self.halt();
            return Err(e);
        }

        self.phase = Phase::Inhale;
        self.phase_duration_ms = duration_ms;
        self.phase_started_at = Some(now);
        self.playing = true;
        self.notify_phase(now);
        Ok(())
    }

    /// Drop both clocks after a scheduling failure
    fn halt(&mut self) {
        self.timers.cancel_all();
        self.phase_started_at = None;
        if self.playing {
            self.playing = false;
            warn!(phase = %self.phase, "session halted: phase deadline out of range");
            for observer in &mut self.observers {
                observer.on_stop();
            }
        }
    }

    fn on_sample_tick(&mut self, at: DateTime<Utc>) {
        let progress = self.phase_progress(at);
        let sample = self.generator.generate(self.phase, self.stress, progress, at);
        self.session_samples += 1;

        if self.session_samples == START_METRICS_SAMPLE && self.start_metrics.is_none() {
            debug!(heart_rate = sample.heart_rate, hrv = sample.hrv, "start metrics captured");
            self.start_metrics = Some(sample.clone());
        }

        trace!(
            phase = %self.phase,
            progress,
            heart_rate = sample.heart_rate,
            rsa = sample.rsa_amplitude,
            arousal = sample.arousal_state.as_str(),
            "sample"
        );

        for observer in &mut self.observers {
            observer.on_sample(&sample);
        }
        self.history.push(sample);
    }

    fn on_phase_tick(&mut self, at: DateTime<Utc>) -> Result<(), BreathError> {
        let next = next_phase(self.phase, &self.pattern.timings);
        let duration_ms =
            self.scheduler
                .effective_duration_ms(&self.pattern, next, self.history.latest());
        let switch_at = deadline_after(at, duration_ms)?;

        self.phase = next;
        self.phase_duration_ms = duration_ms;
        self.phase_started_at = Some(at);
        debug!(phase = %next, duration_ms, "phase transition");

        self.notify_phase(at);
        self.timers.schedule_once(switch_at, EngineTimer::PhaseSwitch);
        Ok(())
    }

    fn notify_phase(&mut self, at: DateTime<Utc>) {
        let cue = PhaseCue {
            pattern: self.pattern.id,
            phase: self.phase,
            duration_ms: self.phase_duration_ms,
            started_at: at,
        };
        for observer in &mut self.observers {
            observer.on_phase(&cue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_BREATH_CYCLE_SECS;
    use crate::cues::CueRecorder;
    use crate::history::HISTORY_CAPACITY;
    use crate::types::PhaseTimings;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap()
    }

    fn ms(n: i64) -> Duration {
        Duration::milliseconds(n)
    }

    fn engine(pattern: PatternId, adaptive: bool) -> (SessionEngine, CueRecorder) {
        let config = SessionConfig {
            pattern,
            is_adaptive: adaptive,
            ..Default::default()
        };
        let mut engine = SessionEngine::new(&config)
            .unwrap()
            .with_generator(SignalGenerator::with_seed(17));
        let recorder = CueRecorder::new();
        engine.add_observer(Box::new(recorder.clone()));
        (engine, recorder)
    }

    /// Advance in fixed steps up to and including `until`
    fn run(engine: &mut SessionEngine, from: DateTime<Utc>, until: DateTime<Utc>, step_ms: i64) {
        let mut now = from;
        while now <= until {
            engine.advance_to(now).unwrap();
            now += ms(step_ms);
        }
    }

    #[test]
    fn test_start_enters_inhale_and_arms_both_clocks() {
        let (mut engine, recorder) = engine(PatternId::Box, false);
        engine.start(t0()).unwrap();

        assert!(engine.is_playing());
        assert_eq!(engine.phase(), Phase::Inhale);
        assert_eq!(engine.phase_duration_ms(), 4000);
        assert_eq!(engine.session_started_at(), Some(t0()));
        assert_eq!(engine.pending_timers(), 2);
        assert_eq!(engine.next_deadline(), Some(t0() + ms(50)));

        let log = recorder.snapshot();
        assert_eq!(log.phases.len(), 1);
        assert_eq!(log.phases[0].phase, Phase::Inhale);
    }

    #[test]
    fn test_box_pattern_phase_sequence() {
        let (mut engine, recorder) = engine(PatternId::Box, false);
        engine.start(t0()).unwrap();
        run(&mut engine, t0(), t0() + ms(16_020), 10);

        let cues = recorder.snapshot().phases;
        let phases: Vec<Phase> = cues.iter().map(|c| c.phase).collect();
        assert_eq!(
            phases,
            vec![
                Phase::Inhale,
                Phase::HoldIn,
                Phase::Exhale,
                Phase::HoldOut,
                Phase::Inhale
            ]
        );
        for (i, cue) in cues.iter().enumerate() {
            let boundary = t0() + ms(4000 * i as i64);
            let skew = (cue.started_at - boundary).num_milliseconds().abs();
            assert!(skew <= 50, "transition {i} off by {skew} ms");
            assert_eq!(cue.duration_ms, 4000);
        }
    }

    #[test]
    fn test_coarse_advance_still_hits_boundaries() {
        let (mut engine, recorder) = engine(PatternId::Soldier, false);
        engine.start(t0()).unwrap();
        // One jump across three transitions
        engine.advance_to(t0() + ms(24_000)).unwrap();

        let starts: Vec<_> = recorder
            .snapshot()
            .phases
            .iter()
            .map(|c| (c.phase, c.started_at))
            .collect();
        assert_eq!(
            starts,
            vec![
                (Phase::Inhale, t0()),
                (Phase::Exhale, t0() + ms(4_000)),
                (Phase::Inhale, t0() + ms(12_000)),
                (Phase::Exhale, t0() + ms(16_000)),
                (Phase::Inhale, t0() + ms(24_000)),
            ]
        );
    }

    #[test]
    fn test_coherent_phases_follow_breath_cycle() {
        let (mut engine, recorder) = engine(PatternId::Coherent, true);
        engine.set_stress(1.0).unwrap();
        engine.start(t0()).unwrap();
        run(&mut engine, t0(), t0() + ms(30_000), 50);

        let cues = recorder.snapshot().phases;
        assert!(cues.len() >= 6);
        for cue in &cues {
            assert_eq!(cue.duration_ms, 5000);
            assert!(matches!(cue.phase, Phase::Inhale | Phase::Exhale));
        }
    }

    #[test]
    fn test_sampling_at_20hz_with_bounded_history() {
        let (mut engine, recorder) = engine(PatternId::Box, false);
        engine.start(t0()).unwrap();
        engine.advance_to(t0() + ms(1000)).unwrap();
        assert_eq!(engine.history().len(), 20);

        engine.advance_to(t0() + ms(10_000)).unwrap();
        assert_eq!(engine.history().len(), HISTORY_CAPACITY);
        assert_eq!(recorder.snapshot().samples.len(), 200);
        assert_eq!(
            engine.history().oldest().unwrap().timestamp,
            t0() + ms(50 * 81)
        );
        assert_eq!(engine.latest_sample().unwrap().timestamp, t0() + ms(10_000));
    }

    #[test]
    fn test_sixth_sample_is_start_metrics() {
        let (mut engine, recorder) = engine(PatternId::Box, false);
        engine.start(t0()).unwrap();
        engine.advance_to(t0() + ms(250)).unwrap();
        assert!(engine.start_metrics().is_none());

        engine.advance_to(t0() + ms(300)).unwrap();
        let samples = recorder.snapshot().samples;
        assert_eq!(engine.start_metrics(), Some(&samples[5]));

        engine.advance_to(t0() + ms(5_000)).unwrap();
        assert_eq!(engine.start_metrics(), Some(&samples[5]));
    }

    #[test]
    fn test_progress_is_clamped() {
        let (mut engine, _) = engine(PatternId::Box, false);
        engine.start(t0()).unwrap();
        assert_eq!(engine.phase_progress(t0() - ms(100)), 0.0);
        assert_eq!(engine.phase_progress(t0() + ms(2000)), 0.5);
        assert_eq!(engine.phase_progress(t0() + ms(9000)), 1.0);
    }

    #[test]
    fn test_stop_is_idempotent_and_cancels_timers() {
        let (mut engine, recorder) = engine(PatternId::Box, false);
        assert!(engine.stop(t0()).is_none());

        engine.start(t0()).unwrap();
        engine.advance_to(t0() + ms(1_000)).unwrap();
        let summary = engine.stop(t0() + ms(1_000)).unwrap();
        assert_eq!(summary.duration_seconds, 1);
        assert_eq!(engine.pending_timers(), 0);
        assert_eq!(engine.session_started_at(), None);
        // History kept for the report
        assert_eq!(engine.history().len(), 20);

        assert!(engine.stop(t0() + ms(2_000)).is_none());
        assert_eq!(recorder.snapshot().stops, 1);

        // Nothing fires after stop
        assert_eq!(engine.advance_to(t0() + ms(60_000)).unwrap(), 0);
        assert_eq!(engine.history().len(), 20);
    }

    #[test]
    fn test_summary_uses_start_metrics_and_last_sample() {
        let (mut engine, recorder) = engine(PatternId::Relax478, false);
        engine.start(t0()).unwrap();
        engine.advance_to(t0() + ms(65_000)).unwrap();
        let summary = engine.stop(t0() + ms(65_000)).unwrap();

        let samples = recorder.snapshot().samples;
        assert_eq!(summary.initial.as_ref(), Some(&samples[5]));
        assert_eq!(summary.last.as_ref(), samples.last());
        assert_eq!(summary.duration_seconds, 65);
        assert_eq!(summary.pattern_name, "Deep Sleep (4-7-8)");
        assert!(summary.report().is_some());
    }

    #[test]
    fn test_stop_then_restart_resets_phase_and_start_time() {
        let (mut engine, recorder) = engine(PatternId::Box, false);
        engine.start(t0()).unwrap();
        // Three transitions: HOLD_IN at 4s, EXHALE at 8s, HOLD_OUT at 12s
        run(&mut engine, t0(), t0() + ms(13_000), 50);
        assert_eq!(engine.phase(), Phase::HoldOut);
        engine.stop(t0() + ms(13_000));

        let restart = t0() + ms(20_000);
        engine.start(restart).unwrap();
        assert_eq!(engine.phase(), Phase::Inhale);
        assert_eq!(engine.session_started_at(), Some(restart));
        assert_eq!(engine.pending_timers(), 2);
        assert!(engine.history().is_empty());

        recorder.drain();
        // The old run's HOLD_OUT would have ended at 16s; nothing fires before 24s
        engine.advance_to(restart + ms(3_990)).unwrap();
        let log = recorder.snapshot();
        assert!(log.phases.is_empty());
        assert_eq!(engine.phase(), Phase::Inhale);
        assert!(log.samples.iter().all(|s| s.timestamp > restart));

        engine.advance_to(restart + ms(4_000)).unwrap();
        assert_eq!(engine.phase(), Phase::HoldIn);
        assert_eq!(engine.phase_started_at(), Some(restart + ms(4_000)));
    }

    #[test]
    fn test_start_while_running_keeps_start_time() {
        let (mut engine, _) = engine(PatternId::Box, false);
        engine.start(t0()).unwrap();
        engine.advance_to(t0() + ms(5_000)).unwrap();
        engine.start(t0() + ms(5_000)).unwrap();
        assert_eq!(engine.session_started_at(), Some(t0()));
        assert_eq!(engine.phase(), Phase::Inhale);
        assert_eq!(engine.pending_timers(), 2);
        assert_eq!(engine.history().len(), 100);
    }

    #[test]
    fn test_pattern_switch_while_playing_restarts_cycle() {
        let (mut engine, recorder) = engine(PatternId::Box, false);
        engine.start(t0()).unwrap();
        engine.advance_to(t0() + ms(6_000)).unwrap();
        assert_eq!(engine.phase(), Phase::HoldIn);

        engine
            .set_pattern_id(PatternId::Performance, t0() + ms(6_000))
            .unwrap();
        assert_eq!(engine.phase(), Phase::Inhale);
        assert_eq!(engine.phase_duration_ms(), 2000);
        assert_eq!(engine.session_started_at(), Some(t0()));
        assert_eq!(engine.pending_timers(), 2);

        engine.advance_to(t0() + ms(8_000)).unwrap();
        let last = recorder.snapshot().phases.last().cloned().unwrap();
        assert_eq!(last.phase, Phase::Exhale);
        assert_eq!(last.started_at, t0() + ms(8_000));
    }

    #[test]
    fn test_breath_cycle_change_restarts_coherent_pattern() {
        let (mut engine, _) = engine(PatternId::Coherent, false);
        engine.start(t0()).unwrap();
        engine.advance_to(t0() + ms(7_000)).unwrap();
        assert_eq!(engine.phase(), Phase::Exhale);

        engine.set_breath_cycle_secs(12.0, t0() + ms(7_000)).unwrap();
        assert_eq!(engine.phase(), Phase::Inhale);
        assert_eq!(engine.phase_duration_ms(), 6000);
        assert!(engine.set_breath_cycle_secs(0.0, t0()).is_err());
    }

    #[test]
    fn test_reset_clears_report_state() {
        let (mut engine, _) = engine(PatternId::Box, false);
        engine.start(t0()).unwrap();
        engine.advance_to(t0() + ms(1_000)).unwrap();
        engine.stop(t0() + ms(1_000));
        engine.reset();

        assert!(engine.history().is_empty());
        assert!(engine.start_metrics().is_none());
        assert!(engine.session_started_at().is_none());
    }

    #[test]
    fn test_apply_config_drives_lifecycle() {
        let (mut engine, _) = engine(PatternId::Box, false);
        let mut config = SessionConfig {
            pattern: PatternId::Box,
            is_adaptive: false,
            is_playing: true,
            ..Default::default()
        };
        assert!(engine.apply_config(&config, t0()).unwrap().is_none());
        assert!(engine.is_playing());

        engine.advance_to(t0() + ms(5_000)).unwrap();
        config.simulated_stress = 0.9;
        engine.apply_config(&config, t0() + ms(5_000)).unwrap();
        // Stress change does not restart
        assert_eq!(engine.phase(), Phase::HoldIn);
        assert_eq!(engine.stress(), 0.9);

        config.pattern = PatternId::Soldier;
        engine.apply_config(&config, t0() + ms(5_000)).unwrap();
        assert_eq!(engine.phase(), Phase::Inhale);
        assert_eq!(engine.pattern().id, PatternId::Soldier);

        config.is_playing = false;
        let summary = engine.apply_config(&config, t0() + ms(9_000)).unwrap();
        assert_eq!(summary.unwrap().duration_seconds, 9);
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let (mut engine, _) = engine(PatternId::Box, false);
        assert!(engine.set_stress(-0.1).is_err());
        let mut broken = patterns::pattern(PatternId::Box);
        broken.timings.inhale = 0.0;
        assert!(engine.set_pattern(broken, t0()).is_err());
        assert_eq!(engine.pattern().id, PatternId::Box);
    }

    #[test]
    fn test_high_stress_session_reports_hyper_arousal() {
        let (mut engine, _) = engine(PatternId::Box, true);
        engine.set_stress(0.9).unwrap();
        engine.start(t0()).unwrap();
        engine.advance_to(t0() + ms(500)).unwrap();
        assert!(engine
            .history()
            .iter()
            .all(|s| s.arousal_state == crate::types::ArousalState::HyperArousal));
    }

    #[test]
    fn test_adaptive_exhale_stretches_from_live_sample() {
        let (mut engine, recorder) = engine(PatternId::Soldier, true);
        engine.start(t0()).unwrap();
        engine.advance_to(t0() + ms(4_000)).unwrap();

        // Baseline near 80 bpm at stress 0.5, so the first exhale runs long
        let exhale = recorder.snapshot().phases[1].clone();
        assert_eq!(exhale.phase, Phase::Exhale);
        assert!(engine.history().latest().unwrap().heart_rate > 75);
        assert_eq!(exhale.duration_ms, 8_500);
        assert_eq!(engine.phase_duration_ms(), 8_500);
    }

    #[test]
    fn test_distressed_signal_keeps_base_exhale() {
        let (mut engine, recorder) = engine(PatternId::Soldier, true);
        engine.set_stress(1.0).unwrap();
        engine.start(t0()).unwrap();
        engine.advance_to(t0() + ms(60_000)).unwrap();

        let exhales: Vec<PhaseCue> = recorder
            .snapshot()
            .phases
            .into_iter()
            .filter(|c| c.phase == Phase::Exhale)
            .collect();
        // Wide swing from the resting start still earns the stretch
        assert_eq!(exhales[0].duration_ms, 8_500);

        // Once heart rate settles near 100 bpm with a 2 bpm swing the rhythm is fixed
        let settled: Vec<_> = exhales
            .iter()
            .filter(|c| c.started_at >= t0() + ms(25_000))
            .collect();
        assert!(settled.len() >= 2);
        assert!(settled.iter().all(|c| c.duration_ms == 8_000));
    }

    #[test]
    fn test_unbounded_durations_are_rejected() {
        let (mut engine, _) = engine(PatternId::Coherent, false);
        assert!(engine.set_breath_cycle_secs(1e300, t0()).is_err());
        assert!(engine.set_breath_cycle_secs(1e14, t0()).is_err());
        assert_eq!(engine.scheduler().breath_cycle_secs, 10.0);

        let mut endless = patterns::pattern(PatternId::Soldier);
        endless.timings = PhaseTimings::new(4.0, 0.0, 1e300, 0.0);
        assert!(engine.set_pattern(endless.clone(), t0()).is_err());
        assert!(SessionEngine::with_pattern(endless, &SessionConfig::default()).is_err());
    }

    #[test]
    fn test_longest_breath_cycle_advances_to_completion() {
        let (mut engine, recorder) = engine(PatternId::Coherent, false);
        engine
            .set_breath_cycle_secs(MAX_BREATH_CYCLE_SECS, t0())
            .unwrap();
        engine.start(t0()).unwrap();
        assert_eq!(engine.phase_duration_ms(), 60_000);

        // 12 000 samples and ten transitions in ten minutes
        assert_eq!(engine.advance_to(t0() + ms(600_000)).unwrap(), 12_010);
        assert_eq!(recorder.snapshot().phases.len(), 11);
        assert_eq!(engine.next_deadline(), Some(t0() + ms(600_050)));
    }

    #[test]
    fn test_start_at_calendar_end_is_an_error() {
        let (mut engine, recorder) = engine(PatternId::Box, false);
        let result = engine.start(DateTime::<Utc>::MAX_UTC - ms(1_000));

        assert!(matches!(result, Err(BreathError::InvalidTimer(_))));
        assert!(!engine.is_playing());
        assert_eq!(engine.pending_timers(), 0);
        assert_eq!(engine.session_started_at(), None);
        assert!(recorder.snapshot().phases.is_empty());
    }

    #[test]
    fn test_phase_past_calendar_end_halts_session() {
        let (mut engine, recorder) = engine(PatternId::Box, false);
        let end = DateTime::<Utc>::MAX_UTC;
        engine.start(end - ms(10_000)).unwrap();

        // HOLD_IN fits, the EXHALE deadline does not
        let result = engine.advance_to(end);
        assert!(matches!(result, Err(BreathError::InvalidTimer(_))));
        assert!(!engine.is_playing());
        assert_eq!(engine.pending_timers(), 0);

        let log = recorder.snapshot();
        let phases: Vec<Phase> = log.phases.iter().map(|c| c.phase).collect();
        assert_eq!(phases, vec![Phase::Inhale, Phase::HoldIn]);
        assert_eq!(log.stops, 1);
        assert_eq!(engine.advance_to(end).unwrap(), 0);
    }

    #[test]
    fn test_snapshot_reports_mean_heart_rate() {
        let (mut engine, _) = engine(PatternId::Box, false);
        assert_eq!(engine.snapshot().mean_heart_rate, None);

        engine.start(t0()).unwrap();
        engine.advance_to(t0() + ms(2_000)).unwrap();
        let snapshot = engine.snapshot();
        let expected = engine.history().iter().map(|s| s.heart_rate as f64).sum::<f64>()
            / engine.history().len() as f64;
        assert_eq!(snapshot.history_len, 40);
        assert_eq!(snapshot.mean_heart_rate, Some(expected));
        assert_eq!(snapshot.pattern, PatternId::Box);
    }
}
