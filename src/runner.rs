//! Session runners
//!
//! [`SessionEngine`] is driven by whoever owns the clock. [`RealtimeRunner`]
//! owns the wall clock and sleeps between deadlines; [`run_simulated`] steps a
//! virtual clock with no sleeping, for tests and batch output.

use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::engine::SessionEngine;
use crate::error::BreathError;
use crate::report::SessionSummary;

/// Upper bound on a single sleep of the realtime runner
pub trait Ticker {
    fn interval(&self) -> StdDuration;
}

/// Fixed interval ticker
#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: StdDuration,
}

impl FixedTicker {
    pub fn new(interval: StdDuration) -> Self {
        Self { interval }
    }
}

impl Default for FixedTicker {
    fn default() -> Self {
        Self::new(StdDuration::from_millis(50))
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> StdDuration {
        self.interval
    }
}

/// Drives an engine from `Utc::now()`
pub struct RealtimeRunner<T: Ticker> {
    ticker: T,
}

impl<T: Ticker> RealtimeRunner<T> {
    pub fn new(ticker: T) -> Self {
        Self { ticker }
    }

    /// Sleep until the next deadline (at most one tick, never past `until`),
    /// then fire everything due. Returns the number of timers fired.
    pub fn step(
        &self,
        engine: &mut SessionEngine,
        until: DateTime<Utc>,
    ) -> Result<usize, BreathError> {
        let now = Utc::now();
        let target = engine.next_deadline().map_or(until, |d| d.min(until));
        let wait = (target - now)
            .to_std()
            .unwrap_or(StdDuration::ZERO)
            .min(self.ticker.interval());
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        engine.advance_to(Utc::now().min(until))
    }

    /// Run the session for `duration` of wall time, then stop it.
    ///
    /// Starts the engine if it is not already playing.
    pub fn run_for(
        &self,
        engine: &mut SessionEngine,
        duration: Duration,
    ) -> Result<Option<SessionSummary>, BreathError> {
        let started = Utc::now();
        if !engine.is_playing() {
            engine.start(started)?;
        }
        let until = end_of_run(started, duration)?;
        debug!(until = %until, "realtime run");

        while Utc::now() < until && engine.is_playing() {
            self.step(engine, until)?;
        }
        engine.advance_to(until)?;
        Ok(engine.stop(until))
    }
}

impl Default for RealtimeRunner<FixedTicker> {
    fn default() -> Self {
        Self::new(FixedTicker::default())
    }
}

fn end_of_run(start: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>, BreathError> {
    start.checked_add_signed(duration).ok_or_else(|| {
        BreathError::InvalidTimer(format!(
            "run of {} s from {start} is out of range",
            duration.num_seconds()
        ))
    })
}

/// Run a session on a virtual clock from `start` for `duration`, then stop it.
///
/// Timers fire at their own deadlines, so the result matches a realtime run
/// of the same length.
pub fn run_simulated(
    engine: &mut SessionEngine,
    start: DateTime<Utc>,
    duration: Duration,
) -> Result<Option<SessionSummary>, BreathError> {
    if !engine.is_playing() {
        engine.start(start)?;
    }
    let end = end_of_run(start, duration)?;
    let fired = engine.advance_to(end)?;
    debug!(fired, "simulated run finished");
    Ok(engine.stop(end))
}
