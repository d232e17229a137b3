//! Cancellable timers on a single logical event loop
//!
//! The queue never reads a clock. The owner advances it by asking for timers
//! due at a given instant; each timer fires at its own deadline, earliest
//! first, ties broken by scheduling order. Cancelling removes every timer
//! before the call returns, so a cancelled timer can never fire.

use chrono::{DateTime, Duration, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::BreathError;

/// Handle to a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// A timer that came due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer<K> {
    pub id: TimerId,
    pub kind: K,
    /// The instant the timer was armed for
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct TimerSlot<K> {
    kind: K,
    period: Option<Duration>,
}

/// Deadline-ordered queue of one-shot and repeating timers
#[derive(Debug, Clone)]
pub struct TimerQueue<K> {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, u64, TimerId)>>,
    slots: HashMap<TimerId, TimerSlot<K>>,
    next_id: u64,
    next_seq: u64,
}

impl<K: Copy> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy> TimerQueue<K> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            slots: HashMap::new(),
            next_id: 0,
            next_seq: 0,
        }
    }

    /// Arm a timer that fires once at `at`
    pub fn schedule_once(&mut self, at: DateTime<Utc>, kind: K) -> TimerId {
        let id = self.allocate_id();
        self.slots.insert(id, TimerSlot { kind, period: None });
        self.push(at, id);
        id
    }

    /// Arm a timer that fires at `first` and then every `period`
    pub fn schedule_repeating(
        &mut self,
        first: DateTime<Utc>,
        period: Duration,
        kind: K,
    ) -> Result<TimerId, BreathError> {
        if period <= Duration::zero() {
            return Err(BreathError::InvalidTimer(format!(
                "repeating period must be positive, got {} ms",
                period.num_milliseconds()
            )));
        }
        let id = self.allocate_id();
        self.slots.insert(
            id,
            TimerSlot {
                kind,
                period: Some(period),
            },
        );
        self.push(first, id);
        Ok(id)
    }

    /// Cancel every pending timer
    pub fn cancel_all(&mut self) {
        self.slots.clear();
        self.heap.clear();
    }

    /// Number of live timers
    pub fn pending(&self) -> usize {
        self.slots.len()
    }

    /// Deadline of the earliest live timer
    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        self.discard_cancelled();
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Remove and return the earliest timer due at or before `now`.
    ///
    /// Repeating timers are re-armed one period after the deadline they fired
    /// for, so a late caller catches up tick by tick without drift. A repeating
    /// timer whose next deadline falls past the calendar range is retired.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<FiredTimer<K>> {
        self.discard_cancelled();
        let (deadline, id) = match self.heap.peek() {
            Some(Reverse((deadline, _, id))) if *deadline <= now => (*deadline, *id),
            _ => return None,
        };
        self.heap.pop();

        let slot = self.slots.get(&id)?;
        let kind = slot.kind;
        let period = slot.period;
        match period.and_then(|period| deadline.checked_add_signed(period)) {
            Some(next) => self.push(next, id),
            None => {
                self.slots.remove(&id);
            }
        }

        Some(FiredTimer { id, kind, deadline })
    }

    fn allocate_id(&mut self) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        id
    }

    fn push(&mut self, at: DateTime<Utc>, id: TimerId) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((at, seq, id)));
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse((_, _, id))) = self.heap.peek() {
            if self.slots.contains_key(id) {
                break;
            }
            self.heap.pop();
        }
    }
}
