//! Purpose-keyed timers.
//!
//! At most one deadline exists per purpose. `reset` replaces the previous
//! deadline in the same step, so two timers for the same concern can never
//! both be pending.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerPurpose {
    /// Proactive check after the user has gone quiet.
    IdleFire,
    /// Typing flag expiry.
    TypingGrace,
    /// End of the post-send cooldown.
    RateLimit,
    /// Debounced write of relationship state.
    Persist,
}

#[derive(Debug, Default, Clone)]
pub struct TimerSet {
    deadlines: HashMap<TimerPurpose, DateTime<Utc>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `purpose` at `at`, cancelling any pending deadline for it.
    /// Returns the cancelled deadline.
    pub fn reset(&mut self, purpose: TimerPurpose, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.deadlines.insert(purpose, at)
    }

    /// Schedule only if nothing is pending for `purpose` (debounce).
    pub fn arm_if_idle(&mut self, purpose: TimerPurpose, at: DateTime<Utc>) -> bool {
        if self.deadlines.contains_key(&purpose) {
            return false;
        }
        self.deadlines.insert(purpose, at);
        true
    }

    pub fn cancel(&mut self, purpose: TimerPurpose) -> Option<DateTime<Utc>> {
        self.deadlines.remove(&purpose)
    }

    pub fn deadline(&self, purpose: TimerPurpose) -> Option<DateTime<Utc>> {
        self.deadlines.get(&purpose).copied()
    }

    pub fn is_pending(&self, purpose: TimerPurpose) -> bool {
        self.deadlines.contains_key(&purpose)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<(TimerPurpose, DateTime<Utc>)> {
        self.deadlines
            .iter()
            .map(|(p, at)| (*p, *at))
            .min_by_key(|(p, at)| (*at, *p))
    }

    /// Remove and return every purpose due at `now`, earliest first.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<TimerPurpose> {
        let mut due: Vec<(DateTime<Utc>, TimerPurpose)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(p, at)| (*at, *p))
            .collect();
        due.sort();
        for (_, purpose) in &due {
            self.deadlines.remove(purpose);
        }
        due.into_iter().map(|(_, p)| p).collect()
    }
}
