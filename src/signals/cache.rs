//! Last-known signal values.

use chrono::{DateTime, Duration, Utc};

/// Latest foreground-app lookup. Refreshed asynchronously; read every tick.
#[derive(Debug, Clone, Default)]
pub struct ForegroundCache {
    name: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

impl ForegroundCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, name: Option<String>, now: DateTime<Utc>) {
        self.name = name;
        self.updated_at = Some(now);
    }

    /// The cached name, or `None` once it is older than `max_age`.
    pub fn current(&self, now: DateTime<Utc>, max_age: Duration) -> Option<&str> {
        match (&self.name, self.updated_at) {
            (Some(name), Some(at)) if now - at < max_age => Some(name.as_str()),
            _ => None,
        }
    }
}

/// Tracks consecutive failures of one sampler so a broken signal is
/// logged once per streak instead of every tick.
#[derive(Debug, Clone, Default)]
pub struct FailureStreak {
    count: u32,
}

impl FailureStreak {
    /// Record a failure. Returns true if this one starts a new streak.
    pub fn fail(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.count == 1
    }

    /// Record a success. Returns the length of the streak that just ended.
    pub fn recover(&mut self) -> Option<u32> {
        let ended = (self.count > 0).then_some(self.count);
        self.count = 0;
        ended
    }
}
