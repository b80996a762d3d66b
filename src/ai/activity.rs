//! Activity tracking: timestamps of user-originated events.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// What the user last did and when. Timestamps only move forward; the typing
/// flag is time-boxed and clears itself once its grace window has passed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRecord {
    pub last_user_send_at: Option<DateTime<Utc>>,
    pub last_user_activity_at: DateTime<Utc>,
    typing_until: Option<DateTime<Utc>>,
}

impl ActivityRecord {
    /// Startup counts as activity so nothing fires the instant the app opens.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_user_send_at: None,
            last_user_activity_at: now,
            typing_until: None,
        }
    }

    pub fn record_activity(&mut self, now: DateTime<Utc>) {
        self.last_user_activity_at = self.last_user_activity_at.max(now);
    }

    pub fn record_send(&mut self, now: DateTime<Utc>) {
        self.last_user_send_at = Some(match self.last_user_send_at {
            Some(prev) => prev.max(now),
            None => now,
        });
        self.record_activity(now);
        // A sent message ends the typing burst.
        self.typing_until = None;
    }

    /// Typing blocks proactive firing for `grace` but does not touch the
    /// activity timestamp the idle clock is measured from.
    pub fn record_typing(&mut self, now: DateTime<Utc>, grace: Duration) {
        let until = now + grace;
        self.typing_until = Some(match self.typing_until {
            Some(prev) => prev.max(until),
            None => until,
        });
    }

    pub fn is_typing(&self, now: DateTime<Utc>) -> bool {
        self.typing_until.is_some_and(|until| now < until)
    }

    pub fn typing_until(&self) -> Option<DateTime<Utc>> {
        self.typing_until
    }

    /// Drop an expired typing flag. Returns whether a flag was cleared.
    pub fn clear_expired_typing(&mut self, now: DateTime<Utc>) -> bool {
        match self.typing_until {
            Some(until) if now >= until => {
                self.typing_until = None;
                true
            }
            _ => false,
        }
    }

    pub fn since_activity(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_user_activity_at).max(Duration::zero())
    }

    pub fn since_send(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_user_send_at.map(|at| now - at)
    }
}
