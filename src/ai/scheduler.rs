//! Proactivity Scheduler: decides whether and when to speak unprompted.
//!
//! Two meta-states: *armed* (an idle-fire timer is pending) and *cooling
//! down* (a message went out and the randomized rate-limit window has not
//! elapsed). Every transition takes `now` and the random source explicitly
//! and records its deadlines in a [`TimerSet`], so the whole machine can be
//! driven tick by tick in tests.

use crate::ai::activity::ActivityRecord;
use crate::ai::initiative::{
    compose, emission_probability, select_content, ProactiveCategory, ProactiveMessage,
    ProactiveTrigger,
};
use crate::ai::mode::EffectiveMode;
use crate::ai::relationship::{IntimacyTier, ProactiveOutcome, RelationshipState};
use crate::ai::timers::{TimerPurpose, TimerSet};
use crate::config::ProactiveConfig;
use crate::utils::RandomSource;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Inputs the eligibility predicate reads, sampled by the caller.
#[derive(Debug, Clone, Copy)]
pub struct FireContext<'a> {
    pub visible: bool,
    pub mode: EffectiveMode,
    pub idle_ms: u64,
    pub activity: &'a ActivityRecord,
}

/// Why an attempt did not go ahead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ineligible {
    Disabled,
    NotVisible,
    ModeForbids(EffectiveMode),
    Typing,
    SystemNotIdle { idle_ms: u64 },
    UserRecentlyActive { since: Duration },
    RateLimited { remaining: Duration },
    NoTemplate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Attempt {
    Emitted(ProactiveMessage),
    Suppressed(Ineligible),
    RollFailed { chance: f64, roll: f64 },
    /// The previous message went unanswered past the decay window.
    IgnoredPenalty { initiative: f64 },
}

impl Attempt {
    pub fn message(&self) -> Option<&ProactiveMessage> {
        match self {
            Attempt::Emitted(message) => Some(message),
            _ => None,
        }
    }

    pub fn into_message(self) -> Option<ProactiveMessage> {
        match self {
            Attempt::Emitted(message) => Some(message),
            _ => None,
        }
    }
}

/// Read model of the initiative side, for the UI and for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitiativeSnapshot {
    pub initiative: f64,
    pub relationship_score: f64,
    pub tier: IntimacyTier,
    pub pending_acknowledgment: bool,
    pub last_proactive_at: Option<DateTime<Utc>>,
    pub last_proactive_category: Option<ProactiveCategory>,
    pub cooldown_remaining_secs: i64,
    pub total_user_messages: u64,
    pub distinct_usage_days: usize,
}

pub struct ProactivityScheduler {
    config: ProactiveConfig,
    /// Window chosen at the last emission.
    rate_limit: Duration,
}

impl ProactivityScheduler {
    pub fn new(config: ProactiveConfig) -> Self {
        let (rate_limit, _) = config.rate_limit_band();
        Self { config, rate_limit }
    }

    pub fn config(&self) -> &ProactiveConfig {
        &self.config
    }

    pub fn rate_limit(&self) -> Duration {
        self.rate_limit
    }

    pub fn cooldown_remaining(&self, state: &RelationshipState, now: DateTime<Utc>) -> Duration {
        match state.last_proactive_at {
            Some(at) => (at + self.rate_limit - now).max(Duration::zero()),
            None => Duration::zero(),
        }
    }

    pub fn is_cooling_down(&self, state: &RelationshipState, now: DateTime<Utc>) -> bool {
        self.cooldown_remaining(state, now) > Duration::zero()
    }

    pub fn snapshot(&self, state: &RelationshipState, now: DateTime<Utc>) -> InitiativeSnapshot {
        InitiativeSnapshot {
            initiative: state.initiative,
            relationship_score: state.relationship_score(),
            tier: state.tier(self.config.intimacy_tier),
            pending_acknowledgment: state.pending_acknowledgment,
            last_proactive_at: state.last_proactive_at,
            last_proactive_category: state.last_proactive_category,
            cooldown_remaining_secs: self.cooldown_remaining(state, now).num_seconds(),
            total_user_messages: state.total_user_messages,
            distinct_usage_days: state.distinct_usage_days.len(),
        }
    }

    // ── Eligibility ────────────────────────────────────────

    pub fn eligibility(
        &self,
        ctx: &FireContext<'_>,
        state: &RelationshipState,
        now: DateTime<Utc>,
    ) -> Result<(), Ineligible> {
        if !self.config.enabled {
            return Err(Ineligible::Disabled);
        }
        if !ctx.visible {
            return Err(Ineligible::NotVisible);
        }
        if !ctx.mode.permits_proactivity() {
            return Err(Ineligible::ModeForbids(ctx.mode));
        }
        if ctx.activity.is_typing(now) {
            return Err(Ineligible::Typing);
        }
        let threshold = self.config.idle_threshold();
        if (ctx.idle_ms as i64) < threshold.num_milliseconds() {
            return Err(Ineligible::SystemNotIdle {
                idle_ms: ctx.idle_ms,
            });
        }
        let since = ctx.activity.since_activity(now);
        if since < threshold {
            return Err(Ineligible::UserRecentlyActive { since });
        }
        let remaining = self.cooldown_remaining(state, now);
        if remaining > Duration::zero() {
            return Err(Ineligible::RateLimited { remaining });
        }
        Ok(())
    }

    /// One attempt, shared by the timer path and the pull path. Mutates the
    /// relationship state on emission and on an ignore penalty.
    pub fn attempt(
        &mut self,
        trigger: ProactiveTrigger,
        ctx: &FireContext<'_>,
        state: &mut RelationshipState,
        facts: &[String],
        now: DateTime<Utc>,
        rng: &mut dyn RandomSource,
    ) -> Attempt {
        if !self.config.enabled {
            return Attempt::Suppressed(Ineligible::Disabled);
        }

        if state.ignore_penalty_due(now, self.config.decay_window()) {
            *state = std::mem::take(state).on_proactive_outcome(
                ProactiveOutcome::Ignored,
                now,
                &self.config,
            );
            tracing::info!(
                "[Scheduler] Previous message ignored, initiative lowered to {:.2}",
                state.initiative
            );
            return Attempt::IgnoredPenalty {
                initiative: state.initiative,
            };
        }

        if let Err(reason) = self.eligibility(ctx, state, now) {
            tracing::debug!("[Scheduler] {:?} not eligible: {:?}", trigger, reason);
            return Attempt::Suppressed(reason);
        }

        let chance = emission_probability(
            state.initiative,
            state.relationship_score(),
            trigger,
            &self.config,
        );
        let roll = rng.next_f64();
        if roll >= chance {
            tracing::debug!(
                "[Scheduler] {:?} roll failed ({:.3} >= {:.3})",
                trigger,
                roll,
                chance
            );
            return Attempt::RollFailed { chance, roll };
        }

        let content = select_content(state, facts, &self.config);
        let Some(message) = compose(content, state, trigger, now, &self.config, rng) else {
            return Attempt::Suppressed(Ineligible::NoTemplate);
        };

        *state = std::mem::take(state).on_proactive_outcome(
            ProactiveOutcome::Sent {
                category: message.category,
                template_id: message.template_id.to_string(),
            },
            now,
            &self.config,
        );
        let (lo, hi) = self.config.rate_limit_band();
        self.rate_limit = rng.range_duration(lo, hi);

        tracing::info!(
            "[Scheduler] Emitted {} message ({}) via {:?}, cooling down {} min",
            message.category.as_str(),
            message.template_id,
            trigger,
            self.rate_limit.num_minutes()
        );
        Attempt::Emitted(message)
    }

    // ── Transitions ────────────────────────────────────────

    fn arm_idle_fire(&self, now: DateTime<Utc>, timers: &mut TimerSet, rng: &mut dyn RandomSource) {
        let (lo, hi) = self.config.idle_fire_band();
        timers.reset(TimerPurpose::IdleFire, now + rng.range_duration(lo, hi));
    }

    fn enter_cooldown(&self, now: DateTime<Utc>, timers: &mut TimerSet) {
        timers.cancel(TimerPurpose::IdleFire);
        timers.reset(TimerPurpose::RateLimit, now + self.rate_limit);
    }

    /// Any user activity pushes the idle check out to a fresh random delay.
    pub fn on_activity(
        &self,
        now: DateTime<Utc>,
        activity: &mut ActivityRecord,
        timers: &mut TimerSet,
        rng: &mut dyn RandomSource,
    ) {
        activity.record_activity(now);
        self.arm_idle_fire(now, timers, rng);
    }

    /// A user message: counts toward the relationship and implicitly
    /// acknowledges any pending proactive message.
    pub fn on_user_sent(
        &self,
        text: &str,
        now: DateTime<Utc>,
        activity: &mut ActivityRecord,
        state: &mut RelationshipState,
        timers: &mut TimerSet,
        rng: &mut dyn RandomSource,
    ) {
        activity.record_send(now);
        timers.cancel(TimerPurpose::TypingGrace);
        let was_pending = state.pending_acknowledgment;
        let mut next = std::mem::take(state).on_user_message(text, now);
        if was_pending {
            next = next.on_proactive_outcome(ProactiveOutcome::Acknowledged, now, &self.config);
            tracing::info!(
                "[Scheduler] Proactive message acknowledged, initiative raised to {:.2}",
                next.initiative
            );
        }
        *state = next;
        self.arm_idle_fire(now, timers, rng);
    }

    /// Typing blocks firing for the grace window. The idle-fire deadline and
    /// the activity timestamp are left alone.
    pub fn on_typing(&self, now: DateTime<Utc>, activity: &mut ActivityRecord, timers: &mut TimerSet) {
        activity.record_typing(now, self.config.typing_grace());
        if let Some(until) = activity.typing_until() {
            timers.reset(TimerPurpose::TypingGrace, until);
        }
    }

    pub fn on_typing_grace_elapsed(&self, now: DateTime<Utc>, activity: &mut ActivityRecord) {
        activity.clear_expired_typing(now);
    }

    /// Cooldown over: arm the next idle check. A newer emission in the same
    /// step has already armed a fresh cooldown, so nothing to do then.
    pub fn on_rate_limit_elapsed(
        &self,
        now: DateTime<Utc>,
        timers: &mut TimerSet,
        rng: &mut dyn RandomSource,
    ) {
        if timers.is_pending(TimerPurpose::RateLimit) {
            return;
        }
        tracing::debug!("[Scheduler] Cooldown finished, re-arming");
        self.arm_idle_fire(now, timers, rng);
    }

    /// Timer path. Emits, or reschedules the next check after the retry delay
    /// or the rest of the cooldown, whichever is longer.
    #[allow(clippy::too_many_arguments)]
    pub fn on_idle_fire(
        &mut self,
        ctx: &FireContext<'_>,
        state: &mut RelationshipState,
        facts: &[String],
        now: DateTime<Utc>,
        timers: &mut TimerSet,
        rng: &mut dyn RandomSource,
    ) -> Attempt {
        let attempt = self.attempt(ProactiveTrigger::IdleTimer, ctx, state, facts, now, rng);
        match &attempt {
            Attempt::Emitted(_) => self.enter_cooldown(now, timers),
            _ => {
                let wait = self.config.retry().max(self.cooldown_remaining(state, now));
                timers.reset(TimerPurpose::IdleFire, now + wait);
            }
        }
        attempt
    }

    /// Pull path for session-boundary triggers. Shares all cooldown state
    /// with the timer path; only an emission touches the timers.
    #[allow(clippy::too_many_arguments)]
    pub fn initiate(
        &mut self,
        trigger: ProactiveTrigger,
        ctx: &FireContext<'_>,
        state: &mut RelationshipState,
        facts: &[String],
        now: DateTime<Utc>,
        timers: &mut TimerSet,
        rng: &mut dyn RandomSource,
    ) -> Attempt {
        let attempt = self.attempt(trigger, ctx, state, facts, now, rng);
        if matches!(attempt, Attempt::Emitted(_)) {
            self.enter_cooldown(now, timers);
        }
        attempt
    }
}
