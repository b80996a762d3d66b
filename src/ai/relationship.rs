//! Relationship / initiative state.
//!
//! Small persisted record that remembers how the user has responded to the
//! companion so far. The update functions consume the old state and return
//! the new one; nothing here touches the clock, the RNG or storage.

use crate::ai::initiative::ProactiveCategory;
use crate::ai::sentiment::{detect_affect_cue, AffectCue};
use crate::config::ProactiveConfig;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// Message count at which the volume component of the score saturates.
const MESSAGE_SATURATION: f64 = 200.0;
/// Distinct usage days at which the day component saturates.
const DAY_SATURATION: f64 = 30.0;
const MESSAGE_WEIGHT: f64 = 0.6;
const DAY_WEIGHT: f64 = 0.4;

// ── Intimacy tier ──────────────────────────────────────────

/// Ordered intimacy axis. Gates both which categories are allowed at all and
/// which relationship score is needed to reach them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IntimacyTier {
    Reserved,
    #[default]
    Friendly,
    Close,
    Intimate,
}

impl IntimacyTier {
    /// Minimum relationship score needed to reach this tier.
    pub fn min_score(&self) -> f64 {
        match self {
            IntimacyTier::Reserved => 0.0,
            IntimacyTier::Friendly => 0.15,
            IntimacyTier::Close => 0.35,
            IntimacyTier::Intimate => 0.6,
        }
    }

    /// Highest tier the score has earned.
    pub fn earned(score: f64) -> Self {
        [
            IntimacyTier::Intimate,
            IntimacyTier::Close,
            IntimacyTier::Friendly,
        ]
        .into_iter()
        .find(|tier| score >= tier.min_score())
        .unwrap_or(IntimacyTier::Reserved)
    }

    /// Earned tier, capped by the configured ceiling.
    pub fn effective(score: f64, ceiling: IntimacyTier) -> Self {
        Self::earned(score).min(ceiling)
    }
}

// ── Outcomes ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ProactiveOutcome {
    Sent {
        category: ProactiveCategory,
        template_id: String,
    },
    Acknowledged,
    Ignored,
}

// ── State ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipState {
    pub initiative: f64,
    pub last_proactive_at: Option<DateTime<Utc>>,
    pub last_proactive_category: Option<ProactiveCategory>,
    pub pending_acknowledgment: bool,
    /// First send of the current unacknowledged streak.
    pub pending_since: Option<DateTime<Utc>>,
    pub total_user_messages: u64,
    pub distinct_usage_days: BTreeSet<NaiveDate>,
    pub recent_template_ids: VecDeque<String>,
    pub last_ignored_at: Option<DateTime<Utc>>,
    /// User messages since the last memory echo; `None` if there never was one.
    pub messages_since_memory_echo: Option<u32>,
    /// Rotation index into the stored fact list.
    pub memory_echo_cursor: usize,
    /// Cue carried by the most recent user message.
    pub last_affect_cue: Option<AffectCue>,
}

impl Default for RelationshipState {
    fn default() -> Self {
        Self::with_initiative(ProactiveConfig::default().initiative_default)
    }
}

impl RelationshipState {
    pub fn with_initiative(initiative: f64) -> Self {
        Self {
            initiative,
            last_proactive_at: None,
            last_proactive_category: None,
            pending_acknowledgment: false,
            pending_since: None,
            total_user_messages: 0,
            distinct_usage_days: BTreeSet::new(),
            recent_template_ids: VecDeque::new(),
            last_ignored_at: None,
            messages_since_memory_echo: None,
            memory_echo_cursor: 0,
            last_affect_cue: None,
        }
    }

    /// Bring a loaded record back inside its invariants.
    pub fn sanitized(mut self, config: &ProactiveConfig) -> Self {
        if !self.initiative.is_finite() {
            self.initiative = config.initiative_default;
        }
        self.initiative = config.clamp_initiative(self.initiative);
        while self.recent_template_ids.len() > config.anti_repetition_window {
            self.recent_template_ids.pop_front();
        }
        self
    }

    /// Count a user message: volume, usage day, affect cue, echo spacing.
    pub fn on_user_message(mut self, text: &str, now: DateTime<Utc>) -> Self {
        self.total_user_messages = self.total_user_messages.saturating_add(1);
        self.distinct_usage_days.insert(now.date_naive());
        self.last_affect_cue = detect_affect_cue(text);
        if let Some(turns) = self.messages_since_memory_echo.as_mut() {
            *turns = turns.saturating_add(1);
        }
        self
    }

    pub fn on_proactive_outcome(
        mut self,
        outcome: ProactiveOutcome,
        now: DateTime<Utc>,
        config: &ProactiveConfig,
    ) -> Self {
        match outcome {
            ProactiveOutcome::Sent {
                category,
                template_id,
            } => {
                self.last_proactive_at = Some(now);
                self.last_proactive_category = Some(category);
                if !self.pending_acknowledgment {
                    self.pending_since = Some(now);
                }
                self.pending_acknowledgment = true;
                self.recent_template_ids.push_back(template_id);
                while self.recent_template_ids.len() > config.anti_repetition_window {
                    self.recent_template_ids.pop_front();
                }
                if category == ProactiveCategory::MemoryEcho {
                    self.messages_since_memory_echo = Some(0);
                    self.memory_echo_cursor = self.memory_echo_cursor.wrapping_add(1);
                }
            }
            ProactiveOutcome::Acknowledged => {
                if self.pending_acknowledgment {
                    self.pending_acknowledgment = false;
                    self.pending_since = None;
                    self.initiative =
                        config.clamp_initiative(self.initiative + config.acknowledge_step);
                }
            }
            ProactiveOutcome::Ignored => {
                self.initiative = config.clamp_initiative(self.initiative - config.ignore_step);
                self.last_ignored_at = Some(now);
            }
        }
        self
    }

    /// An unacknowledged streak has outlived the decay window since it began,
    /// or since it was last penalized.
    pub fn ignore_penalty_due(&self, now: DateTime<Utc>, decay_window: Duration) -> bool {
        if !self.pending_acknowledgment {
            return false;
        }
        let started = self.pending_since.or(self.last_proactive_at);
        let reference = match (self.last_ignored_at, started) {
            (Some(ignored), Some(sent)) => ignored.max(sent),
            (Some(at), None) | (None, Some(at)) => at,
            (None, None) => return false,
        };
        now - reference > decay_window
    }

    /// Derived usage-depth score in `[0, 1]`. Never persisted.
    pub fn relationship_score(&self) -> f64 {
        let messages = (self.total_user_messages as f64 / MESSAGE_SATURATION).min(1.0);
        let days = (self.distinct_usage_days.len() as f64 / DAY_SATURATION).min(1.0);
        (MESSAGE_WEIGHT * messages + DAY_WEIGHT * days).clamp(0.0, 1.0)
    }

    pub fn tier(&self, ceiling: IntimacyTier) -> IntimacyTier {
        IntimacyTier::effective(self.relationship_score(), ceiling)
    }
}
