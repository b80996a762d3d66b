//! Initiative System: decides how likely the companion is to speak up and
//! what kind of message it says.
//!
//! Categories are gated along a single intimacy axis: the tier earned from
//! the relationship score (capped by the configured ceiling) decides which
//! categories are open, then each category checks its own unlock condition.

use crate::ai::relationship::{IntimacyTier, RelationshipState};
use crate::ai::sentiment::AffectCue;
use crate::ai::templates;
use crate::config::ProactiveConfig;
use crate::utils::RandomSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordered from least to most intimate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ProactiveCategory {
    Ambient,
    MemoryEcho,
    Emotional,
    Invitation,
}

impl ProactiveCategory {
    pub const ALL: [ProactiveCategory; 4] = [
        ProactiveCategory::Ambient,
        ProactiveCategory::MemoryEcho,
        ProactiveCategory::Emotional,
        ProactiveCategory::Invitation,
    ];

    pub fn min_tier(&self) -> IntimacyTier {
        match self {
            ProactiveCategory::Ambient => IntimacyTier::Reserved,
            ProactiveCategory::MemoryEcho => IntimacyTier::Friendly,
            ProactiveCategory::Emotional => IntimacyTier::Close,
            ProactiveCategory::Invitation => IntimacyTier::Intimate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProactiveCategory::Ambient => "ambient",
            ProactiveCategory::MemoryEcho => "memory_echo",
            ProactiveCategory::Emotional => "emotional",
            ProactiveCategory::Invitation => "invitation",
        }
    }
}

/// What prompted an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProactiveTrigger {
    /// The scheduler's own idle timer.
    IdleTimer,
    /// The companion window regained focus.
    WindowFocus,
    /// A new session started (app launch, wake from sleep).
    SessionStart,
}

impl ProactiveTrigger {
    pub fn weight(&self, config: &ProactiveConfig) -> f64 {
        match self {
            ProactiveTrigger::IdleTimer => config.idle_timer_weight,
            ProactiveTrigger::WindowFocus => config.window_focus_weight,
            ProactiveTrigger::SessionStart => config.session_start_weight,
        }
    }
}

/// One constructor per category, carrying only what that category needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProactiveContent {
    Ambient,
    MemoryEcho { fact: String },
    Emotional { cue: AffectCue },
    Invitation,
}

impl ProactiveContent {
    pub fn category(&self) -> ProactiveCategory {
        match self {
            ProactiveContent::Ambient => ProactiveCategory::Ambient,
            ProactiveContent::MemoryEcho { .. } => ProactiveCategory::MemoryEcho,
            ProactiveContent::Emotional { .. } => ProactiveCategory::Emotional,
            ProactiveContent::Invitation => ProactiveCategory::Invitation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProactiveMessage {
    pub id: Uuid,
    pub text: String,
    pub category: ProactiveCategory,
    pub content: ProactiveContent,
    pub template_id: &'static str,
    pub trigger: ProactiveTrigger,
    pub emitted_at: DateTime<Utc>,
}

/// `initiative × trigger weight + relationship score × weight`, clamped to the
/// configured probability band.
pub fn emission_probability(
    initiative: f64,
    relationship_score: f64,
    trigger: ProactiveTrigger,
    config: &ProactiveConfig,
) -> f64 {
    let raw = initiative * trigger.weight(config) + relationship_score * config.relationship_weight;
    raw.clamp(config.probability_min, config.probability_max)
}

fn usable_facts(facts: &[String]) -> Vec<&str> {
    facts
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .collect()
}

/// Content for a single category, if that category is unlocked right now.
fn unlocked_content(
    category: ProactiveCategory,
    state: &RelationshipState,
    facts: &[&str],
    config: &ProactiveConfig,
) -> Option<ProactiveContent> {
    match category {
        ProactiveCategory::Ambient => Some(ProactiveContent::Ambient),
        ProactiveCategory::MemoryEcho => {
            if facts.is_empty() {
                return None;
            }
            let spaced = state
                .messages_since_memory_echo
                .map_or(true, |turns| turns >= config.memory_echo_min_turns);
            if !spaced {
                return None;
            }
            let fact = facts[state.memory_echo_cursor % facts.len()];
            Some(ProactiveContent::MemoryEcho {
                fact: fact.to_string(),
            })
        }
        ProactiveCategory::Emotional => state
            .last_affect_cue
            .map(|cue| ProactiveContent::Emotional { cue }),
        ProactiveCategory::Invitation => Some(ProactiveContent::Invitation),
    }
}

/// Every category currently open, richest first.
pub fn available_contents(
    state: &RelationshipState,
    facts: &[String],
    config: &ProactiveConfig,
) -> Vec<ProactiveContent> {
    let tier = state.tier(config.intimacy_tier);
    let facts = usable_facts(facts);
    ProactiveCategory::ALL
        .iter()
        .rev()
        .filter(|category| category.min_tier() <= tier)
        .filter_map(|category| unlocked_content(*category, state, &facts, config))
        .collect()
}

/// Richest open category, stepping down one if it would repeat the previous
/// category and something else is available.
pub fn select_content(
    state: &RelationshipState,
    facts: &[String],
    config: &ProactiveConfig,
) -> ProactiveContent {
    let mut available = available_contents(state, facts, config);
    if available.len() > 1
        && state.last_proactive_category == Some(available[0].category())
    {
        return available.swap_remove(1);
    }
    available
        .into_iter()
        .next()
        .unwrap_or(ProactiveContent::Ambient)
}

/// Render a message for `content`, honoring the anti-repetition window.
pub fn compose(
    content: ProactiveContent,
    state: &RelationshipState,
    trigger: ProactiveTrigger,
    now: DateTime<Utc>,
    config: &ProactiveConfig,
    rng: &mut dyn RandomSource,
) -> Option<ProactiveMessage> {
    let category = content.category();
    let (fact, cue) = match &content {
        ProactiveContent::MemoryEcho { fact } => (Some(fact.as_str()), None),
        ProactiveContent::Emotional { cue } => (None, Some(*cue)),
        ProactiveContent::Ambient | ProactiveContent::Invitation => (None, None),
    };

    let pool = templates::pool(category, cue);
    let template = templates::pick(
        &pool,
        &state.recent_template_ids,
        config.anti_repetition_window,
        rng,
    )?;

    Some(ProactiveMessage {
        id: Uuid::new_v4(),
        text: templates::render(template, fact, cue),
        category,
        content,
        template_id: template.id,
        trigger,
        emitted_at: now,
    })
}
