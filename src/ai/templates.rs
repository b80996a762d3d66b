//! Proactive message templates and anti-repetition picking.

use crate::ai::initiative::ProactiveCategory;
use crate::ai::sentiment::AffectCue;
use crate::utils::RandomSource;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateTone {
    Any,
    /// For negative cues.
    Comfort,
    /// For positive cues.
    Cheer,
}

impl TemplateTone {
    pub fn for_cue(cue: AffectCue) -> Self {
        if cue.is_negative() {
            TemplateTone::Comfort
        } else {
            TemplateTone::Cheer
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    pub id: &'static str,
    pub category: ProactiveCategory,
    pub tone: TemplateTone,
    /// `{fact}` and `{cue}` are substituted at render time.
    pub text: &'static str,
}

const fn t(
    id: &'static str,
    category: ProactiveCategory,
    tone: TemplateTone,
    text: &'static str,
) -> Template {
    Template {
        id,
        category,
        tone,
        text,
    }
}

use ProactiveCategory::{Ambient, Emotional, Invitation, MemoryEcho};
use TemplateTone::{Any, Cheer, Comfort};

pub const CATALOGUE: &[Template] = &[
    // ── Ambient presence ──
    t("ambient-01", Ambient, Any, "Still here if you need me."),
    t("ambient-02", Ambient, Any, "It's gotten quiet. I'm just keeping you company."),
    t("ambient-03", Ambient, Any, "Remember to drink some water!"),
    t("ambient-04", Ambient, Any, "Maybe stretch your shoulders for a second?"),
    t("ambient-05", Ambient, Any, "I was humming a little tune while you were away."),
    t("ambient-06", Ambient, Any, "How's the day going so far?"),
    t("ambient-07", Ambient, Any, "Your eyes might like a short break from the screen."),
    t("ambient-08", Ambient, Any, "I'm around, no rush."),
    t("ambient-09", Ambient, Any, "Just checking in. Anything on your mind?"),
    t("ambient-10", Ambient, Any, "I like this calm kind of moment."),
    t("ambient-11", Ambient, Any, "Want to hear a random fun fact?"),
    t("ambient-12", Ambient, Any, "Taking it easy? Good idea."),
    // ── Memory echo ──
    t("echo-01", MemoryEcho, Any, "I was thinking about what you told me: {fact}"),
    t("echo-02", MemoryEcho, Any, "Hey, you mentioned {fact}. How's that going?"),
    t("echo-03", MemoryEcho, Any, "Something reminded me: {fact}"),
    t("echo-04", MemoryEcho, Any, "Any news about this? {fact}"),
    t("echo-05", MemoryEcho, Any, "I still remember {fact}. Tell me more sometime?"),
    t("echo-06", MemoryEcho, Any, "Random thought: {fact}. Still true?"),
    t("echo-07", MemoryEcho, Any, "You said {fact}. I've been curious since."),
    t("echo-08", MemoryEcho, Any, "Oh, that reminds me. {fact}"),
    t("echo-09", MemoryEcho, Any, "Did anything change with this? {fact}"),
    // ── Emotional observation ──
    t("emotion-01", Emotional, Comfort, "You sounded {cue} earlier. I'm here if you want to talk."),
    t("emotion-02", Emotional, Comfort, "Feeling {cue} is okay. Be gentle with yourself."),
    t("emotion-03", Emotional, Comfort, "If things feel heavy, a short pause might help."),
    t("emotion-04", Emotional, Comfort, "I noticed you seemed {cue}. Want a distraction?"),
    t("emotion-05", Emotional, Comfort, "You don't have to handle everything at once."),
    t("emotion-06", Emotional, Comfort, "Sending you a little comfort."),
    t("emotion-07", Emotional, Cheer, "You seemed {cue} earlier. That made me smile."),
    t("emotion-08", Emotional, Cheer, "I love it when you're in a good mood!"),
    t("emotion-09", Emotional, Cheer, "That {cue} energy is contagious."),
    t("emotion-10", Emotional, Cheer, "Whatever made you {cue}, I hope there's more of it."),
    t("emotion-11", Emotional, Cheer, "Good vibes today, huh?"),
    t("emotion-12", Emotional, Any, "You seemed {cue} earlier. How are you feeling now?"),
    t("emotion-13", Emotional, Any, "I keep thinking about how you felt today."),
    t("emotion-14", Emotional, Any, "Whatever kind of day it is, I'm glad you're here."),
    t("emotion-15", Emotional, Any, "Want to tell me more about today?"),
    // ── Invitation ──
    t("invite-01", Invitation, Any, "Want to take a break and chat for a bit?"),
    t("invite-02", Invitation, Any, "Shall we play a quick word game?"),
    t("invite-03", Invitation, Any, "Tell me about the best part of your day?"),
    t("invite-04", Invitation, Any, "Want to listen to some music together?"),
    t("invite-05", Invitation, Any, "I have a question for you, if you're free."),
    t("invite-06", Invitation, Any, "How about a five-minute walk? I'll wait."),
    t("invite-07", Invitation, Any, "Let's plan something fun for the weekend?"),
    t("invite-08", Invitation, Any, "Want me to tell you a story?"),
    t("invite-09", Invitation, Any, "Can I ask what you're working on?"),
];

/// Templates for a category, narrowed by tone where the category uses tones.
/// `Any`-tone templates belong to every tone.
pub fn pool(category: ProactiveCategory, cue: Option<AffectCue>) -> Vec<&'static Template> {
    let tone = cue.map(TemplateTone::for_cue);
    CATALOGUE
        .iter()
        .filter(|tpl| tpl.category == category)
        .filter(|tpl| match (tpl.tone, tone) {
            (TemplateTone::Any, _) | (_, None) => true,
            (have, Some(want)) => have == want,
        })
        .collect()
}

/// Pick a template, excluding the last `window` ids used. If the pool is too
/// small for the full window, only the most recent `len - 1` ids are
/// excluded so there is always a candidate and never an immediate repeat.
pub fn pick<'a>(
    pool: &[&'a Template],
    recent: &VecDeque<String>,
    window: usize,
    rng: &mut dyn RandomSource,
) -> Option<&'a Template> {
    if pool.is_empty() {
        return None;
    }
    let exclude = window.min(pool.len() - 1);
    let blocked: Vec<&str> = recent.iter().rev().take(exclude).map(String::as_str).collect();
    let candidates: Vec<&'a Template> = pool
        .iter()
        .copied()
        .filter(|tpl| !blocked.contains(&tpl.id))
        .collect();
    if candidates.is_empty() {
        // Only possible when `recent` holds ids outside this pool's view of
        // history; fall back to the whole pool.
        return Some(pool[rng.pick_index(pool.len())]);
    }
    Some(candidates[rng.pick_index(candidates.len())])
}

pub fn render(template: &Template, fact: Option<&str>, cue: Option<AffectCue>) -> String {
    let mut text = template.text.to_string();
    if let Some(fact) = fact {
        text = text.replace("{fact}", fact.trim());
    }
    if let Some(cue) = cue {
        text = text.replace("{cue}", cue.as_str());
    }
    text
}
