//! Affect cue detection for user messages.
//!
//! Keyword-based and intentionally shallow: it only answers "did the last
//! message carry an obvious emotional cue?", which is what unlocks the
//! Emotional proactive category. No language understanding happens here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffectCue {
    Sad,
    Stressed,
    Tired,
    Frustrated,
    Excited,
    Happy,
}

impl AffectCue {
    pub fn as_str(&self) -> &'static str {
        match self {
            AffectCue::Sad => "sad",
            AffectCue::Stressed => "stressed",
            AffectCue::Tired => "tired",
            AffectCue::Frustrated => "frustrated",
            AffectCue::Excited => "excited",
            AffectCue::Happy => "happy",
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            AffectCue::Sad | AffectCue::Stressed | AffectCue::Tired | AffectCue::Frustrated
        )
    }
}

// ── Keyword sets ───────────────────────────────────────────

const SAD_KW: &[&str] = &[
    "sad", "lonely", "upset", "miss ", "cry", "crying", "heartbroken", "depressed", "down today",
    "难过", "伤心", "孤独", "想哭", "呜呜", "😢", "😭", "💔",
];

const STRESSED_KW: &[&str] = &[
    "stressed", "anxious", "worried", "nervous", "overwhelmed", "pressure", "deadline",
    "焦虑", "紧张", "担心", "压力", "来不及",
];

const TIRED_KW: &[&str] = &[
    "tired", "exhausted", "sleepy", "worn out", "no energy", "burned out", "burnt out",
    "累了", "好累", "困", "没精神",
];

const FRUSTRATED_KW: &[&str] = &[
    "frustrated", "annoyed", "angry", "stuck", "hate this", "doesn't work", "broken again",
    "烦", "生气", "搞不定", "气死",
];

const EXCITED_KW: &[&str] = &[
    "can't wait", "so excited", "omg", "wow", "finally!", "let's go",
    "激动", "太强了", "终于", "哇",
];

const HAPPY_KW: &[&str] = &[
    "happy", "glad", "great day", "love it", "awesome", "yay", "haha",
    "开心", "高兴", "哈哈", "太好了", "😊", "😄",
];

/// Priority order when counts tie: negative cues first, they matter more.
const CUE_ORDER: &[(AffectCue, &[&str])] = &[
    (AffectCue::Sad, SAD_KW),
    (AffectCue::Stressed, STRESSED_KW),
    (AffectCue::Tired, TIRED_KW),
    (AffectCue::Frustrated, FRUSTRATED_KW),
    (AffectCue::Excited, EXCITED_KW),
    (AffectCue::Happy, HAPPY_KW),
];

/// Detect the dominant affect cue in a message, if any.
pub fn detect_affect_cue(text: &str) -> Option<AffectCue> {
    let lower = text.to_lowercase();
    if lower.trim().is_empty() {
        return None;
    }

    let mut best: Option<(AffectCue, usize)> = None;
    for (cue, keywords) in CUE_ORDER {
        let hits = keywords.iter().filter(|kw| lower.contains(*kw)).count();
        if hits == 0 {
            continue;
        }
        match best {
            Some((_, top)) if top >= hits => {}
            _ => best = Some((*cue, hits)),
        }
    }
    best.map(|(cue, _)| cue)
}
