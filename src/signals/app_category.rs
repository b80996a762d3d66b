//! Foreground application classification.
//!
//! Keyword matching against the process name, same approach the sentiment
//! detector uses for text: fast, no model, configurable lists.

use crate::config::SignalConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppCategory {
    Work,
    Casual,
    #[default]
    Unknown,
}

/// Strip path and platform suffixes: `C:\Program Files\Steam\steam.exe` → `steam`.
fn normalize(name: &str) -> String {
    let base = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(name)
        .trim();
    let lower = base.to_lowercase();
    lower
        .strip_suffix(".exe")
        .or_else(|| lower.strip_suffix(".app"))
        .unwrap_or(lower.as_str())
        .to_string()
}

/// Classify a foreground process name. Work keywords win over casual ones.
pub fn classify(name: Option<&str>, config: &SignalConfig) -> AppCategory {
    let Some(name) = name else {
        return AppCategory::Unknown;
    };
    let normalized = normalize(name);
    if normalized.is_empty() {
        return AppCategory::Unknown;
    }

    let hit = |list: &[String]| {
        list.iter()
            .map(|kw| kw.trim().to_lowercase())
            .any(|kw| !kw.is_empty() && normalized.contains(&kw))
    };

    if hit(&config.work_apps) {
        AppCategory::Work
    } else if hit(&config.casual_apps) {
        AppCategory::Casual
    } else {
        AppCategory::Unknown
    }
}
