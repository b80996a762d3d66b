//! Engine configuration and the shared JSON load/save helpers.
//!
//! Every tunable the arbitration loop and the proactivity scheduler use lives
//! here. Values on disk are plain seconds / milliseconds so the file stays
//! hand-editable; the accessors convert to `chrono::Duration`.

use crate::ai::relationship::IntimacyTier;
use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Generic load for any Serde config type with a `Default` implementation.
/// Falls back to `T::default()` if the file is missing or unparsable.
pub fn load_json_config<T: DeserializeOwned + Default>(path: &Path, label: &str) -> T {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<T>(&content) {
            Ok(config) => {
                tracing::info!("[{}] Loaded from {}", label, path.display());
                config
            }
            Err(e) => {
                tracing::warn!(
                    "[{}] Failed to parse {}: {}, using defaults",
                    label,
                    path.display(),
                    e
                );
                T::default()
            }
        },
        Err(_) => {
            tracing::info!("[{}] No file at {}, using defaults", label, path.display());
            T::default()
        }
    }
}

/// Generic save for any Serde config type.
pub fn save_json_config<T: Serialize>(
    path: &Path,
    config: &T,
    label: &str,
) -> crate::error::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json)?;
    tracing::debug!("[{}] Saved to {}", label, path.display());
    Ok(())
}

/// Root directory for everything this engine writes.
pub fn default_data_dir() -> PathBuf {
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("com.chyin.kokoro")
        .join("behavior")
}

// ── Mode arbitration ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Arbitration tick period.
    pub tick_interval_ms: u64,
    /// A user send newer than this forces Focus ("recent activity").
    pub recency_window_secs: u64,
    /// System idle at or beyond this reads as "system inactive".
    pub idle_threshold_secs: u64,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            recency_window_secs: 120,
            idle_threshold_secs: 300,
        }
    }
}

impl ModeConfig {
    pub fn recency_window(&self) -> Duration {
        Duration::seconds(self.recency_window_secs as i64)
    }

    pub fn idle_threshold_ms(&self) -> u64 {
        self.idle_threshold_secs.saturating_mul(1000)
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms)
    }
}

// ── Proactive messaging ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProactiveConfig {
    pub enabled: bool,
    /// Idle timer fires after a random delay in this band.
    pub idle_fire_min_secs: u64,
    pub idle_fire_max_secs: u64,
    /// Post-send rate-limit window, randomized per emission.
    pub rate_limit_min_secs: u64,
    pub rate_limit_max_secs: u64,
    /// Delay before re-checking after an ineligible or failed attempt.
    pub retry_secs: u64,
    /// How long a typing report blocks firing.
    pub typing_grace_ms: u64,
    /// Unacknowledged messages older than this count as ignored.
    pub decay_window_secs: u64,

    pub initiative_default: f64,
    pub initiative_min: f64,
    pub initiative_max: f64,
    pub acknowledge_step: f64,
    pub ignore_step: f64,

    pub probability_min: f64,
    pub probability_max: f64,
    /// Multiplier applied to the relationship score in the emission chance.
    pub relationship_weight: f64,

    pub idle_timer_weight: f64,
    pub window_focus_weight: f64,
    pub session_start_weight: f64,

    /// Number of most recent template ids that may not be reused.
    pub anti_repetition_window: usize,
    /// Highest intimacy tier the companion may reach.
    pub intimacy_tier: IntimacyTier,
    /// User messages required between two memory echoes.
    pub memory_echo_min_turns: u32,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_fire_min_secs: 180,
            idle_fire_max_secs: 300,
            rate_limit_min_secs: 45 * 60,
            rate_limit_max_secs: 60 * 60,
            retry_secs: 120,
            typing_grace_ms: 3000,
            decay_window_secs: 6 * 3600,
            initiative_default: 0.5,
            initiative_min: 0.05,
            initiative_max: 0.95,
            acknowledge_step: 0.05,
            ignore_step: 0.08,
            probability_min: 0.1,
            probability_max: 0.85,
            relationship_weight: 0.2,
            idle_timer_weight: 0.6,
            window_focus_weight: 0.8,
            session_start_weight: 1.0,
            anti_repetition_window: 8,
            intimacy_tier: IntimacyTier::Close,
            memory_echo_min_turns: 5,
        }
    }
}

impl ProactiveConfig {
    pub fn idle_fire_band(&self) -> (Duration, Duration) {
        (
            Duration::seconds(self.idle_fire_min_secs as i64),
            Duration::seconds(self.idle_fire_max_secs as i64),
        )
    }

    pub fn rate_limit_band(&self) -> (Duration, Duration) {
        (
            Duration::seconds(self.rate_limit_min_secs as i64),
            Duration::seconds(self.rate_limit_max_secs as i64),
        )
    }

    pub fn retry(&self) -> Duration {
        Duration::seconds(self.retry_secs as i64)
    }

    pub fn typing_grace(&self) -> Duration {
        Duration::milliseconds(self.typing_grace_ms as i64)
    }

    pub fn decay_window(&self) -> Duration {
        Duration::seconds(self.decay_window_secs as i64)
    }

    /// Idle threshold used by the eligibility predicate (lower edge of the fire band).
    pub fn idle_threshold(&self) -> Duration {
        Duration::seconds(self.idle_fire_min_secs as i64)
    }

    pub fn clamp_initiative(&self, value: f64) -> f64 {
        value.clamp(self.initiative_min, self.initiative_max)
    }
}

// ── Signals ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Process-name fragments that mark a work application.
    pub work_apps: Vec<String>,
    /// Process-name fragments that mark a casual application.
    pub casual_apps: Vec<String>,
    /// Upper bound on a single sampler call.
    pub sampler_timeout_ms: u64,
    /// Last known foreground app is trusted for this long after a failed lookup.
    pub foreground_stale_secs: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        let owned = |list: &[&str]| -> Vec<String> { list.iter().map(|s| s.to_string()).collect() };
        Self {
            work_apps: owned(&[
                "code", "idea", "pycharm", "clion", "rustrover", "xcode", "vim", "nvim", "emacs",
                "terminal", "iterm", "alacritty", "kitty", "wezterm", "excel", "word",
                "powerpnt", "outlook", "slack", "teams", "zoom", "notion", "obsidian", "figma",
            ]),
            casual_apps: owned(&[
                "steam", "spotify", "music", "vlc", "mpv", "netflix", "bilibili", "youtube",
                "discord", "telegram", "wechat", "qq", "twitch", "minecraft", "genshin",
            ]),
            sampler_timeout_ms: 1500,
            foreground_stale_secs: 60,
        }
    }
}

impl SignalConfig {
    pub fn sampler_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sampler_timeout_ms)
    }

    pub fn foreground_stale(&self) -> Duration {
        Duration::seconds(self.foreground_stale_secs as i64)
    }
}

// ── Root ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub mode: ModeConfig,
    pub proactive: ProactiveConfig,
    pub signals: SignalConfig,
    /// Debounce for persisting state after a mutation.
    pub persist_debounce_ms: u64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            mode: ModeConfig::default(),
            proactive: ProactiveConfig::default(),
            signals: SignalConfig::default(),
            persist_debounce_ms: 2000,
        }
    }
}

impl BehaviorConfig {
    pub fn load(path: &Path) -> Self {
        let mut config: Self = load_json_config(path, "Config");
        config.validate();
        config
    }

    pub fn save(&self, path: &Path) -> crate::error::Result<()> {
        save_json_config(path, self, "Config")
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::milliseconds(self.persist_debounce_ms.max(1) as i64)
    }

    /// Repair values a hand-edited file can get wrong. Never fails.
    pub fn validate(&mut self) {
        let p = &mut self.proactive;
        if p.idle_fire_min_secs > p.idle_fire_max_secs {
            std::mem::swap(&mut p.idle_fire_min_secs, &mut p.idle_fire_max_secs);
        }
        if p.rate_limit_min_secs > p.rate_limit_max_secs {
            std::mem::swap(&mut p.rate_limit_min_secs, &mut p.rate_limit_max_secs);
        }
        p.initiative_min = p.initiative_min.clamp(0.0, 1.0);
        p.initiative_max = p.initiative_max.clamp(p.initiative_min, 1.0);
        p.initiative_default = p.clamp_initiative(p.initiative_default);
        p.probability_min = p.probability_min.clamp(0.0, 1.0);
        p.probability_max = p.probability_max.clamp(p.probability_min, 1.0);
        p.acknowledge_step = p.acknowledge_step.abs();
        p.ignore_step = p.ignore_step.abs();
        p.anti_repetition_window = p.anti_repetition_window.max(1);

        self.mode.tick_interval_ms = self.mode.tick_interval_ms.max(50);
        if self.persist_debounce_ms == 0 {
            self.persist_debounce_ms = 2000;
        }
    }
}
