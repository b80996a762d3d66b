//! Mode resolution: derives the effective behavior mode from the primary
//! setting and the current signals.
//!
//! `resolve_mode` is the core business rule: a total, side-effect-free
//! function evaluated top to bottom, first match wins. Because it has no
//! hidden state, the reason it returns is always a faithful explanation of
//! why the companion is behaving the way it is.

use crate::ai::activity::ActivityRecord;
use crate::config::ModeConfig;
use crate::error::BehaviorError;
use crate::signals::AppCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The user's explicit, persisted choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimarySetting {
    Focus,
    #[default]
    HangOut,
    Quiet,
}

impl PrimarySetting {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimarySetting::Focus => "focus",
            PrimarySetting::HangOut => "hang_out",
            PrimarySetting::Quiet => "quiet",
        }
    }
}

impl FromStr for PrimarySetting {
    type Err = BehaviorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "focus" => Ok(PrimarySetting::Focus),
            "hang_out" | "hangout" => Ok(PrimarySetting::HangOut),
            "quiet" => Ok(PrimarySetting::Quiet),
            other => Err(BehaviorError::invalid(format!(
                "unknown primary setting '{}'",
                other
            ))),
        }
    }
}

/// The behavior actually in force. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveMode {
    Focus,
    HangOut,
    Quiet,
}

impl EffectiveMode {
    /// Only HangOut lets the companion speak unprompted.
    pub fn permits_proactivity(&self) -> bool {
        matches!(self, EffectiveMode::HangOut)
    }
}

impl fmt::Display for EffectiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EffectiveMode::Focus => "focus",
            EffectiveMode::HangOut => "hang_out",
            EffectiveMode::Quiet => "quiet",
        };
        f.write_str(s)
    }
}

/// Fixed catalogue of explanations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeReason {
    PrimarySetting,
    FocusLock,
    RecentActivity,
    WorkApplication,
    CasualApplication,
    SystemInactive,
    ScreenLocked,
}

impl ModeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModeReason::PrimarySetting => "primary setting",
            ModeReason::FocusLock => "focus lock",
            ModeReason::RecentActivity => "recent activity",
            ModeReason::WorkApplication => "work application detected",
            ModeReason::CasualApplication => "casual application detected",
            ModeReason::SystemInactive => "system inactive",
            ModeReason::ScreenLocked => "screen locked",
        }
    }
}

impl fmt::Display for ModeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ModeReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Signals sampled for one tick. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SignalSnapshot {
    pub idle_duration_ms: u64,
    pub foreground_app_category: AppCategory,
    pub focus_locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeResolution {
    pub mode: EffectiveMode,
    pub reason: ModeReason,
}

impl ModeResolution {
    const fn new(mode: EffectiveMode, reason: ModeReason) -> Self {
        Self { mode, reason }
    }
}

/// Resolve the effective mode. First matching rule wins.
pub fn resolve_mode(
    primary: PrimarySetting,
    signals: &SignalSnapshot,
    activity: &ActivityRecord,
    now: DateTime<Utc>,
    config: &ModeConfig,
) -> ModeResolution {
    use EffectiveMode as M;
    use ModeReason as R;

    match primary {
        PrimarySetting::Quiet => return ModeResolution::new(M::Quiet, R::PrimarySetting),
        PrimarySetting::Focus => return ModeResolution::new(M::Focus, R::PrimarySetting),
        PrimarySetting::HangOut => {}
    }

    if signals.focus_locked {
        return ModeResolution::new(M::Focus, R::FocusLock);
    }

    if let Some(since) = activity.since_send(now) {
        if since < config.recency_window() {
            return ModeResolution::new(M::Focus, R::RecentActivity);
        }
    }

    match signals.foreground_app_category {
        AppCategory::Work => return ModeResolution::new(M::Focus, R::WorkApplication),
        AppCategory::Casual => return ModeResolution::new(M::HangOut, R::CasualApplication),
        AppCategory::Unknown => {}
    }

    if signals.idle_duration_ms >= config.idle_threshold_ms() {
        return ModeResolution::new(M::Quiet, R::SystemInactive);
    }

    ModeResolution::new(M::HangOut, R::PrimarySetting)
}

/// Push-style override applied while the OS lock screen is up.
pub fn resolve_locked(primary: PrimarySetting) -> ModeResolution {
    match primary {
        PrimarySetting::Focus => {
            ModeResolution::new(EffectiveMode::Focus, ModeReason::PrimarySetting)
        }
        PrimarySetting::Quiet => {
            ModeResolution::new(EffectiveMode::Quiet, ModeReason::PrimarySetting)
        }
        PrimarySetting::HangOut => {
            ModeResolution::new(EffectiveMode::Quiet, ModeReason::ScreenLocked)
        }
    }
}

/// Read model handed to the UI and to prompt assembly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeState {
    pub primary: PrimarySetting,
    pub effective: EffectiveMode,
    pub reason: ModeReason,
    pub idle_ms: u64,
    pub is_idle: bool,
    pub focus_locked: bool,
    pub screen_locked: bool,
    pub last_user_send_at: Option<DateTime<Utc>>,
}

impl ModeState {
    pub fn initial(primary: PrimarySetting, focus_locked: bool) -> Self {
        Self {
            primary,
            effective: match primary {
                PrimarySetting::Focus => EffectiveMode::Focus,
                PrimarySetting::HangOut => EffectiveMode::HangOut,
                PrimarySetting::Quiet => EffectiveMode::Quiet,
            },
            reason: ModeReason::PrimarySetting,
            idle_ms: 0,
            is_idle: false,
            focus_locked,
            screen_locked: false,
            last_user_send_at: None,
        }
    }

    pub fn resolution(&self) -> ModeResolution {
        ModeResolution::new(self.effective, self.reason)
    }
}
