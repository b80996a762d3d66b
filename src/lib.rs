//! Behavior arbitration and proactive messaging for the Kokoro desktop
//! companion.
//!
//! The engine derives an effective behavior mode (Focus / HangOut / Quiet)
//! from the user's setting and live OS signals, and decides when the
//! companion may speak up on its own. Start it with [`BehaviorEngine::start`]
//! or [`BehaviorEngine::builder`] inside a Tokio runtime.

pub mod ai;
pub mod config;
pub mod engine;
pub mod error;
pub mod signals;
pub mod storage;
pub mod utils;

pub use ai::initiative::{ProactiveCategory, ProactiveContent, ProactiveMessage, ProactiveTrigger};
pub use ai::mode::{EffectiveMode, ModeReason, ModeState, PrimarySetting};
pub use ai::relationship::IntimacyTier;
pub use ai::scheduler::InitiativeSnapshot;
pub use config::BehaviorConfig;
pub use engine::{BehaviorEngine, EngineBuilder};
pub use error::{BehaviorError, Result};
pub use signals::{SignalSampler, SystemSampler};
pub use storage::{BehaviorStore, JsonFileStore, MemoryStore};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a `tracing` fmt subscriber filtered by `RUST_LOG` (default
/// `info`). Safe to call more than once.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Fails only if a global subscriber is already set.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
