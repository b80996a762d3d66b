//! Signal sampling: the OS-facing inputs to mode arbitration.

pub mod app_category;
pub mod cache;
pub mod system;

pub use app_category::{classify, AppCategory};
pub use cache::{FailureStreak, ForegroundCache};
pub use system::SystemSampler;

use crate::error::Result;
use async_trait::async_trait;

/// Producer of raw OS signals. Implementations hold no engine state and may
/// be slow; the engine calls them off the arbitration tick with a timeout.
#[async_trait]
pub trait SignalSampler: Send + Sync {
    /// Milliseconds since the last keyboard or mouse input, system-wide.
    async fn sample_idle_duration(&self) -> Result<u64>;

    /// Process name of the foreground application, if one can be determined.
    async fn sample_foreground_app(&self) -> Result<Option<String>>;
}

/// Sampler that reports nothing: always active, no foreground app.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSampler;

#[async_trait]
impl SignalSampler for NullSampler {
    async fn sample_idle_duration(&self) -> Result<u64> {
        Ok(0)
    }

    async fn sample_foreground_app(&self) -> Result<Option<String>> {
        Ok(None)
    }
}
