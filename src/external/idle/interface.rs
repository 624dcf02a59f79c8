use anyhow::Result;
use std::time::Duration;

/// Source of the time elapsed since the user last touched an input device.
pub trait IdleTimeSource: Send + Sync + 'static {
    fn idle_time(&self) -> Result<Duration>;
}
