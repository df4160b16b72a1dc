//! Pause between claim attempts when the subnet pool is exhausted.
//!
//! The sleep is behind a trait so callers (and tests) can decide what waiting
//! means without touching the claim loop.
use std::time::Duration;

use async_trait::async_trait;

/// Default number of claim attempts, including the first one
pub const DEFAULT_ATTEMPTS: u32 = 2;
/// Default pause between exhausted attempts
pub const DEFAULT_DELAY: Duration = Duration::from_secs(10);

/// Bounded retry policy for `LeaseManager::acquire_subnet`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    attempts: u32,
    delay: Duration,
}

impl BackoffPolicy {
    /// `attempts` is clamped to at least one
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_DELAY)
    }
}

#[async_trait]
pub trait Sleep: Send + Sync + 'static {
    async fn sleep(&self, duration: Duration);
}

/// sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleep;

#[async_trait]
impl Sleep for TokioSleep {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}
