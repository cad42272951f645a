//! Connect retry policy as an explicit state machine.

use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `n` (1-based): `min(n × base, max)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Retry { retry: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

/// Counts failed connect attempts and decides what happens next.
#[derive(Debug, Clone)]
pub struct ConnectAttempts {
    policy: RetryPolicy,
    failures: u32,
}

impl ConnectAttempts {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    pub fn record_failure(&mut self) -> AttemptOutcome {
        self.failures += 1;
        if self.failures > self.policy.max_retries {
            AttemptOutcome::GiveUp {
                attempts: self.failures,
            }
        } else {
            AttemptOutcome::Retry {
                retry: self.failures,
                delay: self.policy.delay_for(self.failures),
            }
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Injected so retry loops can be driven without wall-clock time.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
