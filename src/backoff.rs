// Retry delay math - no timers in here, callers do the sleeping

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// base * 2^attempt
    Exponential,
    /// base * attempt
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    growth: Growth,
    max_attempts: u32,
}

impl BackoffPolicy {
    pub const fn new(base: Duration, growth: Growth, max_attempts: u32) -> Self {
        Self {
            base,
            growth,
            max_attempts,
        }
    }

    /// API quota retries: 2s, 4s, 8s
    pub const fn quota() -> Self {
        Self::new(Duration::from_millis(1000), Growth::Exponential, 3)
    }

    /// Stream auto-restart: 2s, 4s, 6s
    pub const fn restart() -> Self {
        Self::new(Duration::from_millis(2000), Growth::Linear, 3)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based).
    /// None once the ceiling is passed - that's the caller's signal to give up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }

        let factor = match self.growth {
            Growth::Exponential => 2u32.checked_pow(attempt)?,
            Growth::Linear => attempt,
        };
        self.base.checked_mul(factor)
    }
}
