//! Bounded retry policy

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the wait between attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backoff {
    /// Same interval every time
    #[default]
    Fixed,
    /// Interval multiplied by `factor` after each failure, capped
    Exponential { factor: u32, max_interval_ms: u64 },
}

/// Maximum attempts plus the wait schedule between them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval_ms: interval.as_millis() as u64,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, interval: Duration, factor: u32, max_interval: Duration) -> Self {
        Self {
            max_attempts,
            interval_ms: interval.as_millis() as u64,
            backoff: Backoff::Exponential {
                factor,
                max_interval_ms: max_interval.as_millis() as u64,
            },
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Wait after the given failed attempt (1-based), `None` if it was the last
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let delay = match self.backoff {
            Backoff::Fixed => self.interval_ms,
            Backoff::Exponential { factor, max_interval_ms } => {
                let growth = (factor.max(1) as u64).saturating_pow(attempt.saturating_sub(1));
                self.interval_ms.saturating_mul(growth).min(max_interval_ms)
            }
        };
        Some(Duration::from_millis(delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(5, Duration::from_secs(5))
    }
}
