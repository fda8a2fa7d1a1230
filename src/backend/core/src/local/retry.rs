//! Retry policy for draining the outbox.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff Strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed { delay_ms: u64 },
    /// Linear increase in delay (initial + increment * attempt)
    Linear {
        initial_delay_ms: u64,
        increment_ms: u64,
    },
    /// Exponential increase in delay (initial * multiplier^attempt), capped
    Exponential {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_ms: 500,
            max_delay_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = match self {
            Self::Fixed { delay_ms } => *delay_ms,
            Self::Linear {
                initial_delay_ms,
                increment_ms,
            } => initial_delay_ms.saturating_add(increment_ms.saturating_mul(attempt as u64)),
            Self::Exponential {
                initial_delay_ms,
                max_delay_ms,
                multiplier,
            } => {
                let delay = (*initial_delay_ms as f64) * multiplier.powi(attempt as i32);
                delay.min(*max_delay_ms as f64) as u64
            }
        };

        Duration::from_millis(ms)
    }

    pub fn fixed(delay_ms: u64) -> Self {
        Self::Fixed { delay_ms }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// How transient remote failures are retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts after which an entry is reported as still pending
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

fn default_max_attempts() -> u32 {
    8
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// An entry that failed `attempts` times is past its budget.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Delay before the next retry.
    pub fn next_retry_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay_for_attempt(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_is_capped() {
        let backoff = BackoffStrategy::Exponential {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_linear() {
        let backoff = BackoffStrategy::Linear {
            initial_delay_ms: 50,
            increment_ms: 25,
        };
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(100));
    }

    #[test]
    fn test_exhausted_at_budget() {
        let policy = RetryPolicy::with_retries(2);
        assert!(!policy.exhausted(1));
        assert!(policy.exhausted(2));
    }

    #[test]
    fn test_deserialize_tagged() {
        let policy: RetryPolicy = serde_json::from_value(serde_json::json!({
            "max_attempts": 3,
            "backoff": { "kind": "fixed", "delay_ms": 10 }
        }))
        .unwrap();
        assert_eq!(policy.backoff, BackoffStrategy::fixed(10));
    }
}
