// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use crate::constants::backoff;
use rand::Rng;
use std::time::Duration;

/// Exponential retry schedule for failed reconciliation passes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Retries allowed after the first failure
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(backoff::BASE_MS),
            cap: Duration::from_secs(backoff::CAP_SECS),
            max_retries: backoff::MAX_RETRIES,
        }
    }
}

impl BackoffPolicy {
    /// `base * 2^(failures-1)`, capped
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.cap, |d| d.min(self.cap))
    }

    /// `delay(failures)` with jitter drawn from `[delay/2, delay]`
    pub fn jittered(&self, failures: u32) -> Duration {
        let delay = self.delay(failures);
        let upper = delay.as_millis() as u64;
        if upper == 0 {
            return delay;
        }
        Duration::from_millis(rand::thread_rng().gen_range(upper / 2..=upper))
    }

    /// Whether `failures` consecutive failures have used up every retry
    pub fn exhausted(&self, failures: u32) -> bool {
        failures > self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(5), Duration::from_secs(16));
        assert_eq!(policy.delay(9), Duration::from_secs(256));
        assert_eq!(policy.delay(10), Duration::from_secs(300));
        assert_eq!(policy.delay(40), Duration::from_secs(300));
    }

    #[test]
    fn test_jitter_stays_within_half_and_full_delay() {
        let policy = BackoffPolicy::default();
        for failures in 1..=12 {
            let delay = policy.delay(failures);
            let jittered = policy.jittered(failures);
            assert!(jittered <= delay);
            assert!(jittered >= delay / 2);
        }
    }

    #[test]
    fn test_eleventh_failure_exhausts_ten_retries() {
        let policy = BackoffPolicy::default();
        assert!(!policy.exhausted(10));
        assert!(policy.exhausted(11));
    }
}
