// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Exponential backoff shared by task retries and MCP reconnects.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(default = "default_base", with = "humantime_serde")]
    pub base: Duration,

    #[serde(default = "default_factor")]
    pub factor: f64,

    #[serde(default = "default_cap", with = "humantime_serde")]
    pub cap: Duration,

    /// Fraction of the delay added or removed at random (0.2 = ±20%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_base() -> Duration {
    Duration::from_millis(500)
}

fn default_factor() -> f64 {
    2.0
}

fn default_cap() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: default_base(),
            factor: default_factor(),
            cap: default_cap(),
            jitter: default_jitter(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let millis = self.base.as_millis() as f64 * self.factor.powi(exponent);
        let cap = self.cap.as_millis() as f64;
        Duration::from_millis(millis.min(cap).max(0.0) as u64)
    }

    /// Jittered delay, still never above the cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter <= 0.0 {
            return nominal;
        }
        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        let millis = nominal.as_millis() as f64 * (1.0 + spread);
        Duration::from_millis(millis.clamp(0.0, self.cap.as_millis() as f64) as u64)
    }

    /// Upper bound on the time spent backing off across `retries` retries.
    pub fn worst_case_total(&self, retries: u32) -> Duration {
        (1..=retries)
            .map(|n| self.nominal_delay(n).mul_f64(1.0 + self.jitter.max(0.0)).min(self.cap))
            .sum()
    }
}
