//! Reconnect pacing for the connection kernel.
//!
//! Every failed connection attempt waits `reconnect_delay` grown by
//! `reconnect_multiplier` per failure, capped at `reconnect_max_delay`. A
//! CONNACK resets the pace. `max_reconnect_attempts = 0` never gives up.

use std::time::Duration;

use thiserror::Error;

use super::config::Config;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("gave up after {0} reconnect attempts")]
pub struct AttemptsExhausted(pub u32);

/// How many consecutive failures are tolerated before the kernel stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptLimit {
    Unlimited,
    AtMost(u32),
}

impl From<u32> for AttemptLimit {
    fn from(attempts: u32) -> Self {
        match attempts {
            0 => AttemptLimit::Unlimited,
            n => AttemptLimit::AtMost(n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    ceiling: Duration,
    multiplier: f64,
    limit: AttemptLimit,
    failures: u32,
    next: Duration,
}

impl Backoff {
    /// A multiplier below 1 is treated as 1 and a ceiling below `initial`
    /// is raised to it, so delays never shrink.
    pub fn new(initial: Duration, ceiling: Duration, multiplier: f64, limit: AttemptLimit) -> Self {
        Self {
            initial,
            ceiling: ceiling.max(initial),
            multiplier: multiplier.max(1.0),
            limit,
            failures: 0,
            next: initial,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Duration::from_secs(config.reconnect_delay),
            Duration::from_secs(config.reconnect_max_delay),
            config.reconnect_multiplier,
            AttemptLimit::from(config.max_reconnect_attempts),
        )
    }

    /// Called once the broker accepted the connection.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.next = self.initial;
    }

    /// Records one failure and returns how long to wait before retrying.
    pub fn next_sleep(&mut self) -> Result<Duration, AttemptsExhausted> {
        if let AttemptLimit::AtMost(max) = self.limit {
            if self.failures >= max {
                return Err(AttemptsExhausted(max));
            }
        }
        self.failures = self.failures.saturating_add(1);

        let sleep = self.next;
        self.next = self.next.mul_f64(self.multiplier).min(self.ceiling);
        Ok(sleep)
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
