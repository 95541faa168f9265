//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use rand::Rng;
use std::result::Result;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{ia_err, TunnelError};

/// Parameters of an [`ExponentialBackoff`].
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay returned by the first call after a reset (before jitter).
    pub base_delay: Duration,
    /// Upper bound for any returned delay, jitter included.
    pub max_delay: Duration,
    /// Once this much time has passed since the last reset, no further
    /// delays are produced. Zero means unbounded.
    pub max_elapsed: Duration,
    /// Growth factor per attempt. Must be at least 1.
    pub multiplier: f64,
    /// Relative random spread applied to each delay, in `[0, 1)`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(1),
            max_elapsed: Duration::ZERO,
            multiplier: 1.5,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), TunnelError> {
        if !(self.multiplier >= 1.0) {
            return ia_err!("backoff multiplier must be >= 1, got {}", self.multiplier);
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return ia_err!("backoff jitter must be in [0, 1), got {}", self.jitter);
        }
        if self.base_delay > self.max_delay {
            return ia_err!(
                "backoff base delay {:?} exceeds max delay {:?}",
                self.base_delay,
                self.max_delay
            );
        }
        Ok(())
    }
}

/// Exponential backoff with jitter.
///
/// Each call to [`next_backoff()`](ExponentialBackoff::next_backoff) returns
/// `min(max, base * multiplier^attempts)` spread by the jitter factor and
/// advances the attempt counter. [`reset()`](ExponentialBackoff::reset) brings
/// the delay back to the base value.
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempts: u32,
    started: Instant,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Result<Self, TunnelError> {
        config.validate()?;
        Ok(ExponentialBackoff {
            config,
            attempts: 0,
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.started = Instant::now();
    }

    /// Time since construction or the last reset.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The next delay, or `None` once the max elapsed time has been exceeded.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if !self.config.max_elapsed.is_zero() && self.elapsed() > self.config.max_elapsed {
            return None;
        }
        let max = self.config.max_delay.as_secs_f64();
        let raw = self.config.base_delay.as_secs_f64()
            * self.config.multiplier.powi(self.attempts as i32);
        let capped = raw.min(max);
        // stop counting once the delay can no longer grow, so the exponent can't overflow
        if raw > 0.0 && capped < max && self.config.multiplier > 1.0 {
            self.attempts = self.attempts.saturating_add(1);
        }

        let mut delay = capped;
        if self.config.jitter > 0.0 && capped > 0.0 {
            let j = self.config.jitter;
            delay = capped * rand::thread_rng().gen_range((1.0 - j)..(1.0 + j));
        }
        Some(Duration::from_secs_f64(delay.min(max)))
    }
}
