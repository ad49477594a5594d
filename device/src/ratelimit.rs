// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Rate limiting
//!
//! Tiered token buckets parsed from definition strings of the form
//! `"capacity:periodSecs"`, comma-separated for multiple tiers, e.g.
//! `"100:1,2000:60"` for 100 per second and 2000 per minute. A consume attempt
//! succeeds only when every tier has a token; tokens replenish greedily with
//! elapsed time. The limiter only gates: it never executes side effects, so no
//! lock is held across the caller's subsequent work.

use crate::Error;

use tokio::time::Instant;

use std::time::Duration;

/// One token bucket tier.
#[derive(Debug, Clone)]
struct Bucket {
    capacity: f64,
    period: Duration,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u64, period: Duration) -> Self {
        Self {
            capacity: capacity as f64,
            period,
            tokens: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let rate = self.capacity / self.period.as_secs_f64();
        self.tokens = (self.tokens + elapsed.as_secs_f64() * rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Tiered token-bucket rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    tiers: Vec<Bucket>,
}

impl RateLimiter {
    /// Parses a definition string. An empty string yields a limiter that never
    /// rejects.
    pub fn parse(definition: &str) -> Result<Self, Error> {
        let mut tiers = Vec::new();
        for part in definition.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (capacity, period) = part.split_once(':').ok_or_else(|| {
                Error::InvalidRateLimit(
                    definition.to_owned(),
                    "expected `capacity:periodSecs`".to_owned(),
                )
            })?;
            let capacity: u64 = capacity.trim().parse().map_err(|_| {
                Error::InvalidRateLimit(
                    definition.to_owned(),
                    format!("invalid capacity `{}`", capacity),
                )
            })?;
            let period_secs: u64 = period.trim().parse().map_err(|_| {
                Error::InvalidRateLimit(
                    definition.to_owned(),
                    format!("invalid period `{}`", period),
                )
            })?;
            if capacity == 0 || period_secs == 0 {
                return Err(Error::InvalidRateLimit(
                    definition.to_owned(),
                    "capacity and period must be positive".to_owned(),
                ));
            }
            tiers.push(Bucket::new(capacity, Duration::from_secs(period_secs)));
        }
        Ok(Self { tiers })
    }

    /// Takes one token from every tier. False when any tier is exhausted, in
    /// which case no tier is charged.
    pub fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        for tier in &mut self.tiers {
            tier.refill(now);
        }
        if self.tiers.iter().all(|tier| tier.tokens >= 1.0) {
            for tier in &mut self.tiers {
                tier.tokens -= 1.0;
            }
            true
        } else {
            false
        }
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }
}
