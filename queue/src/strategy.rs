// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Backpressure strategies
//!
//! After a pack seals, a strategy decides what happens to its failed subset.
//! `RetryFailedStrategy` replays only the failed messages, bounded by a shared
//! attempt counter; `RetryAllStrategy` replays the whole original batch when
//! partial success cannot be trusted (ordering-sensitive sinks). Both surface
//! dropped-message counts so sustained backpressure is observable.

use crate::{MsgPack, QueueMsg};

use tracing::{info, warn};

use std::sync::{
    Arc,
    atomic::{AtomicU32, AtomicU64, Ordering},
};

/// Outcome of a strategy decision for one sealed pack.
#[derive(Debug)]
pub enum PackDecision {
    /// Every message acked; commit and move on.
    Resolved,
    /// Reprocess the returned pack before committing.
    Retry(Arc<MsgPack>),
    /// Give up on the contained messages; commit and move on.
    Drop(Vec<QueueMsg>),
}

/// Counters shared with the stats sink.
#[derive(Debug, Default)]
pub struct StrategyStats {
    retried: AtomicU64,
    dropped: AtomicU64,
}

impl StrategyStats {
    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_retry(&self, msgs: u64) {
        self.retried.fetch_add(msgs, Ordering::Relaxed);
    }

    fn record_drop(&self, msgs: u64) {
        self.dropped.fetch_add(msgs, Ordering::Relaxed);
    }
}

/// Policy applied to each sealed pack.
pub trait PackStrategy: Send + Sync {
    fn on_sealed(&self, pack: &MsgPack) -> PackDecision;

    fn stats(&self) -> Arc<StrategyStats>;
}

/// Replays only the failed subset, up to `max_attempts` cycles per batch. The
/// attempt counter is shared across the replay chain of one original pack and
/// resets once a pack resolves cleanly or its failures are dropped.
pub struct RetryFailedStrategy {
    max_attempts: u32,
    attempts: AtomicU32,
    stats: Arc<StrategyStats>,
}

impl RetryFailedStrategy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: AtomicU32::new(0),
            stats: Arc::new(StrategyStats::default()),
        }
    }
}

impl PackStrategy for RetryFailedStrategy {
    fn on_sealed(&self, pack: &MsgPack) -> PackDecision {
        if pack.failed_count() == 0 {
            self.attempts.store(0, Ordering::SeqCst);
            return PackDecision::Resolved;
        }
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.max_attempts {
            self.attempts.store(0, Ordering::SeqCst);
            let dropped = pack.failed_msgs();
            self.stats.record_drop(dropped.len() as u64);
            warn!(
                "Pack {}: dropping {} messages after {} retry attempts.",
                pack.id(),
                dropped.len(),
                self.max_attempts
            );
            return PackDecision::Drop(dropped);
        }
        let retry = pack.retry_failed();
        self.stats.record_retry(retry.len() as u64);
        info!(
            "Pack {}: retrying {} failed messages (attempt {}/{}).",
            pack.id(),
            retry.len(),
            attempt,
            self.max_attempts
        );
        PackDecision::Retry(retry)
    }

    fn stats(&self) -> Arc<StrategyStats> {
        self.stats.clone()
    }
}

/// Replays the entire original batch on any failure, tracked by the pack-level
/// replay generation rather than a strategy counter.
pub struct RetryAllStrategy {
    max_attempts: u32,
    stats: Arc<StrategyStats>,
}

impl RetryAllStrategy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            stats: Arc::new(StrategyStats::default()),
        }
    }
}

impl PackStrategy for RetryAllStrategy {
    fn on_sealed(&self, pack: &MsgPack) -> PackDecision {
        if pack.failed_count() == 0 {
            return PackDecision::Resolved;
        }
        if pack.retry_attempt() >= self.max_attempts {
            let dropped = pack.msgs().to_vec();
            self.stats.record_drop(dropped.len() as u64);
            warn!(
                "Pack {}: dropping full batch of {} after {} replays.",
                pack.id(),
                dropped.len(),
                self.max_attempts
            );
            return PackDecision::Drop(dropped);
        }
        let replay = pack.retry_all();
        self.stats.record_retry(replay.len() as u64);
        info!(
            "Pack {}: replaying full batch of {} (generation {}).",
            pack.id(),
            replay.len(),
            replay.retry_attempt()
        );
        PackDecision::Retry(replay)
    }

    fn stats(&self) -> Arc<StrategyStats> {
        self.stats.clone()
    }
}
