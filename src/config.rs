// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Dispatch configuration
//!
//! Static-at-construction settings for one dispatch node, loadable from TOML.
//! Nothing here hot-reloads: limits, intervals and strategy choices are read
//! once when the service is built.

use crate::Error;

use device::ActivityStrategyType;

use serde::{Deserialize, Serialize};

use std::time::Duration;

/// Which backpressure strategy handles sealed packs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Replay only the failed subset, bounded attempts.
    Retry,
    /// Replay the entire batch on any failure.
    RetryAll,
}

/// Settings of one dispatch node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// This node's identity in the cluster.
    pub node_id: String,
    /// Topic the dispatch loop consumes.
    pub topic: String,
    /// Upper bound of one consumer poll.
    pub poll_timeout_ms: u64,
    /// Bound on waiting for a pack to seal before failing its remainder.
    pub pack_timeout_ms: u64,
    /// Retry cycles before a pack's failures are dropped.
    pub pack_max_retry_attempts: u32,
    /// Backpressure policy for sealed packs.
    pub retry_policy: RetryPolicy,
    /// Session capacity per device.
    pub max_concurrent_sessions_per_device: usize,
    /// Stats/activity flush interval of device actors.
    pub stats_interval_ms: u64,
    /// Activity reporting strategy of device actors.
    pub activity_strategy: ActivityStrategyType,
    /// Per-tenant rate limit tiers, `"capacity:periodSecs"` comma-separated.
    /// Empty string disables tenant rate limiting.
    pub tenant_rate_limit: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            node_id: "node-0".to_owned(),
            topic: "core".to_owned(),
            poll_timeout_ms: 25,
            pack_timeout_ms: 10_000,
            pack_max_retry_attempts: 3,
            retry_policy: RetryPolicy::Retry,
            max_concurrent_sessions_per_device: 1,
            stats_interval_ms: 60_000,
            activity_strategy: ActivityStrategyType::Last,
            tenant_rate_limit: String::new(),
        }
    }
}

impl DispatchConfig {
    /// Parses a TOML document. Missing keys take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn pack_timeout(&self) -> Duration {
        Duration::from_millis(self.pack_timeout_ms)
    }

    /// Device actor settings derived from this node configuration.
    pub fn device_config(&self) -> device::DeviceActorConfig {
        device::DeviceActorConfig {
            max_concurrent_sessions_per_device: self
                .max_concurrent_sessions_per_device,
            stats_interval: Duration::from_millis(self.stats_interval_ms),
            activity_strategy: self.activity_strategy,
        }
    }
}
