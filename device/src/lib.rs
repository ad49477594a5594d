// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Device layer
//!
//! Per-device processing state and the helpers it leans on: the bounded session
//! map with coordinated subscription eviction, activity reporting strategies,
//! the per-key deduplication executor and tiered rate limiting. The
//! [`DeviceActor`] ties them together as one actor per device on top of the
//! `runtime` crate.

pub mod activity;
pub mod bounded;
pub mod dedup;
mod error;
pub mod processor;
pub mod ratelimit;
pub mod session;

pub use activity::{ActivityState, ActivityStrategy, ActivityStrategyType};
pub use bounded::{BoundedMap, EvictHook};
pub use dedup::{DedupExecutor, DedupHandler};
pub use error::Error;
pub use processor::{
    DeviceActor, DeviceActorConfig, DeviceEvent, DeviceMessage, DeviceResponse,
};
pub use ratelimit::RateLimiter;
pub use session::{SessionId, SessionMeta, SessionStore, SubscriptionInfo};
