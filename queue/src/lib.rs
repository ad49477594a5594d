// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Queue transport
//!
//! Pub/sub layer used both for inter-node delivery and local in-process queuing,
//! with at-least-once semantics: consumers poll a batch, process it, and only
//! then commit. On top of the transport sit [`MsgPack`], which tracks one polled
//! batch as a single ack unit, and the backpressure strategies deciding what to
//! do with a pack's failed subset.
//!
//! Backends are injected behind the role traits in [`transport`]; the in-memory
//! backend in [`memory`] covers local and test deployments.

mod error;
pub mod memory;
mod msg;
mod pack;
pub mod request;
pub mod strategy;
pub mod transport;

pub use error::Error;
pub use msg::QueueMsg;
pub use pack::MsgPack;
pub use request::{REQUEST_ID_HEADER, RequestTemplate, response_to};
pub use strategy::{
    PackDecision, PackStrategy, RetryAllStrategy, RetryFailedStrategy,
    StrategyStats,
};
pub use transport::{QueueAdmin, QueueConsumer, QueueProducer};
