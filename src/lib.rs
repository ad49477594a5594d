// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Hive
//!
//! Dispatch backbone for a multi-tenant device platform. A node polls its
//! queue topic, resolves which entities it owns in the cluster topology, and
//! routes each message through the owning tenant actor to a per-device actor.
//! The building blocks live in dedicated crates:
//!
//! - `runtime`: the actor system (lifecycle, supervision, entity registry).
//! - `queue`: transport traits, message packs and backpressure strategies.
//! - `cluster`: service topology and the fail-closed partition resolver.
//! - `device`: the device actor with its sessions, activity and rate limits.
//!
//! This crate ties them together: [`DispatchConfig`] for settings,
//! [`TenantActor`] as the per-tenant root and [`DispatchService`] as the
//! consume loop.

pub mod config;
pub mod dispatch;

pub use config::{DispatchConfig, RetryPolicy};
pub use dispatch::{
    DispatchOutcome, DispatchService, SESSION_ID_HEADER, TENANT_ID_HEADER,
    TS_HEADER, TenantActor, TenantMessage,
};

use thiserror::Error as ThisError;

/// Top-level errors of the dispatch layer.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),
    /// Queue transport failure.
    #[error(transparent)]
    Queue(#[from] queue::Error),
    /// Actor system failure.
    #[error(transparent)]
    Runtime(#[from] runtime::Error),
    /// Device layer failure.
    #[error(transparent)]
    Device(#[from] device::Error),
}
