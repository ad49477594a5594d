// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Entity actor runtime
//!
//! Lightweight actor runtime for per-entity dispatch. Every entity (device, tenant,
//! rule chain) that needs serialized access to mutable state gets its own actor: a
//! mailbox, a lifecycle and a dedicated task, multiplexed over the shared tokio
//! runtime. Messages for one actor are processed strictly one at a time; concurrency
//! exists across actors, never within one.
//!
//! The runtime provides:
//!
//! - The [`Actor`] and [`Handler`] traits: initialize, handle one message, self-tick,
//!   stop with a [`StopReason`].
//! - [`ActorSystem`] and [`SystemRef`]: a tree of actors addressable by
//!   [`ActorPath`], with shutdown fan-out through a cancellation token.
//! - Supervision: parents decide the fate of faulted children, failed
//!   initializations retry per [`SupervisionStrategy`].
//! - [`EntityRegistry`]: one actor per entity id under a single owning parent, with
//!   paged warm-up through an [`EntityPager`].
//! - Event [`Sink`]s draining actor broadcast channels for observers.
//!

pub mod actor;
pub mod entity;
mod error;
mod mailbox;
mod path;
pub mod registry;
mod runner;
pub mod sink;
pub mod supervision;
pub mod system;

pub use actor::{
    Actor, ActorContext, ActorRef, ChildAction, ChildError, Event, Handler,
    Message, Response, StopReason, StopSignal,
};
pub use entity::{EntityId, EntityType};
pub use error::Error;
pub use path::ActorPath;
pub use registry::{EntityPager, EntityRegistry, PageData, PageLink};
pub use sink::{Sink, Subscriber};
pub use supervision::{
    ExponentialBackoffStrategy, FixedIntervalStrategy, NoIntervalStrategy,
    RetryStrategy, SupervisionStrategy,
};
pub use system::{ActorSystem, SystemRef, SystemRunner};
