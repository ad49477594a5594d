// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Transport roles
//!
//! Narrow interfaces over a pub/sub backend: producer, pull-based consumer and
//! topic admin. Backends are injected; the in-memory one in [`crate::memory`]
//! serves local and test deployments, production backends add partitioning and
//! persistence behind the same traits.
//!
//! Consumers are at-least-once: a batch returned by `poll` is only considered
//! delivered after `commit`. A crash between the two causes redelivery, so
//! downstream handlers must tolerate duplicates.

use crate::{Error, QueueMsg};

use async_trait::async_trait;

use std::time::Duration;

/// Asynchronous message producer. The returned future resolves once the backend
/// acknowledged the message, so callers can observe delivery without blocking
/// the send path by simply not awaiting immediately.
#[async_trait]
pub trait QueueProducer: Send + Sync {
    /// Topic used by [`QueueProducer::send`].
    fn default_topic(&self) -> &str;

    /// Sends to the default topic.
    async fn send(&self, msg: QueueMsg) -> Result<(), Error> {
        let topic = self.default_topic().to_owned();
        self.send_to(&topic, msg).await
    }

    /// Sends to an explicit topic.
    async fn send_to(&self, topic: &str, msg: QueueMsg) -> Result<(), Error>;
}

/// Pull-based, single-subscription consumer. One consumer instance is driven by
/// one task; `poll` is the only blocking point in steady state.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Topic this consumer reads.
    fn topic(&self) -> &str;

    /// Starts consuming. Polling before subscribing is an error.
    async fn subscribe(&mut self) -> Result<(), Error>;

    /// Stops consuming. Uncommitted messages will be redelivered.
    async fn unsubscribe(&mut self) -> Result<(), Error>;

    /// Returns whatever is available, waiting up to `timeout` for at least one
    /// message. An empty batch is a normal outcome.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<QueueMsg>, Error>;

    /// Durably advances the read position past the last polled batch. Call only
    /// after every message of that batch is fully processed.
    async fn commit(&mut self) -> Result<(), Error>;
}

/// Topic administration.
#[async_trait]
pub trait QueueAdmin: Send + Sync {
    /// Idempotent topic creation, safe to call concurrently from several nodes.
    async fn create_topic_if_not_exists(&self, topic: &str) -> Result<(), Error>;
}
