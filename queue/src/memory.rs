// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # In-memory queue backend
//!
//! One FIFO per topic inside an explicitly constructed [`MemoryQueue`]. Nothing is
//! process-global: every test or local deployment builds and injects its own
//! instance, so isolated instances can run in parallel.
//!
//! `poll` reads without removing; `commit` pops exactly the messages of the last
//! polled batch. Dropping a consumer between the two leaves the batch in place
//! for redelivery, which is what gives the at-least-once contract its teeth even
//! in the local backend. Not partition-aware.

use crate::{
    Error, QueueMsg,
    transport::{QueueAdmin, QueueConsumer, QueueProducer},
};

use async_trait::async_trait;
use tokio::sync::Notify;

use tracing::debug;

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

/// State of one topic.
struct Topic {
    messages: VecDeque<QueueMsg>,
    /// Woken on every publish to the topic.
    publish: Arc<Notify>,
}

impl Topic {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            publish: Arc::new(Notify::new()),
        }
    }
}

/// Shared in-memory storage behind producers and consumers. Cloning shares the
/// underlying topics.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a producer writing to `default_topic`.
    pub fn producer(&self, default_topic: &str) -> MemoryProducer {
        MemoryProducer {
            storage: self.clone(),
            default_topic: default_topic.to_owned(),
        }
    }

    /// Builds a consumer reading `topic`. Call `subscribe` before polling.
    pub fn consumer(&self, topic: &str) -> MemoryConsumer {
        MemoryConsumer {
            storage: self.clone(),
            topic: topic.to_owned(),
            subscribed: false,
            polled: 0,
        }
    }

    fn push(&self, topic: &str, msg: QueueMsg) {
        let mut topics = self.lock_topics();
        let state = topics.entry(topic.to_owned()).or_insert_with(Topic::new);
        state.messages.push_back(msg);
        state.publish.notify_waiters();
    }

    /// Snapshot of the topic head plus its publish handle for waiting.
    fn peek(&self, topic: &str) -> (Vec<QueueMsg>, Arc<Notify>) {
        let mut topics = self.lock_topics();
        let state = topics.entry(topic.to_owned()).or_insert_with(Topic::new);
        let msgs = state.messages.iter().cloned().collect();
        (msgs, state.publish.clone())
    }

    fn pop(&self, topic: &str, count: usize) {
        let mut topics = self.lock_topics();
        if let Some(state) = topics.get_mut(topic) {
            for _ in 0..count {
                state.messages.pop_front();
            }
        }
    }

    fn lock_topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, Topic>> {
        // Held only for short map operations; a poisoned lock means a panic
        // elsewhere already broke the queue, so propagate the inner state.
        match self.topics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl QueueAdmin for MemoryQueue {
    async fn create_topic_if_not_exists(&self, topic: &str) -> Result<(), Error> {
        let mut topics = self.lock_topics();
        topics.entry(topic.to_owned()).or_insert_with(Topic::new);
        Ok(())
    }
}

/// Producer over a [`MemoryQueue`].
#[derive(Clone)]
pub struct MemoryProducer {
    storage: MemoryQueue,
    default_topic: String,
}

#[async_trait]
impl QueueProducer for MemoryProducer {
    fn default_topic(&self) -> &str {
        &self.default_topic
    }

    async fn send_to(&self, topic: &str, msg: QueueMsg) -> Result<(), Error> {
        debug!("Producing message {} to topic `{}`.", msg.id, topic);
        self.storage.push(topic, msg);
        Ok(())
    }
}

/// Consumer over a [`MemoryQueue`].
pub struct MemoryConsumer {
    storage: MemoryQueue,
    topic: String,
    subscribed: bool,
    /// Size of the last polled batch, popped on commit.
    polled: usize,
}

#[async_trait]
impl QueueConsumer for MemoryConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn subscribe(&mut self) -> Result<(), Error> {
        self.subscribed = true;
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<(), Error> {
        self.subscribed = false;
        self.polled = 0;
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<QueueMsg>, Error> {
        if !self.subscribed {
            return Err(Error::NotSubscribed(self.topic.clone()));
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let (msgs, publish) = self.storage.peek(&self.topic);
            if !msgs.is_empty() {
                self.polled = msgs.len();
                return Ok(msgs);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                self.polled = 0;
                return Ok(vec![]);
            }
            let _ =
                tokio::time::timeout_at(deadline, publish.notified()).await;
        }
    }

    async fn commit(&mut self) -> Result<(), Error> {
        if !self.subscribed {
            return Err(Error::NotSubscribed(self.topic.clone()));
        }
        self.storage.pop(&self.topic, self.polled);
        self.polled = 0;
        Ok(())
    }
}
