// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Message packs
//!
//! A pack tracks one polled batch as a single ack unit. Downstream handlers
//! resolve each message independently, from any task, via [`MsgPack::on_success`]
//! and [`MsgPack::on_failure`]. Once every message is accounted for the pack
//! seals exactly once, even when the last two callbacks race, and the consumer
//! loop hands it to a backpressure strategy.
//!
//! State machine: `Open (processing) → Sealed`, then the strategy decides
//! `Resolved`, `Retry` or `Drop`.

use crate::QueueMsg;

use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Ack-tracked unit wrapping a batch of in-flight messages. Shared via `Arc`
/// between the consumer loop and the tasks resolving individual messages.
pub struct MsgPack {
    /// Pack id; replay packs get a fresh one.
    id: Uuid,
    /// The original batch, in poll order.
    msgs: Vec<QueueMsg>,
    /// Ids already resolved, to ignore duplicate callbacks.
    resolved: Mutex<HashSet<Uuid>>,
    /// Failed messages by id.
    failed: Mutex<HashMap<Uuid, QueueMsg>>,
    ack_count: AtomicUsize,
    failed_count: AtomicUsize,
    /// Replay generation, used by the retry-all strategy.
    retry_attempt: AtomicU32,
    /// True while the pack accepts resolutions.
    processing: AtomicBool,
    sealed: AtomicBool,
    /// Woken when the pack seals.
    on_sealed: Notify,
}

impl MsgPack {
    pub fn new(msgs: Vec<QueueMsg>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            msgs,
            resolved: Mutex::new(HashSet::new()),
            failed: Mutex::new(HashMap::new()),
            ack_count: AtomicUsize::new(0),
            failed_count: AtomicUsize::new(0),
            retry_attempt: AtomicU32::new(0),
            processing: AtomicBool::new(true),
            sealed: AtomicBool::new(false),
            on_sealed: Notify::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn msgs(&self) -> &[QueueMsg] {
        &self.msgs
    }

    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    pub fn ack_count(&self) -> usize {
        self.ack_count.load(Ordering::SeqCst)
    }

    pub fn failed_count(&self) -> usize {
        self.failed_count.load(Ordering::SeqCst)
    }

    pub fn retry_attempt(&self) -> u32 {
        self.retry_attempt.load(Ordering::SeqCst)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Marks one message as successfully processed. Late or duplicate calls are
    /// ignored once the message is resolved or the pack sealed.
    pub fn on_success(&self, msg_id: Uuid) {
        if !self.begin_resolution(msg_id) {
            return;
        }
        self.ack_count.fetch_add(1, Ordering::SeqCst);
        self.try_seal();
    }

    /// Marks one message as failed, keeping it in the pack's failed subset for
    /// the backpressure strategy.
    pub fn on_failure(&self, msg_id: Uuid) {
        if !self.begin_resolution(msg_id) {
            return;
        }
        if let Some(msg) = self.msgs.iter().find(|m| m.id == msg_id) {
            if let Ok(mut failed) = self.failed.lock() {
                failed.insert(msg_id, msg.clone());
            }
        }
        self.failed_count.fetch_add(1, Ordering::SeqCst);
        self.try_seal();
    }

    /// Fails every not-yet-resolved message. Used when processing must stop
    /// mid-batch, e.g. after losing partition ownership.
    pub fn fail_remaining(&self) {
        let pending: Vec<Uuid> = self.msgs.iter().map(|m| m.id).collect();
        for id in pending {
            self.on_failure(id);
        }
    }

    /// Waits until the pack seals or `timeout` elapses. Returns true if sealed.
    pub async fn await_sealed(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_sealed() {
                return true;
            }
            let wait = self.on_sealed.notified();
            tokio::pin!(wait);
            // Register the waiter before re-checking: a seal landing between
            // the check and the await is then guaranteed to wake it.
            wait.as_mut().enable();
            if self.is_sealed() {
                return true;
            }
            if tokio::time::timeout_at(deadline, wait).await.is_err() {
                return self.is_sealed();
            }
        }
    }

    /// The failed subset, in original batch order.
    pub fn failed_msgs(&self) -> Vec<QueueMsg> {
        let failed = match self.failed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.msgs
            .iter()
            .filter(|m| failed.contains_key(&m.id))
            .cloned()
            .collect()
    }

    /// New pack carrying only the failed subset, each message with a fresh id.
    pub fn retry_failed(&self) -> Arc<MsgPack> {
        let msgs = self
            .failed_msgs()
            .into_iter()
            .map(|mut msg| {
                msg.id = Uuid::new_v4();
                msg
            })
            .collect();
        let pack = MsgPack::new(msgs);
        pack.retry_attempt
            .store(self.retry_attempt() + 1, Ordering::SeqCst);
        pack
    }

    /// New pack replaying the entire original batch with a fresh pack id and
    /// fresh message ids, all acks reset. Increments the pack-level replay
    /// generation.
    pub fn retry_all(&self) -> Arc<MsgPack> {
        let msgs = self
            .msgs
            .iter()
            .cloned()
            .map(|mut msg| {
                msg.id = Uuid::new_v4();
                msg
            })
            .collect();
        let pack = MsgPack::new(msgs);
        pack.retry_attempt
            .store(self.retry_attempt() + 1, Ordering::SeqCst);
        pack
    }

    /// Claims the resolution of `msg_id`. False when the pack no longer accepts
    /// resolutions or the message was already resolved.
    fn begin_resolution(&self, msg_id: Uuid) -> bool {
        if !self.processing.load(Ordering::SeqCst) {
            return false;
        }
        if !self.msgs.iter().any(|m| m.id == msg_id) {
            return false;
        }
        let mut resolved = match self.resolved.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        resolved.insert(msg_id)
    }

    /// Seals the pack once all messages are accounted for. The CAS guarantees a
    /// single winner when racing callbacks complete the last message.
    fn try_seal(&self) {
        let done = self.ack_count() + self.failed_count();
        if done < self.msgs.len() {
            return;
        }
        if self
            .sealed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.processing.store(false, Ordering::SeqCst);
            debug!(
                "Pack {} sealed: {} acked, {} failed.",
                self.id,
                self.ack_count(),
                self.failed_count()
            );
            self.on_sealed.notify_waiters();
        }
    }
}

impl std::fmt::Debug for MsgPack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgPack")
            .field("id", &self.id)
            .field("len", &self.msgs.len())
            .field("ack_count", &self.ack_count())
            .field("failed_count", &self.failed_count())
            .field("retry_attempt", &self.retry_attempt())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}
