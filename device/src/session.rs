// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Device sessions and subscriptions
//!
//! One device actor owns the live transport sessions of its device, bounded to
//! a configured maximum, plus the attribute and RPC subscriptions keyed by the
//! same session id. A subscription's lifetime is bound to its session: when the
//! bounded map evicts the oldest session, the eviction hook clears that session
//! from both subscription tables in the same step, so no subscription can ever
//! outlive its session.

use crate::bounded::BoundedMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tracing::debug;

use std::collections::HashMap;
use std::fmt;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

/// Identifier of one live transport connection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Transport that opened the session (mqtt, coap, http, ...).
    pub transport: String,
    /// Node hosting the transport connection.
    pub node: String,
    /// Last observed activity on this session, epoch millis.
    pub last_activity_time: u64,
}

/// What a session subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    /// Epoch millis of the subscribe call.
    pub since: u64,
}

/// Attribute and RPC subscriptions, both keyed by session id.
#[derive(Default)]
struct SubscriptionTables {
    attributes: HashMap<SessionId, SubscriptionInfo>,
    rpc: HashMap<SessionId, SubscriptionInfo>,
}

impl SubscriptionTables {
    fn clear_session(&mut self, session_id: &SessionId) {
        self.attributes.remove(session_id);
        self.rpc.remove(session_id);
    }
}

/// Session state of one device actor.
///
/// The store is only ever driven from its actor's message loop; the mutex on
/// the subscription tables exists because the eviction hook owns a second
/// handle to them, not because two tasks contend for it.
pub struct SessionStore {
    sessions: BoundedMap<SessionId, SessionMeta>,
    subscriptions: Arc<Mutex<SubscriptionTables>>,
    evictions: Arc<AtomicU64>,
}

impl SessionStore {
    pub fn new(max_sessions: usize) -> Self {
        let subscriptions = Arc::new(Mutex::new(SubscriptionTables::default()));
        let evictions = Arc::new(AtomicU64::new(0));

        let hook_subscriptions = subscriptions.clone();
        let hook_evictions = evictions.clone();
        let sessions = BoundedMap::new(
            max_sessions,
            Box::new(move |session_id: SessionId, _meta| {
                debug!("Evicting oldest session {}.", session_id);
                lock(&hook_subscriptions).clear_session(&session_id);
                hook_evictions.fetch_add(1, Ordering::Relaxed);
            }),
        );

        Self {
            sessions,
            subscriptions,
            evictions,
        }
    }

    /// Registers a session, evicting the oldest one when the device is at its
    /// session limit. A full device never rejects a new session.
    pub fn open(&mut self, session_id: SessionId, meta: SessionMeta) {
        self.sessions.insert(session_id, meta);
    }

    /// Closes a session and drops its subscriptions. Unknown ids are a no-op.
    pub fn close(&mut self, session_id: &SessionId) {
        if self.sessions.remove(session_id).is_some() {
            lock(&self.subscriptions).clear_session(session_id);
        }
    }

    pub fn meta(&self, session_id: &SessionId) -> Option<&SessionMeta> {
        self.sessions.get(session_id)
    }

    pub fn record_activity(&mut self, session_id: &SessionId, time: u64) {
        if let Some(meta) = self.sessions.get_mut(session_id) {
            meta.last_activity_time = meta.last_activity_time.max(time);
        }
    }

    /// Subscribes a live session to attribute updates. Ignored for unknown
    /// sessions, so a race with eviction cannot resurrect a subscription.
    pub fn subscribe_attributes(
        &mut self,
        session_id: SessionId,
        info: SubscriptionInfo,
    ) {
        if self.sessions.contains_key(&session_id) {
            lock(&self.subscriptions).attributes.insert(session_id, info);
        }
    }

    pub fn unsubscribe_attributes(&mut self, session_id: &SessionId) {
        lock(&self.subscriptions).attributes.remove(session_id);
    }

    /// Subscribes a live session to RPC requests.
    pub fn subscribe_rpc(&mut self, session_id: SessionId, info: SubscriptionInfo) {
        if self.sessions.contains_key(&session_id) {
            lock(&self.subscriptions).rpc.insert(session_id, info);
        }
    }

    pub fn unsubscribe_rpc(&mut self, session_id: &SessionId) {
        lock(&self.subscriptions).rpc.remove(session_id);
    }

    /// Sessions currently subscribed to attribute updates.
    pub fn attribute_subscribers(&self) -> Vec<SessionId> {
        lock(&self.subscriptions).attributes.keys().copied().collect()
    }

    /// Sessions currently subscribed to RPC requests.
    pub fn rpc_subscribers(&self) -> Vec<SessionId> {
        lock(&self.subscriptions).rpc.keys().copied().collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Sessions evicted since construction.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// True when every subscription belongs to a live session.
    pub fn subscriptions_consistent(&self) -> bool {
        let tables = lock(&self.subscriptions);
        tables
            .attributes
            .keys()
            .chain(tables.rpc.keys())
            .all(|session_id| self.sessions.contains_key(session_id))
    }
}

fn lock(
    tables: &Arc<Mutex<SubscriptionTables>>,
) -> std::sync::MutexGuard<'_, SubscriptionTables> {
    match tables.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn meta() -> SessionMeta {
        SessionMeta {
            transport: "mqtt".to_owned(),
            node: "node-a".to_owned(),
            last_activity_time: 0,
        }
    }

    fn info(since: u64) -> SubscriptionInfo {
        SubscriptionInfo { since }
    }

    #[test]
    fn test_session_count_stays_bounded() {
        // Limit 3, insert 5: final size 3 and exactly 2 evictions.
        let mut store = SessionStore::new(3);
        let ids: Vec<SessionId> = (0..5).map(|_| SessionId::random()).collect();
        for id in &ids {
            store.open(*id, meta());
        }
        assert_eq!(store.session_count(), 3);
        assert_eq!(store.evictions(), 2);
        // Oldest two are gone.
        assert!(store.meta(&ids[0]).is_none());
        assert!(store.meta(&ids[1]).is_none());
        assert!(store.meta(&ids[4]).is_some());
    }

    #[test]
    fn test_eviction_clears_both_subscription_tables() {
        let mut store = SessionStore::new(2);
        let first = SessionId::random();
        let second = SessionId::random();
        store.open(first, meta());
        store.open(second, meta());
        store.subscribe_attributes(first, info(1));
        store.subscribe_rpc(first, info(2));
        store.subscribe_rpc(second, info(3));

        // Third session evicts `first` and both its subscriptions with it.
        let third = SessionId::random();
        store.open(third, meta());
        assert!(store.meta(&first).is_none());
        assert_eq!(store.attribute_subscribers(), vec![]);
        assert_eq!(store.rpc_subscribers(), vec![second]);
        assert!(store.subscriptions_consistent());
    }

    #[test]
    fn test_close_drops_subscriptions() {
        let mut store = SessionStore::new(4);
        let id = SessionId::random();
        store.open(id, meta());
        store.subscribe_attributes(id, info(1));
        store.subscribe_rpc(id, info(1));

        store.close(&id);
        assert_eq!(store.session_count(), 0);
        assert!(store.attribute_subscribers().is_empty());
        assert!(store.rpc_subscribers().is_empty());

        // Closing again is harmless.
        store.close(&id);
    }

    #[test]
    fn test_subscribe_unknown_session_is_ignored() {
        let mut store = SessionStore::new(2);
        store.subscribe_attributes(SessionId::random(), info(1));
        assert!(store.attribute_subscribers().is_empty());
        assert!(store.subscriptions_consistent());
    }

    #[test]
    fn test_record_activity_updates_meta() {
        let mut store = SessionStore::new(2);
        let id = SessionId::random();
        store.open(id, meta());
        store.record_activity(&id, 42);
        store.record_activity(&id, 17);
        assert_eq!(store.meta(&id).unwrap().last_activity_time, 42);
    }
}
