// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Deduplication executor
//!
//! Per-key debouncer for bursty side effects (activity persistence, stats
//! forwarding). `submit` executes immediately when the key is idle; while an
//! execution is in flight, only the latest submitted value is remembered and
//! runs once afterwards. A burst of N submissions therefore collapses into at
//! most two executions, the in-flight value and the newest pending one, while
//! well-spaced submissions each execute individually.
//!
//! Handler errors are caught at the execution boundary and logged; they never
//! poison the key's slot or the worker task.

use runtime::Error;

use futures::future::BoxFuture;
use tracing::warn;

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex},
};

/// Consumer invoked for each coalesced value.
pub type DedupHandler<K, V> =
    Arc<dyn Fn(K, V) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// In-flight marker per key. A present entry means a worker is running; its
/// `pending` slot holds the newest superseding value.
struct Slot<V> {
    pending: Option<V>,
}

/// Per-key debouncer. Cloning shares the slots and the handler.
pub struct DedupExecutor<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    slots: Arc<Mutex<HashMap<K, Slot<V>>>>,
    handler: DedupHandler<K, V>,
}

impl<K, V> Clone for DedupExecutor<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<K, V> DedupExecutor<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    pub fn new(handler: DedupHandler<K, V>) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            handler,
        }
    }

    /// Submits a value for `key`. Never blocks: either a worker is spawned for
    /// the value or the value replaces the key's pending slot.
    pub fn submit(&self, key: K, value: V) {
        let spawn = {
            let mut slots = self.lock_slots();
            match slots.get_mut(&key) {
                Some(slot) => {
                    // A worker is running: remember only the newest value.
                    slot.pending = Some(value);
                    None
                }
                None => {
                    slots.insert(key.clone(), Slot { pending: None });
                    Some(value)
                }
            }
        };
        if let Some(value) = spawn {
            let executor = self.clone();
            tokio::spawn(async move {
                executor.run_worker(key, value).await;
            });
        }
    }

    /// Number of keys with a worker in flight.
    pub fn in_flight(&self) -> usize {
        self.lock_slots().len()
    }

    async fn run_worker(&self, key: K, first: V) {
        let mut value = first;
        loop {
            if let Err(err) = (self.handler)(key.clone(), value).await {
                warn!("Dedup handler failed: {}", err);
            }
            // Take the newest pending value, or retire the slot. Done under
            // the same lock a submitter uses, so the "run once more" signal
            // cannot be lost.
            let next = {
                let mut slots = self.lock_slots();
                match slots.get_mut(&key).and_then(|slot| slot.pending.take()) {
                    Some(next) => Some(next),
                    None => {
                        slots.remove(&key);
                        None
                    }
                }
            };
            match next {
                Some(next) => value = next,
                None => break,
            }
        }
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<K, Slot<V>>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use tokio::sync::Notify;

    use std::time::Duration;

    /// Handler that records executed values and can be held open via a gate.
    fn recording_handler(
        log: Arc<Mutex<Vec<u32>>>,
        gate: Option<Arc<Notify>>,
    ) -> DedupHandler<&'static str, u32> {
        Arc::new(move |_key, value| {
            let log = log.clone();
            let gate = gate.clone();
            Box::pin(async move {
                log.lock().unwrap().push(value);
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_burst_collapses_to_first_and_last() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Notify::new());
        let executor =
            DedupExecutor::new(recording_handler(log.clone(), Some(gate.clone())));

        executor.submit("device", 1);
        // Give the worker time to start executing value 1 and block on the gate.
        tokio::time::sleep(Duration::from_millis(20)).await;
        executor.submit("device", 2);
        executor.submit("device", 3);

        // Release the in-flight execution, then the coalesced one.
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Exactly two executions: 1 then 3; 2 was superseded.
        assert_eq!(*log.lock().unwrap(), vec![1, 3]);
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_spaced_submissions_each_execute() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = DedupExecutor::new(recording_handler(log.clone(), None));

        for value in [1, 2, 3] {
            executor.submit("device", value);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_keys_do_not_interfere() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let executor = DedupExecutor::new(recording_handler(log.clone(), None));

        executor.submit("a", 1);
        executor.submit("b", 2);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut executed = log.lock().unwrap().clone();
        executed.sort_unstable();
        assert_eq!(executed, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_handler_error_does_not_stop_the_key() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler_log = log.clone();
        let executor: DedupExecutor<&'static str, u32> =
            DedupExecutor::new(Arc::new(move |_key, value| {
                let log = handler_log.clone();
                Box::pin(async move {
                    log.lock().unwrap().push(value);
                    if value == 1 {
                        Err(Error::Functional("boom".to_owned()))
                    } else {
                        Ok(())
                    }
                })
            }));

        executor.submit("device", 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        executor.submit("device", 2);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
        assert_eq!(executor.in_flight(), 0);
    }
}
