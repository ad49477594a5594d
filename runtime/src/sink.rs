// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Event sinks
//!
//! Actors publish events (activity reports, per-entity stats) on broadcast channels.
//! A `Sink` drains one of those channels in its own task and hands each event to a
//! `Subscriber`, decoupling event consumers from the actor's message loop. A slow
//! sink can lag and lose events; it never blocks the publishing actor.
//!

use crate::Event;

use async_trait::async_trait;
use tokio::sync::broadcast::{Receiver as EventReceiver, error::RecvError};

use tracing::debug;

/// Drains an actor's event channel and notifies a subscriber. Run it with
/// [`crate::system::SystemRef::run_sink`], which spawns it on its own task.
pub struct Sink<E: Event> {
    /// The subscriber notified of each event.
    subscriber: Box<dyn Subscriber<E>>,
    /// Broadcast receiver for the actor's events.
    event_receiver: EventReceiver<E>,
}

impl<E: Event> Sink<E> {
    /// Creates a sink from a receiver obtained via `ActorRef::subscribe`.
    pub fn new(
        event_receiver: EventReceiver<E>,
        subscriber: impl Subscriber<E>,
    ) -> Self {
        Sink {
            subscriber: Box::new(subscriber),
            event_receiver,
        }
    }

    /// Event processing loop. Returns when the publishing actor stops and the
    /// channel closes. Lagged events are skipped, not replayed.
    pub async fn run(&mut self) {
        loop {
            match self.event_receiver.recv().await {
                Ok(event) => {
                    debug!("Received event: {:?}. Notify to the subscriber.", event);
                    self.subscriber.notify(event).await;
                }
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Sink lagged, skipped {} events.", skipped);
                    continue;
                }
            }
        }
    }
}

/// Consumer side of an actor's event stream.
#[async_trait]
pub trait Subscriber<E: Event>: Send + Sync + 'static {
    /// Called once per received event.
    async fn notify(&self, event: E);
}
