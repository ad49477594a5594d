// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor
//!
//! The `actor` module provides the `Actor` trait and the `ActorRef` type. The `Actor`
//! trait is the capability interface every entity state machine implements: initialize,
//! process one message, periodically self-tick, and stop with a reason. The `ActorRef`
//! type is a reference to an actor that can be used to send messages to it.
//!
//! Each actor owns exactly one entity's mutable state and is driven by a single logical
//! task: no two messages for the same actor execute concurrently, which is what lets
//! per-entity state be mutated without locks. Concurrency lives across actors, not
//! within one.
//!

use crate::{
    ActorPath, Error,
    mailbox::MailboxHandle,
    runner::{InnerAction, InnerSender, StopSender},
    supervision::SupervisionStrategy,
    system::SystemRef,
};

use tokio::sync::{broadcast::Receiver as EventReceiver, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use tracing::debug;

use std::{fmt::Debug, time::Duration};

/// Why an actor is being stopped. Closed set; always paired with an optional cause for
/// diagnostics. The reason is delivered synchronously through [`Actor::stopped`] before
/// the parent drops its reference, so registries can discard the child immediately
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Ordinary stop requested by the actor itself or its owner.
    Stopped,
    /// The backing entity was deleted.
    EntityDeleted,
    /// Partition ownership moved to another node.
    Rebalance,
    /// The node (or the whole system) is shutting down.
    Shutdown,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            StopReason::Stopped => "stopped",
            StopReason::EntityDeleted => "entity-deleted",
            StopReason::Rebalance => "rebalance",
            StopReason::Shutdown => "shutdown",
        };
        write!(f, "{}", tag)
    }
}

/// Stop request delivered to an actor's runner.
#[derive(Debug)]
pub struct StopSignal {
    /// Why the actor is being stopped.
    pub reason: StopReason,
    /// Optional failure that triggered the stop.
    pub cause: Option<Error>,
    /// Confirmation channel; `Some` when the requester wants to wait for shutdown.
    pub done: Option<oneshot::Sender<()>>,
}

impl StopSignal {
    pub fn new(
        reason: StopReason,
        cause: Option<Error>,
        done: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            reason,
            cause,
            done,
        }
    }
}

/// Lifecycle states of an actor, as driven by its runner.
#[derive(Debug, Clone, PartialEq)]
pub enum ActorLifecycle {
    /// Constructed but not yet initialized.
    Created,
    /// `init` succeeded; about to enter the message loop.
    Initialized,
    /// Processing messages.
    Running,
    /// Stop accepted; children stopped, `stopped` hook about to run.
    Stopping,
    /// Fully stopped; runner removes the actor and exits.
    Stopped,
    /// `init` (or a fatal runtime error) failed; supervision decides what happens next.
    Failed,
}

/// Action a parent decides for a faulted child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildAction {
    /// Stop the child permanently.
    Stop,
    /// Restart the child through its supervision strategy.
    Restart,
    /// Delegate the decision up the hierarchy.
    Delegate,
}

/// Error notification from a child actor to its parent.
#[derive(Debug)]
pub enum ChildError {
    /// Non-fatal error, reported for visibility only.
    Error { error: Error },
    /// Fatal fault; the parent must answer with a [`ChildAction`].
    Fault {
        error: Error,
        sender: oneshot::Sender<ChildAction>,
    },
}

pub(crate) type ChildErrorReceiver = mpsc::UnboundedReceiver<ChildError>;
pub(crate) type ChildErrorSender = mpsc::UnboundedSender<ChildError>;

/// Marker trait for messages that can be sent to actors.
pub trait Message: Clone + Send + Sync + 'static {}

impl Message for () {}

/// Trait for events an actor can publish to subscribers (e.g. the stats sink).
pub trait Event:
    Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static
{
}

impl Event for () {}

/// Marker trait for responses returned by ask-pattern interactions.
pub trait Response: Send + Sync + 'static {}

impl Response for () {}

/// The capability interface every entity state machine implements.
///
/// Lifecycle: `Created → Initialized → Running → Stopping → Stopped`. The runner calls
/// [`Actor::init`] once before the first message, [`Actor::on_tick`] on every scheduled
/// self-tick, and [`Actor::stopped`] exactly once with the stop reason and optional
/// cause. A failed `init` goes through [`Actor::supervision_strategy`], which may retry
/// initialization with a backoff before giving up.
#[async_trait]
pub trait Actor: Send + Sync + Sized + 'static + Handler<Self> {
    /// The message type this actor processes.
    type Message: Message;

    /// The event type this actor publishes.
    type Event: Event;

    /// The response type for ask-pattern interactions.
    type Response: Response;

    /// Supervision strategy applied when `init` fails. Defaults to stopping the actor.
    fn supervision_strategy() -> SupervisionStrategy {
        SupervisionStrategy::Stop
    }

    /// Called once before the actor processes its first message. Resource acquisition
    /// and tick scheduling belong here.
    async fn init(&mut self, _ctx: &mut ActorContext<Self>) -> Result<(), Error> {
        Ok(())
    }

    /// Called when the supervision strategy retries a failed initialization. Defaults
    /// to running `init` again.
    async fn on_restart(
        &mut self,
        ctx: &mut ActorContext<Self>,
        _error: Option<&Error>,
    ) -> Result<(), Error> {
        self.init(ctx).await
    }

    /// Periodic self-tick, fired by [`ActorContext::schedule_tick`]. An error here is
    /// logged at the tick boundary and does not cancel future ticks.
    async fn on_tick(&mut self, _ctx: &mut ActorContext<Self>) -> Result<(), Error> {
        Ok(())
    }

    /// Called exactly once when the actor stops, synchronously with the stop: when this
    /// returns, pending ticks are cancelled and the parent may drop its reference.
    async fn stopped(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        _reason: StopReason,
        _cause: Option<Error>,
    ) {
    }
}

/// Message processing interface.
#[async_trait]
pub trait Handler<A: Actor + Handler<A>>: Send + Sync {
    /// Processes one message. Messages for the same actor are handled strictly one at
    /// a time, in mailbox order.
    async fn handle_message(
        &mut self,
        sender: ActorPath,
        msg: A::Message,
        ctx: &mut ActorContext<A>,
    ) -> Result<A::Response, Error>;

    /// Non-fatal error reported by a child actor.
    async fn on_child_error(&mut self, error: Error, _ctx: &mut ActorContext<A>) {
        debug!("Handling child error: {:?}", error);
    }

    /// Fatal fault reported by a child actor. The returned action decides the child's
    /// fate. Defaults to stopping the child.
    async fn on_child_fault(
        &mut self,
        error: Error,
        _ctx: &mut ActorContext<A>,
    ) -> ChildAction {
        debug!("Handling child fault: {:?}", error);
        ChildAction::Stop
    }
}

/// Actor execution context: access to the system, child management, event publishing
/// and tick scheduling. Handed to every lifecycle hook and message handler.
pub struct ActorContext<A: Actor + Handler<A>> {
    /// Stop channel of this actor.
    stop: StopSender,
    /// Path of this actor in the system tree.
    path: ActorPath,
    /// Reference to the actor system.
    system: SystemRef,
    /// Error recorded by `emit_fail`, if any.
    error: Option<Error>,
    /// Channel children use to report errors to this actor.
    error_sender: ChildErrorSender,
    /// Internal channel to this actor's runner.
    inner_sender: InnerSender<A>,
    /// Stop channels of supervised children, in creation order.
    child_senders: Vec<StopSender>,
    /// Cancellation handle of the currently scheduled tick, if any.
    tick_token: Option<CancellationToken>,
}

impl<A> ActorContext<A>
where
    A: Actor + Handler<A>,
{
    pub(crate) fn new(
        stop: StopSender,
        path: ActorPath,
        system: SystemRef,
        error_sender: ChildErrorSender,
        inner_sender: InnerSender<A>,
    ) -> Self {
        Self {
            stop,
            path,
            system,
            error: None,
            error_sender,
            inner_sender,
            child_senders: Vec::new(),
            tick_token: None,
        }
    }

    /// Runs the actor's restart hook on behalf of the supervision machinery.
    pub(crate) async fn restart(
        &mut self,
        actor: &mut A,
        error: Option<&Error>,
    ) -> Result<(), Error> {
        actor.on_restart(self, error).await
    }

    /// A reference to this actor, if it is still registered in the system.
    pub async fn reference(&self) -> Option<ActorRef<A>> {
        self.system.get_actor(&self.path).await
    }

    /// The path of this actor.
    pub fn path(&self) -> &ActorPath {
        &self.path
    }

    /// The actor system.
    pub fn system(&self) -> &SystemRef {
        &self.system
    }

    /// A reference to the parent actor, if any and of the expected type.
    pub async fn parent<P: Actor + Handler<P>>(&self) -> Option<ActorRef<P>> {
        self.system.get_actor(&self.path.parent()).await
    }

    /// Schedules a periodic self-tick. Any previously scheduled tick is cancelled
    /// first, so at most one tick task exists per actor. The tick fires through the
    /// actor's own mailbox loop, never concurrently with message handling.
    pub fn schedule_tick(&mut self, interval: Duration) {
        self.cancel_tick();
        let token = CancellationToken::new();
        let guard = token.clone();
        let sender = self.inner_sender.clone();
        self.tick_token = Some(token);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = guard.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if sender.send(InnerAction::Tick).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Cancels the scheduled tick without waiting for an in-flight tick to finish.
    /// Idempotent: the handle is taken on first cancel, so a stray second call is a
    /// no-op and a cancelled tick can never fire after `stopped` ran.
    pub fn cancel_tick(&mut self) {
        if let Some(token) = self.tick_token.take() {
            token.cancel();
        }
    }

    /// Requests this actor to stop with the given reason.
    pub async fn stop(
        &self,
        reason: StopReason,
        cause: Option<Error>,
        done: Option<oneshot::Sender<()>>,
    ) {
        debug!("Stopping actor {} ({}).", &self.path, reason);
        let _ = self.stop.send(StopSignal::new(reason, cause, done)).await;
    }

    /// Publishes an event to this actor's subscribers.
    pub async fn publish_event(&self, event: A::Event) -> Result<(), Error> {
        self.inner_sender
            .send(InnerAction::Event(event))
            .map_err(|e| Error::SendEvent(e.to_string()))
    }

    /// Reports a non-fatal error to the parent actor.
    pub async fn emit_error(&mut self, error: Error) -> Result<(), Error> {
        self.inner_sender
            .send(InnerAction::Error(error))
            .map_err(|e| Error::Send(e.to_string()))
    }

    /// Reports a fatal failure. The parent (if any) decides the supervision action;
    /// the actor stops processing messages either way.
    pub async fn emit_fail(&mut self, error: Error) -> Result<(), Error> {
        self.set_error(error.clone());
        self.inner_sender
            .send(InnerAction::Fail(error))
            .map_err(|e| Error::Send(e.to_string()))
    }

    /// Creates a supervised child actor. Creation is atomic: on failure no partial
    /// registration remains and the error propagates to the caller.
    pub async fn create_child<C>(
        &mut self,
        name: &str,
        actor: C,
    ) -> Result<ActorRef<C>, Error>
    where
        C: Actor + Handler<C>,
    {
        let path = self.path.clone() / name;
        let (actor_ref, stop_sender) = self
            .system
            .create_actor_path(path, actor, Some(self.error_sender.clone()))
            .await?;
        self.child_senders.push(stop_sender);
        Ok(actor_ref)
    }

    /// Retrieves a child actor by name, if it exists and is of the expected type.
    pub async fn get_child<C>(&self, name: &str) -> Option<ActorRef<C>>
    where
        C: Actor + Handler<C>,
    {
        let path = self.path.clone() / name;
        self.system.get_actor(&path).await
    }

    /// Stops all children (last created first) and waits for each to confirm.
    pub(crate) async fn stop_children(&mut self, reason: StopReason) {
        while let Some(sender) = self.child_senders.pop() {
            let (done_sender, done_receiver) = oneshot::channel();
            if sender
                .send(StopSignal::new(reason, None, Some(done_sender)))
                .await
                .is_err()
            {
                continue;
            }
            let _ = done_receiver.await;
        }
    }

    pub(crate) async fn remove_actor(&self) {
        self.system.remove_actor(&self.path).await;
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.error.clone()
    }

    pub(crate) fn set_error(&mut self, error: Error) {
        self.error = Some(error);
    }

    pub(crate) fn clean_error(&mut self) {
        self.error = None;
    }
}

/// A reference to an actor: the only way to interact with it from outside.
pub struct ActorRef<A>
where
    A: Actor + Handler<A>,
{
    path: ActorPath,
    sender: MailboxHandle<A>,
    event_receiver: EventReceiver<<A as Actor>::Event>,
    stop_sender: StopSender,
}

impl<A> ActorRef<A>
where
    A: Actor + Handler<A>,
{
    pub(crate) fn new(
        path: ActorPath,
        sender: MailboxHandle<A>,
        stop_sender: StopSender,
        event_receiver: EventReceiver<<A as Actor>::Event>,
    ) -> Self {
        Self {
            path,
            sender,
            stop_sender,
            event_receiver,
        }
    }

    /// Sends a message without waiting for a response.
    pub async fn tell(&self, message: A::Message) -> Result<(), Error> {
        self.sender.tell(self.path(), message).await
    }

    /// Sends a message and waits for the actor's response.
    pub async fn ask(&self, message: A::Message) -> Result<A::Response, Error> {
        self.sender.ask(self.path(), message).await
    }

    /// Stops the actor and waits for the shutdown to complete.
    pub async fn ask_stop(&self, reason: StopReason) -> Result<(), Error> {
        debug!("Stopping actor {} ({}).", &self.path, reason);
        let (done_sender, done_receiver) = oneshot::channel();
        if self
            .stop_sender
            .send(StopSignal::new(reason, None, Some(done_sender)))
            .await
            .is_err()
        {
            // Already stopped.
            return Ok(());
        }
        done_receiver
            .await
            .map_err(|error| Error::Send(error.to_string()))
    }

    /// Stops the actor without waiting.
    pub async fn tell_stop(&self, reason: StopReason) {
        debug!("Stopping actor {} ({}).", &self.path, reason);
        let _ = self
            .stop_sender
            .send(StopSignal::new(reason, None, None))
            .await;
    }

    /// The path of the referenced actor.
    pub fn path(&self) -> ActorPath {
        self.path.clone()
    }

    /// True if the actor's mailbox is closed.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Subscribes to the actor's event stream.
    pub fn subscribe(&self) -> EventReceiver<<A as Actor>::Event> {
        self.event_receiver.resubscribe()
    }
}

impl<A> Clone for ActorRef<A>
where
    A: Actor + Handler<A>,
{
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            sender: self.sender.clone(),
            stop_sender: self.stop_sender.clone(),
            event_receiver: self.event_receiver.resubscribe(),
        }
    }
}

impl<A> Debug for ActorRef<A>
where
    A: Actor + Handler<A>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef").field("path", &self.path).finish()
    }
}
