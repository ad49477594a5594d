// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor execution engine
//!
//! Each actor runs inside its own `ActorRunner`, a dedicated task driving the
//! lifecycle state machine `Created → Initialized → Running → Stopping → Stopped`
//! (with `Failed` feeding the supervision strategy). The runner owns the actor's
//! mailbox and processes exactly one item at a time, which is what provides the
//! single-writer guarantee per entity: no two messages for one actor ever execute
//! concurrently, while thousands of runners run in parallel on the shared tokio
//! runtime.
//!
//! The main loop is a `select!` over four sources: stop signals, child error
//! notifications, internal actions (events, failures, self-ticks) and the mailbox.
//! Stop reasons are recorded when the signal arrives and delivered synchronously to
//! the actor's `stopped` hook, after pending ticks are cancelled and children are
//! stopped, so a parent can drop its reference the moment a stop confirmation
//! arrives.
//!

use crate::{
    ActorPath, Error,
    actor::{
        Actor, ActorContext, ActorLifecycle, ActorRef, ChildAction, ChildError,
        ChildErrorReceiver, ChildErrorSender, Handler, StopReason, StopSignal,
    },
    mailbox::{MailboxHandle, MailboxReceiver, mailbox},
    supervision::SupervisionStrategy,
    system::SystemRef,
};

use tokio::{
    select,
    sync::{
        broadcast::{self, Sender as EventSender},
        mpsc, oneshot,
    },
};
use tracing::{debug, error, warn};

/// Sender for internal actor actions (events, errors, failures, ticks). Unbounded so
/// internal operations never block the message loop.
pub type InnerSender<A> = mpsc::UnboundedSender<InnerAction<A>>;

/// Receiver for internal actor actions, drained by the runner loop.
pub type InnerReceiver<A> = mpsc::UnboundedReceiver<InnerAction<A>>;

/// Receiver for stop signals.
pub type StopReceiver = mpsc::Receiver<StopSignal>;

/// Sender for stop signals. Bounded: shutdown traffic is rare and must not flood.
pub type StopSender = mpsc::Sender<StopSignal>;

/// Internal actions an actor generates through its context, processed with priority
/// over regular mailbox traffic.
pub enum InnerAction<A: Actor> {
    /// Publish an event to subscribers.
    Event(A::Event),
    /// Report a non-fatal error to the parent.
    Error(Error),
    /// Report a fatal failure requiring a supervision decision.
    Fail(Error),
    /// A scheduled self-tick fired.
    Tick,
}

/// Core execution engine for a single actor.
pub(crate) struct ActorRunner<A: Actor> {
    /// Path of the actor in the system tree.
    path: ActorPath,
    /// The actor instance being executed.
    actor: A,
    /// Current lifecycle state.
    lifecycle: ActorLifecycle,
    /// Mailbox receiver.
    receiver: MailboxReceiver<A>,
    /// Broadcast sender for the actor's events.
    event_sender: EventSender<A::Event>,
    /// Receiver for stop signals.
    stop_receiver: StopReceiver,
    /// Sender handed to children so they can report errors to this actor.
    error_sender: ChildErrorSender,
    /// Channel to this actor's parent, `None` for root actors.
    parent_sender: Option<ChildErrorSender>,
    /// Receiver for child error notifications.
    error_receiver: ChildErrorReceiver,
    /// Sender side of the internal action channel (cloned into the context).
    inner_sender: InnerSender<A>,
    /// Receiver side of the internal action channel.
    inner_receiver: InnerReceiver<A>,
    /// Set once a stop has been accepted; gates non-stop branches of the loop.
    stop_signal: bool,
    /// Reason recorded from the accepted stop signal.
    stop_reason: StopReason,
    /// Cause recorded from the accepted stop signal.
    stop_cause: Option<Error>,
    /// Confirmation channel of the accepted stop signal.
    stop_done: Option<oneshot::Sender<()>>,
    /// Set when the parent answered a fault with `Restart` or `Delegate`.
    restart_requested: bool,
}

impl<A> ActorRunner<A>
where
    A: Actor + Handler<A>,
{
    /// Creates a runner, the external actor reference and the stop channel.
    pub(crate) fn create(
        path: ActorPath,
        actor: A,
        parent_sender: Option<ChildErrorSender>,
    ) -> (Self, ActorRef<A>, StopSender) {
        debug!("Creating new actor runner.");
        let (sender, receiver) = mailbox();
        let (stop_sender, stop_receiver) = mpsc::channel(100);
        let (error_sender, error_receiver) = mpsc::unbounded_channel();
        let (event_sender, event_receiver) = broadcast::channel(10000);
        let (inner_sender, inner_receiver) = mpsc::unbounded_channel();
        let handle = MailboxHandle::new(sender);

        let actor_ref =
            ActorRef::new(path.clone(), handle, stop_sender.clone(), event_receiver);
        let runner = ActorRunner {
            path,
            actor,
            lifecycle: ActorLifecycle::Created,
            receiver,
            stop_receiver,
            event_sender,
            error_sender,
            parent_sender,
            error_receiver,
            inner_sender,
            inner_receiver,
            stop_signal: false,
            stop_reason: StopReason::Stopped,
            stop_cause: None,
            stop_done: None,
            restart_requested: false,
        };
        (runner, actor_ref, stop_sender)
    }

    /// Drives the complete actor lifecycle, from initialization to removal from the
    /// system. The optional `sender` is notified once: `true` when the actor reached
    /// its message loop, `false` when it stopped without ever running.
    pub(crate) async fn init(
        &mut self,
        system: SystemRef,
        stop_sender: StopSender,
        mut sender: Option<oneshot::Sender<bool>>,
    ) {
        debug!("Initializing actor {} runner.", &self.path);

        let mut ctx: ActorContext<A> = ActorContext::new(
            stop_sender,
            self.path.clone(),
            system.clone(),
            self.error_sender.clone(),
            self.inner_sender.clone(),
        );

        let mut retries = 0;
        loop {
            match self.lifecycle {
                ActorLifecycle::Created => {
                    debug!("Actor {} is created.", &self.path);
                    match self.actor.init(&mut ctx).await {
                        Ok(_) => {
                            debug!("Actor {} initialized successfully.", &self.path);
                            self.lifecycle = ActorLifecycle::Initialized;
                        }
                        Err(err) => {
                            error!("Actor {} failed to start: {:?}", &self.path, err);
                            ctx.set_error(err);
                            self.lifecycle = ActorLifecycle::Failed;
                        }
                    }
                }
                ActorLifecycle::Initialized => {
                    debug!("Actor {} is initialized.", &self.path);
                    if let Some(sender) = sender.take() {
                        sender.send(true).unwrap_or_else(|err| {
                            error!("Failed to send start signal: {:?}", err);
                        });
                    }
                    self.lifecycle = ActorLifecycle::Running;
                }
                ActorLifecycle::Running => {
                    debug!("Actor {} is running.", &self.path);
                    self.run(&mut ctx).await;
                    if ctx.error().is_some() {
                        self.lifecycle = ActorLifecycle::Failed;
                    } else {
                        self.lifecycle = ActorLifecycle::Stopping;
                    }
                }
                ActorLifecycle::Failed => {
                    debug!("Actor {} is faulty.", &self.path);
                    if self.parent_sender.is_none() || self.restart_requested {
                        self.restart_requested = false;
                        self.apply_supervision_strategy(
                            A::supervision_strategy(),
                            &mut ctx,
                            &mut retries,
                        )
                        .await;
                    } else {
                        // The parent decided to stop this child.
                        self.stop_cause = ctx.error();
                        self.lifecycle = ActorLifecycle::Stopping;
                    }
                }
                ActorLifecycle::Stopping => {
                    debug!("Actor {} is stopping ({}).", &self.path, self.stop_reason);
                    ctx.cancel_tick();
                    ctx.stop_children(self.stop_reason).await;
                    let cause = self.stop_cause.take().or(ctx.error());
                    self.actor.stopped(&mut ctx, self.stop_reason, cause).await;
                    ctx.remove_actor().await;
                    if let Some(done) = self.stop_done.take() {
                        let _ = done.send(());
                    }
                    self.lifecycle = ActorLifecycle::Stopped;
                }
                ActorLifecycle::Stopped => {
                    debug!("Actor {} is stopped.", &self.path);
                    if let Some(sender) = sender.take() {
                        sender.send(false).unwrap_or_else(|err| {
                            error!("Failed to send start signal: {:?}", err);
                        });
                    }
                    break;
                }
            }
        }
        self.receiver.close();
    }

    /// Main event loop: stop signals, child errors, internal actions, mailbox.
    /// Returns once a stop signal is accepted; cleanup runs in the `Stopping` state.
    async fn run(&mut self, ctx: &mut ActorContext<A>) {
        loop {
            select! {
                stop = self.stop_receiver.recv() => {
                    match stop {
                        Some(signal) => {
                            self.stop_reason = signal.reason;
                            self.stop_cause = signal.cause;
                            self.stop_done = signal.done;
                        }
                        None => {
                            self.stop_reason = StopReason::Shutdown;
                        }
                    }
                    break;
                }
                error = self.error_receiver.recv(), if !self.stop_signal => {
                    if let Some(error) = error {
                        match error {
                            ChildError::Error { error } => {
                                self.actor.on_child_error(error, ctx).await;
                            }
                            ChildError::Fault { error, sender } => {
                                let action =
                                    self.actor.on_child_fault(error, ctx).await;
                                if sender.send(action).is_err() {
                                    error!("Cannot send action to child!");
                                }
                            }
                        }
                    } else {
                        ctx.stop(StopReason::Stopped, None, None).await;
                        self.stop_signal = true;
                    }
                }
                recv = self.inner_receiver.recv(), if !self.stop_signal => {
                    if let Some(action) = recv {
                        self.inner_handle(action, ctx).await;
                    } else {
                        ctx.stop(StopReason::Stopped, None, None).await;
                        self.stop_signal = true;
                    }
                }
                msg = self.receiver.recv(), if !self.stop_signal => {
                    if let Some(mut msg) = msg {
                        msg.handle(&mut self.actor, ctx).await;
                    } else {
                        ctx.stop(StopReason::Stopped, None, None).await;
                        self.stop_signal = true;
                    }
                }
            }
        }
    }

    /// Processes one internal action.
    async fn inner_handle(&mut self, action: InnerAction<A>, ctx: &mut ActorContext<A>) {
        match action {
            InnerAction::Event(event) => {
                match self.event_sender.send(event) {
                    Ok(subscribers) => {
                        debug!("Event sent to {} subscribers.", subscribers);
                    }
                    Err(_err) => {
                        // No live subscribers; the event is simply not observed.
                        debug!("No subscribers for event.");
                    }
                }
            }
            InnerAction::Error(error) => {
                if let Some(parent) = self.parent_sender.as_mut() {
                    parent.send(ChildError::Error { error }).unwrap_or_else(|err| {
                        error!("Failed to send error to parent actor: {:?}", err);
                    });
                }
            }
            InnerAction::Fail(error) => {
                if let Some(parent) = self.parent_sender.as_mut() {
                    let (action_sender, action_receiver) = oneshot::channel();
                    parent
                        .send(ChildError::Fault {
                            error,
                            sender: action_sender,
                        })
                        .unwrap_or_else(|err| {
                            error!("Failed to send fault to parent actor: {:?}", err);
                        });
                    if let Ok(action) = action_receiver.await {
                        match action {
                            ChildAction::Stop => {}
                            ChildAction::Restart | ChildAction::Delegate => {
                                self.restart_requested = true;
                            }
                        }
                    }
                }
                ctx.stop(StopReason::Stopped, ctx.error(), None).await;
                self.stop_signal = true;
            }
            InnerAction::Tick => {
                // Tick errors are confined to the tick boundary: log and keep the
                // schedule alive.
                if let Err(err) = self.actor.on_tick(ctx).await {
                    warn!("Actor {} tick failed: {}", &self.path, err);
                }
            }
        }
    }

    /// Applies the supervision strategy after a failed initialization. On a successful
    /// restart the actor returns to `Running`; otherwise it proceeds to `Stopping`.
    async fn apply_supervision_strategy(
        &mut self,
        strategy: SupervisionStrategy,
        ctx: &mut ActorContext<A>,
        retries: &mut usize,
    ) {
        match strategy {
            SupervisionStrategy::Stop => {
                error!("Actor {} failed to start!", &self.path);
                self.stop_cause = ctx.error();
                self.lifecycle = ActorLifecycle::Stopping;
            }
            SupervisionStrategy::Retry(mut retry_strategy) => {
                debug!("Restarting actor with retry strategy: {:?}", &retry_strategy);
                if *retries < retry_strategy.max_retries() {
                    debug!("retries: {}", &retries);
                    if let Some(duration) = retry_strategy.next_backoff() {
                        debug!("Backoff for {:?}", &duration);
                        tokio::time::sleep(duration).await;
                    }
                    *retries += 1;
                    let error = ctx.error();
                    match ctx.restart(&mut self.actor, error.as_ref()).await {
                        Ok(_) => {
                            ctx.clean_error();
                            self.stop_signal = false;
                            self.lifecycle = ActorLifecycle::Running;
                            *retries = 0;
                        }
                        Err(err) => {
                            ctx.set_error(err);
                            self.lifecycle = ActorLifecycle::Failed;
                        }
                    }
                } else {
                    self.stop_cause = ctx.error();
                    self.lifecycle = ActorLifecycle::Stopping;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::{
        Error,
        actor::{Actor, ActorContext, Event, Handler, Message},
        supervision::{FixedIntervalStrategy, SupervisionStrategy},
        system::SystemRef,
    };
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    use std::time::Duration;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TestMessage;

    impl Message for TestMessage {}

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TestEvent;

    impl Event for TestEvent {}

    #[derive(Debug, Clone)]
    pub struct TestActor {
        failing: bool,
    }

    #[async_trait]
    impl Actor for TestActor {
        type Message = TestMessage;
        type Response = ();
        type Event = TestEvent;

        fn supervision_strategy() -> SupervisionStrategy {
            SupervisionStrategy::Retry(Box::new(FixedIntervalStrategy::new(
                3,
                Duration::from_millis(50),
            )))
        }

        async fn init(&mut self, _ctx: &mut ActorContext<Self>) -> Result<(), Error> {
            if self.failing {
                Err(Error::Start("init failed".to_owned()))
            } else {
                Ok(())
            }
        }

        async fn on_restart(
            &mut self,
            _ctx: &mut ActorContext<Self>,
            _error: Option<&Error>,
        ) -> Result<(), Error> {
            // Recover on the first restart attempt.
            self.failing = false;
            Ok(())
        }
    }

    #[async_trait]
    impl Handler<TestActor> for TestActor {
        async fn handle_message(
            &mut self,
            _sender: ActorPath,
            _msg: TestMessage,
            ctx: &mut ActorContext<Self>,
        ) -> Result<(), Error> {
            ctx.stop(StopReason::Stopped, None, None).await;
            Ok(())
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_runner_lifecycle_and_init_retry() {
        let (event_sender, _) = mpsc::channel(100);
        let system = SystemRef::new(event_sender, CancellationToken::new());

        // A healthy actor runs and stops.
        let actor = TestActor { failing: false };
        let (mut runner, actor_ref, stop_sender) =
            ActorRunner::create(ActorPath::from("/user/test"), actor, None);
        let inner_system = system.clone();
        tokio::spawn(async move {
            runner.init(inner_system, stop_sender, None).await;
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        actor_ref.tell(TestMessage).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(logs_contain("Actor /user/test is stopped"));
        assert!(
            system
                .get_actor::<TestActor>(&ActorPath::from("/user/test"))
                .await
                .is_none()
        );

        // A failing root actor is restarted by its supervision strategy.
        let actor = TestActor { failing: true };
        let (mut runner, actor_ref, stop_sender) =
            ActorRunner::create(ActorPath::from("/user/test"), actor, None);
        let inner_system = system.clone();
        tokio::spawn(async move {
            runner.init(inner_system, stop_sender, None).await;
        });
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(logs_contain("Actor /user/test failed to start"));
        assert!(logs_contain("Actor /user/test is faulty"));
        assert!(logs_contain("Restarting actor with retry strategy"));
        assert!(logs_contain("Actor /user/test is running"));

        actor_ref.tell(TestMessage).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(logs_contain("Actor /user/test is stopped"));
    }
}
