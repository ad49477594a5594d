// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Typed actor mailboxes.
//!
//! Messages are boxed behind a small handler trait so that tell (fire-and-forget) and
//! ask (request-response) traffic share one queue, preserving per-actor ordering.

use crate::{
    ActorPath, Error,
    actor::{Actor, ActorContext, Handler},
};

use async_trait::async_trait;

use tokio::sync::{mpsc, oneshot};

use tracing::{debug, error};

use std::marker::PhantomData;

/// Message handler trait for processing actor messages. Abstracts over whether the
/// message expects a response, so the runner can process both uniformly.
#[async_trait]
pub trait MessageHandler<A: Actor>: Send + Sync {
    async fn handle(&mut self, actor: &mut A, ctx: &mut ActorContext<A>);
}

/// Internal wrapper carrying the message, the sender's path and an optional response
/// channel for the ask pattern.
struct ActorMessage<A>
where
    A: Actor + Handler<A>,
{
    message: A::Message,
    sender: ActorPath,
    /// `Some` for ask, `None` for tell.
    rsvp: Option<oneshot::Sender<Result<A::Response, Error>>>,
    _phantom_actor: PhantomData<A>,
}

impl<A> ActorMessage<A>
where
    A: Actor + Handler<A>,
{
    fn new(
        message: A::Message,
        sender: ActorPath,
        rsvp: Option<oneshot::Sender<Result<A::Response, Error>>>,
    ) -> Self {
        Self {
            message,
            sender,
            rsvp,
            _phantom_actor: PhantomData,
        }
    }
}

#[async_trait]
impl<A> MessageHandler<A> for ActorMessage<A>
where
    A: Actor + Handler<A>,
{
    async fn handle(&mut self, actor: &mut A, ctx: &mut ActorContext<A>) {
        let result = actor
            .handle_message(self.sender.clone(), self.message.clone(), ctx)
            .await;

        if let Some(rsvp) = self.rsvp.take() {
            rsvp.send(result).unwrap_or_else(|_failed| {
                error!("Failed to send back response!");
            })
        }
    }
}

/// Boxed message handler for type-erased message handling.
pub type BoxedMessageHandler<A> = Box<dyn MessageHandler<A>>;

/// Receiver side of an actor's mailbox, consumed by the runner loop.
pub type MailboxReceiver<A> = mpsc::UnboundedReceiver<BoxedMessageHandler<A>>;

/// Sender side of an actor's mailbox.
pub type MailboxSender<A> = mpsc::UnboundedSender<BoxedMessageHandler<A>>;

/// Complete mailbox tuple, split during actor creation.
pub type Mailbox<A> = (MailboxSender<A>, MailboxReceiver<A>);

/// Creates a new unbounded mailbox. Sends never block; backpressure is handled at the
/// queue-transport layer above, not inside the actor runtime.
pub fn mailbox<A>() -> Mailbox<A> {
    mpsc::unbounded_channel()
}

/// Handle for sending typed messages into an actor's mailbox.
pub struct MailboxHandle<A> {
    sender: MailboxSender<A>,
}

impl<A> MailboxHandle<A>
where
    A: Actor + Handler<A>,
{
    pub(crate) fn new(sender: MailboxSender<A>) -> Self {
        debug!("Creating new mailbox handle.");
        Self { sender }
    }

    /// Fire-and-forget send.
    pub(crate) async fn tell(
        &self,
        sender: ActorPath,
        message: A::Message,
    ) -> Result<(), Error> {
        let msg = ActorMessage::new(message, sender, None);
        if let Err(error) = self.sender.send(Box::new(msg)) {
            debug!("Failed to tell message! {}", error.to_string());
            Err(Error::Send(error.to_string()))
        } else {
            Ok(())
        }
    }

    /// Request-response send: waits for the handler's result.
    pub(crate) async fn ask(
        &self,
        sender: ActorPath,
        message: A::Message,
    ) -> Result<A::Response, Error> {
        let (response_sender, response_receiver) = oneshot::channel();
        let msg = ActorMessage::new(message, sender, Some(response_sender));
        if let Err(error) = self.sender.send(Box::new(msg)) {
            error!("Failed to ask message! {}", error.to_string());
            Err(Error::Send(error.to_string()))
        } else {
            response_receiver
                .await
                .map_err(|error| Error::Send(error.to_string()))?
        }
    }

    /// Waits until every sender is dropped.
    pub async fn close(&self) {
        self.sender.closed().await;
    }

    /// True if the mailbox can no longer receive messages.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<A> Clone for MailboxHandle<A> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
