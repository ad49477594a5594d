// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!

use crate::ActorPath;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the actor runtime.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// An error occurred while sending a message to an actor.
    #[error("An error occurred while sending a message to actor: {0}.")]
    Send(String),
    /// An error occurred while receiving a response from an actor.
    #[error("An error occurred while receiving a response from actor {0}: {1}.")]
    Receive(ActorPath, String),
    /// Another actor is already registered under the same path.
    #[error("Actor {0} already exists.")]
    Exists(ActorPath),
    /// The actor failed to initialize.
    #[error("Actor failed to start: {0}.")]
    Start(String),
    /// An error occurred while stopping an actor.
    #[error("An error occurred while stopping an actor.")]
    Stop,
    /// An error occurred while publishing an event.
    #[error("An error occurred while sending an event to the event bus: {0}.")]
    SendEvent(String),
    /// An operation did not complete within its time bound.
    #[error("Operation timed out after {0} ms.")]
    Timeout(u64),
    /// The entity is not owned by this node's partition.
    #[error("Entity {0} is not owned by this node.")]
    NotOwned(String),
    /// A paged entity fetch failed during registry warm-up.
    #[error("Entity fetch failed: {0}.")]
    Fetch(String),
    /// Error that does not compromise the operation of the system.
    #[error("Error: {0}")]
    Functional(String),
}
