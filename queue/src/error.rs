// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Errors of the queue transport layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that may occur while producing, consuming or correlating queue messages.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// The consumer is not subscribed.
    #[error("Not subscribed to topic `{0}`")]
    NotSubscribed(String),
    /// A request/response exchange timed out.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),
    /// The response channel closed before a response arrived.
    #[error("Response channel closed")]
    Closed,
    /// A message could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
