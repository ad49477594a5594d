// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Device-layer errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// A rate limit definition string could not be parsed.
    #[error("Invalid rate limit `{0}`: {1}")]
    InvalidRateLimit(String, String),
}

impl From<Error> for runtime::Error {
    fn from(error: Error) -> Self {
        runtime::Error::Functional(error.to_string())
    }
}
