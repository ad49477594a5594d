// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Queue messages
//!
//! The unit carried by the queue transport: an opaque payload with a unique id,
//! a routing key (the entity the message concerns, used for partitioning) and a
//! small set of byte-valued headers for metadata such as request correlation.

use crate::Error;

use runtime::EntityId;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::collections::HashMap;

/// One message on a queue topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMsg {
    /// Unique message id. Replayed messages get a fresh id.
    pub id: Uuid,
    /// Routing key: the entity this message concerns. Partition assignment and
    /// per-entity ordering are derived from it.
    pub key: EntityId,
    /// Byte-valued metadata headers.
    pub headers: HashMap<String, Vec<u8>>,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl QueueMsg {
    pub fn new(key: EntityId, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            headers: HashMap::new(),
            payload,
        }
    }

    /// Adds a header, replacing any previous value for the same name.
    pub fn with_header(mut self, name: &str, value: Vec<u8>) -> Self {
        self.headers.insert(name.to_owned(), value);
        self
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers.get(name).map(|v| v.as_slice())
    }

    /// Serializes the message for byte-oriented backends.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserializes a message produced by [`QueueMsg::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        bincode::deserialize(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use runtime::EntityType;

    #[test]
    fn test_encode_decode() {
        let key = EntityId::new(EntityType::Device, Uuid::new_v4());
        let msg = QueueMsg::new(key, b"telemetry".to_vec())
            .with_header("origin", b"mqtt".to_vec());
        let bytes = msg.encode().unwrap();
        let decoded = QueueMsg::decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
        assert_eq!(decoded.header("origin"), Some(&b"mqtt"[..]));
    }
}
