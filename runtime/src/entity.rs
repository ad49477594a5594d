// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Entity identifiers
//!
//! Every routable thing on the platform (tenant, device, rule chain, plugin) is addressed
//! by an `EntityId`: an entity type paired with a UUID. The pair is opaque, cheap to copy
//! and hash, and is the key used by the partition resolver, the actor registry and every
//! per-entity cache.
//!

use serde::{Deserialize, Serialize};

use uuid::Uuid;

use std::fmt;

/// Kind of a routable entity. Closed set: routing and actor creation match on it
/// exhaustively.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum EntityType {
    /// A tenant account owning devices and rule chains.
    Tenant,
    /// A single physical or virtual device.
    Device,
    /// A rule chain processing entity.
    RuleChain,
    /// A tenant-scoped plugin instance.
    Plugin,
}

impl EntityType {
    /// Short lowercase tag used in actor path segments and logs.
    pub fn tag(&self) -> &'static str {
        match self {
            EntityType::Tenant => "tenant",
            EntityType::Device => "device",
            EntityType::RuleChain => "rulechain",
            EntityType::Plugin => "plugin",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Identifier of a routable entity.
///
/// Immutable and hashable; used as actor name, registry key and routing key everywhere.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EntityId {
    /// The kind of entity this identifier refers to.
    pub entity_type: EntityType,
    /// The entity UUID.
    pub id: Uuid,
}

impl EntityId {
    /// Creates an identifier from its parts.
    pub fn new(entity_type: EntityType, id: Uuid) -> Self {
        Self { entity_type, id }
    }

    /// Creates an identifier with a fresh random UUID.
    pub fn random(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            id: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.entity_type, self.id)
    }
}
