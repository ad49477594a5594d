// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Partition resolver
//!
//! Decides whether this node currently owns an entity: the entity UUID is
//! reduced modulo the sorted node list of the service type, and the node at
//! that index is the owner. Deterministic: every node holding the same topology
//! snapshot computes the same owner, which is what keeps an entity's actor on
//! exactly one node at a time (subject to the rebalancing window).
//!
//! Fails closed: while the topology is unknown, or this node is not a member
//! of the service's node list, every ownership check answers `false`. A node
//! doing no work is recoverable; two nodes owning the same entity is not.

use crate::topology::{NodeId, ServiceType, TopologyHandle};

use runtime::EntityId;

use tracing::debug;

/// Per-node partition resolver.
#[derive(Clone)]
pub struct PartitionResolver {
    /// This node's identity.
    node: NodeId,
    /// Live view of cluster membership.
    topology: TopologyHandle,
}

impl PartitionResolver {
    pub fn new(node: NodeId, topology: TopologyHandle) -> Self {
        Self { node, topology }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// A handle on the topology this resolver reads, for callers that need to
    /// observe membership changes themselves.
    pub fn topology(&self) -> TopologyHandle {
        self.topology.clone()
    }

    /// True when this node owns `entity` for `service_type` under the current
    /// topology snapshot. Must be re-checked after every topology change;
    /// callers never cache the answer across one.
    pub fn is_my_partition(
        &self,
        service_type: ServiceType,
        entity: &EntityId,
    ) -> bool {
        match self.owner(service_type, entity) {
            Some(owner) => owner == self.node,
            None => {
                debug!(
                    "Topology unknown, failing closed for entity {}.",
                    entity
                );
                false
            }
        }
    }

    /// The node owning `entity` for `service_type`, or `None` while the
    /// topology is unknown or the service has no members.
    pub fn owner(
        &self,
        service_type: ServiceType,
        entity: &EntityId,
    ) -> Option<NodeId> {
        let topology = self.topology.current()?;
        let nodes = topology.nodes(service_type);
        if nodes.is_empty() {
            return None;
        }
        // The UUID is already uniformly distributed; a plain modulus keeps the
        // assignment identical on every node without a seeded hasher.
        let index = (entity.id.as_u128() % nodes.len() as u128) as usize;
        Some(nodes[index].clone())
    }
}
