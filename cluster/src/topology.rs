// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Cluster topology
//!
//! Snapshot of the active nodes per service type, as reported by the external
//! membership service. Node lists are kept sorted so every node derives the same
//! partition assignment from the same snapshot. Snapshots are versioned and
//! distributed through a watch channel: the resolver always reads the latest one
//! and never caches a decision across a topology change.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use tracing::info;

use std::collections::BTreeMap;

/// Role a cluster node plays.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ServiceType {
    /// Core entity processing.
    Core,
    /// Rule engine workers.
    RuleEngine,
    /// Transport front-ends.
    Transport,
}

/// Identifier of one cluster node.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One versioned snapshot of cluster membership.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterTopology {
    /// Active nodes per service type, sorted.
    nodes: BTreeMap<ServiceType, Vec<NodeId>>,
    /// Monotonic snapshot version.
    version: u64,
}

impl ClusterTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Adds a node for a service type, keeping the list sorted and free of
    /// duplicates.
    pub fn add_node(&mut self, service_type: ServiceType, node: NodeId) {
        let nodes = self.nodes.entry(service_type).or_default();
        if let Err(position) = nodes.binary_search(&node) {
            nodes.insert(position, node);
        }
    }

    pub fn remove_node(&mut self, service_type: ServiceType, node: &NodeId) {
        if let Some(nodes) = self.nodes.get_mut(&service_type) {
            nodes.retain(|n| n != node);
        }
    }

    /// Sorted active nodes for a service type. Empty when the service has no
    /// known members.
    pub fn nodes(&self, service_type: ServiceType) -> &[NodeId] {
        self.nodes
            .get(&service_type)
            .map(|nodes| nodes.as_slice())
            .unwrap_or(&[])
    }
}

/// Publisher side of the topology channel, driven by the membership service.
pub struct TopologyPublisher {
    sender: watch::Sender<Option<ClusterTopology>>,
    version: u64,
}

impl TopologyPublisher {
    /// Publishes a new snapshot, stamping it with the next version.
    pub fn publish(&mut self, mut topology: ClusterTopology) {
        self.version += 1;
        topology.version = self.version;
        info!("Publishing cluster topology version {}.", self.version);
        let _ = self.sender.send(Some(topology));
    }

    /// Marks the topology as unknown, e.g. on losing contact with the
    /// membership service. Resolvers fail closed until the next snapshot.
    pub fn invalidate(&mut self) {
        info!("Invalidating cluster topology.");
        let _ = self.sender.send(None);
    }
}

/// Reader side of the topology channel.
#[derive(Clone)]
pub struct TopologyHandle {
    receiver: watch::Receiver<Option<ClusterTopology>>,
}

impl TopologyHandle {
    /// The latest snapshot, or `None` while the topology is unknown.
    pub fn current(&self) -> Option<ClusterTopology> {
        self.receiver.borrow().clone()
    }

    /// Resolves on the next topology change. Callers re-evaluate their
    /// partition assignments afterwards.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.receiver.changed().await
    }
}

/// Creates a topology channel with no snapshot yet.
pub fn topology_channel() -> (TopologyPublisher, TopologyHandle) {
    let (sender, receiver) = watch::channel(None);
    (
        TopologyPublisher { sender, version: 0 },
        TopologyHandle { receiver },
    )
}
