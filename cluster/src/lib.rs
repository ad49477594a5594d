// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Cluster membership and partition assignment
//!
//! Keeps a versioned view of the active nodes per service type and derives from
//! it, deterministically, which node owns which entity. Ownership checks fail
//! closed while the topology is unknown so two nodes never drive the same
//! entity's actor.

pub mod resolver;
pub mod topology;

pub use resolver::PartitionResolver;
pub use topology::{
    ClusterTopology, NodeId, ServiceType, TopologyHandle, TopologyPublisher,
    topology_channel,
};
