// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor paths
//!
//! Hierarchical addresses for actors in the system tree. A path is a sequence of
//! segments (`/user/tenant|<uuid>/device|<uuid>`) reflecting the supervision
//! hierarchy: a tenant actor owns its device actors, which makes ownership and
//! shutdown ordering explicit.
//!

use serde::{Deserialize, Serialize};

use std::{fmt, ops::Div};

/// Hierarchical path identifying an actor within the system tree.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ActorPath {
    segments: Vec<String>,
}

impl ActorPath {
    /// The root path (`/`).
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Last segment of the path, or the empty string for the root.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// Parent path. The parent of the root is the root.
    pub fn parent(&self) -> ActorPath {
        let mut segments = self.segments.clone();
        segments.pop();
        ActorPath { segments }
    }

    /// True if `self` is a direct child of `other`.
    pub fn is_child_of(&self, other: &ActorPath) -> bool {
        !self.segments.is_empty() && self.parent() == *other
    }

    /// True if `other` is a prefix of `self` (any depth).
    pub fn is_descendant_of(&self, other: &ActorPath) -> bool {
        self.segments.len() > other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }

    /// Number of segments in the path.
    pub fn level(&self) -> usize {
        self.segments.len()
    }
}

impl From<&str> for ActorPath {
    fn from(value: &str) -> Self {
        ActorPath {
            segments: value
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }
}

/// Appends a child segment: `ActorPath::from("/user") / "tenant|..."`.
impl Div<&str> for ActorPath {
    type Output = ActorPath;

    fn div(self, rhs: &str) -> ActorPath {
        let mut segments = self.segments;
        segments.push(rhs.to_owned());
        ActorPath { segments }
    }
}

impl fmt::Display for ActorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_path_parse_and_display() {
        let path = ActorPath::from("/user/tenant-a/device-1");
        assert_eq!(path.to_string(), "/user/tenant-a/device-1");
        assert_eq!(path.name(), "device-1");
        assert_eq!(path.level(), 3);
    }

    #[test]
    fn test_path_parent_child() {
        let parent = ActorPath::from("/user/tenant-a");
        let child = parent.clone() / "device-1";
        assert!(child.is_child_of(&parent));
        assert!(!parent.is_child_of(&child));
        assert_eq!(child.parent(), parent);
        assert!(child.is_descendant_of(&ActorPath::from("/user")));
    }

    #[test]
    fn test_root_parent_is_root() {
        let root = ActorPath::root();
        assert_eq!(root.parent(), root);
        assert_eq!(root.name(), "");
    }
}
