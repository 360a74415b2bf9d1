//! Preview restoration after a connection is removed.
//!
//! When a connection goes away its source node may be left without any outgoing line on that
//! branch. Whether a fresh preview line should appear there is a product decision, so it is made
//! by a pluggable policy instead of the removal code.

use crate::model::{Edge, NodeInfo};

pub trait RestorePolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a preview line should be recreated on `source` for the branch of `removed`.
    /// `has_preview` tells whether one already exists there.
    fn should_restore(
        &self,
        removed: &Edge,
        source: &NodeInfo,
        has_preview: bool,
    ) -> bool;
}

/// Restore when the source node is configured, still owns the branch and has no preview for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredNodeRestore;

impl RestorePolicy for ConfiguredNodeRestore {
    fn name(&self) -> &str {
        "configured-node"
    }

    fn should_restore(
        &self,
        removed: &Edge,
        source: &NodeInfo,
        has_preview: bool,
    ) -> bool {
        if has_preview || !removed.is_connection() || !source.configured {
            return false;
        }
        match removed.branch_id() {
            Some(branch) => source.branch(branch).is_some(),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRestore;

impl RestorePolicy for NeverRestore {
    fn name(&self) -> &str {
        "never"
    }

    fn should_restore(
        &self,
        _removed: &Edge,
        _source: &NodeInfo,
        _has_preview: bool,
    ) -> bool {
        false
    }
}
