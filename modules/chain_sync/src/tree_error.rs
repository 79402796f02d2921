//! Error types for fork tree operations.

use hashchain_common::BlockHash;

/// Reasons a candidate is refused by
/// [`ForkTree::try_insert`](crate::fork_tree::ForkTree::try_insert).
///
/// Every variant leaves the tree unmodified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForkTreeError {
    /// Genesis is fixed at construction and never inserted.
    #[error("height 0 is reserved for genesis")]
    GenesisInsertion,

    /// No level exists below the candidate, so nothing can anchor it.
    #[error("orphan: no level at parent height {height}")]
    ParentLevelMissing { height: u32 },

    /// The parent level exists but no block in it is a valid parent.
    #[error("orphan: no valid parent {parent_hash} at height {height}")]
    NoValidParent { height: u32, parent_hash: BlockHash },

    /// The candidate's hash is not the digest of its own fields.
    #[error("hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: BlockHash, got: BlockHash },
}

impl ForkTreeError {
    /// True for the rejections that mean "we are missing ancestors".
    pub fn is_orphan(&self) -> bool {
        matches!(
            self,
            ForkTreeError::ParentLevelMissing { .. } | ForkTreeError::NoValidParent { .. }
        )
    }
}
