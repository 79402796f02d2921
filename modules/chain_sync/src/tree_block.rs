//! Block representation within the fork tree.

use std::fmt;

use hashchain_common::Block;

/// Arena coordinate of a block inside the fork tree: the level it lives in
/// and its position within that level.
///
/// Blocks are never removed, so a `BlockRef` handed out by a tree stays valid
/// for the lifetime of that tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockRef {
    pub height: u32,
    pub index: usize,
}

impl BlockRef {
    pub const GENESIS: BlockRef = BlockRef {
        height: 0,
        index: 0,
    };

    pub fn new(height: u32, index: usize) -> Self {
        Self { height, index }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.height, self.index)
    }
}

/// A node in the fork tree: the block itself, stored by value, plus the
/// resolved link to its parent.
#[derive(Debug, Clone)]
pub struct TreeBlock {
    /// The block as it was accepted; never mutated afterwards.
    pub block: Block,
    /// Parent coordinate; `None` only for genesis.
    pub parent: Option<BlockRef>,
}

impl TreeBlock {
    pub fn new(block: Block, parent: Option<BlockRef>) -> Self {
        Self { block, parent }
    }

    pub fn root(block: Block) -> Self {
        Self::new(block, None)
    }
}
