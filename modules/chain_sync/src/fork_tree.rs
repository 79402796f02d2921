//! Fork tree: every known block, grouped into levels by height.
//!
//! Level `h` holds all blocks at height `h`, so competing forks sit side by
//! side in the same level. Level 0 is the fixed genesis block. Blocks are
//! stored by value and linked to their parent through a [`BlockRef`]
//! coordinate; nothing is ever removed, so references stay valid.
//!
//! There is no weight rule here. `top` only records the block that most
//! recently opened a new level; choosing which tip to extend is up to the
//! caller.

use hashchain_common::Block;
use serde::Deserialize;
use tracing::debug;

use crate::tree_block::{BlockRef, TreeBlock};
use crate::tree_error::ForkTreeError;
use crate::tree_observer::{ForkTreeObserver, NoOpObserver};

/// Whether the tree checks a candidate's own hash before accepting it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashPolicy {
    /// Only linkage is checked; a block whose hash is not the digest of its
    /// own fields is accepted if it links to a valid parent.
    #[default]
    Trusted,
    /// Reject candidates whose hash does not match their contents.
    Verify,
}

/// Successful outcome of an insertion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// The block opened a new level and became the top.
    Extended(BlockRef),
    /// The block joined an existing level beside other blocks.
    Forked(BlockRef),
    /// A structurally equal block was already present; nothing changed.
    AlreadyKnown(BlockRef),
}

impl Insertion {
    pub fn block_ref(&self) -> BlockRef {
        match self {
            Insertion::Extended(r) | Insertion::Forked(r) | Insertion::AlreadyKnown(r) => *r,
        }
    }

    /// True if the tree gained a block.
    pub fn is_new(&self) -> bool {
        !matches!(self, Insertion::AlreadyKnown(_))
    }
}

/// Returns true if `levels` has an entry at `height`.
///
/// An empty collection has no levels at all; that case is handled before
/// any arithmetic on the length.
pub fn has_level<T>(levels: &[T], height: u32) -> bool {
    let Some(max_level) = levels.len().checked_sub(1) else {
        return false;
    };
    usize::try_from(height).is_ok_and(|h| h <= max_level)
}

/// Returns true if `candidate` may be a direct child of `parent`.
///
/// The candidate must sit exactly one level above the parent and name the
/// parent's hash as its parent hash. If the producer also supplied the
/// parent block it believes it extends, that block must be structurally
/// equal to `parent`. The candidate's own hash is not checked here.
pub fn is_valid_successor(candidate: &Block, claimed_parent: Option<&Block>, parent: &Block) -> bool {
    let height_valid = parent.height.checked_add(1) == Some(candidate.height);
    let parent_valid = claimed_parent.is_none_or(|claimed| claimed == parent);
    let parent_hash_valid = candidate.parent_hash == parent.hash;

    height_valid && parent_valid && parent_hash_valid
}

/// The fork-choice tree.
///
/// Single-writer: the owning coordinator serialises every call.
pub struct ForkTree {
    /// `levels[h]` holds every known block at height `h`.
    levels: Vec<Vec<TreeBlock>>,
    /// Block that most recently opened a new level.
    top: BlockRef,
    /// Whether candidate hashes are re-derived before insertion.
    hash_policy: HashPolicy,
    /// Callback receiver.
    observer: Box<dyn ForkTreeObserver + Send>,
}

impl Default for ForkTree {
    fn default() -> Self {
        Self::new(HashPolicy::default(), Box::new(NoOpObserver))
    }
}

impl ForkTree {
    /// Create a tree holding only the genesis block.
    pub fn new(hash_policy: HashPolicy, observer: Box<dyn ForkTreeObserver + Send>) -> Self {
        Self {
            levels: vec![vec![TreeBlock::root(Block::genesis())]],
            top: BlockRef::GENESIS,
            hash_policy,
            observer,
        }
    }

    pub fn hash_policy(&self) -> HashPolicy {
        self.hash_policy
    }

    pub fn genesis(&self) -> &Block {
        &self.levels[0][0].block
    }

    /// The block that most recently opened a new level.
    pub fn top(&self) -> &Block {
        &self.levels[self.top.height as usize][self.top.index].block
    }

    pub fn top_ref(&self) -> BlockRef {
        self.top
    }

    /// Index of the highest level.
    pub fn height(&self) -> u32 {
        u32::try_from(self.levels.len().saturating_sub(1)).unwrap_or(u32::MAX)
    }

    /// Total number of blocks, genesis included.
    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if a level exists at `height`.
    pub fn has_level(&self, height: u32) -> bool {
        has_level(&self.levels, height)
    }

    /// All blocks at `height`, in insertion order.
    pub fn level(&self, height: u32) -> Option<&[TreeBlock]> {
        self.levels.get(height as usize).map(Vec::as_slice)
    }

    pub fn get(&self, block_ref: BlockRef) -> Option<&TreeBlock> {
        self.levels.get(block_ref.height as usize)?.get(block_ref.index)
    }

    pub fn block(&self, block_ref: BlockRef) -> Option<&Block> {
        self.get(block_ref).map(|node| &node.block)
    }

    pub fn parent_of(&self, block_ref: BlockRef) -> Option<BlockRef> {
        self.get(block_ref)?.parent
    }

    /// Find the stored block structurally equal to `block`.
    pub fn locate(&self, block: &Block) -> Option<BlockRef> {
        let level = self.level(block.height)?;
        let index = level.iter().position(|node| node.block == *block)?;
        Some(BlockRef::new(block.height, index))
    }

    /// Returns true if a structurally equal block is stored at its height.
    pub fn contains(&self, block: &Block) -> bool {
        self.locate(block).is_some()
    }

    /// Every stored block with its coordinate, level by level.
    pub fn iter(&self) -> impl Iterator<Item = (BlockRef, &TreeBlock)> + '_ {
        self.levels.iter().enumerate().flat_map(|(height, level)| {
            level.iter().enumerate().map(move |(index, node)| {
                (BlockRef::new(height as u32, index), node)
            })
        })
    }

    /// Ancestors of `tip`, nearest first, ending with genesis.
    ///
    /// The tip itself is not included; genesis (or an unknown reference)
    /// yields an empty chain.
    pub fn ancestors_of(&self, tip: BlockRef) -> Vec<Block> {
        let mut chain = Vec::with_capacity(tip.height as usize);
        let mut current = self.parent_of(tip);
        while let Some(block_ref) = current {
            let Some(node) = self.get(block_ref) else {
                break;
            };
            chain.push(node.block.clone());
            current = node.parent;
        }
        chain
    }

    /// Insert `candidate` if it links to a block one level below.
    ///
    /// `claimed_parent` is the parent block the producer believes it extends,
    /// if it has one; network blocks only carry a parent hash.
    ///
    /// The first block in the parent level that validates wins. If no level
    /// exists at the candidate's height a new one is opened and the candidate
    /// becomes the top; otherwise it joins the existing level. A structurally
    /// equal block already in the tree is reported as `AlreadyKnown` without
    /// adding a duplicate. On error the tree is unchanged.
    pub fn try_insert(
        &mut self,
        candidate: &Block,
        claimed_parent: Option<&Block>,
    ) -> Result<Insertion, ForkTreeError> {
        let Some(parent_height) = candidate.height.checked_sub(1) else {
            return Err(ForkTreeError::GenesisInsertion);
        };

        if self.hash_policy == HashPolicy::Verify {
            let expected = candidate.digest();
            if expected != candidate.hash {
                return Err(ForkTreeError::HashMismatch {
                    expected,
                    got: candidate.hash.clone(),
                });
            }
        }

        if let Some(existing) = self.locate(candidate) {
            debug!("Block {} at height {} already known", candidate.hash, candidate.height);
            return Ok(Insertion::AlreadyKnown(existing));
        }

        if !self.has_level(parent_height) {
            return Err(ForkTreeError::ParentLevelMissing {
                height: parent_height,
            });
        }

        let parent_index = self.levels[parent_height as usize]
            .iter()
            .position(|node| is_valid_successor(candidate, claimed_parent, &node.block))
            .ok_or_else(|| ForkTreeError::NoValidParent {
                height: parent_height,
                parent_hash: candidate.parent_hash.clone(),
            })?;
        let parent = BlockRef::new(parent_height, parent_index);
        let node = TreeBlock::new(candidate.clone(), Some(parent));

        let insertion = if self.has_level(candidate.height) {
            let level = &mut self.levels[candidate.height as usize];
            level.push(node);
            Insertion::Forked(BlockRef::new(candidate.height, level.len() - 1))
        } else {
            self.levels.push(vec![node]);
            let block_ref = BlockRef::new(candidate.height, 0);
            self.top = block_ref;
            Insertion::Extended(block_ref)
        };

        self.observer.block_inserted(candidate.height, &candidate.hash);
        if let Insertion::Extended(_) = insertion {
            debug!("New top {} at height {}", candidate.hash, candidate.height);
            self.observer.top_extended(candidate.height, &candidate.hash);
        }

        Ok(insertion)
    }

    /// Insert a block whose parent is known only by hash.
    pub fn insert_if_valid(&mut self, candidate: &Block) -> bool {
        self.try_insert(candidate, None).is_ok()
    }

    /// Insert a block together with the parent block its producer extended.
    pub fn insert_linked(&mut self, candidate: &Block, parent: &Block) -> bool {
        self.try_insert(candidate, Some(parent)).is_ok()
    }
}
