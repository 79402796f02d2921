//! Chain reconciliation against a peer's view of the chain.
//!
//! Answers "what is the chain behind this tip" for peers that ask us, and
//! works out which blocks of a peer's chain we are missing so they can be
//! replayed through the normal ingestion path.

use anyhow::{Context, Result};
use hashchain_common::{Block, BlockEnvelope, SyncEvent};
use tokio::sync::mpsc;
use tracing::debug;

use crate::fork_tree::ForkTree;

/// Outcome of comparing a newest-first chain with the local tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainDiff {
    /// These blocks (newest first) come before the first block we know.
    Missing(Vec<Block>),
    /// The newest block of the chain is already known.
    InSync,
    /// Not a single block of the chain is known.
    NoCommonAncestor,
}

impl ChainDiff {
    /// Blocks to replay, oldest first so parents precede children.
    pub fn into_replay_order(self) -> Vec<Block> {
        match self {
            ChainDiff::Missing(mut blocks) => {
                blocks.reverse();
                blocks
            }
            ChainDiff::InSync | ChainDiff::NoCommonAncestor => Vec::new(),
        }
    }
}

/// Ancestors of the stored block structurally equal to `tip`, nearest first.
///
/// Empty if `tip` is not in the tree or is genesis.
pub fn locate_and_trace(tree: &ForkTree, tip: &Block) -> Vec<Block> {
    match tree.locate(tip) {
        Some(block_ref) => tree.ancestors_of(block_ref),
        None => Vec::new(),
    }
}

/// Compare a newest-first chain with the tree.
///
/// The first block already present in the tree is the common ancestor;
/// everything in front of it is missing.
pub fn diff_chain(tree: &ForkTree, chain: &[Block]) -> ChainDiff {
    match chain.iter().position(|block| tree.contains(block)) {
        Some(0) => ChainDiff::InSync,
        Some(known) => ChainDiff::Missing(chain[..known].to_vec()),
        None => ChainDiff::NoCommonAncestor,
    }
}

/// Blocks of a newest-first chain that come before the first known block.
///
/// Empty both when the chain is already in sync and when nothing in it is
/// known; use [`diff_chain`] to tell those apart.
pub fn find_missing_prefix(tree: &ForkTree, chain: &[Block]) -> Vec<Block> {
    match diff_chain(tree, chain) {
        ChainDiff::Missing(blocks) => blocks,
        ChainDiff::InSync | ChainDiff::NoCommonAncestor => Vec::new(),
    }
}

/// Feed blocks back into the coordinator's inbound queue in the given order.
///
/// Replayed blocks carry no sender. Fails only if the coordinator is gone.
pub async fn resubmit_missing(blocks: Vec<Block>, sink: &mpsc::Sender<SyncEvent>) -> Result<()> {
    let count = blocks.len();
    for block in blocks {
        sink.send(SyncEvent::BlockReceived(BlockEnvelope::local(block)))
            .await
            .context("chain sync coordinator has shut down")?;
    }
    debug!("Resubmitted {count} blocks");
    Ok(())
}
