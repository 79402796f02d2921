//! Observer trait for fork tree events.

use hashchain_common::BlockHash;

/// Callback receiver for fork tree events.
///
/// The coordinator implements this trait to queue tree events and turn them
/// into broadcasts and log lines after the insertion returns.
pub trait ForkTreeObserver {
    /// A new block was stored in the tree (not fired for duplicates).
    fn block_inserted(&self, height: u32, hash: &BlockHash);

    /// The inserted block opened a new level and is now the top.
    ///
    /// Always preceded by `block_inserted` for the same block.
    fn top_extended(&self, height: u32, hash: &BlockHash);
}

/// Observer that ignores every event.
pub struct NoOpObserver;

impl ForkTreeObserver for NoOpObserver {
    fn block_inserted(&self, _: u32, _: &BlockHash) {}
    fn top_extended(&self, _: u32, _: &BlockHash) {}
}
