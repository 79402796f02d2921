//! Messages exchanged between block producers, the chain sync coordinator
//! and the network layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::block::Block;

/// Opaque identifier of a remote peer, as assigned by the network layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A candidate block tagged with where it came from.
///
/// `sender` is `None` for locally produced blocks and for blocks replayed
/// during chain backfill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEnvelope {
    pub block: Block,
    pub sender: Option<PeerId>,
}

impl BlockEnvelope {
    pub fn new(block: Block, sender: Option<PeerId>) -> Self {
        Self { block, sender }
    }

    /// Envelope for a block with no particular sender.
    pub fn local(block: Block) -> Self {
        Self::new(block, None)
    }
}

/// Inbound events consumed by the chain sync coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A candidate block arrived from a producer or peer.
    BlockReceived(BlockEnvelope),

    /// A peer asked for the chain behind `tip`.
    ChainRequested { peer: PeerId, tip: Block },

    /// A peer answered our request for the chain behind `tip`. `chain` is
    /// ordered newest first and does not include `tip`.
    ChainReceived {
        peer: PeerId,
        tip: Block,
        chain: Vec<Block>,
    },

    /// Stop the coordinator.
    Shutdown,
}

/// Outbound requests the coordinator hands to the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutput {
    /// Relay a newly accepted block to every peer except `except`.
    Broadcast {
        block: Block,
        except: Option<PeerId>,
    },

    /// Ask `peer` for the chain behind `tip`; we could not attach it.
    RequestChain { peer: PeerId, tip: Block },

    /// Answer a chain request. `chain` is ordered newest first.
    SendChain {
        peer: PeerId,
        tip: Block,
        chain: Vec<Block>,
    },
}
