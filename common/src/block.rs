//! Hash-chained block record.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::hash::BlockHash;

/// Payload carried by the genesis block.
pub const GENESIS_PAYLOAD: &str = "Genesis";

/// One proposed unit of the ledger.
///
/// Equality is structural: two blocks are equal when height, parent hash,
/// payload and hash all match, regardless of where either instance came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    /// Distance from genesis; genesis is 0.
    pub height: u32,
    /// Hash of the claimed parent.
    pub parent_hash: BlockHash,
    /// Opaque content.
    pub payload: String,
    /// Digest over (height, payload, parent_hash); empty until computed.
    #[serde(default)]
    pub hash: BlockHash,
}

/// Errors raised when constructing blocks from untrusted input.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    /// Input is not a well-formed block document (bad JSON, negative or
    /// oversized height, non-hex hash).
    #[error("malformed block: {0}")]
    Json(#[from] serde_json::Error),
}

impl Block {
    /// Create a block with no hash. Call [`Block::compute_hash`] before
    /// submitting it anywhere.
    pub fn new(height: u32, parent_hash: BlockHash, payload: impl Into<String>) -> Self {
        Self {
            height,
            parent_hash,
            payload: payload.into(),
            hash: BlockHash::default(),
        }
    }

    /// The fixed genesis block: height 0, sentinel parent hash and hash.
    pub fn genesis() -> Self {
        Self {
            height: 0,
            parent_hash: BlockHash::genesis_sentinel(),
            payload: GENESIS_PAYLOAD.to_string(),
            hash: BlockHash::genesis_sentinel(),
        }
    }

    /// Create an unhashed child of `parent` carrying `payload`.
    ///
    /// Returns `None` if the parent is at the maximum representable height.
    pub fn child_of(parent: &Block, payload: impl Into<String>) -> Option<Self> {
        let height = parent.height.checked_add(1)?;
        Some(Self::new(height, parent.hash.clone(), payload))
    }

    /// SHA-256 over `LE32(height) ‖ payload ‖ parent_hash`.
    ///
    /// This byte layout is shared with every other node on the network and
    /// must not change.
    pub fn digest(&self) -> BlockHash {
        let mut hasher = Sha256::new();
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.payload.as_bytes());
        hasher.update(self.parent_hash.as_ref());
        let digest: [u8; 32] = hasher.finalize().into();
        BlockHash::from(digest)
    }

    /// Compute the digest and store it as this block's hash.
    pub fn compute_hash(&mut self) -> &BlockHash {
        self.hash = self.digest();
        &self.hash
    }

    /// Builder form of [`Block::compute_hash`].
    pub fn with_hash(mut self) -> Self {
        self.compute_hash();
        self
    }

    /// True if the stored hash is the digest of this block's own fields.
    pub fn is_self_consistent(&self) -> bool {
        self.hash == self.digest()
    }

    pub fn is_genesis(&self) -> bool {
        *self == Self::genesis()
    }

    /// Decode a single block from JSON.
    pub fn decode_json(bytes: &[u8]) -> Result<Self, BlockError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode a JSON array of blocks, or a single block as a one-element list.
    pub fn decode_json_list(bytes: &[u8]) -> Result<Vec<Self>, BlockError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let blocks = if value.is_array() {
            serde_json::from_value(value)?
        } else {
            vec![serde_json::from_value(value)?]
        };
        Ok(blocks)
    }
}

/// Free-function form of [`Block::compute_hash`], for producers.
pub fn compute_hash(block: &mut Block) -> BlockHash {
    block.compute_hash().clone()
}
