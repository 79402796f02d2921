// Hashchain common library - main library exports

pub mod block;
pub mod hash;
pub mod messages;

// Flattened re-exports
pub use self::block::{compute_hash, Block, BlockError, GENESIS_PAYLOAD};
pub use self::hash::BlockHash;
pub use self::messages::{BlockEnvelope, PeerId, SyncEvent, SyncOutput};
