use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, ops::Deref, str::FromStr};

/// Length of a SHA-256 block digest.
pub const DIGEST_LEN: usize = 32;

/// Content hash of a block.
///
/// Unlike a fixed-size digest this wraps a byte vector: every mined or
/// received block carries a 32-byte SHA-256 digest, but the genesis block
/// uses the one-byte sentinel `[0x00]` for both its own hash and its parent
/// hash, and children of genesis commit to that sentinel in their digest.
///
/// Provides:
/// - Hexadecimal serialization/deserialization
/// - Byte-wise equality and ordering
/// - Display and debug formatting
///
/// # Examples
///
/// ```ignore
/// use hashchain_common::BlockHash;
///
/// let hash: BlockHash = "00".parse().unwrap();
/// assert_eq!(hash, BlockHash::genesis_sentinel());
/// assert_eq!(hash.to_string(), "00");
/// ```
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockHash(Vec<u8>);

impl Serialize for BlockHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl BlockHash {
    /// Creates a block hash from raw bytes.
    #[inline]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The `[0x00]` sentinel used by genesis.
    #[inline]
    pub fn genesis_sentinel() -> Self {
        Self(vec![0])
    }

    /// True if no hash has been computed yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

}

impl From<Vec<u8>> for BlockHash {
    #[inline]
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for BlockHash {
    #[inline]
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl From<[u8; DIGEST_LEN]> for BlockHash {
    #[inline]
    fn from(bytes: [u8; DIGEST_LEN]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl From<BlockHash> for Vec<u8> {
    fn from(hash: BlockHash) -> Self {
        hash.0
    }
}

impl AsRef<[u8]> for BlockHash {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for BlockHash {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq<[u8]> for BlockHash {
    fn eq(&self, other: &[u8]) -> bool {
        self.0.as_slice().eq(other)
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlockHash").field(&hex::encode(&self.0)).finish()
    }
}

impl fmt::Display for BlockHash {
    /// Formats the hash as a lowercase hexadecimal string.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl FromStr for BlockHash {
    type Err = hex::FromHexError;

    /// Parses a hash from a hexadecimal string of any even length.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(hex::decode(s)?))
    }
}
