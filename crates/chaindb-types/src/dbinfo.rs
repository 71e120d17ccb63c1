//! Per-sub-database metadata.

use crate::keys::KeyPrefix;
use crate::ser::{read_u16, read_u32, take_array, DbValue, DeserError};
use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use bytes::BufMut;

/// On-disk schema version, packed into the high nibble of value flags.
pub const DB_VERSION: u8 = 1;

/// Node profile: which schema layout the store runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Profile {
    /// Separate headers/blocks/history/txhints files; blocks stored as
    /// single blobs; history and hints only for tracked addresses/txs.
    Full = 0,
    /// Single file; blocks decomposed into block/tx/tx-out rows; complete
    /// hint coverage.
    Super = 1,
}

impl Profile {
    const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Full),
            1 => Some(Self::Super),
            _ => None,
        }
    }
}

/// Pruning policy recorded at open and verified on every reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PruneType {
    /// Keep everything.
    None = 0,
    /// Outer system may summarize and prune history.
    All = 1,
}

impl PruneType {
    const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::None),
            1 => Some(Self::All),
            _ => None,
        }
    }
}

/// Metadata row present once per sub-database, under the DBINFO key.
///
/// Value layout: `magic[4] | flags u16 | top_blk_hgt u32 | top_blk_hash[32]`,
/// where flags pack the db version (bits 15..12), the profile (bits 11..10)
/// and the prune type (bits 9..8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredDbInfo {
    /// Chain magic bytes; must match the caller's on every open.
    pub magic: [u8; 4],
    /// Height of the top applied main-branch block.
    pub top_blk_hgt: u32,
    /// Hash of the top applied main-branch block.
    pub top_blk_hash: BlockHash,
    /// Declared node profile.
    pub profile: Profile,
    /// Declared prune policy.
    pub prune: PruneType,
}

impl StoredDbInfo {
    /// The fixed sentinel key shared by every sub-database.
    pub const fn db_key() -> [u8; 1] {
        [KeyPrefix::DbInfo.as_u8()]
    }

    /// Fresh metadata for a newly created sub-database.
    pub fn seed(magic: [u8; 4], genesis: BlockHash, profile: Profile, prune: PruneType) -> Self {
        Self { magic, top_blk_hgt: 0, top_blk_hash: genesis, profile, prune }
    }

    const fn flags(&self) -> u16 {
        ((DB_VERSION as u16) << 12) | ((self.profile as u16) << 10) | ((self.prune as u16) << 8)
    }
}

impl DbValue for StoredDbInfo {
    fn encoded_size(&self) -> usize {
        4 + 2 + 4 + 32
    }

    fn encode_value_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&self.magic);
        buf.put_u16(self.flags());
        buf.put_u32(self.top_blk_hgt);
        buf.put_slice(self.top_blk_hash.as_byte_array());
    }

    fn decode_value(data: &mut &[u8]) -> Result<Self, DeserError> {
        let magic = take_array::<4>(data, "dbinfo magic")?;
        let flags = read_u16(data, "dbinfo flags")?;
        let top_blk_hgt = read_u32(data, "dbinfo top height")?;
        let hash = take_array::<32>(data, "dbinfo top hash")?;

        let profile = Profile::from_bits(((flags >> 10) & 0x3) as u8).ok_or(
            DeserError::InvalidTag { what: "profile", tag: ((flags >> 10) & 0x3) as u8 },
        )?;
        let prune = PruneType::from_bits(((flags >> 8) & 0x3) as u8).ok_or(
            DeserError::InvalidTag { what: "prune type", tag: ((flags >> 8) & 0x3) as u8 },
        )?;

        Ok(Self {
            magic,
            top_blk_hgt,
            top_blk_hash: BlockHash::from_byte_array(hash),
            profile,
            prune,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dbinfo_roundtrip() {
        let sdbi = StoredDbInfo {
            magic: [0xf9, 0xbe, 0xb4, 0xd9],
            top_blk_hgt: 812_345,
            top_blk_hash: BlockHash::from_byte_array([0xab; 32]),
            profile: Profile::Super,
            prune: PruneType::All,
        };
        let bytes = sdbi.encoded();
        assert_eq!(bytes.len(), sdbi.encoded_size());
        assert_eq!(StoredDbInfo::decode_value_exact(&bytes).unwrap(), sdbi);
    }

    #[test]
    fn dbinfo_flags_carry_version() {
        let sdbi = StoredDbInfo::seed(
            [1, 2, 3, 4],
            BlockHash::from_byte_array([0; 32]),
            Profile::Full,
            PruneType::None,
        );
        let bytes = sdbi.encoded();
        let flags = u16::from_be_bytes([bytes[4], bytes[5]]);
        assert_eq!(flags >> 12, DB_VERSION as u16);
    }
}
