//! Stored headers and the per-height duplicate lists.

use crate::keys::{BlkDataKey, HgtX, KeyPrefix};
use crate::ser::{read_u32, read_u8, take, take_array, DbValue, DeserError};
use crate::txdata::StoredTx;
use bitcoin::block::Header;
use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use bytes::BufMut;
use std::collections::BTreeMap;

use crate::dbinfo::DB_VERSION;

/// Serialized size of a bare Bitcoin block header.
pub(crate) const HEADER_SIZE: usize = 80;

/// Sentinel for a header whose duplicate-id has not been assigned yet.
pub(crate) const DUP_UNASSIGNED: u8 = u8::MAX;

/// A block header with its placement metadata, and (when working with the
/// decomposed SUPER layout) the txs that make up the block body.
///
/// Two value layouts exist:
///
/// - HEADERS, keyed by `HEADHASH | hash`:
///   `raw_header[80] | hgtx[4] | num_bytes u32 | flags u8`
///   (flags bit 0 = main-branch, bit 1 = body-applied);
/// - BLKDATA, keyed by the 5-byte block-data key (SUPER only):
///   `flags u16 | raw_header[80] | num_tx u32 | num_bytes u32`
///   (flags bits 15..12 = db version, bit 1 = main-branch, bit 0 =
///   body-applied).
///
/// The tx map is an in-memory staging area for body writes; it is never
/// serialized with the header (txs live at their own keys).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredHeader {
    /// The parsed 80-byte header.
    pub header: Header,
    /// Block height claimed by the chain organizer.
    pub height: u32,
    /// Duplicate-id at that height; assigned by `put_bare_header`.
    pub dup: u8,
    /// Whether this header is on the active chain.
    pub main_branch: bool,
    /// Whether the block body has been applied to the store.
    pub body_applied: bool,
    /// Size of the full block in bytes.
    pub num_bytes: u32,
    /// Number of txs in the block body.
    pub num_tx: u32,
    /// Staged block body, keyed by tx index.
    pub tx_map: BTreeMap<u16, StoredTx>,
}

impl StoredHeader {
    /// Wrap a parsed header at a known height. The duplicate-id starts
    /// unassigned.
    pub const fn new(header: Header, height: u32) -> Self {
        Self {
            header,
            height,
            dup: DUP_UNASSIGNED,
            main_branch: false,
            body_applied: false,
            num_bytes: 0,
            num_tx: 0,
            tx_map: BTreeMap::new(),
        }
    }

    /// The header hash.
    pub fn hash(&self) -> BlockHash {
        self.header.block_hash()
    }

    /// Whether the duplicate-id has been assigned.
    pub const fn has_dup(&self) -> bool {
        self.dup != DUP_UNASSIGNED
    }

    /// The packed (height, dup) pair.
    pub const fn hgtx(&self) -> HgtX {
        HgtX::new(self.height, self.dup)
    }

    /// Record the key placement determined during a put.
    pub fn set_key_data(&mut self, height: u32, dup: u8) {
        self.height = height;
        self.dup = dup;
    }

    /// The HEADERS key: `HEADHASH | hash`.
    pub fn db_key(&self) -> Vec<u8> {
        KeyPrefix::HeadHash.key(self.hash().as_byte_array())
    }

    /// The 5-byte block-data key for this header's block.
    pub const fn blk_data_key(&self) -> BlkDataKey {
        BlkDataKey::block(self.height, self.dup)
    }

    /// Serialize the HEADERS-database value.
    pub fn encode_headers_value(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + 4 + 4 + 1);
        buf.put_slice(&serialize(&self.header));
        buf.put_slice(&self.hgtx().to_bytes());
        buf.put_u32(self.num_bytes);
        buf.put_u8(self.main_branch as u8 | (self.body_applied as u8) << 1);
        buf
    }

    /// Decode a HEADERS-database value.
    pub fn decode_headers_value(data: &mut &[u8]) -> Result<Self, DeserError> {
        let raw = take(data, HEADER_SIZE, "stored header")?;
        let header: Header = deserialize(raw)?;
        let hgtx = HgtX::from_bytes(take_array(data, "stored header hgtx")?);
        let num_bytes = read_u32(data, "stored header size")?;
        let flags = read_u8(data, "stored header flags")?;

        Ok(Self {
            header,
            height: hgtx.height(),
            dup: hgtx.dup(),
            main_branch: flags & 0x01 != 0,
            body_applied: flags & 0x02 != 0,
            num_bytes,
            num_tx: 0,
            tx_map: BTreeMap::new(),
        })
    }

    /// Serialize the BLKDATA value written at the 5-byte block key (SUPER).
    pub fn encode_blkdata_value(&self) -> Vec<u8> {
        let flags = ((DB_VERSION as u16) << 12)
            | (self.main_branch as u16) << 1
            | self.body_applied as u16;
        let mut buf = Vec::with_capacity(2 + HEADER_SIZE + 4 + 4);
        buf.put_u16(flags);
        buf.put_slice(&serialize(&self.header));
        buf.put_u32(self.num_tx);
        buf.put_u32(self.num_bytes);
        buf
    }

    /// Decode a BLKDATA block value (SUPER). Height and dup come from the
    /// key and are filled in by the caller.
    pub fn decode_blkdata_value(data: &mut &[u8]) -> Result<Self, DeserError> {
        let flags = crate::ser::read_u16(data, "block value flags")?;
        let raw = take(data, HEADER_SIZE, "block value header")?;
        let header: Header = deserialize(raw)?;
        let num_tx = read_u32(data, "block value tx count")?;
        let num_bytes = read_u32(data, "block value size")?;

        Ok(Self {
            header,
            height: 0,
            dup: DUP_UNASSIGNED,
            main_branch: flags & 0x02 != 0,
            body_applied: flags & 0x01 != 0,
            num_bytes,
            num_tx,
            tx_map: BTreeMap::new(),
        })
    }
}

/// The ordered list of headers claiming one height, with the preferred
/// (main-branch) entry marked.
///
/// Value layout: a sequence of 33-byte `(dup_with_flag, hash)` entries in
/// insertion order. Bit 0x80 of the dup byte marks the preferred entry;
/// at most one entry carries it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredHeadHgtList {
    /// The height all entries share.
    pub height: u32,
    /// `(dup, hash)` pairs in insertion order.
    pub dup_and_hash_list: Vec<(u8, BlockHash)>,
    /// The dup currently designated main-branch, if any.
    pub preferred_dup: Option<u8>,
}

impl StoredHeadHgtList {
    /// An empty list for a height.
    pub const fn empty(height: u32) -> Self {
        Self { height, dup_and_hash_list: Vec::new(), preferred_dup: None }
    }

    /// The HEADHGT key for `height`.
    pub fn db_key_for(height: u32) -> Vec<u8> {
        KeyPrefix::HeadHgt.key(&height.to_be_bytes())
    }

    /// The HEADHGT key for this list.
    pub fn db_key(&self) -> Vec<u8> {
        Self::db_key_for(self.height)
    }

    /// Append an entry.
    pub fn add_dup_and_hash(&mut self, dup: u8, hash: BlockHash) {
        self.dup_and_hash_list.push((dup, hash));
    }

    /// Designate `dup` as the preferred entry.
    pub fn set_preferred_dup(&mut self, dup: u8) {
        self.preferred_dup = Some(dup);
    }

    /// Whether `dup` appears in the list.
    pub fn contains_dup(&self, dup: u8) -> bool {
        self.dup_and_hash_list.iter().any(|&(d, _)| d == dup)
    }

    /// The highest dup in the list, if any.
    pub fn max_dup(&self) -> Option<u8> {
        self.dup_and_hash_list.iter().map(|&(d, _)| d).max()
    }
}

impl DbValue for StoredHeadHgtList {
    fn encoded_size(&self) -> usize {
        self.dup_and_hash_list.len() * 33
    }

    fn encode_value_to<B: BufMut>(&self, buf: &mut B) {
        for &(dup, hash) in &self.dup_and_hash_list {
            let flag = if self.preferred_dup == Some(dup) { 0x80 } else { 0 };
            buf.put_u8(dup | flag);
            buf.put_slice(hash.as_byte_array());
        }
    }

    fn decode_value(data: &mut &[u8]) -> Result<Self, DeserError> {
        if data.len() % 33 != 0 {
            return Err(DeserError::InvalidLength { what: "head-height list", got: data.len() });
        }

        let mut list = Self::default();
        while !data.is_empty() {
            let tagged = read_u8(data, "head-height entry")?;
            let hash = BlockHash::from_byte_array(take_array(data, "head-height hash")?);
            let dup = tagged & 0x7f;
            if tagged & 0x80 != 0 {
                list.preferred_dup = Some(dup);
            }
            list.dup_and_hash_list.push((dup, hash));
        }
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_header() -> Header {
        // A syntactically valid header; field values are arbitrary.
        deserialize(&[0u8; 80]).unwrap()
    }

    #[test]
    fn headers_value_roundtrip() {
        let mut sbh = StoredHeader::new(test_header(), 500_000);
        sbh.set_key_data(500_000, 2);
        sbh.main_branch = true;
        sbh.num_bytes = 1_234_567;

        let bytes = sbh.encode_headers_value();
        assert_eq!(bytes.len(), 89);

        let decoded = StoredHeader::decode_headers_value(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded.height, 500_000);
        assert_eq!(decoded.dup, 2);
        assert!(decoded.main_branch);
        assert!(!decoded.body_applied);
        assert_eq!(decoded.num_bytes, 1_234_567);
        assert_eq!(decoded.hash(), sbh.hash());
    }

    #[test]
    fn headers_value_keeps_hgtx_at_offset_80() {
        let mut sbh = StoredHeader::new(test_header(), 100);
        sbh.set_key_data(100, 1);
        let bytes = sbh.encode_headers_value();
        let hgtx = HgtX::from_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]);
        assert_eq!(hgtx.height(), 100);
        assert_eq!(hgtx.dup(), 1);
    }

    #[test]
    fn blkdata_value_roundtrip() {
        let mut sbh = StoredHeader::new(test_header(), 10);
        sbh.set_key_data(10, 0);
        sbh.main_branch = true;
        sbh.body_applied = true;
        sbh.num_tx = 42;
        sbh.num_bytes = 9_000;

        let bytes = sbh.encode_blkdata_value();
        let decoded = StoredHeader::decode_blkdata_value(&mut bytes.as_slice()).unwrap();
        assert!(decoded.main_branch);
        assert!(decoded.body_applied);
        assert_eq!(decoded.num_tx, 42);
        assert_eq!(decoded.num_bytes, 9_000);
        assert_eq!(decoded.hash(), sbh.hash());
    }

    #[test]
    fn head_hgt_list_marks_preferred() {
        let mut hhl = StoredHeadHgtList::empty(100);
        hhl.add_dup_and_hash(0, BlockHash::from_byte_array([0xaa; 32]));
        hhl.add_dup_and_hash(1, BlockHash::from_byte_array([0xbb; 32]));
        hhl.set_preferred_dup(1);

        let bytes = hhl.encoded();
        assert_eq!(bytes.len(), 66);
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[33], 1 | 0x80);

        let mut decoded = StoredHeadHgtList::decode_value_exact(&bytes).unwrap();
        decoded.height = 100;
        assert_eq!(decoded, hhl);
    }
}
