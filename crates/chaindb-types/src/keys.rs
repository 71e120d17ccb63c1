//! Composite key codec.
//!
//! Every key in every sub-database starts with a 1-byte [`KeyPrefix`] tag.
//! Block data (blocks, txs, tx-outs) is addressed by [`BlkDataKey`]: a
//! 4-byte packed [`HgtX`], optionally followed by a 2-byte tx index and a
//! 2-byte tx-out index, all big-endian so that ordered iteration walks
//! blocks in height order and txs/tx-outs in index order within a block.
//!
//! Keys come in two forms: *prefixed* (tag included, 5/7/9 bytes) for use
//! as database keys, and *bare* (tag omitted, 4/6/8 bytes) for embedding
//! inside other values (hint lists, spentness references). Decoding infers
//! the form from the parity of the length: odd means prefixed.

use crate::ser::DeserError;

/// Record family tag, the first byte of every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum KeyPrefix {
    /// Per-sub-database metadata row.
    DbInfo = 0x00,
    /// Header by hash.
    HeadHash = 0x01,
    /// Per-height list of (dup, hash) entries.
    HeadHgt = 0x02,
    /// Block / tx / tx-out records.
    TxData = 0x03,
    /// Tx-hash-prefix hint lists.
    TxHints = 0x04,
    /// Script history and sub-history records.
    Script = 0x05,
    /// Reserved for undo records.
    UndoData = 0x06,
    /// Zero-confirmation tx and tx-out records.
    ZcData = 0x07,
}

impl KeyPrefix {
    /// The tag as its key byte.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Recover a tag from its key byte.
    pub const fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => Self::DbInfo,
            0x01 => Self::HeadHash,
            0x02 => Self::HeadHgt,
            0x03 => Self::TxData,
            0x04 => Self::TxHints,
            0x05 => Self::Script,
            0x06 => Self::UndoData,
            0x07 => Self::ZcData,
            _ => return None,
        })
    }

    /// Build a full database key: the tag byte followed by `payload`.
    pub fn key(self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(self.as_u8());
        out.extend_from_slice(payload);
        out
    }
}

/// Packed (height, duplicate-id) pair.
///
/// The height occupies bits 31..8 (so heights are capped at 2^24 - 1) and
/// the duplicate-id the low byte. Inside head-height lists the high bit of
/// the dup byte doubles as the main-branch marker; [`HgtX`] itself never
/// carries that flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HgtX(u32);

impl HgtX {
    /// Pack a height and duplicate-id.
    pub const fn new(height: u32, dup: u8) -> Self {
        Self(((height & 0x00ff_ffff) << 8) | dup as u32)
    }

    /// The block height.
    pub const fn height(self) -> u32 {
        self.0 >> 8
    }

    /// The duplicate-id.
    pub const fn dup(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    /// Big-endian key bytes.
    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Recover from big-endian key bytes.
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

/// What a decoded block-data key addresses, by its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlkDataKind {
    /// 4/5 bytes: a block record.
    Block,
    /// 6/7 bytes: a tx record.
    Tx,
    /// 8/9 bytes: a tx-out record.
    TxOut,
    /// Any other length.
    NotBlkData,
}

/// Composite key addressing a block, a tx, or a tx-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlkDataKey {
    /// Packed height and duplicate-id.
    pub hgtx: HgtX,
    /// Tx index within the block, if this key addresses a tx or tx-out.
    pub tx_index: Option<u16>,
    /// Tx-out index within the tx, if this key addresses a tx-out.
    pub tx_out_index: Option<u16>,
}

impl BlkDataKey {
    /// Key for a block record.
    pub const fn block(height: u32, dup: u8) -> Self {
        Self { hgtx: HgtX::new(height, dup), tx_index: None, tx_out_index: None }
    }

    /// Key for a tx record.
    pub const fn tx(height: u32, dup: u8, tx_index: u16) -> Self {
        Self { hgtx: HgtX::new(height, dup), tx_index: Some(tx_index), tx_out_index: None }
    }

    /// Key for a tx-out record.
    pub const fn tx_out(height: u32, dup: u8, tx_index: u16, tx_out_index: u16) -> Self {
        Self {
            hgtx: HgtX::new(height, dup),
            tx_index: Some(tx_index),
            tx_out_index: Some(tx_out_index),
        }
    }

    /// The kind of record this key addresses.
    pub const fn kind(&self) -> BlkDataKind {
        match (self.tx_index.is_some(), self.tx_out_index.is_some()) {
            (false, false) => BlkDataKind::Block,
            (true, false) => BlkDataKind::Tx,
            (true, true) => BlkDataKind::TxOut,
            (false, true) => BlkDataKind::NotBlkData,
        }
    }

    /// The prefixed form: `TXDATA | hgtx [| txIdx [| txOutIdx]]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        out.push(KeyPrefix::TxData.as_u8());
        self.push_payload(&mut out);
        out
    }

    /// The bare form, for embedding in values: `hgtx [| txIdx [| txOutIdx]]`.
    pub fn encode_bare(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        self.push_payload(&mut out);
        out
    }

    fn push_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.hgtx.to_bytes());
        if let Some(idx) = self.tx_index {
            out.extend_from_slice(&idx.to_be_bytes());
            if let Some(out_idx) = self.tx_out_index {
                out.extend_from_slice(&out_idx.to_be_bytes());
            }
        }
    }

    /// Decode a key in either form.
    ///
    /// Odd lengths must carry the TXDATA tag; even lengths are bare.
    /// Returns `None` for lengths outside the legal set or a foreign tag,
    /// mirroring the `NotBlkData` outcome.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let payload = if bytes.len() % 2 == 1 {
            if bytes[0] != KeyPrefix::TxData.as_u8() {
                return None;
            }
            &bytes[1..]
        } else {
            bytes
        };

        let (hgtx_bytes, rest) = match payload.len() {
            4 | 6 | 8 => payload.split_at(4),
            _ => return None,
        };
        let mut hgtx = [0u8; 4];
        hgtx.copy_from_slice(hgtx_bytes);

        let tx_index = (!rest.is_empty()).then(|| u16::from_be_bytes([rest[0], rest[1]]));
        let tx_out_index = (rest.len() == 4).then(|| u16::from_be_bytes([rest[2], rest[3]]));

        Some(Self { hgtx: HgtX::from_bytes(hgtx), tx_index, tx_out_index })
    }

    /// Decode the bare 6-byte tx form used inside hint lists.
    pub const fn decode_hint(bytes: &[u8; 6]) -> Self {
        let hgtx = HgtX::from_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let tx_index = u16::from_be_bytes([bytes[4], bytes[5]]);
        Self { hgtx, tx_index: Some(tx_index), tx_out_index: None }
    }

    /// The block height.
    pub const fn height(&self) -> u32 {
        self.hgtx.height()
    }

    /// The duplicate-id.
    pub const fn dup(&self) -> u8 {
        self.hgtx.dup()
    }
}

/// Key for an unconfirmed (zero-confirmation) tx: a fixed 2-byte marker
/// followed by a caller-assigned big-endian ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZcKey(pub [u8; 6]);

impl ZcKey {
    /// Marker bytes distinguishing ZC keys from confirmed block-data keys.
    pub const MARKER: [u8; 2] = [0xff, 0xff];

    /// Build a ZC key from its ordinal.
    pub const fn new(index: u32) -> Self {
        let idx = index.to_be_bytes();
        Self([0xff, 0xff, idx[0], idx[1], idx[2], idx[3]])
    }

    /// Whether `bytes` begins with the ZC marker.
    pub fn is_zc(bytes: &[u8]) -> bool {
        bytes.starts_with(&Self::MARKER)
    }

    /// The key bytes.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Recover a ZC key from its exact byte form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DeserError> {
        let arr: [u8; 6] = bytes
            .try_into()
            .map_err(|_| DeserError::InvalidLength { what: "zc key", got: bytes.len() })?;
        if !Self::is_zc(&arr) {
            return Err(DeserError::InvalidTag { what: "zc key", tag: arr[0] });
        }
        Ok(Self(arr))
    }
}
