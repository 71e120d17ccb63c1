//! Stored transactions and transaction outputs.

use crate::dbinfo::DB_VERSION;
use crate::header::DUP_UNASSIGNED;
use crate::keys::BlkDataKey;
use crate::ser::{read_u16, read_u32, take, take_array, DeserError};
use bitcoin::consensus::encode::{deserialize_partial, serialize};
use bitcoin::hashes::Hash;
use bitcoin::{Transaction, TxOut, Txid};
use bytes::BufMut;
use std::collections::BTreeMap;

/// How a stored tx body is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxSerVariant {
    /// The complete wire serialization.
    Full = 0,
    /// The wire serialization with tx-out bodies stripped; the tx-outs
    /// live at their own keys.
    Fragged = 1,
}

impl TxSerVariant {
    const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Full),
            1 => Some(Self::Fragged),
            _ => None,
        }
    }
}

/// Spend state of a stored tx-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Spentness {
    /// Known unspent.
    Unspent = 0,
    /// Known spent; the value carries the spender's 8-byte key.
    Spent = 1,
    /// Spend state not tracked.
    Unknown = 2,
}

impl Spentness {
    const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Unspent),
            1 => Some(Self::Spent),
            2 => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// A transaction as stored under its 7-byte block-data key.
///
/// Value layout: `flags u16 | tx_hash[32] | body`, flags packing the db
/// version (bits 15..12), the tx version (bits 11..10) and the
/// serialization variant (bits 9..6). The hash at offset 2 is read in
/// place by hash lookups, so its position is part of the format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTx {
    /// Block height.
    pub height: u32,
    /// Duplicate-id of the containing block.
    pub dup: u8,
    /// Index of this tx within the block.
    pub tx_index: u16,
    /// The tx hash.
    pub hash: Txid,
    /// Low two bits of the tx version.
    pub tx_version: u8,
    /// Body serialization variant.
    pub variant: TxSerVariant,
    /// The serialized body (full or fragged per `variant`).
    pub data: Vec<u8>,
    /// Number of tx-outs the tx has.
    pub num_tx_out: u16,
    /// Tx-outs keyed by output index.
    pub stxo_map: BTreeMap<u16, StoredTxOut>,
}

impl StoredTx {
    /// Build a stored tx (and its tx-out map) from a parsed transaction.
    pub fn from_tx(tx: &Transaction, height: u32, dup: u8, tx_index: u16) -> Self {
        let hash = tx.compute_txid();
        let mut stxo_map = BTreeMap::new();
        for (i, txo) in tx.output.iter().enumerate() {
            let idx = i as u16;
            let mut stxo = StoredTxOut::from_tx_out(txo);
            stxo.height = height;
            stxo.dup = dup;
            stxo.tx_index = tx_index;
            stxo.tx_out_index = idx;
            stxo.tx_version = (tx.version.0 as u8) & 0x03;
            stxo.parent_hash = Some(hash);
            stxo_map.insert(idx, stxo);
        }

        Self {
            height,
            dup,
            tx_index,
            hash,
            tx_version: (tx.version.0 as u8) & 0x03,
            variant: TxSerVariant::Full,
            data: serialize(tx),
            num_tx_out: tx.output.len() as u16,
            stxo_map,
        }
    }

    /// The 7-byte prefixed block-data key.
    pub fn db_key(&self) -> Vec<u8> {
        self.blk_data_key().encode()
    }

    /// The 6-byte bare key used in hint lists.
    pub fn bare_key(&self) -> [u8; 6] {
        let bytes = self.blk_data_key().encode_bare();
        let mut out = [0u8; 6];
        out.copy_from_slice(&bytes);
        out
    }

    /// The typed block-data key.
    pub const fn blk_data_key(&self) -> BlkDataKey {
        BlkDataKey::tx(self.height, self.dup, self.tx_index)
    }

    /// First four bytes of the hash, the hint-table key payload.
    pub fn hash_prefix(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.hash.as_byte_array()[..4]);
        out
    }

    /// Whether every tx-out is present in the map.
    pub fn have_all_tx_out(&self) -> bool {
        self.stxo_map.len() == self.num_tx_out as usize
    }

    /// Parse the body back into a transaction. Only possible for the
    /// [`TxSerVariant::Full`] variant.
    pub fn tx(&self) -> Result<Transaction, DeserError> {
        match self.variant {
            TxSerVariant::Full => {
                let (tx, _) = deserialize_partial::<Transaction>(&self.data)?;
                Ok(tx)
            }
            TxSerVariant::Fragged => {
                Err(DeserError::InvalidTag { what: "full tx from fragged body", tag: 1 })
            }
        }
    }

    const fn flags(&self) -> u16 {
        ((DB_VERSION as u16) << 12)
            | ((self.tx_version & 0x03) as u16) << 10
            | ((self.variant as u16) & 0x0f) << 6
    }

    /// Serialize the stored-tx value.
    pub fn encode_value(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + 32 + self.data.len());
        buf.put_u16(self.flags());
        buf.put_slice(self.hash.as_byte_array());
        buf.put_slice(&self.data);
        buf
    }

    /// Decode a stored-tx value. Consumes the whole slice; placement
    /// fields are left for the caller to fill from the key.
    pub fn decode_value(data: &mut &[u8]) -> Result<Self, DeserError> {
        let (variant, tx_version) = Self::decode_flags(data)?;
        let hash = Txid::from_byte_array(take_array(data, "stored tx hash")?);
        let body = std::mem::take(data);

        let mut stx = Self {
            height: 0,
            dup: DUP_UNASSIGNED,
            tx_index: 0,
            hash,
            tx_version,
            variant,
            data: body.to_vec(),
            num_tx_out: 0,
            stxo_map: BTreeMap::new(),
        };
        if variant == TxSerVariant::Full {
            if let Ok(tx) = stx.tx() {
                stx.num_tx_out = tx.output.len() as u16;
            }
        }
        Ok(stx)
    }

    /// Decode the zero-conf variant, which carries a trailing unix time:
    /// `flags u16 | hash[32] | full body | unix_time u32`.
    pub fn decode_zc_value(data: &mut &[u8]) -> Result<(Self, u32), DeserError> {
        let (variant, tx_version) = Self::decode_flags(data)?;
        if variant != TxSerVariant::Full {
            return Err(DeserError::InvalidTag { what: "zc tx variant", tag: variant as u8 });
        }
        let hash = Txid::from_byte_array(take_array(data, "zc tx hash")?);
        let (tx, consumed) = deserialize_partial::<Transaction>(data)?;
        let body = take(data, consumed, "zc tx body")?.to_vec();
        let unix_time = read_u32(data, "zc tx time")?;

        Ok((
            Self {
                height: 0,
                dup: DUP_UNASSIGNED,
                tx_index: 0,
                hash,
                tx_version,
                variant,
                data: body,
                num_tx_out: tx.output.len() as u16,
                stxo_map: BTreeMap::new(),
            },
            unix_time,
        ))
    }

    fn decode_flags(data: &mut &[u8]) -> Result<(TxSerVariant, u8), DeserError> {
        let flags = read_u16(data, "stored tx flags")?;
        let variant_bits = ((flags >> 6) & 0x0f) as u8;
        let variant = TxSerVariant::from_bits(variant_bits)
            .ok_or(DeserError::InvalidTag { what: "tx serialization variant", tag: variant_bits })?;
        Ok((variant, ((flags >> 10) & 0x03) as u8))
    }
}

/// A transaction output as stored under its 9-byte block-data key (SUPER)
/// or its 8-byte bare key in the history database (FULL).
///
/// Value layout: `flags u16 | raw txout | spender_key[8] when spent`,
/// flags packing the db version (bits 15..12), the tx version
/// (bits 11..10) and the spentness (bits 9..8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTxOut {
    /// Block height.
    pub height: u32,
    /// Duplicate-id of the containing block.
    pub dup: u8,
    /// Index of the parent tx within the block.
    pub tx_index: u16,
    /// Index of this output within the parent tx.
    pub tx_out_index: u16,
    /// Low two bits of the parent tx version.
    pub tx_version: u8,
    /// Spend state.
    pub spentness: Spentness,
    /// The raw wire serialization of the txout.
    pub data: Vec<u8>,
    /// The 8-byte key of the spending (tx, input) when known spent.
    pub spent_by: Option<[u8; 8]>,
    /// Copy of the parent tx hash, carried in memory only.
    pub parent_hash: Option<Txid>,
}

impl StoredTxOut {
    /// Wrap a parsed txout. Placement fields start zeroed.
    pub fn from_tx_out(txo: &TxOut) -> Self {
        Self {
            height: 0,
            dup: DUP_UNASSIGNED,
            tx_index: 0,
            tx_out_index: 0,
            tx_version: 0,
            spentness: Spentness::Unknown,
            data: serialize(txo),
            spent_by: None,
            parent_hash: None,
        }
    }

    /// The typed block-data key.
    pub const fn blk_data_key(&self) -> BlkDataKey {
        BlkDataKey::tx_out(self.height, self.dup, self.tx_index, self.tx_out_index)
    }

    /// The 9-byte prefixed key (SUPER placement).
    pub fn db_key(&self) -> Vec<u8> {
        self.blk_data_key().encode()
    }

    /// The 8-byte bare key (FULL history placement, hint embedding).
    pub fn bare_key(&self) -> [u8; 8] {
        let bytes = self.blk_data_key().encode_bare();
        let mut out = [0u8; 8];
        out.copy_from_slice(&bytes);
        out
    }

    /// Parse the raw bytes back into a txout.
    pub fn tx_out(&self) -> Result<TxOut, DeserError> {
        let (txo, _) = deserialize_partial::<TxOut>(&self.data)?;
        Ok(txo)
    }

    /// The output value in satoshis.
    pub fn value_sat(&self) -> Result<u64, DeserError> {
        Ok(self.tx_out()?.value.to_sat())
    }

    const fn flags(&self) -> u16 {
        ((DB_VERSION as u16) << 12)
            | ((self.tx_version & 0x03) as u16) << 10
            | ((self.spentness as u16) & 0x03) << 8
    }

    /// Serialize the stored-txout value.
    pub fn encode_value(&self) -> Vec<u8> {
        let spent = self.spentness == Spentness::Spent;
        let mut buf = Vec::with_capacity(2 + self.data.len() + if spent { 8 } else { 0 });
        buf.put_u16(self.flags());
        buf.put_slice(&self.data);
        if spent {
            // A spent txout without its spender reference is unencodable;
            // normalize to Unknown instead of writing a torn record.
            match self.spent_by {
                Some(key) => buf.put_slice(&key),
                None => {
                    let flags_fixed = ((DB_VERSION as u16) << 12)
                        | ((self.tx_version & 0x03) as u16) << 10
                        | ((Spentness::Unknown as u16) & 0x03) << 8;
                    buf[..2].copy_from_slice(&flags_fixed.to_be_bytes());
                }
            }
        }
        buf
    }

    /// Decode a stored-txout value. Placement fields are left for the
    /// caller to fill from the key.
    pub fn decode_value(data: &mut &[u8]) -> Result<Self, DeserError> {
        let flags = read_u16(data, "stored txout flags")?;
        let spent_bits = ((flags >> 8) & 0x03) as u8;
        let spentness = Spentness::from_bits(spent_bits)
            .ok_or(DeserError::InvalidTag { what: "spentness", tag: spent_bits })?;

        let (_, consumed) = deserialize_partial::<TxOut>(data)?;
        let raw = take(data, consumed, "stored txout body")?.to_vec();

        let spent_by = if spentness == Spentness::Spent {
            Some(take_array::<8>(data, "stored txout spender")?)
        } else {
            None
        };

        Ok(Self {
            height: 0,
            dup: DUP_UNASSIGNED,
            tx_index: 0,
            tx_out_index: 0,
            tx_version: ((flags >> 10) & 0x03) as u8,
            spentness,
            data: raw,
            spent_by,
            parent_hash: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, Witness};

    fn test_tx() -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint { txid: Txid::from_byte_array([0x42; 32]), vout: 1 },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![
                TxOut {
                    value: Amount::from_sat(50_000),
                    script_pubkey: ScriptBuf::from_bytes(vec![0x76, 0xa9, 0x14]),
                },
                TxOut { value: Amount::from_sat(1_000), script_pubkey: ScriptBuf::new() },
            ],
        }
    }

    #[test]
    fn stored_tx_value_roundtrip() {
        let stx = StoredTx::from_tx(&test_tx(), 120, 1, 3);
        let value = stx.encode_value();

        // Hash sits at offset 2, directly comparable in place.
        assert_eq!(&value[2..34], stx.hash.as_byte_array());

        let mut cursor = value.as_slice();
        let decoded = StoredTx::decode_value(&mut cursor).unwrap();
        assert!(cursor.is_empty());
        assert_eq!(decoded.hash, stx.hash);
        assert_eq!(decoded.variant, TxSerVariant::Full);
        assert_eq!(decoded.data, stx.data);
        assert_eq!(decoded.num_tx_out, 2);
        assert_eq!(decoded.tx().unwrap(), test_tx());
    }

    #[test]
    fn stored_tx_builds_txout_map() {
        let stx = StoredTx::from_tx(&test_tx(), 120, 1, 3);
        assert_eq!(stx.stxo_map.len(), 2);
        assert!(stx.have_all_tx_out());
        let stxo = &stx.stxo_map[&0];
        assert_eq!(stxo.height, 120);
        assert_eq!(stxo.tx_index, 3);
        assert_eq!(stxo.tx_out_index, 0);
        assert_eq!(stxo.value_sat().unwrap(), 50_000);
        assert_eq!(stxo.parent_hash, Some(stx.hash));
    }

    #[test]
    fn stored_txout_spent_roundtrip() {
        let tx = test_tx();
        let mut stxo = StoredTxOut::from_tx_out(&tx.output[0]);
        stxo.height = 120;
        stxo.dup = 0;
        stxo.tx_index = 3;
        stxo.tx_out_index = 0;
        stxo.spentness = Spentness::Spent;
        stxo.spent_by = Some(BlkDataKey::tx_out(130, 0, 9, 1).encode_bare().try_into().unwrap());

        let value = stxo.encode_value();
        let mut cursor = value.as_slice();
        let decoded = StoredTxOut::decode_value(&mut cursor).unwrap();
        assert!(cursor.is_empty());
        assert_eq!(decoded.spentness, Spentness::Spent);
        assert_eq!(decoded.spent_by, stxo.spent_by);
        assert_eq!(decoded.data, stxo.data);
    }

    #[test]
    fn stored_txout_spent_without_reference_degrades_to_unknown() {
        let tx = test_tx();
        let mut stxo = StoredTxOut::from_tx_out(&tx.output[1]);
        stxo.spentness = Spentness::Spent;
        stxo.spent_by = None;

        let value = stxo.encode_value();
        let decoded = StoredTxOut::decode_value(&mut value.as_slice()).unwrap();
        assert_eq!(decoded.spentness, Spentness::Unknown);
    }

    #[test]
    fn zc_value_roundtrip() {
        let stx = StoredTx::from_tx(&test_tx(), 0, 0, 0);
        let mut value = stx.encode_value();
        value.extend_from_slice(&1_700_000_000u32.to_be_bytes());

        let (decoded, time) = StoredTx::decode_zc_value(&mut value.as_slice()).unwrap();
        assert_eq!(decoded.hash, stx.hash);
        assert_eq!(time, 1_700_000_000);
    }
}
