//! Script histories and their per-block sub-histories.
//!
//! A script history (SSH) summarizes everything known about one
//! script-address: totals plus a map of sub-histories (sub-SSH), one per
//! (height, dup) the address was touched in. The summary row and each
//! sub-history are separate database rows sharing the `SCRIPT | address`
//! key prefix, so an ordered scan from the summary row walks the
//! sub-histories in height order.

use crate::keys::{HgtX, KeyPrefix};
use crate::ser::{
    put_var_int, read_u16, read_u32, read_u64, read_u8, read_var_int, take_array, var_int_size,
    DbValue, DeserError,
};
use crate::dbinfo::DB_VERSION;
use bytes::BufMut;
use std::collections::BTreeMap;

/// One tx-in/tx-out pairing inside a sub-history.
///
/// Entry layout: `flags u8 | value u64 | out_key[8] | in_key[8] when
/// spent` (flags bit 0 = spent, bit 1 = from coinbase).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxioPair {
    /// Output value in satoshis.
    pub value_sat: u64,
    /// Bare 8-byte key of the funding tx-out.
    pub tx_out_key: [u8; 8],
    /// Bare 8-byte key of the spending (tx, input), when spent.
    pub tx_in_key: Option<[u8; 8]>,
    /// Whether the funding tx was a coinbase.
    pub from_coinbase: bool,
}

impl TxioPair {
    /// Whether the pair has been spent.
    pub const fn is_spent(&self) -> bool {
        self.tx_in_key.is_some()
    }

    const fn encoded_len(&self) -> usize {
        1 + 8 + 8 + if self.tx_in_key.is_some() { 8 } else { 0 }
    }

    fn encode_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.is_spent() as u8 | (self.from_coinbase as u8) << 1);
        buf.put_u64(self.value_sat);
        buf.put_slice(&self.tx_out_key);
        if let Some(in_key) = self.tx_in_key {
            buf.put_slice(&in_key);
        }
    }

    fn decode(data: &mut &[u8]) -> Result<Self, DeserError> {
        let flags = read_u8(data, "txio flags")?;
        let value_sat = read_u64(data, "txio value")?;
        let tx_out_key = take_array(data, "txio out key")?;
        let tx_in_key =
            if flags & 0x01 != 0 { Some(take_array(data, "txio in key")?) } else { None };
        Ok(Self { value_sat, tx_out_key, tx_in_key, from_coinbase: flags & 0x02 != 0 })
    }
}

/// The sub-history of one script-address within one (height, dup).
///
/// Keyed by `SCRIPT | address | hgtX`. Value layout: `varint count |
/// count × txio entries`; the in-memory map key is the entry ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredSubHistory {
    /// The script-address this sub-history belongs to.
    pub unique_key: Vec<u8>,
    /// The (height, dup) suffix.
    pub hgtx: Option<HgtX>,
    /// Txio pairs keyed by their ordinal within this sub-history.
    pub txio_map: BTreeMap<u16, TxioPair>,
}

impl StoredSubHistory {
    /// A fresh, empty sub-history.
    pub fn new(unique_key: Vec<u8>, hgtx: HgtX) -> Self {
        Self { unique_key, hgtx: Some(hgtx), txio_map: BTreeMap::new() }
    }

    /// The block height, when the hgtX suffix is known.
    pub fn height(&self) -> Option<u32> {
        self.hgtx.map(HgtX::height)
    }

    /// Append a txio pair at the next ordinal.
    pub fn push_txio(&mut self, txio: TxioPair) {
        let ordinal = self.txio_map.last_key_value().map_or(0, |(k, _)| k + 1);
        self.txio_map.insert(ordinal, txio);
    }

    /// The database key: `SCRIPT | address | hgtX`.
    ///
    /// `None` when the hgtX suffix has not been assigned.
    pub fn db_key(&self) -> Option<Vec<u8>> {
        let hgtx = self.hgtx?;
        let mut payload = Vec::with_capacity(self.unique_key.len() + 4);
        payload.extend_from_slice(&self.unique_key);
        payload.extend_from_slice(&hgtx.to_bytes());
        Some(KeyPrefix::Script.key(&payload))
    }

    /// Decode the address and hgtX from a prefixed sub-history key.
    pub fn decode_db_key(key: &[u8]) -> Result<(Vec<u8>, HgtX), DeserError> {
        if key.len() < 6 || key[0] != KeyPrefix::Script.as_u8() {
            return Err(DeserError::InvalidLength { what: "sub-history key", got: key.len() });
        }
        let (addr, hgtx) = key[1..].split_at(key.len() - 5);
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(hgtx);
        Ok((addr.to_vec(), HgtX::from_bytes(bytes)))
    }
}

impl StoredSubHistory {
    /// Read just the txio count from an encoded sub-history value,
    /// without materializing the entries.
    pub fn decode_txio_count(mut data: &[u8]) -> Result<u64, DeserError> {
        read_var_int(&mut data, "txio count")
    }
}

impl DbValue for StoredSubHistory {
    fn encoded_size(&self) -> usize {
        var_int_size(self.txio_map.len() as u64)
            + self.txio_map.values().map(TxioPair::encoded_len).sum::<usize>()
    }

    fn encode_value_to<B: BufMut>(&self, buf: &mut B) {
        put_var_int(buf, self.txio_map.len() as u64);
        for txio in self.txio_map.values() {
            txio.encode_to(buf);
        }
    }

    fn decode_value(data: &mut &[u8]) -> Result<Self, DeserError> {
        let count = read_var_int(data, "txio count")?;
        let mut sub = Self::default();
        for ordinal in 0..count {
            sub.txio_map.insert(ordinal as u16, TxioPair::decode(data)?);
        }
        Ok(sub)
    }
}

/// The summary row for one script-address.
///
/// Keyed by `SCRIPT | address`. Value layout: `flags u16 |
/// scanned_up_to u32 | varint total_txio_count | total_unspent u64`.
/// Sub-histories are separate rows; the map here is filled by range
/// scans and merges, never serialized with the summary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredScriptHistory {
    /// The script-address.
    pub unique_key: Vec<u8>,
    /// Highest block this address has been scanned through.
    pub scanned_up_to: u32,
    /// Total txio pairs across all sub-histories.
    pub total_txio_count: u64,
    /// Total unspent value in satoshis.
    pub total_unspent: u64,
    /// Sub-histories keyed by hgtX, populated by scans.
    pub sub_hist_map: BTreeMap<HgtX, StoredSubHistory>,
}

impl StoredScriptHistory {
    /// A fresh summary for an address.
    pub fn new(unique_key: Vec<u8>) -> Self {
        Self { unique_key, ..Default::default() }
    }

    /// Whether the record refers to an address at all.
    pub fn is_initialized(&self) -> bool {
        !self.unique_key.is_empty()
    }

    /// The database key: `SCRIPT | address`.
    pub fn db_key(&self) -> Vec<u8> {
        KeyPrefix::Script.key(&self.unique_key)
    }

    /// Decode the address from a prefixed summary key.
    pub fn decode_db_key(key: &[u8]) -> Result<Vec<u8>, DeserError> {
        if key.len() < 2 || key[0] != KeyPrefix::Script.as_u8() {
            return Err(DeserError::InvalidLength { what: "script history key", got: key.len() });
        }
        Ok(key[1..].to_vec())
    }

    /// Fold a sub-history into the map, merging txio pairs when an entry
    /// for its hgtX already exists.
    pub fn merge_sub_history(&mut self, sub: StoredSubHistory) {
        let Some(hgtx) = sub.hgtx else { return };
        match self.sub_hist_map.entry(hgtx) {
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(sub);
            }
            std::collections::btree_map::Entry::Occupied(mut e) => {
                for txio in sub.txio_map.into_values() {
                    e.get_mut().push_txio(txio);
                }
            }
        }
    }
}

impl DbValue for StoredScriptHistory {
    fn encoded_size(&self) -> usize {
        2 + 4 + var_int_size(self.total_txio_count) + 8
    }

    fn encode_value_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16((DB_VERSION as u16) << 12);
        buf.put_u32(self.scanned_up_to);
        put_var_int(buf, self.total_txio_count);
        buf.put_u64(self.total_unspent);
    }

    fn decode_value(data: &mut &[u8]) -> Result<Self, DeserError> {
        let _flags = read_u16(data, "script history flags")?;
        let scanned_up_to = read_u32(data, "script history scan height")?;
        let total_txio_count = read_var_int(data, "script history txio count")?;
        let total_unspent = read_u64(data, "script history unspent")?;
        Ok(Self {
            unique_key: Vec::new(),
            scanned_up_to,
            total_txio_count,
            total_unspent,
            sub_hist_map: BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::BlkDataKey;

    fn out_key(height: u32, tx: u16, out: u16) -> [u8; 8] {
        BlkDataKey::tx_out(height, 0, tx, out).encode_bare().try_into().unwrap()
    }

    fn sample_sub(addr: &[u8], height: u32) -> StoredSubHistory {
        let mut sub = StoredSubHistory::new(addr.to_vec(), HgtX::new(height, 0));
        sub.push_txio(TxioPair {
            value_sat: 5_000,
            tx_out_key: out_key(height, 1, 0),
            tx_in_key: None,
            from_coinbase: false,
        });
        sub.push_txio(TxioPair {
            value_sat: 7_000,
            tx_out_key: out_key(height, 2, 1),
            tx_in_key: Some(out_key(height + 10, 0, 0)),
            from_coinbase: true,
        });
        sub
    }

    #[test]
    fn sub_history_roundtrip() {
        let addr = b"\x00somescriptaddr".to_vec();
        let sub = sample_sub(&addr, 250);

        let bytes = sub.encoded();
        assert_eq!(bytes.len(), sub.encoded_size());

        let decoded = StoredSubHistory::decode_value_exact(&bytes).unwrap();
        assert_eq!(decoded.txio_map, sub.txio_map);
        assert!(decoded.txio_map[&1].is_spent());
        assert!(decoded.txio_map[&1].from_coinbase);
    }

    #[test]
    fn sub_history_key_splits_back() {
        let addr = b"\x00somescriptaddr".to_vec();
        let sub = sample_sub(&addr, 250);
        let key = sub.db_key().unwrap();
        let (got_addr, got_hgtx) = StoredSubHistory::decode_db_key(&key).unwrap();
        assert_eq!(got_addr, addr);
        assert_eq!(got_hgtx, HgtX::new(250, 0));
    }

    #[test]
    fn ssh_summary_roundtrip() {
        let mut ssh = StoredScriptHistory::new(b"\x00addr".to_vec());
        ssh.scanned_up_to = 400_000;
        ssh.total_txio_count = 300;
        ssh.total_unspent = 21_000_000;

        let bytes = ssh.encoded();
        let mut decoded = StoredScriptHistory::decode_value_exact(&bytes).unwrap();
        decoded.unique_key = ssh.unique_key.clone();
        assert_eq!(decoded, ssh);
    }

    #[test]
    fn merge_appends_txios_for_same_hgtx() {
        let addr = b"\x00addr".to_vec();
        let mut ssh = StoredScriptHistory::new(addr.clone());
        ssh.merge_sub_history(sample_sub(&addr, 100));
        ssh.merge_sub_history(sample_sub(&addr, 100));
        ssh.merge_sub_history(sample_sub(&addr, 200));

        assert_eq!(ssh.sub_hist_map.len(), 2);
        assert_eq!(ssh.sub_hist_map[&HgtX::new(100, 0)].txio_map.len(), 4);
        assert_eq!(ssh.sub_hist_map[&HgtX::new(200, 0)].txio_map.len(), 2);
    }
}
