//! Tx-hash hint list maintenance.
//!
//! Hints are consulted on every hash lookup, so the writer-side contract
//! is strict: after any tx put, the preferred key of the tx's prefix
//! appears in the list and resolves to a tx whose stored hash matches.

use crate::error::StoreError;
use crate::schema::DbSelect;
use crate::store::BlockStore;
use chaindb_kv::{RoTxn, RwTxn};
use chaindb_types::{BlkDataKey, DbValue, KeyPrefix, StoredTxHints, TX_HINT_PREFIX_LEN};
use bitcoin::hashes::Hash;
use bitcoin::Txid;

impl BlockStore {
    /// Read the hint list for a hash prefix.
    pub fn get_stored_tx_hints(
        &self,
        hash_prefix: [u8; TX_HINT_PREFIX_LEN],
    ) -> Result<Option<StoredTxHints>, StoreError> {
        let db_sel = self.schema().select(DbSelect::Txhints);
        let rtxn = self.env(db_sel)?.read_txn()?;
        self.get_stored_tx_hints_in(&rtxn, hash_prefix)
    }

    pub(crate) fn get_stored_tx_hints_in(
        &self,
        txn: &RoTxn<'_>,
        hash_prefix: [u8; TX_HINT_PREFIX_LEN],
    ) -> Result<Option<StoredTxHints>, StoreError> {
        let db = self.db(self.schema().select(DbSelect::Txhints))?;
        let key = KeyPrefix::TxHints.key(&hash_prefix);
        let Some(raw) = db.get(txn, &key)? else {
            return Ok(None);
        };
        match StoredTxHints::decode_value_exact(raw) {
            Ok(mut hints) => {
                hints.hash_prefix = hash_prefix;
                Ok(Some(hints))
            }
            Err(err) => {
                tracing::warn!(target: "chaindb::store", %err, "corrupt hint list");
                Ok(None)
            }
        }
    }

    /// The hint list for a full tx hash; empty when none is stored.
    /// Absence is routine, not an error: lookups for unknown txs happen
    /// constantly.
    pub fn get_hints_for_tx_hash(&self, hash: &Txid) -> Result<StoredTxHints, StoreError> {
        let mut prefix = [0u8; TX_HINT_PREFIX_LEN];
        prefix.copy_from_slice(&hash.as_byte_array()[..TX_HINT_PREFIX_LEN]);
        Ok(self.get_stored_tx_hints(prefix)?.unwrap_or_else(|| StoredTxHints::empty(prefix)))
    }

    /// Write a hint list.
    pub fn put_stored_tx_hints(&self, hints: &StoredTxHints) -> Result<bool, StoreError> {
        if hints.hash_prefix == [0; TX_HINT_PREFIX_LEN] && hints.db_key_list.is_empty() {
            tracing::warn!(target: "chaindb::store", "hint list has no prefix, cannot be put into DB");
            return Ok(false);
        }
        let db_sel = self.schema().select(DbSelect::Txhints);
        let env = self.env(db_sel)?;
        let mut wtxn = env.write_txn()?;
        self.put_stored_tx_hints_in(&mut wtxn, hints)?;
        wtxn.commit()?;
        Ok(true)
    }

    pub(crate) fn put_stored_tx_hints_in(
        &self,
        txn: &mut RwTxn<'_>,
        hints: &StoredTxHints,
    ) -> Result<(), StoreError> {
        let db = self.db(self.schema().select(DbSelect::Txhints))?;
        Ok(db.put(txn, &hints.db_key(), &hints.encoded())?)
    }

    /// Re-point the preferred candidate of a hint list at `prefer_key`.
    ///
    /// The key must already be a member of the list; a foreign key is a
    /// logged no-op.
    pub fn update_preferred_tx_hint(
        &self,
        hash_or_prefix: &[u8],
        prefer_key: [u8; 6],
    ) -> Result<bool, StoreError> {
        if hash_or_prefix.len() < TX_HINT_PREFIX_LEN {
            tracing::warn!(target: "chaindb::store", "cannot get hints without at least a 4-byte prefix");
            return Ok(false);
        }
        let mut prefix = [0u8; TX_HINT_PREFIX_LEN];
        prefix.copy_from_slice(&hash_or_prefix[..TX_HINT_PREFIX_LEN]);

        let Some(mut hints) = self.get_stored_tx_hints(prefix)? else {
            tracing::warn!(target: "chaindb::store", "no hint list for prefix");
            return Ok(false);
        };

        if hints.preferred_db_key == Some(prefer_key) {
            return Ok(true);
        }
        if !hints.contains(&prefer_key) {
            tracing::warn!(target: "chaindb::store", "key not in hint list, something is wrong");
            return Ok(false);
        }

        hints.preferred_db_key = Some(prefer_key);
        self.put_stored_tx_hints(&hints)
    }

    /// Rebuild the hint list so the tx at `(height, dup, tx_index)` is
    /// the preferred candidate for its hash prefix.
    ///
    /// The tx's stored row supplies the hash prefix, so the tx must exist
    /// in the block-data sub-database (the decomposed SUPER layout; under
    /// FULL the read misses and the call reports `false`).
    pub fn mark_tx_entry_valid(
        &self,
        height: u32,
        dup: u8,
        tx_index: u16,
    ) -> Result<bool, StoreError> {
        let key = BlkDataKey::tx(height, dup, tx_index);

        let prefix = {
            let rtxn = self.env(DbSelect::Blkdata)?.read_txn()?;
            let Some(raw) = self.db(DbSelect::Blkdata)?.get(&rtxn, &key.encode())? else {
                tracing::warn!(target: "chaindb::store", height, dup, tx_index, "no tx row for hint mark-valid");
                return Ok(false);
            };
            if raw.len() < 2 + TX_HINT_PREFIX_LEN {
                tracing::warn!(target: "chaindb::store", "tx row shorter than its header");
                return Ok(false);
            }
            let mut prefix = [0u8; TX_HINT_PREFIX_LEN];
            prefix.copy_from_slice(&raw[2..2 + TX_HINT_PREFIX_LEN]);
            prefix
        };

        let Some(mut hints) = self.get_stored_tx_hints(prefix)? else {
            tracing::warn!(target: "chaindb::store", "no hint entry for tx");
            return Ok(false);
        };

        let mut key6 = [0u8; 6];
        key6.copy_from_slice(&key.encode_bare());
        if !hints.contains(&key6) {
            tracing::warn!(target: "chaindb::store", "tx was not found in the hint list");
            return Ok(false);
        }

        hints.preferred_db_key = Some(key6);
        self.put_stored_tx_hints(&hints)
    }
}
