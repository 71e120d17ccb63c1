//! Zero-confirmation (unconfirmed) tx storage under the ZCDATA keys.
//!
//! ZC records reuse the tx/tx-out value layouts but are keyed by a
//! caller-assigned 6-byte ZC key instead of a block position, and the tx
//! value carries a trailing first-seen unix time. They live in BLKDATA
//! under SUPER and in the history sub-database under FULL.

use crate::error::StoreError;
use crate::schema::DbSelect;
use crate::store::BlockStore;
use chaindb_types::{KeyPrefix, StoredTx, StoredTxOut, ZcKey};

impl BlockStore {
    /// Store an unconfirmed tx and its tx-outs under `zc_key`.
    pub fn put_stored_zc(
        &self,
        stx: &mut StoredTx,
        zc_key: &ZcKey,
        unix_time: u32,
    ) -> Result<(), StoreError> {
        let db_sel = self.schema().select(DbSelect::History);
        let env = self.env(db_sel)?;
        let db = self.db(db_sel)?;
        let mut wtxn = env.write_txn()?;

        let mut value = stx.encode_value();
        value.extend_from_slice(&unix_time.to_be_bytes());
        db.put(&mut wtxn, &KeyPrefix::ZcData.key(zc_key.as_bytes()), &value)?;

        let stxo_map = std::mem::take(&mut stx.stxo_map);
        for (idx, mut stxo) in stxo_map {
            stxo.tx_version = stx.tx_version;
            stxo.tx_index = stx.tx_index;
            stxo.tx_out_index = idx;

            let mut zc_stxo_key = [0u8; 8];
            zc_stxo_key[..6].copy_from_slice(zc_key.as_bytes());
            zc_stxo_key[6..].copy_from_slice(&idx.to_be_bytes());
            self.put_stored_zc_tx_out_in(&mut wtxn, &stxo, &zc_stxo_key)?;

            stx.stxo_map.insert(idx, stxo);
        }

        wtxn.commit()?;
        Ok(())
    }

    /// Store one unconfirmed tx-out under an 8-byte ZC key
    /// (`zc_key | tx_out_index`).
    pub fn put_stored_zc_tx_out(
        &self,
        stxo: &StoredTxOut,
        zc_stxo_key: &[u8; 8],
    ) -> Result<(), StoreError> {
        let db_sel = self.schema().select(DbSelect::History);
        let env = self.env(db_sel)?;
        let mut wtxn = env.write_txn()?;
        self.put_stored_zc_tx_out_in(&mut wtxn, stxo, zc_stxo_key)?;
        wtxn.commit()?;
        Ok(())
    }

    fn put_stored_zc_tx_out_in(
        &self,
        wtxn: &mut chaindb_kv::RwTxn<'_>,
        stxo: &StoredTxOut,
        zc_stxo_key: &[u8; 8],
    ) -> Result<(), StoreError> {
        let db = self.db(self.schema().select(DbSelect::History))?;
        Ok(db.put(wtxn, &KeyPrefix::ZcData.key(zc_stxo_key), &stxo.encode_value())?)
    }

    /// Read an unconfirmed tx (and its tx-outs) by ZC key. Returns the
    /// record and its first-seen unix time.
    pub fn get_stored_zc_tx(
        &self,
        zc_key: &ZcKey,
    ) -> Result<Option<(StoredTx, u32)>, StoreError> {
        let db_sel = self.schema().select(DbSelect::History);
        let env = self.env(db_sel)?;
        let db = self.db(db_sel)?;
        let rtxn = env.read_txn()?;
        let mut cursor = db.cursor(&rtxn);

        let tx_key = KeyPrefix::ZcData.key(zc_key.as_bytes());
        let Some((_, raw)) = cursor.seek_to_exact(&tx_key)? else {
            tracing::warn!(
                target: "chaindb::store",
                key = ?zc_key,
                "DB does not have the requested ZC tx"
            );
            return Ok(None);
        };

        let mut raw_cursor = raw;
        let (mut stx, unix_time) = match StoredTx::decode_zc_value(&mut raw_cursor) {
            Ok(ok) => ok,
            Err(err) => {
                tracing::warn!(target: "chaindb::store", %err, "corrupt ZC tx row");
                return Ok(None);
            }
        };

        // Collect the tx-out rows sharing the ZC key.
        let mut entry = cursor.advance_within(&tx_key)?;
        while let Some((key, value)) = entry {
            if key.len() == 9 {
                let idx = u16::from_be_bytes([key[7], key[8]]);
                let mut raw = value;
                match StoredTxOut::decode_value(&mut raw) {
                    Ok(mut stxo) => {
                        stxo.tx_out_index = idx;
                        stxo.tx_version = stx.tx_version;
                        stxo.parent_hash = Some(stx.hash);
                        stx.stxo_map.insert(idx, stxo);
                    }
                    Err(err) => {
                        tracing::warn!(target: "chaindb::store", idx, %err, "corrupt ZC txout row");
                    }
                }
            } else {
                tracing::warn!(target: "chaindb::store", len = key.len(), "unexpected ZC entry while iterating");
                return Ok(None);
            }
            entry = cursor.advance_within(&tx_key)?;
        }

        Ok(Some((stx, unix_time)))
    }
}
