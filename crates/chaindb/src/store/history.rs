//! Script-history storage and the sub-history range scan.
//!
//! Summary rows and sub-history rows share the `SCRIPT | address` key
//! prefix. The range scan positions on the summary row, optionally jumps
//! forward to the window start, then walks forward while the keys still
//! belong to the address and the decoded height stays inside the window.

use crate::error::StoreError;
use crate::schema::DbSelect;
use crate::store::BlockStore;
use chaindb_kv::RwTxn;
use chaindb_types::{
    DbValue, HgtX, KeyPrefix, StoredScriptHistory, StoredSubHistory,
};
use std::collections::BTreeMap;

impl BlockStore {
    /// Write a script history: the summary row plus every non-empty
    /// sub-history, in one transaction.
    pub fn put_stored_script_history(
        &self,
        ssh: &StoredScriptHistory,
    ) -> Result<(), StoreError> {
        if !ssh.is_initialized() {
            tracing::warn!(target: "chaindb::store", "trying to put uninitialized script history");
            return Ok(());
        }

        let db_sel = self.schema().select(DbSelect::History);
        let env = self.env(db_sel)?;
        let mut wtxn = env.write_txn()?;

        self.put_ssh_summary_in(&mut wtxn, ssh)?;
        for (hgtx, sub) in &ssh.sub_hist_map {
            if sub.txio_map.is_empty() {
                continue;
            }
            self.put_sub_history_row_in(&mut wtxn, &ssh.unique_key, *hgtx, sub)?;
        }
        wtxn.commit()?;
        Ok(())
    }

    /// Write only the summary row.
    pub fn put_stored_script_history_summary(
        &self,
        ssh: &StoredScriptHistory,
    ) -> Result<(), StoreError> {
        if !ssh.is_initialized() {
            tracing::warn!(target: "chaindb::store", "trying to put uninitialized script history");
            return Ok(());
        }
        let db_sel = self.schema().select(DbSelect::History);
        let env = self.env(db_sel)?;
        let mut wtxn = env.write_txn()?;
        self.put_ssh_summary_in(&mut wtxn, ssh)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Write one sub-history row. Empty sub-histories are not persisted.
    pub fn put_stored_sub_history(&self, sub: &StoredSubHistory) -> Result<(), StoreError> {
        if sub.txio_map.is_empty() {
            return Ok(());
        }
        let Some(hgtx) = sub.hgtx else {
            tracing::warn!(target: "chaindb::store", "sub-history has no hgtX, cannot be put into DB");
            return Ok(());
        };
        let db_sel = self.schema().select(DbSelect::History);
        let env = self.env(db_sel)?;
        let mut wtxn = env.write_txn()?;
        self.put_sub_history_row_in(&mut wtxn, &sub.unique_key, hgtx, sub)?;
        wtxn.commit()?;
        Ok(())
    }

    fn put_ssh_summary_in(
        &self,
        wtxn: &mut RwTxn<'_>,
        ssh: &StoredScriptHistory,
    ) -> Result<(), StoreError> {
        let db = self.db(self.schema().select(DbSelect::History))?;
        Ok(db.put(wtxn, &ssh.db_key(), &ssh.encoded())?)
    }

    fn put_sub_history_row_in(
        &self,
        wtxn: &mut RwTxn<'_>,
        unique_key: &[u8],
        hgtx: HgtX,
        sub: &StoredSubHistory,
    ) -> Result<(), StoreError> {
        let db = self.db(self.schema().select(DbSelect::History))?;
        Ok(db.put(wtxn, &sub_history_key(unique_key, hgtx), &sub.encoded())?)
    }

    /// Read just the summary row for an address.
    pub fn get_stored_script_history_summary(
        &self,
        scr_addr: &[u8],
    ) -> Result<Option<StoredScriptHistory>, StoreError> {
        let db_sel = self.schema().select(DbSelect::History);
        let rtxn = self.env(db_sel)?.read_txn()?;
        let key = KeyPrefix::Script.key(scr_addr);
        let Some(raw) = self.db(db_sel)?.get(&rtxn, &key)? else {
            return Ok(None);
        };
        match StoredScriptHistory::decode_value_exact(raw) {
            Ok(mut ssh) => {
                ssh.unique_key = scr_addr.to_vec();
                Ok(Some(ssh))
            }
            Err(err) => {
                tracing::warn!(target: "chaindb::store", %err, "corrupt script history summary");
                Ok(None)
            }
        }
    }

    /// Read a script history with the sub-histories whose height falls in
    /// `[start_block, end_block]`.
    pub fn get_stored_script_history(
        &self,
        scr_addr: &[u8],
        start_block: u32,
        end_block: u32,
    ) -> Result<Option<StoredScriptHistory>, StoreError> {
        let db_sel = self.schema().select(DbSelect::History);
        let env = self.env(db_sel)?;
        let db = self.db(db_sel)?;
        let rtxn = env.read_txn()?;
        let mut cursor = db.cursor(&rtxn);

        let summary_key = KeyPrefix::Script.key(scr_addr);
        let Some((_, summary_raw)) = cursor.seek_to_exact(&summary_key)? else {
            return Ok(None);
        };
        let mut ssh = match StoredScriptHistory::decode_value_exact(summary_raw) {
            Ok(ssh) => ssh,
            Err(err) => {
                tracing::warn!(target: "chaindb::store", %err, "corrupt script history summary");
                return Ok(None);
            }
        };
        ssh.unique_key = scr_addr.to_vec();

        // Jump straight to the window start, or step onto the first
        // sub-history row.
        let mut entry = if start_block != 0 {
            cursor.seek_ge(&sub_history_key(scr_addr, HgtX::new(start_block, 0)))?
        } else {
            cursor.advance()?
        };

        while let Some((key, value)) = entry {
            if !key.starts_with(&summary_key) {
                break;
            }
            if key.len() == summary_key.len() + 4 {
                let Ok((sub_addr, hgtx)) = StoredSubHistory::decode_db_key(key) else {
                    entry = cursor.advance()?;
                    continue;
                };
                if sub_addr != scr_addr {
                    // A longer address sharing this prefix.
                    entry = cursor.advance()?;
                    continue;
                }
                if hgtx.height() > end_block {
                    break;
                }
                match StoredSubHistory::decode_value_exact(value) {
                    Ok(mut sub) => {
                        sub.unique_key = scr_addr.to_vec();
                        sub.hgtx = Some(hgtx);
                        ssh.merge_sub_history(sub);
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "chaindb::store",
                            height = hgtx.height(),
                            %err,
                            "corrupt sub-history row"
                        );
                    }
                }
            }
            entry = cursor.advance()?;
        }

        Ok(Some(ssh))
    }

    /// Read the sub-history of an address at one specific hgtX.
    pub fn get_stored_sub_history_at_hgtx(
        &self,
        scr_addr: &[u8],
        hgtx: HgtX,
    ) -> Result<Option<StoredSubHistory>, StoreError> {
        let db_sel = self.schema().select(DbSelect::History);
        let rtxn = self.env(db_sel)?.read_txn()?;
        let Some(raw) = self.db(db_sel)?.get(&rtxn, &sub_history_key(scr_addr, hgtx))? else {
            return Ok(None);
        };
        match StoredSubHistory::decode_value_exact(raw) {
            Ok(mut sub) => {
                sub.unique_key = scr_addr.to_vec();
                sub.hgtx = Some(hgtx);
                Ok(Some(sub))
            }
            Err(err) => {
                tracing::warn!(target: "chaindb::store", %err, "corrupt sub-history row");
                Ok(None)
            }
        }
    }

    /// Ensure `ssh` carries the sub-history for `hgtx`, reading it from
    /// disk (or creating an empty one) when absent from the map.
    ///
    /// Totals are not touched; this only fills in data the history is
    /// expected to have.
    pub fn fetch_stored_sub_history(
        &self,
        ssh: &mut StoredScriptHistory,
        hgtx: HgtX,
        create_if_dne: bool,
        force_read: bool,
    ) -> Result<bool, StoreError> {
        if !force_read && ssh.sub_hist_map.contains_key(&hgtx) {
            return Ok(true);
        }

        let from_db = self.get_stored_sub_history_at_hgtx(&ssh.unique_key.clone(), hgtx)?;
        let sub = match from_db {
            Some(sub) => sub,
            None if create_if_dne => StoredSubHistory::new(ssh.unique_key.clone(), hgtx),
            None => return Ok(false),
        };
        ssh.merge_sub_history(sub);
        Ok(true)
    }

    /// Per-height txio counts for an address, up to `end_block`.
    pub fn get_ssh_summary(
        &self,
        scr_addr: &[u8],
        end_block: u32,
    ) -> Result<BTreeMap<u32, u64>, StoreError> {
        let mut summary = BTreeMap::new();

        let db_sel = self.schema().select(DbSelect::History);
        let env = self.env(db_sel)?;
        let db = self.db(db_sel)?;
        let rtxn = env.read_txn()?;
        let mut cursor = db.cursor(&rtxn);

        let summary_key = KeyPrefix::Script.key(scr_addr);
        let Some((_, summary_raw)) = cursor.seek_to_exact(&summary_key)? else {
            return Ok(summary);
        };
        match StoredScriptHistory::decode_value_exact(summary_raw) {
            Ok(ssh) if ssh.total_txio_count == 0 => return Ok(summary),
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(target: "chaindb::store", %err, "corrupt script history summary");
                return Ok(summary);
            }
        }

        let mut entry = cursor.advance()?;
        while let Some((key, value)) = entry {
            if !key.starts_with(&summary_key) {
                break;
            }
            if key.len() == summary_key.len() + 4 {
                if let Ok((sub_addr, hgtx)) = StoredSubHistory::decode_db_key(key) {
                    if sub_addr == scr_addr {
                        if hgtx.height() > end_block {
                            break;
                        }
                        match StoredSubHistory::decode_txio_count(value) {
                            Ok(count) => {
                                summary.insert(hgtx.height(), count);
                            }
                            Err(err) => {
                                tracing::warn!(target: "chaindb::store", %err, "corrupt sub-history row");
                            }
                        }
                    }
                }
            }
            entry = cursor.advance()?;
        }
        Ok(summary)
    }

    /// Total unspent value recorded in an address's summary row.
    pub fn get_balance_for_scr_addr(&self, scr_addr: &[u8]) -> Result<u64, StoreError> {
        Ok(self
            .get_stored_script_history_summary(scr_addr)?
            .map_or(0, |ssh| ssh.total_unspent))
    }
}

/// The `SCRIPT | address | hgtX` row key.
fn sub_history_key(unique_key: &[u8], hgtx: HgtX) -> Vec<u8> {
    let mut payload = Vec::with_capacity(unique_key.len() + 4);
    payload.extend_from_slice(unique_key);
    payload.extend_from_slice(&hgtx.to_bytes());
    KeyPrefix::Script.key(&payload)
}
