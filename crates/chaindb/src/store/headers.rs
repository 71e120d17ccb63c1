//! Header storage: hash-indexed rows, per-height duplicate lists, the
//! main-branch resolution table, and the header scan.

use crate::error::StoreError;
use crate::schema::DbSelect;
use crate::store::BlockStore;
use chaindb_kv::{RoTxn, RwTxn};
use chaindb_types::{DbValue, KeyPrefix, StoredDbInfo, StoredHeadHgtList, StoredHeader};
use bitcoin::block::Header;
use bitcoin::hashes::Hash;
use bitcoin::BlockHash;

/// Sentinel in the resolution table for "no main-branch header known".
const DUP_UNKNOWN: u8 = u8::MAX;

impl BlockStore {
    // ------------------------------------------------------------------
    // Height → dup resolution
    // ------------------------------------------------------------------

    /// The dup of the main-branch header at `height`, from the in-memory
    /// table.
    pub fn get_valid_dup_id_for_height(&self, height: u32) -> Option<u8> {
        let table = self.dup_table().read();
        match table.get(height as usize) {
            Some(&DUP_UNKNOWN) => None,
            Some(&dup) => Some(dup),
            None => {
                tracing::warn!(
                    target: "chaindb::store",
                    height,
                    "block height exceeds dup lookup table"
                );
                None
            }
        }
    }

    /// Record the main-branch dup for `height` in the in-memory table.
    ///
    /// With `overwrite` false an already-known height keeps its entry.
    pub fn set_valid_dup_id_for_height(&self, height: u32, dup: u8, overwrite: bool) {
        let mut table = self.dup_table().write();
        if table.len() < height as usize + 1 {
            table.resize(height as usize + 1, DUP_UNKNOWN);
        }
        let entry = &mut table[height as usize];
        if !overwrite && *entry != DUP_UNKNOWN {
            return;
        }
        *entry = dup;
    }

    /// The main-branch dup for `height` read from the on-disk head-height
    /// list, bypassing the table.
    pub fn get_valid_dup_id_from_db(&self, height: u32) -> Result<Option<u8>, StoreError> {
        let Some(hhl) = self.get_stored_head_hgt_list(height)? else {
            tracing::warn!(target: "chaindb::store", height, "requested header does not exist in DB");
            return Ok(None);
        };
        if hhl.preferred_dup.is_none() {
            tracing::warn!(
                target: "chaindb::store",
                height,
                "headers at height but none marked main-branch"
            );
        }
        Ok(hhl.preferred_dup)
    }

    /// Rebuild the in-memory table from every head-height list on disk.
    ///
    /// Called at open; afterwards the table is kept current by the put
    /// and mark-valid paths.
    pub fn load_valid_dup_ids(&self) -> Result<(), StoreError> {
        let env = self.env(DbSelect::Headers)?;
        let db = self.db(DbSelect::Headers)?;
        let rtxn = env.read_txn()?;
        let mut cursor = db.cursor(&rtxn);

        let prefix = [KeyPrefix::HeadHgt.as_u8()];
        let mut entry = cursor.seek_to_starts_with(&prefix)?;
        let mut table = self.dup_table().write();
        table.clear();

        while let Some((key, value)) = entry {
            if key.len() != 5 {
                tracing::warn!(target: "chaindb::store", len = key.len(), "bad head-height key length");
                entry = cursor.advance_within(&prefix)?;
                continue;
            }
            let height = u32::from_be_bytes([key[1], key[2], key[3], key[4]]);
            match StoredHeadHgtList::decode_value_exact(value) {
                Ok(hhl) => {
                    if let Some(dup) = hhl.preferred_dup {
                        if table.len() < height as usize + 1 {
                            table.resize(height as usize + 1, DUP_UNKNOWN);
                        }
                        table[height as usize] = dup;
                    }
                }
                Err(err) => {
                    tracing::warn!(target: "chaindb::store", height, %err, "corrupt head-height list");
                }
            }
            entry = cursor.advance_within(&prefix)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Head-height lists
    // ------------------------------------------------------------------

    /// Read the duplicate list for `height`.
    pub fn get_stored_head_hgt_list(
        &self,
        height: u32,
    ) -> Result<Option<StoredHeadHgtList>, StoreError> {
        let rtxn = self.env(DbSelect::Headers)?.read_txn()?;
        self.get_stored_head_hgt_list_in(&rtxn, height)
    }

    pub(crate) fn get_stored_head_hgt_list_in(
        &self,
        txn: &RoTxn<'_>,
        height: u32,
    ) -> Result<Option<StoredHeadHgtList>, StoreError> {
        let key = StoredHeadHgtList::db_key_for(height);
        let Some(raw) = self.db(DbSelect::Headers)?.get(txn, &key)? else {
            return Ok(None);
        };
        match StoredHeadHgtList::decode_value_exact(raw) {
            Ok(mut hhl) => {
                hhl.height = height;
                Ok(Some(hhl))
            }
            Err(err) => {
                tracing::warn!(target: "chaindb::store", height, %err, "corrupt head-height list");
                Ok(None)
            }
        }
    }

    /// Write a duplicate list.
    pub fn put_stored_head_hgt_list(&self, hhl: &StoredHeadHgtList) -> Result<(), StoreError> {
        let env = self.env(DbSelect::Headers)?;
        let mut wtxn = env.write_txn()?;
        self.put_stored_head_hgt_list_in(&mut wtxn, hhl)?;
        wtxn.commit()?;
        Ok(())
    }

    pub(crate) fn put_stored_head_hgt_list_in(
        &self,
        txn: &mut RwTxn<'_>,
        hhl: &StoredHeadHgtList,
    ) -> Result<(), StoreError> {
        Ok(self.db(DbSelect::Headers)?.put(txn, &hhl.db_key(), &hhl.encoded())?)
    }

    // ------------------------------------------------------------------
    // Bare headers
    // ------------------------------------------------------------------

    /// Insert (or refresh) a header in the headers sub-database.
    ///
    /// Assigns the duplicate-id: the first header at a height gets dup 0,
    /// a rediscovered hash reuses its dup, a new competitor gets
    /// max + 1. The assigned dup is written back into `sbh` and returned.
    ///
    /// For a main-branch header the in-memory resolution table is
    /// updated (`update_dup_id` gates overwriting an existing entry), and
    /// the headers metadata top advances when `height` reaches it.
    pub fn put_bare_header(
        &self,
        sbh: &mut StoredHeader,
        update_dup_id: bool,
    ) -> Result<u8, StoreError> {
        let env = self.env(DbSelect::Headers)?;
        let mut wtxn = env.write_txn()?;
        let dup = self.put_bare_header_in(&mut wtxn, sbh, update_dup_id)?;
        wtxn.commit()?;
        Ok(dup)
    }

    pub(crate) fn put_bare_header_in(
        &self,
        wtxn: &mut RwTxn<'_>,
        sbh: &mut StoredHeader,
        update_dup_id: bool,
    ) -> Result<u8, StoreError> {
        let height = sbh.height;
        let hash = sbh.hash();

        let sdbi = self.get_db_info_in(wtxn, DbSelect::Headers)?;

        let mut hhl = self
            .get_stored_head_hgt_list_in(wtxn, height)?
            .unwrap_or_else(|| StoredHeadHgtList::empty(height));

        let mut need_to_write_hhl = false;
        let dup = if hhl.dup_and_hash_list.is_empty() {
            hhl.add_dup_and_hash(0, hash);
            if sbh.main_branch {
                hhl.set_preferred_dup(0);
            }
            need_to_write_hhl = true;
            0
        } else if let Some(&(existing, _)) =
            hhl.dup_and_hash_list.iter().find(|&&(_, h)| h == hash)
        {
            // Already known at this height; possibly promote it.
            if hhl.preferred_dup != Some(existing) && sbh.main_branch && update_dup_id {
                hhl.set_preferred_dup(existing);
                need_to_write_hhl = true;
            }
            existing
        } else {
            let next = hhl.max_dup().map_or(0, |d| d + 1);
            hhl.add_dup_and_hash(next, hash);
            if sbh.main_branch && update_dup_id {
                hhl.set_preferred_dup(next);
            }
            need_to_write_hhl = true;
            next
        };

        sbh.set_key_data(height, dup);

        if need_to_write_hhl {
            self.put_stored_head_hgt_list_in(wtxn, &hhl)?;
        }

        // Overwrite the hash-indexed row unconditionally; the dup may not
        // have been known when it was last written.
        self.db(DbSelect::Headers)?.put(wtxn, &sbh.db_key(), &sbh.encode_headers_value())?;

        if sbh.main_branch {
            self.set_valid_dup_id_for_height(height, dup, update_dup_id);
            let mut sdbi = sdbi.unwrap_or_else(|| {
                StoredDbInfo::seed(
                    self.params.magic,
                    self.params.genesis_blk_hash,
                    self.params.profile,
                    self.params.prune,
                )
            });
            if height >= sdbi.top_blk_hgt {
                sdbi.top_blk_hgt = height;
                sdbi.top_blk_hash = hash;
                self.put_db_info_in(wtxn, DbSelect::Headers, &sdbi)?;
            }
        }

        Ok(dup)
    }

    /// Read a header by hash.
    pub fn get_bare_header_by_hash(
        &self,
        hash: &BlockHash,
    ) -> Result<Option<StoredHeader>, StoreError> {
        let rtxn = self.env(DbSelect::Headers)?.read_txn()?;
        self.get_bare_header_by_hash_in(&rtxn, hash)
    }

    pub(crate) fn get_bare_header_by_hash_in(
        &self,
        txn: &RoTxn<'_>,
        hash: &BlockHash,
    ) -> Result<Option<StoredHeader>, StoreError> {
        let key = KeyPrefix::HeadHash.key(hash.as_byte_array());
        let Some(mut raw) = self.db(DbSelect::Headers)?.get(txn, &key)? else {
            return Ok(None);
        };
        match StoredHeader::decode_headers_value(&mut raw) {
            Ok(sbh) => Ok(Some(sbh)),
            Err(err) => {
                tracing::warn!(target: "chaindb::store", %hash, %err, "corrupt stored header");
                Ok(None)
            }
        }
    }

    /// Read a header by height and dup, via the head-height list.
    pub fn get_bare_header(
        &self,
        height: u32,
        dup: u8,
    ) -> Result<Option<StoredHeader>, StoreError> {
        let Some(hhl) = self.get_stored_head_hgt_list(height)? else {
            tracing::warn!(target: "chaindb::store", height, "no headers at height");
            return Ok(None);
        };
        for (d, hash) in hhl.dup_and_hash_list {
            if d == dup {
                return self.get_bare_header_by_hash(&hash);
            }
        }
        Ok(None)
    }

    /// Read the main-branch header at `height`, via the resolution table.
    pub fn get_bare_header_at(&self, height: u32) -> Result<Option<StoredHeader>, StoreError> {
        let Some(dup) = self.get_valid_dup_id_for_height(height) else {
            tracing::warn!(target: "chaindb::store", height, "headers DB has no block at height");
            return Ok(None);
        };
        self.get_bare_header(height, dup)
    }

    // ------------------------------------------------------------------
    // Reorg marking
    // ------------------------------------------------------------------

    /// Mark the header at `(height, dup)` as the main branch for its
    /// height. Membership of the head-height list is unchanged; only the
    /// preferred marker (and the resolution table) move.
    pub fn mark_block_header_valid(&self, height: u32, dup: u8) -> Result<bool, StoreError> {
        let env = self.env(DbSelect::Headers)?;
        let mut wtxn = env.write_txn()?;

        let Some(mut hhl) = self.get_stored_head_hgt_list_in(&wtxn, height)? else {
            tracing::warn!(target: "chaindb::store", height, "no head-height list to mark valid");
            return Ok(false);
        };

        if hhl.preferred_dup == Some(dup) {
            return Ok(true);
        }

        if !hhl.contains_dup(dup) {
            tracing::warn!(
                target: "chaindb::store",
                height,
                dup,
                "header was not found in head-height list"
            );
            return Ok(false);
        }

        hhl.set_preferred_dup(dup);
        self.put_stored_head_hgt_list_in(&mut wtxn, &hhl)?;
        wtxn.commit()?;
        self.set_valid_dup_id_for_height(height, dup, true);
        Ok(true)
    }

    /// Mark the header with `hash` as main-branch, resolving its height
    /// and dup from the stored row.
    pub fn mark_block_header_valid_by_hash(&self, hash: &BlockHash) -> Result<bool, StoreError> {
        let Some(sbh) = self.get_bare_header_by_hash(hash)? else {
            tracing::warn!(target: "chaindb::store", %hash, "invalid header hash");
            return Ok(false);
        };
        self.mark_block_header_valid(sbh.height, sbh.dup)
    }

    // ------------------------------------------------------------------
    // Scan
    // ------------------------------------------------------------------

    /// Invoke `callback(header, height, dup)` for every stored header, in
    /// hash order. A header whose recomputed hash disagrees with its key
    /// is reported with a warning and skipped; iteration continues.
    pub fn read_all_headers(
        &self,
        mut callback: impl FnMut(&Header, u32, u8),
    ) -> Result<(), StoreError> {
        let env = self.env(DbSelect::Headers)?;
        let db = self.db(DbSelect::Headers)?;
        let rtxn = env.read_txn()?;
        let mut cursor = db.cursor(&rtxn);

        let prefix = [KeyPrefix::HeadHash.as_u8()];
        let mut entry = cursor.seek_to_starts_with(&prefix)?;
        if entry.is_none() {
            tracing::warn!(target: "chaindb::store", "no headers in DB yet");
            return Ok(());
        }

        while let Some((key, value)) = entry {
            if key.len() != 33 {
                tracing::warn!(
                    target: "chaindb::store",
                    len = key.len(),
                    "header hash key is not 32 bytes"
                );
            } else {
                let mut hash_bytes = [0u8; 32];
                hash_bytes.copy_from_slice(&key[1..]);
                let stored_hash = BlockHash::from_byte_array(hash_bytes);

                let mut raw = value;
                match StoredHeader::decode_headers_value(&mut raw) {
                    Ok(sbh) => {
                        if sbh.hash() != stored_hash {
                            tracing::warn!(
                                target: "chaindb::store",
                                stored = %stored_hash,
                                computed = %sbh.hash(),
                                "corruption detected: header hash does not match its key"
                            );
                        }
                        callback(&sbh.header, sbh.height, sbh.dup);
                    }
                    Err(err) => {
                        tracing::warn!(target: "chaindb::store", %stored_hash, %err, "corrupt stored header");
                    }
                }
            }
            entry = cursor.advance_within(&prefix)?;
        }
        Ok(())
    }
}
