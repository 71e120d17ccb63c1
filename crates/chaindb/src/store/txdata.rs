//! Block, tx, and tx-out storage under the TXDATA key family.
//!
//! The two profiles diverge most here. SUPER decomposes every block into
//! a block row, tx rows, and tx-out rows sharing the block's 4-byte hgtX
//! key prefix, so a prefix walk reassembles the body. FULL stores each
//! block as one blob at the 5-byte key and answers tx-level reads by
//! parsing the blob.

use crate::error::StoreError;
use crate::schema::DbSelect;
use crate::store::BlockStore;
use chaindb_kv::{Cursor, RwTxn};
use chaindb_types::{
    BlkDataKey, BlkDataKind, KeyPrefix, Profile, StoredDbInfo, StoredHeader, StoredTx,
    StoredTxHints, StoredTxOut, TxSerVariant, ZcKey,
};
use bitcoin::block::Header;
use bitcoin::consensus::encode::{deserialize, deserialize_partial, VarInt};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Transaction, Txid};

/// Canonical placement of a block, resolved by the caller's chain
/// organizer when raw blocks are handed to a FULL store.
#[derive(Debug, Clone, Copy)]
pub struct BlockRef {
    /// Block height.
    pub height: u32,
    /// Duplicate-id at that height.
    pub dup: u8,
    /// Whether the block is on the active chain.
    pub main_branch: bool,
    /// Size of the block in bytes.
    pub num_bytes: u32,
}

impl BlockStore {
    // ------------------------------------------------------------------
    // SUPER writes
    // ------------------------------------------------------------------

    /// Insert a header and, when `with_blk_data` is set, its staged block
    /// body (block row, tx rows, tx-out rows, hint updates).
    ///
    /// SUPER only. Returns the assigned duplicate-id.
    pub fn put_stored_header(
        &self,
        sbh: &mut StoredHeader,
        with_blk_data: bool,
        update_dup_id: bool,
    ) -> Result<u8, StoreError> {
        self.require_profile(Profile::Super)?;

        let new_dup = self.put_bare_header(sbh, update_dup_id)?;
        if !with_blk_data {
            return Ok(new_dup);
        }

        let env = self.env(DbSelect::Blkdata)?;
        let mut wtxn = env.write_txn()?;

        let key = sbh.blk_data_key().encode();
        self.db(DbSelect::Blkdata)?.put(&mut wtxn, &key, &sbh.encode_blkdata_value())?;

        let tx_map = std::mem::take(&mut sbh.tx_map);
        for (idx, mut stx) in tx_map {
            stx.tx_index = idx;
            stx.height = sbh.height;
            stx.dup = sbh.dup;
            self.put_stored_tx_in(&mut wtxn, &mut stx, true)?;
            sbh.tx_map.insert(idx, stx);
        }

        if sbh.main_branch {
            let mut sdbi = self.get_db_info_in(&wtxn, DbSelect::Blkdata)?.unwrap_or_else(|| {
                StoredDbInfo::seed(
                    self.params.magic,
                    self.params.genesis_blk_hash,
                    self.params.profile,
                    self.params.prune,
                )
            });
            if sbh.height > sdbi.top_blk_hgt {
                sdbi.top_blk_hgt = sbh.height;
                sdbi.top_blk_hash = sbh.hash();
                self.put_db_info_in(&mut wtxn, DbSelect::Blkdata, &sdbi)?;
            }
        }

        wtxn.commit()?;
        Ok(new_dup)
    }

    /// Insert a tx row (plus hint bookkeeping and, when requested, its
    /// tx-out rows). The tx becomes the preferred candidate for its hash
    /// prefix. SUPER only.
    pub fn put_stored_tx(&self, stx: &mut StoredTx, with_tx_out: bool) -> Result<(), StoreError> {
        self.require_profile(Profile::Super)?;
        let env = self.env(DbSelect::Blkdata)?;
        let mut wtxn = env.write_txn()?;
        self.put_stored_tx_in(&mut wtxn, stx, with_tx_out)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Body of [`BlockStore::put_stored_tx`]; under SUPER the block-data,
    /// hint, and history tables share one environment, so the caller's
    /// transaction covers all of them.
    pub(crate) fn put_stored_tx_in(
        &self,
        wtxn: &mut RwTxn<'_>,
        stx: &mut StoredTx,
        with_tx_out: bool,
    ) -> Result<(), StoreError> {
        let prefix = stx.hash_prefix();
        let key6 = stx.bare_key();

        let mut hints = self
            .get_stored_tx_hints_in(wtxn, prefix)?
            .unwrap_or_else(|| StoredTxHints::empty(prefix));
        if hints.prefer(key6) {
            self.put_stored_tx_hints_in(wtxn, &hints)?;
        }

        self.db(DbSelect::Blkdata)?.put(wtxn, &stx.db_key(), &stx.encode_value())?;

        if with_tx_out {
            let stxo_map = std::mem::take(&mut stx.stxo_map);
            for (idx, mut stxo) in stxo_map {
                stxo.tx_version = stx.tx_version;
                stxo.height = stx.height;
                stxo.dup = stx.dup;
                stxo.tx_index = stx.tx_index;
                stxo.tx_out_index = idx;
                self.put_stored_tx_out_in(wtxn, &stxo)?;
                stx.stxo_map.insert(idx, stxo);
            }
        }
        Ok(())
    }

    /// Re-put every tx-out of `stx` after refreshing their placement
    /// fields from the tx.
    pub fn update_stored_tx(&self, stx: &mut StoredTx) -> Result<(), StoreError> {
        let env = self.env(self.schema().select(DbSelect::History))?;
        let mut wtxn = env.write_txn()?;
        let stxo_map = std::mem::take(&mut stx.stxo_map);
        for (idx, mut stxo) in stxo_map {
            stxo.tx_version = stx.tx_version;
            stxo.height = stx.height;
            stxo.dup = stx.dup;
            stxo.tx_index = stx.tx_index;
            stxo.tx_out_index = idx;
            self.put_stored_tx_out_in(&mut wtxn, &stxo)?;
            stx.stxo_map.insert(idx, stxo);
        }
        wtxn.commit()?;
        Ok(())
    }

    /// Insert one tx-out row. Routed to BLKDATA under SUPER and to the
    /// history sub-database under FULL.
    pub fn put_stored_tx_out(&self, stxo: &StoredTxOut) -> Result<(), StoreError> {
        let env = self.env(self.schema().select(DbSelect::History))?;
        let mut wtxn = env.write_txn()?;
        self.put_stored_tx_out_in(&mut wtxn, stxo)?;
        wtxn.commit()?;
        Ok(())
    }

    pub(crate) fn put_stored_tx_out_in(
        &self,
        wtxn: &mut RwTxn<'_>,
        stxo: &StoredTxOut,
    ) -> Result<(), StoreError> {
        let db = self.db(self.schema().select(DbSelect::History))?;
        Ok(db.put(wtxn, &stxo.db_key(), &stxo.encode_value())?)
    }

    // ------------------------------------------------------------------
    // FULL writes
    // ------------------------------------------------------------------

    /// Store a raw block blob at its 5-byte key. FULL only.
    ///
    /// The embedded header is parsed and resolved to its canonical
    /// placement through `resolve`; an unknown header is a logged miss.
    /// For a main-branch block the history metadata top advances when the
    /// height exceeds it. Returns the duplicate-id on success.
    pub fn put_raw_block_data(
        &self,
        raw_block: &[u8],
        resolve: impl Fn(&BlockHash) -> Option<BlockRef>,
    ) -> Result<Option<u8>, StoreError> {
        self.require_profile(Profile::Full)?;

        if raw_block.len() < 80 {
            tracing::warn!(target: "chaindb::store", len = raw_block.len(), "raw block shorter than a header");
            return Ok(None);
        }
        let header: Header = match deserialize(&raw_block[..80]) {
            Ok(h) => h,
            Err(err) => {
                tracing::warn!(target: "chaindb::store", %err, "unparseable raw block header");
                return Ok(None);
            }
        };
        let hash = header.block_hash();
        let Some(blk) = resolve(&hash) else {
            tracing::warn!(target: "chaindb::store", %hash, "no canonical placement for raw block");
            return Ok(None);
        };

        {
            let env = self.env(DbSelect::Blkdata)?;
            let mut wtxn = env.write_txn()?;
            let key = BlkDataKey::block(blk.height, blk.dup).encode();
            self.db(DbSelect::Blkdata)?.put(&mut wtxn, &key, raw_block)?;
            wtxn.commit()?;
        }

        if blk.main_branch {
            let env = self.env(DbSelect::History)?;
            let mut wtxn = env.write_txn()?;
            let mut sdbi = self.get_db_info_in(&wtxn, DbSelect::History)?.unwrap_or_else(|| {
                StoredDbInfo::seed(
                    self.params.magic,
                    self.params.genesis_blk_hash,
                    self.params.profile,
                    self.params.prune,
                )
            });
            if blk.height > sdbi.top_blk_hgt {
                sdbi.top_blk_hgt = blk.height;
                sdbi.top_blk_hash = hash;
                self.put_db_info_in(&mut wtxn, DbSelect::History, &sdbi)?;
                wtxn.commit()?;
            }
        }

        Ok(Some(blk.dup))
    }

    // ------------------------------------------------------------------
    // Header + body reads
    // ------------------------------------------------------------------

    /// Read the stored header (and optionally the block body) at
    /// `(height, dup)` from the block-data sub-database.
    pub fn get_stored_header(
        &self,
        height: u32,
        dup: u8,
        with_body: bool,
    ) -> Result<Option<StoredHeader>, StoreError> {
        match self.profile() {
            Profile::Super => self.get_stored_header_super(height, dup, with_body),
            Profile::Full => self.get_stored_header_full(height, dup, with_body),
        }
    }

    /// Read the stored header (and optionally the body) by hash. The
    /// hash is resolved through the headers sub-database first.
    pub fn get_stored_header_by_hash(
        &self,
        hash: &BlockHash,
        with_body: bool,
    ) -> Result<Option<StoredHeader>, StoreError> {
        let Some(bare) = self.get_bare_header_by_hash(hash)? else {
            tracing::warn!(target: "chaindb::store", %hash, "requested header that is not in DB");
            return Ok(None);
        };
        self.get_stored_header(bare.height, bare.dup, with_body)
    }

    fn get_stored_header_super(
        &self,
        height: u32,
        dup: u8,
        with_body: bool,
    ) -> Result<Option<StoredHeader>, StoreError> {
        let env = self.env(DbSelect::Blkdata)?;
        let db = self.db(DbSelect::Blkdata)?;
        let rtxn = env.read_txn()?;

        let blk_key = BlkDataKey::block(height, dup).encode();

        if !with_body {
            let Some(mut raw) = db.get(&rtxn, &blk_key)? else {
                tracing::warn!(target: "chaindb::store", height, dup, "header height and dup not in BLKDATA");
                return Ok(None);
            };
            return match StoredHeader::decode_blkdata_value(&mut raw) {
                Ok(mut sbh) => {
                    sbh.set_key_data(height, dup);
                    sbh.main_branch = self.get_valid_dup_id_for_height(height) == Some(dup);
                    Ok(Some(sbh))
                }
                Err(err) => {
                    tracing::warn!(target: "chaindb::store", height, dup, %err, "corrupt block row");
                    Ok(None)
                }
            };
        }

        let mut cursor = db.cursor(&rtxn);
        let Some((_, first_val)) = cursor.seek_to_exact(&blk_key)? else {
            tracing::warn!(target: "chaindb::store", height, dup, "header height and dup not in BLKDATA");
            return Ok(None);
        };

        let mut raw = first_val;
        let mut sbh = match StoredHeader::decode_blkdata_value(&mut raw) {
            Ok(sbh) => sbh,
            Err(err) => {
                tracing::warn!(target: "chaindb::store", height, dup, %err, "corrupt block row");
                return Ok(None);
            }
        };
        sbh.set_key_data(height, dup);
        sbh.main_branch = self.get_valid_dup_id_for_height(height) == Some(dup);

        // Walk every row sharing the block's hgtX prefix and slot it into
        // the right tx.
        let mut entry = cursor.advance_within(&blk_key)?;
        while let Some((key, value)) = entry {
            match BlkDataKey::decode(key) {
                Some(bk) if bk.kind() == BlkDataKind::Tx => {
                    let idx = bk.tx_index.unwrap_or_default();
                    if u32::from(idx) >= sbh.num_tx {
                        tracing::warn!(target: "chaindb::store", height, idx, "invalid tx index in block walk");
                        return Ok(None);
                    }
                    let mut raw = value;
                    match StoredTx::decode_value(&mut raw) {
                        Ok(mut stx) => {
                            stx.height = height;
                            stx.dup = dup;
                            stx.tx_index = idx;
                            sbh.tx_map.insert(idx, stx);
                        }
                        Err(err) => {
                            tracing::warn!(target: "chaindb::store", height, idx, %err, "corrupt tx row");
                        }
                    }
                }
                Some(bk) if bk.kind() == BlkDataKind::TxOut => {
                    let idx = bk.tx_index.unwrap_or_default();
                    let out_idx = bk.tx_out_index.unwrap_or_default();
                    let mut raw = value;
                    match StoredTxOut::decode_value(&mut raw) {
                        Ok(mut stxo) => {
                            stxo.height = height;
                            stxo.dup = dup;
                            stxo.tx_index = idx;
                            stxo.tx_out_index = out_idx;
                            if let Some(stx) = sbh.tx_map.get_mut(&idx) {
                                stxo.parent_hash = Some(stx.hash);
                                stx.stxo_map.insert(out_idx, stxo);
                            }
                        }
                        Err(err) => {
                            tracing::warn!(target: "chaindb::store", height, idx, out_idx, %err, "corrupt txout row");
                        }
                    }
                }
                _ => {
                    tracing::warn!(target: "chaindb::store", "unexpected BLKDATA entry while iterating");
                    return Ok(None);
                }
            }
            entry = cursor.advance_within(&blk_key)?;
        }
        Ok(Some(sbh))
    }

    fn get_stored_header_full(
        &self,
        height: u32,
        dup: u8,
        with_body: bool,
    ) -> Result<Option<StoredHeader>, StoreError> {
        let env = self.env(DbSelect::Blkdata)?;
        let rtxn = env.read_txn()?;
        let blk_key = BlkDataKey::block(height, dup).encode();
        let Some(raw) = self.db(DbSelect::Blkdata)?.get(&rtxn, &blk_key)? else {
            tracing::warn!(target: "chaindb::store", height, dup, "header height and dup not in BLKDATA");
            return Ok(None);
        };

        let Some((header, num_tx, mut txs)) = parse_block_blob(raw) else {
            tracing::warn!(target: "chaindb::store", height, dup, "unparseable block blob");
            return Ok(None);
        };

        let mut sbh = StoredHeader::new(header, height);
        sbh.set_key_data(height, dup);
        sbh.num_bytes = raw.len() as u32;
        sbh.num_tx = num_tx as u32;
        sbh.main_branch = self.get_valid_dup_id_for_height(height) == Some(dup);

        if with_body {
            for idx in 0..num_tx {
                let (tx, consumed) = match deserialize_partial::<Transaction>(txs) {
                    Ok(ok) => ok,
                    Err(err) => {
                        tracing::warn!(target: "chaindb::store", height, idx, %err, "corrupt tx in block blob");
                        return Ok(None);
                    }
                };
                txs = &txs[consumed..];
                sbh.tx_map.insert(idx as u16, StoredTx::from_tx(&tx, height, dup, idx as u16));
            }
        }
        Ok(Some(sbh))
    }

    // ------------------------------------------------------------------
    // Tx reads
    // ------------------------------------------------------------------

    /// Look a tx up by hash, resolving prefix collisions through the hint
    /// table and full-hash comparison.
    pub fn get_stored_tx_by_hash(&self, hash: &Txid) -> Result<Option<StoredTx>, StoreError> {
        match self.profile() {
            Profile::Super => {
                Ok(self.seek_tx_super(hash, true)?.and_then(|(_, stx)| stx))
            }
            Profile::Full => {
                let Some((key6, tx)) = self.seek_tx_full(hash)? else { return Ok(None) };
                let bk = BlkDataKey::decode_hint(&key6);
                Ok(Some(StoredTx::from_tx(
                    &tx,
                    bk.height(),
                    bk.dup(),
                    bk.tx_index.unwrap_or_default(),
                )))
            }
        }
    }

    /// Resolve a tx hash to its 6-byte block-data key.
    pub fn get_db_key_for_tx_hash(&self, hash: &Txid) -> Result<Option<[u8; 6]>, StoreError> {
        match self.profile() {
            Profile::Super => Ok(self.seek_tx_super(hash, false)?.map(|(key6, _)| key6)),
            Profile::Full => Ok(self.seek_tx_full(hash)?.map(|(key6, _)| key6)),
        }
    }

    /// FULL hash seek: candidate keys come from the hint sub-database and
    /// each candidate's block blob is walked to compare the full hash.
    fn seek_tx_full(&self, hash: &Txid) -> Result<Option<([u8; 6], Transaction)>, StoreError> {
        let hints = self.get_hints_for_tx_hash(hash)?;
        if hints.num_hints() == 0 {
            return Ok(None);
        }

        for key6 in &hints.db_key_list {
            let bk = BlkDataKey::decode_hint(key6);
            if self.get_valid_dup_id_for_height(bk.height()) != Some(bk.dup())
                && hints.num_hints() > 1
            {
                continue;
            }

            let Some(tx) = self.get_full_tx_copy(*key6)? else {
                tracing::warn!(
                    target: "chaindb::store",
                    hint = %hex_key(key6),
                    "hinted tx does not exist in DB"
                );
                continue;
            };
            if tx.compute_txid() == *hash {
                return Ok(Some((*key6, tx)));
            }
        }
        Ok(None)
    }

    /// SUPER hash seek: each candidate's tx row is read in place, the
    /// stored hash compared at value offset 2, and the body optionally
    /// collected from the rows that follow.
    fn seek_tx_super(
        &self,
        hash: &Txid,
        with_body: bool,
    ) -> Result<Option<([u8; 6], Option<StoredTx>)>, StoreError> {
        let hints = self.get_hints_for_tx_hash(hash)?;
        if hints.num_hints() == 0 {
            return Ok(None);
        }

        let env = self.env(DbSelect::Blkdata)?;
        let db = self.db(DbSelect::Blkdata)?;
        let rtxn = env.read_txn()?;
        let mut cursor = db.cursor(&rtxn);

        for key6 in &hints.db_key_list {
            let bk = BlkDataKey::decode_hint(key6);
            if self.get_valid_dup_id_for_height(bk.height()) != Some(bk.dup())
                && hints.num_hints() > 1
            {
                continue;
            }

            let key7 = bk.encode();
            let Some((first_key, first_val)) = cursor.seek_to_exact(&key7)? else {
                tracing::warn!(
                    target: "chaindb::store",
                    hint = %hex_key(key6),
                    "hinted tx does not exist in DB"
                );
                continue;
            };

            if first_val.len() < 34 {
                tracing::warn!(target: "chaindb::store", "tx row shorter than its header");
                continue;
            }
            if &first_val[2..34] != hash.as_byte_array() {
                continue;
            }

            if !with_body {
                return Ok(Some((*key6, None)));
            }
            let stx = self.collect_stored_tx(&mut cursor, first_key, first_val, bk)?;
            return Ok(Some((*key6, stx)));
        }
        Ok(None)
    }

    /// Collect a tx row and the tx-out rows following it under the same
    /// 7-byte prefix. The cursor must rest on the tx row.
    fn collect_stored_tx(
        &self,
        cursor: &mut Cursor<'_>,
        first_key: &[u8],
        first_val: &[u8],
        bk: BlkDataKey,
    ) -> Result<Option<StoredTx>, StoreError> {
        let tx_prefix = bk.encode();
        let mut stx: Option<StoredTx> = None;

        let mut entry = Some((first_key, first_val));
        while let Some((key, value)) = entry {
            if !key.starts_with(&tx_prefix) {
                break;
            }
            match BlkDataKey::decode(key).map(|k| (k, k.kind())) {
                Some((_, BlkDataKind::Tx)) => {
                    let mut raw = value;
                    match StoredTx::decode_value(&mut raw) {
                        Ok(mut decoded) => {
                            decoded.height = bk.height();
                            decoded.dup = bk.dup();
                            decoded.tx_index = bk.tx_index.unwrap_or_default();
                            stx = Some(decoded);
                        }
                        Err(err) => {
                            tracing::warn!(target: "chaindb::store", %err, "corrupt tx row");
                            return Ok(None);
                        }
                    }
                }
                Some((out_key, BlkDataKind::TxOut)) => {
                    let mut raw = value;
                    match StoredTxOut::decode_value(&mut raw) {
                        Ok(mut stxo) => {
                            stxo.height = out_key.height();
                            stxo.dup = out_key.dup();
                            stxo.tx_index = out_key.tx_index.unwrap_or_default();
                            stxo.tx_out_index = out_key.tx_out_index.unwrap_or_default();
                            if let Some(parent) = stx.as_mut() {
                                stxo.parent_hash = Some(parent.hash);
                                parent.stxo_map.insert(stxo.tx_out_index, stxo);
                            }
                        }
                        Err(err) => {
                            tracing::warn!(target: "chaindb::store", %err, "corrupt txout row");
                        }
                    }
                }
                _ => {
                    tracing::warn!(target: "chaindb::store", "unexpected BLKDATA entry while iterating");
                    return Ok(None);
                }
            }
            entry = cursor.advance_within(&[KeyPrefix::TxData.as_u8()])?;
        }
        Ok(stx)
    }

    /// Read a tx at `(height, tx_index)` on the main branch.
    pub fn get_stored_tx(
        &self,
        height: u32,
        tx_index: u16,
        with_tx_out: bool,
    ) -> Result<Option<StoredTx>, StoreError> {
        let Some(dup) = self.get_valid_dup_id_for_height(height) else {
            tracing::warn!(target: "chaindb::store", height, "headers DB has no block at height");
            return Ok(None);
        };
        self.get_stored_tx_at(height, dup, tx_index, with_tx_out)
    }

    /// Read a tx at an explicit `(height, dup, tx_index)`.
    pub fn get_stored_tx_at(
        &self,
        height: u32,
        dup: u8,
        tx_index: u16,
        with_tx_out: bool,
    ) -> Result<Option<StoredTx>, StoreError> {
        let bk = BlkDataKey::tx(height, dup, tx_index);
        match self.profile() {
            Profile::Super => {
                let env = self.env(DbSelect::Blkdata)?;
                let db = self.db(DbSelect::Blkdata)?;
                let rtxn = env.read_txn()?;

                if !with_tx_out {
                    let Some(mut raw) = db.get(&rtxn, &bk.encode())? else {
                        tracing::warn!(target: "chaindb::store", height, dup, tx_index, "BLKDATA DB does not have requested tx");
                        return Ok(None);
                    };
                    return match StoredTx::decode_value(&mut raw) {
                        Ok(mut stx) => {
                            stx.height = height;
                            stx.dup = dup;
                            stx.tx_index = tx_index;
                            Ok(Some(stx))
                        }
                        Err(err) => {
                            tracing::warn!(target: "chaindb::store", height, dup, tx_index, %err, "corrupt tx row");
                            Ok(None)
                        }
                    };
                }

                let mut cursor = db.cursor(&rtxn);
                let Some((first_key, first_val)) = cursor.seek_to_exact(&bk.encode())? else {
                    tracing::warn!(target: "chaindb::store", height, dup, tx_index, "BLKDATA DB does not have requested tx");
                    return Ok(None);
                };
                self.collect_stored_tx(&mut cursor, first_key, first_val, bk)
            }
            Profile::Full => {
                let mut key6 = [0u8; 6];
                key6.copy_from_slice(&bk.encode_bare());
                let Some(tx) = self.get_full_tx_copy(key6)? else {
                    return Ok(None);
                };
                Ok(Some(StoredTx::from_tx(&tx, height, dup, tx_index)))
            }
        }
    }

    /// Read a tx by a 6-byte bare or 7-byte prefixed block-data key.
    pub fn get_stored_tx_by_db_key(&self, key: &[u8]) -> Result<Option<StoredTx>, StoreError> {
        match key.len() {
            6 | 7 => match BlkDataKey::decode(key) {
                Some(bk) if bk.kind() == BlkDataKind::Tx => self.get_stored_tx_at(
                    bk.height(),
                    bk.dup(),
                    bk.tx_index.unwrap_or_default(),
                    true,
                ),
                _ => {
                    tracing::warn!(target: "chaindb::store", key = %hex_key(key), "unrecognized tx db key");
                    Ok(None)
                }
            },
            len => {
                tracing::warn!(target: "chaindb::store", len, "unrecognized tx db key length");
                Ok(None)
            }
        }
    }

    /// Reconstruct the full transaction behind a 6-byte key.
    ///
    /// Under FULL the containing block blob is walked to the tx index.
    /// Under SUPER the decomposed rows are collected; a FRAGGED body that
    /// cannot be reassembled is a logged miss.
    pub fn get_full_tx_copy(&self, key6: [u8; 6]) -> Result<Option<Transaction>, StoreError> {
        let bk = BlkDataKey::decode_hint(&key6);
        match self.profile() {
            Profile::Super => {
                let Some(stx) = self.get_stored_tx_at(
                    bk.height(),
                    bk.dup(),
                    bk.tx_index.unwrap_or_default(),
                    true,
                )?
                else {
                    return Ok(None);
                };
                if stx.variant == TxSerVariant::Fragged {
                    tracing::warn!(
                        target: "chaindb::store",
                        key = %hex_key(&key6),
                        "requested full tx but stored body is fragged"
                    );
                    return Ok(None);
                }
                match stx.tx() {
                    Ok(tx) => Ok(Some(tx)),
                    Err(err) => {
                        tracing::warn!(target: "chaindb::store", %err, "corrupt tx body");
                        Ok(None)
                    }
                }
            }
            Profile::Full => {
                let env = self.env(DbSelect::Blkdata)?;
                let rtxn = env.read_txn()?;
                let blk_key = BlkDataKey::block(bk.height(), bk.dup()).encode();
                let Some(raw) = self.db(DbSelect::Blkdata)?.get(&rtxn, &blk_key)? else {
                    tracing::warn!(target: "chaindb::store", key = %hex_key(&key6), "tx key does not exist in BLKDATA");
                    return Ok(None);
                };

                let Some((_, num_tx, mut txs)) = parse_block_blob(raw) else {
                    tracing::warn!(target: "chaindb::store", "unparseable block blob");
                    return Ok(None);
                };
                let tx_index = u64::from(bk.tx_index.unwrap_or_default());
                if tx_index >= num_tx {
                    tracing::warn!(target: "chaindb::store", tx_index, num_tx, "tx index beyond block tx count");
                    return Ok(None);
                }

                for _ in 0..tx_index {
                    match deserialize_partial::<Transaction>(txs) {
                        Ok((_, consumed)) => txs = &txs[consumed..],
                        Err(err) => {
                            tracing::warn!(target: "chaindb::store", %err, "corrupt tx in block blob");
                            return Ok(None);
                        }
                    }
                }
                match deserialize_partial::<Transaction>(txs) {
                    Ok((tx, _)) => Ok(Some(tx)),
                    Err(err) => {
                        tracing::warn!(target: "chaindb::store", %err, "corrupt tx in block blob");
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Reconstruct the full main-branch transaction at `(height,
    /// tx_index)`.
    pub fn get_full_tx_copy_at(
        &self,
        height: u32,
        tx_index: u16,
    ) -> Result<Option<Transaction>, StoreError> {
        let Some(dup) = self.get_valid_dup_id_for_height(height) else {
            tracing::warn!(target: "chaindb::store", height, "headers DB has no block at height");
            return Ok(None);
        };
        let mut key6 = [0u8; 6];
        key6.copy_from_slice(&BlkDataKey::tx(height, dup, tx_index).encode_bare());
        self.get_full_tx_copy(key6)
    }

    // ------------------------------------------------------------------
    // Hash lookups
    // ------------------------------------------------------------------

    /// Read the hash of the tx behind a 6-byte key without materializing
    /// the whole record.
    pub fn get_tx_hash_for_db_key(&self, key6: [u8; 6]) -> Result<Option<Txid>, StoreError> {
        match self.profile() {
            Profile::Super => {
                let env = self.env(DbSelect::Blkdata)?;
                let rtxn = env.read_txn()?;
                let key = if ZcKey::is_zc(&key6) {
                    KeyPrefix::ZcData.key(&key6)
                } else {
                    KeyPrefix::TxData.key(&key6)
                };
                let Some(raw) = self.db(DbSelect::Blkdata)?.get(&rtxn, &key)? else {
                    tracing::warn!(target: "chaindb::store", key = %hex_key(&key6), "tx key does not exist in BLKDATA");
                    return Ok(None);
                };
                Ok(txid_at_offset_2(raw))
            }
            Profile::Full => {
                if ZcKey::is_zc(&key6) {
                    let env = self.env(DbSelect::History)?;
                    let rtxn = env.read_txn()?;
                    let key = KeyPrefix::ZcData.key(&key6);
                    let Some(raw) = self.db(DbSelect::History)?.get(&rtxn, &key)? else {
                        tracing::warn!(target: "chaindb::store", key = %hex_key(&key6), "zc tx key does not exist");
                        return Ok(None);
                    };
                    return Ok(txid_at_offset_2(raw));
                }

                // Tracked txs carry a summary row in the history DB:
                // stxo count u32 | tx hash. Fall back to the block blob.
                {
                    let env = self.env(DbSelect::History)?;
                    let rtxn = env.read_txn()?;
                    let key = KeyPrefix::TxData.key(&key6);
                    if let Some(raw) = self.db(DbSelect::History)?.get(&rtxn, &key)? {
                        if raw.len() >= 36 {
                            let mut bytes = [0u8; 32];
                            bytes.copy_from_slice(&raw[4..36]);
                            return Ok(Some(Txid::from_byte_array(bytes)));
                        }
                    }
                }
                Ok(self.get_full_tx_copy(key6)?.map(|tx| tx.compute_txid()))
            }
        }
    }

    /// Hash of the main-branch tx at `(height, tx_index)`.
    pub fn get_tx_hash_for_height_and_index(
        &self,
        height: u32,
        tx_index: u16,
    ) -> Result<Option<Txid>, StoreError> {
        let Some(dup) = self.get_valid_dup_id_for_height(height) else {
            tracing::warn!(target: "chaindb::store", height, "headers DB has no block at height");
            return Ok(None);
        };
        self.get_tx_hash_for_height_dup_and_index(height, dup, tx_index)
    }

    /// Hash of the tx at an explicit `(height, dup, tx_index)`.
    pub fn get_tx_hash_for_height_dup_and_index(
        &self,
        height: u32,
        dup: u8,
        tx_index: u16,
    ) -> Result<Option<Txid>, StoreError> {
        let mut key6 = [0u8; 6];
        key6.copy_from_slice(&BlkDataKey::tx(height, dup, tx_index).encode_bare());
        self.get_tx_hash_for_db_key(key6)
    }

    /// Number of tx-outs of the tx behind a 6-byte key.
    pub fn get_stxo_count_for_tx(&self, key6: [u8; 6]) -> Result<Option<u32>, StoreError> {
        if ZcKey::is_zc(&key6) {
            let Ok(zc_key) = ZcKey::from_bytes(&key6) else { return Ok(None) };
            return Ok(self
                .get_stored_zc_tx(&zc_key)?
                .map(|(stx, _)| u32::from(stx.num_tx_out)));
        }

        match self.profile() {
            Profile::Super => {
                let bk = BlkDataKey::decode_hint(&key6);
                let Some(stx) = self.get_stored_tx_at(
                    bk.height(),
                    bk.dup(),
                    bk.tx_index.unwrap_or_default(),
                    true,
                )?
                else {
                    tracing::warn!(target: "chaindb::store", key = %hex_key(&key6), "no tx data at key");
                    return Ok(None);
                };
                match stx.variant {
                    TxSerVariant::Full => Ok(Some(u32::from(stx.num_tx_out))),
                    TxSerVariant::Fragged => Ok(Some(stx.stxo_map.len() as u32)),
                }
            }
            Profile::Full => {
                {
                    let env = self.env(DbSelect::History)?;
                    let rtxn = env.read_txn()?;
                    let key = KeyPrefix::TxData.key(&key6);
                    if let Some(raw) = self.db(DbSelect::History)?.get(&rtxn, &key)? {
                        if raw.len() >= 4 {
                            return Ok(Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])));
                        }
                    }
                }
                Ok(self.get_full_tx_copy(key6)?.map(|tx| tx.output.len() as u32))
            }
        }
    }

    // ------------------------------------------------------------------
    // Tx-out reads
    // ------------------------------------------------------------------

    /// Read a tx-out by its 8-byte bare key.
    pub fn get_stored_tx_out(&self, key8: &[u8; 8]) -> Result<Option<StoredTxOut>, StoreError> {
        let Some(bk) = BlkDataKey::decode(key8) else {
            tracing::warn!(target: "chaindb::store", "malformed txout key");
            return Ok(None);
        };

        let fill = |mut stxo: StoredTxOut| {
            stxo.height = bk.height();
            stxo.dup = bk.dup();
            stxo.tx_index = bk.tx_index.unwrap_or_default();
            stxo.tx_out_index = bk.tx_out_index.unwrap_or_default();
            stxo
        };

        // SUPER: the row is in BLKDATA. FULL: tracked tx-outs live in the
        // history DB; fall back to walking the block for the rest.
        let db_sel = self.schema().select(DbSelect::History);
        {
            let env = self.env(db_sel)?;
            let rtxn = env.read_txn()?;
            let key = KeyPrefix::TxData.key(key8);
            if let Some(mut raw) = self.db(db_sel)?.get(&rtxn, &key)? {
                return match StoredTxOut::decode_value(&mut raw) {
                    Ok(stxo) => Ok(Some(fill(stxo))),
                    Err(err) => {
                        tracing::warn!(target: "chaindb::store", %err, "corrupt txout row");
                        Ok(None)
                    }
                };
            }
        }

        if self.profile() == Profile::Super {
            tracing::warn!(target: "chaindb::store", "BLKDATA DB does not have the requested txout");
            return Ok(None);
        }

        let mut key6 = [0u8; 6];
        key6.copy_from_slice(&key8[..6]);
        let Some(tx) = self.get_full_tx_copy(key6)? else {
            tracing::warn!(target: "chaindb::store", "BLKDATA DB does not have the requested txout");
            return Ok(None);
        };
        let out_idx = bk.tx_out_index.unwrap_or_default();
        let Some(txo) = tx.output.get(usize::from(out_idx)) else {
            tracing::warn!(target: "chaindb::store", out_idx, "txout index beyond tx output count");
            return Ok(None);
        };
        let mut stxo = StoredTxOut::from_tx_out(txo);
        stxo.parent_hash = Some(tx.compute_txid());
        stxo.tx_version = (tx.version.0 as u8) & 0x03;
        Ok(Some(fill(stxo)))
    }

    /// Read a tx-out by its components on an explicit branch.
    pub fn get_stored_tx_out_at(
        &self,
        height: u32,
        dup: u8,
        tx_index: u16,
        tx_out_index: u16,
    ) -> Result<Option<StoredTxOut>, StoreError> {
        let mut key8 = [0u8; 8];
        key8.copy_from_slice(&BlkDataKey::tx_out(height, dup, tx_index, tx_out_index).encode_bare());
        self.get_stored_tx_out(&key8)
    }

    /// Read a main-branch tx-out by its components.
    pub fn get_stored_tx_out_main(
        &self,
        height: u32,
        tx_index: u16,
        tx_out_index: u16,
    ) -> Result<Option<StoredTxOut>, StoreError> {
        let Some(dup) = self.get_valid_dup_id_for_height(height) else {
            tracing::warn!(target: "chaindb::store", height, "headers DB has no block at height");
            return Ok(None);
        };
        self.get_stored_tx_out_at(height, dup, tx_index, tx_out_index)
    }
}

/// Split a raw block blob into its header, tx count, and tx region.
fn parse_block_blob(raw: &[u8]) -> Option<(Header, u64, &[u8])> {
    if raw.len() < 81 {
        return None;
    }
    let header: Header = deserialize(&raw[..80]).ok()?;
    let (count, consumed) = deserialize_partial::<VarInt>(&raw[80..]).ok()?;
    Some((header, count.0, &raw[80 + consumed..]))
}

/// Read the tx hash stored at value offset 2, after the flags field.
fn txid_at_offset_2(raw: &[u8]) -> Option<Txid> {
    if raw.len() < 34 {
        tracing::warn!(target: "chaindb::store", len = raw.len(), "tx row shorter than its header");
        return None;
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&raw[2..34]);
    Some(Txid::from_byte_array(bytes))
}

fn hex_key(key: &[u8]) -> String {
    key.iter().map(|b| format!("{b:02x}")).collect()
}
