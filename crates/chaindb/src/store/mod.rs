//! The block store: lifecycle, metadata, and the put/get protocols.

use crate::error::StoreError;
use crate::schema::{DbSelect, Schema};
use chaindb_kv::{DatabaseEnv, EnvArguments, RoTxn, RwTxn, SubDb};
use chaindb_types::{DbValue, Profile, PruneType, StoredDbInfo};
use bitcoin::{BlockHash, Txid};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;

mod headers;
mod hints;
mod history;
mod txdata;
pub use txdata::BlockRef;
mod zc;

/// Parameters fixed at open and re-verified on every reopen.
#[derive(Debug, Clone)]
pub struct OpenParams {
    /// Directory holding the store's environments.
    pub base_dir: PathBuf,
    /// Genesis block hash; seeds `top_blk_hash` in fresh metadata.
    pub genesis_blk_hash: BlockHash,
    /// Genesis coinbase tx hash, exposed to collaborators.
    pub genesis_tx_hash: Txid,
    /// Chain magic bytes.
    pub magic: [u8; 4],
    /// Node profile.
    pub profile: Profile,
    /// Prune policy.
    pub prune: PruneType,
    /// Memory-map size override, mainly for tests.
    pub map_size: Option<usize>,
}

/// The typed blockchain object store.
///
/// One instance owns the LMDB environments for its profile, the in-memory
/// height→dup resolution table, and the readiness predicate handed to the
/// constructor. All operations take `&self`; the engine serializes
/// writers per environment.
pub struct BlockStore {
    params: OpenParams,
    schema: Schema,
    envs: BTreeMap<&'static str, DatabaseEnv>,
    dbs: BTreeMap<DbSelect, SubDb>,
    /// dup of the main-branch header per height; `u8::MAX` marks unknown.
    valid_dup_by_height: RwLock<Vec<u8>>,
    ready: Box<dyn Fn() -> bool + Send + Sync>,
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("params", &self.params)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl BlockStore {
    /// Open (creating if absent) the store described by `params`.
    ///
    /// The readiness predicate is not consulted by the store itself; it
    /// is exposed to collaborators through [`BlockStore::is_ready`].
    ///
    /// Fails with [`StoreError::ProfileMismatch`] when the on-disk layout
    /// belongs to the other profile, and with
    /// [`StoreError::MagicMismatch`] / [`StoreError::PruneMismatch`] when
    /// existing metadata disagrees with `params`.
    pub fn open(
        params: OpenParams,
        ready: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Result<Self, StoreError> {
        if params.magic == [0; 4] {
            return Err(StoreError::Config("magic bytes not set"));
        }

        tracing::info!(
            target: "chaindb::store",
            base_dir = %params.base_dir.display(),
            profile = ?params.profile,
            "opening databases"
        );

        let schema = Schema::new(params.profile);
        let (envs, dbs) = Self::open_databases(&params, schema)?;

        let store = Self {
            params,
            schema,
            envs,
            dbs,
            valid_dup_by_height: RwLock::new(Vec::new()),
            ready: Box::new(ready),
        };
        store.seed_or_verify_db_infos()?;
        store.load_valid_dup_ids()?;
        Ok(store)
    }

    /// Open every environment and named database the profile needs,
    /// failing early on a profile mismatch artifact.
    fn open_databases(
        params: &OpenParams,
        schema: Schema,
    ) -> Result<(BTreeMap<&'static str, DatabaseEnv>, BTreeMap<DbSelect, SubDb>), StoreError> {
        std::fs::create_dir_all(&params.base_dir)?;

        let mut args = EnvArguments::new().with_max_dbs(4);
        if let Some(map_size) = params.map_size {
            args = args.with_map_size(map_size);
        }

        if schema.profile() == Profile::Super && params.base_dir.join("headers").exists() {
            tracing::error!(
                target: "chaindb::store",
                "requested supernode but the store on disk is fullnode"
            );
            return Err(StoreError::ProfileMismatch);
        }

        let mut envs = BTreeMap::new();
        for name in schema.env_names() {
            let env = DatabaseEnv::open(&params.base_dir.join(name), args)?;
            if schema.profile() == Profile::Full && *name == "blocks" {
                // A supernode store keeps a "blkdata" table with a
                // metadata row inside the blocks environment; its
                // presence means this store was built as supernode.
                let rtxn = env.read_txn()?;
                if let Some(db) = env.open_db(&rtxn, "blkdata")? {
                    if db.get(&rtxn, &StoredDbInfo::db_key())?.is_some() {
                        tracing::error!(
                            target: "chaindb::store",
                            "requested fullnode but the store on disk is supernode"
                        );
                        return Err(StoreError::ProfileMismatch);
                    }
                }
            }
            envs.insert(*name, env);
        }

        let mut dbs = BTreeMap::new();
        for db in [DbSelect::Headers, DbSelect::Blkdata, DbSelect::History, DbSelect::Txhints] {
            let Some(env) = envs.get(schema.env_name(db)) else {
                return Err(StoreError::Closed);
            };
            let mut wtxn = env.write_txn()?;
            let sub = env.create_db(&mut wtxn, schema.table_name(db))?;
            wtxn.commit()?;
            dbs.insert(db, sub);
        }

        Ok((envs, dbs))
    }

    /// Seed fresh metadata rows, or verify existing ones against the open
    /// parameters.
    fn seed_or_verify_db_infos(&self) -> Result<(), StoreError> {
        let carriers: &[DbSelect] = match self.schema.profile() {
            Profile::Super => &[DbSelect::Headers, DbSelect::Blkdata],
            Profile::Full => &[DbSelect::Headers, DbSelect::History],
        };

        for &db in carriers {
            let env = self.env(db)?;
            let mut wtxn = env.write_txn()?;
            match self.get_db_info_in(&wtxn, db)? {
                None => {
                    let seed = StoredDbInfo::seed(
                        self.params.magic,
                        self.params.genesis_blk_hash,
                        self.params.profile,
                        self.params.prune,
                    );
                    self.put_db_info_in(&mut wtxn, db, &seed)?;
                    wtxn.commit()?;
                }
                Some(sdbi) => {
                    if sdbi.magic != self.params.magic {
                        return Err(StoreError::MagicMismatch);
                    }
                    if sdbi.profile != self.params.profile {
                        tracing::error!(
                            target: "chaindb::store",
                            on_disk = ?sdbi.profile,
                            requested = ?self.params.profile,
                            "mismatch in DB type"
                        );
                        return Err(StoreError::ProfileMismatch);
                    }
                    if sdbi.prune != self.params.prune {
                        return Err(StoreError::PruneMismatch);
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether the store is open.
    pub fn is_open(&self) -> bool {
        !self.envs.is_empty()
    }

    /// The readiness predicate handed to the constructor.
    pub fn is_ready(&self) -> bool {
        (self.ready)()
    }

    /// The open parameters.
    pub fn params(&self) -> &OpenParams {
        &self.params
    }

    /// The active profile.
    pub const fn profile(&self) -> Profile {
        self.schema.profile()
    }

    /// Close every environment. Safe to call redundantly; later
    /// operations fail with [`StoreError::Closed`].
    pub fn close(&mut self) {
        self.dbs.clear();
        for (_, env) in std::mem::take(&mut self.envs) {
            env.close();
        }
    }

    /// Close, delete the underlying files, and reopen with the same
    /// parameters.
    pub fn destroy_and_reset(&mut self) -> Result<(), StoreError> {
        self.close();
        for name in self.schema.env_names() {
            let path = self.params.base_dir.join(name);
            if path.exists() {
                std::fs::remove_dir_all(path)?;
            }
        }

        let (envs, dbs) = Self::open_databases(&self.params, self.schema)?;
        self.envs = envs;
        self.dbs = dbs;
        self.valid_dup_by_height.write().clear();
        self.seed_or_verify_db_infos()?;
        self.load_valid_dup_ids()?;
        Ok(())
    }

    /// Erase every key in the headers sub-database and re-seed its
    /// metadata row. The in-memory height→dup table is reset with it.
    pub fn nuke_headers_db(&self) -> Result<(), StoreError> {
        tracing::info!(target: "chaindb::store", "destroying headers DB, to be rebuilt");

        let env = self.env(DbSelect::Headers)?;
        let db = self.db(DbSelect::Headers)?;
        let mut wtxn = env.write_txn()?;
        db.clear(&mut wtxn)?;
        let seed = StoredDbInfo::seed(
            self.params.magic,
            self.params.genesis_blk_hash,
            self.params.profile,
            self.params.prune,
        );
        self.put_db_info_in(&mut wtxn, DbSelect::Headers, &seed)?;
        wtxn.commit()?;

        self.valid_dup_by_height.write().clear();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sub-database plumbing
    // ------------------------------------------------------------------

    pub(crate) fn env(&self, db: DbSelect) -> Result<&DatabaseEnv, StoreError> {
        self.envs.get(self.schema.env_name(db)).ok_or(StoreError::Closed)
    }

    pub(crate) fn db(&self, db: DbSelect) -> Result<SubDb, StoreError> {
        self.dbs.get(&db).copied().ok_or(StoreError::Closed)
    }

    pub(crate) const fn schema(&self) -> Schema {
        self.schema
    }

    /// Fail unless the active profile is `required`.
    pub(crate) fn require_profile(&self, required: Profile) -> Result<(), StoreError> {
        if self.schema.profile() == required {
            Ok(())
        } else {
            Err(StoreError::SchemaMisuse { required })
        }
    }

    pub(crate) fn dup_table(&self) -> &RwLock<Vec<u8>> {
        &self.valid_dup_by_height
    }

    // ------------------------------------------------------------------
    // DBInfo
    // ------------------------------------------------------------------

    /// Read the metadata row of `db`.
    ///
    /// The select is schema-normalized first, so asking for HISTORY under
    /// SUPER reads the shared block-data row. Asking for a sub-database
    /// that carries no metadata under the active profile (BLKDATA under
    /// FULL, TXHINTS under FULL) is a schema misuse.
    pub fn get_db_info(&self, db: DbSelect) -> Result<Option<StoredDbInfo>, StoreError> {
        let db = self.schema.select(db);
        if !self.schema.has_db_info(db) {
            return Err(StoreError::NoDbInfo(db));
        }
        let rtxn = self.env(db)?.read_txn()?;
        self.get_db_info_in(&rtxn, db)
    }

    pub(crate) fn get_db_info_in(
        &self,
        txn: &RoTxn<'_>,
        db: DbSelect,
    ) -> Result<Option<StoredDbInfo>, StoreError> {
        let Some(raw) = self.db(db)?.get(txn, &StoredDbInfo::db_key())? else {
            return Ok(None);
        };
        match StoredDbInfo::decode_value_exact(raw) {
            Ok(sdbi) => Ok(Some(sdbi)),
            Err(err) => {
                tracing::warn!(target: "chaindb::store", %err, ?db, "corrupt DB info row");
                Ok(None)
            }
        }
    }

    /// Overwrite the metadata row of `db`.
    pub fn put_db_info(&self, db: DbSelect, sdbi: &StoredDbInfo) -> Result<(), StoreError> {
        let db = self.schema.select(db);
        if !self.schema.has_db_info(db) {
            return Err(StoreError::NoDbInfo(db));
        }
        let env = self.env(db)?;
        let mut wtxn = env.write_txn()?;
        self.put_db_info_in(&mut wtxn, db, sdbi)?;
        wtxn.commit()?;
        Ok(())
    }

    pub(crate) fn put_db_info_in(
        &self,
        txn: &mut RwTxn<'_>,
        db: DbSelect,
        sdbi: &StoredDbInfo,
    ) -> Result<(), StoreError> {
        Ok(self.db(db)?.put(txn, &StoredDbInfo::db_key(), &sdbi.encoded())?)
    }

    /// Height of the top applied main-branch block recorded in `db`.
    pub fn get_top_block_height(&self, db: DbSelect) -> Result<Option<u32>, StoreError> {
        Ok(self.get_db_info(db)?.map(|sdbi| sdbi.top_blk_hgt))
    }

    /// Hash of the top applied main-branch block recorded in `db`.
    pub fn get_top_block_hash(&self, db: DbSelect) -> Result<Option<BlockHash>, StoreError> {
        Ok(self.get_db_info(db)?.map(|sdbi| sdbi.top_blk_hash))
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Every (key, value) pair in `db`, in key order. Intended for small
    /// databases in tests and debugging.
    pub fn get_all_database_entries(
        &self,
        db: DbSelect,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        if !self.is_open() {
            return Ok(Vec::new());
        }
        let rtxn = self.env(db)?.read_txn()?;
        self.db(db)?.entries(&rtxn).map_err(Into::into)
    }

    // ------------------------------------------------------------------
    // Undo data (reserved)
    // ------------------------------------------------------------------

    /// Store undo data for a block. Not implemented; logs and reports
    /// `false`.
    pub fn put_stored_undo_data(
        &self,
        height: u32,
        dup: u8,
        _data: &[u8],
    ) -> Result<bool, StoreError> {
        tracing::error!(target: "chaindb::store", height, dup, "put_stored_undo_data not implemented yet");
        Ok(false)
    }

    /// Fetch undo data for a block. Not implemented; logs and reports a
    /// miss.
    pub fn get_stored_undo_data(
        &self,
        height: u32,
        dup: u8,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        tracing::error!(target: "chaindb::store", height, dup, "get_stored_undo_data not implemented yet");
        Ok(None)
    }
}

impl Drop for BlockStore {
    fn drop(&mut self) {
        self.close();
    }
}
