//! Ordered key-value engine adapter for the chaindb block store, built on
//! LMDB via [`heed`].
//!
//! The adapter is a thin façade: an environment ([`DatabaseEnv`]) owns a
//! memory-mapped file and hands out snapshot read transactions and
//! exclusive write transactions; a [`SubDb`] is an untyped named database
//! inside an environment with point get/put/erase and [`Cursor`] creation.
//!
//! ## Reference lifetimes
//!
//! Reads are zero-copy: `get` and every cursor operation return byte
//! slices borrowed from the owning read transaction. The borrow checker
//! enforces the engine rule that a slice is only valid while its
//! transaction lives; callers who need data past commit copy eagerly.

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    clippy::missing_const_for_fn,
    rustdoc::all
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use std::path::{Path, PathBuf};

mod cursor;
pub use cursor::{Cursor, RawEntry};

mod error;
pub use error::KvError;

pub use heed::{RoTxn, RwTxn};

/// 1 MB in bytes.
pub const MEGABYTE: usize = 1024 * 1024;
/// 1 GB in bytes.
pub const GIGABYTE: usize = MEGABYTE * 1024;

/// Default memory-map size for an environment.
const DEFAULT_MAP_SIZE: usize = 64 * GIGABYTE;

/// Default cap on named databases per environment.
const DEFAULT_MAX_DBS: u32 = 8;

/// Arguments for environment initialization.
#[derive(Debug, Clone, Copy)]
pub struct EnvArguments {
    /// Upper size limit of the memory map in bytes.
    map_size: usize,
    /// Maximum number of named databases in the environment.
    max_dbs: u32,
}

impl Default for EnvArguments {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvArguments {
    /// Default arguments.
    pub const fn new() -> Self {
        Self { map_size: DEFAULT_MAP_SIZE, max_dbs: DEFAULT_MAX_DBS }
    }

    /// Set the memory-map size in bytes.
    pub const fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    /// Set the maximum number of named databases.
    pub const fn with_max_dbs(mut self, max_dbs: u32) -> Self {
        self.max_dbs = max_dbs;
        self
    }
}

/// An LMDB environment: one memory-mapped file holding one or more named
/// databases, with snapshot reads and a single serialized writer.
#[derive(Debug, Clone)]
pub struct DatabaseEnv {
    inner: Env,
    path: PathBuf,
}

impl DatabaseEnv {
    /// Open (creating if absent) the environment at `path`.
    pub fn open(path: &Path, args: EnvArguments) -> Result<Self, KvError> {
        std::fs::create_dir_all(path)?;

        let mut options = EnvOpenOptions::new();
        options.map_size(args.map_size);
        options.max_dbs(args.max_dbs);

        let env = match unsafe { options.open(path) } {
            Ok(env) => env,
            // Another handle to this path is already open in-process with
            // different options; reuse it.
            Err(heed::Error::BadOpenOptions { env, .. }) => env,
            Err(err) => {
                tracing::error!(
                    target: "chaindb::kv",
                    path = %path.display(),
                    %err,
                    "failed to open LMDB environment"
                );
                return Err(err.into());
            }
        };

        Ok(Self { inner: env, path: path.to_path_buf() })
    }

    /// Start a snapshot read transaction.
    pub fn read_txn(&self) -> Result<RoTxn<'_>, KvError> {
        Ok(self.inner.read_txn()?)
    }

    /// Start the (exclusive) write transaction.
    pub fn write_txn(&self) -> Result<RwTxn<'_>, KvError> {
        Ok(self.inner.write_txn()?)
    }

    /// Open a named database if it exists.
    pub fn open_db(&self, rtxn: &RoTxn<'_>, name: &str) -> Result<Option<SubDb>, KvError> {
        let db = self.inner.open_database::<Bytes, Bytes>(rtxn, Some(name))?;
        Ok(db.map(|inner| SubDb { inner }))
    }

    /// Open a named database, creating it if absent.
    pub fn create_db(&self, wtxn: &mut RwTxn<'_>, name: &str) -> Result<SubDb, KvError> {
        let inner = self.inner.create_database::<Bytes, Bytes>(wtxn, Some(name))?;
        Ok(SubDb { inner })
    }

    /// The directory backing this environment.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the environment, blocking until every clone of the handle has
    /// released it and the map is unmapped. Required before deleting the
    /// backing files.
    pub fn close(self) {
        let Self { inner, path } = self;
        tracing::info!(target: "chaindb::kv", path = %path.display(), "closing environment");
        inner.prepare_for_closing().wait();
    }
}

/// An untyped named database within an environment.
#[derive(Debug, Clone, Copy)]
pub struct SubDb {
    inner: Database<Bytes, Bytes>,
}

impl SubDb {
    /// Point lookup. The returned slice borrows the transaction.
    pub fn get<'txn>(&self, txn: &'txn RoTxn<'_>, key: &[u8]) -> Result<Option<&'txn [u8]>, KvError> {
        Ok(self.inner.get(txn, key)?)
    }

    /// Insert or overwrite a key.
    pub fn put(&self, txn: &mut RwTxn<'_>, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        Ok(self.inner.put(txn, key, value)?)
    }

    /// Erase a key. Returns whether it was present.
    pub fn delete(&self, txn: &mut RwTxn<'_>, key: &[u8]) -> Result<bool, KvError> {
        Ok(self.inner.delete(txn, key)?)
    }

    /// Erase every key.
    pub fn clear(&self, txn: &mut RwTxn<'_>) -> Result<(), KvError> {
        Ok(self.inner.clear(txn)?)
    }

    /// Number of entries.
    pub fn len(&self, txn: &RoTxn<'_>) -> Result<u64, KvError> {
        Ok(self.inner.len(txn)?)
    }

    /// Whether the database holds no entries.
    pub fn is_empty(&self, txn: &RoTxn<'_>) -> Result<bool, KvError> {
        Ok(self.len(txn)? == 0)
    }

    /// A positional cursor over the ordered keyspace.
    pub const fn cursor<'txn>(&self, txn: &'txn RoTxn<'txn>) -> Cursor<'txn> {
        Cursor::new(self.inner, txn)
    }

    /// Materialize every (key, value) pair, in key order.
    pub fn entries(&self, txn: &RoTxn<'_>) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let mut out = Vec::new();
        for item in self.inner.iter(txn)? {
            let (k, v) = item?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_test_db() -> (tempfile::TempDir, DatabaseEnv, SubDb) {
        let dir = tempdir().unwrap();
        let env = DatabaseEnv::open(dir.path(), EnvArguments::new().with_map_size(MEGABYTE * 64))
            .unwrap();
        let mut wtxn = env.write_txn().unwrap();
        let db = env.create_db(&mut wtxn, "test").unwrap();
        wtxn.commit().unwrap();
        (dir, env, db)
    }

    #[test]
    fn point_ops_roundtrip() {
        let (_dir, env, db) = open_test_db();

        let mut wtxn = env.write_txn().unwrap();
        db.put(&mut wtxn, b"alpha", b"1").unwrap();
        db.put(&mut wtxn, b"beta", b"2").unwrap();
        wtxn.commit().unwrap();

        let rtxn = env.read_txn().unwrap();
        assert_eq!(db.get(&rtxn, b"alpha").unwrap(), Some(&b"1"[..]));
        assert_eq!(db.get(&rtxn, b"gamma").unwrap(), None);
        assert_eq!(db.len(&rtxn).unwrap(), 2);
        drop(rtxn);

        let mut wtxn = env.write_txn().unwrap();
        assert!(db.delete(&mut wtxn, b"alpha").unwrap());
        assert!(!db.delete(&mut wtxn, b"alpha").unwrap());
        wtxn.commit().unwrap();

        let rtxn = env.read_txn().unwrap();
        assert_eq!(db.get(&rtxn, b"alpha").unwrap(), None);
    }

    #[test]
    fn snapshot_isolation() {
        let (_dir, env, db) = open_test_db();

        let mut wtxn = env.write_txn().unwrap();
        db.put(&mut wtxn, b"key", b"old").unwrap();
        wtxn.commit().unwrap();

        let reader = env.read_txn().unwrap();

        let mut wtxn = env.write_txn().unwrap();
        db.put(&mut wtxn, b"key", b"new").unwrap();
        wtxn.commit().unwrap();

        // The old reader still sees its snapshot.
        assert_eq!(db.get(&reader, b"key").unwrap(), Some(&b"old"[..]));

        let fresh = env.read_txn().unwrap();
        assert_eq!(db.get(&fresh, b"key").unwrap(), Some(&b"new"[..]));
    }

    #[test]
    fn entries_are_key_ordered() {
        let (_dir, env, db) = open_test_db();

        let mut wtxn = env.write_txn().unwrap();
        for key in [&b"c"[..], b"a", b"b"] {
            db.put(&mut wtxn, key, b"x").unwrap();
        }
        wtxn.commit().unwrap();

        let rtxn = env.read_txn().unwrap();
        let keys: Vec<_> = db.entries(&rtxn).unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn uncommitted_writes_are_readable_in_txn() {
        let (_dir, env, db) = open_test_db();

        let mut wtxn = env.write_txn().unwrap();
        db.put(&mut wtxn, b"key", b"value").unwrap();
        assert_eq!(db.get(&wtxn, b"key").unwrap(), Some(&b"value"[..]));
        // Abort by dropping.
        drop(wtxn);

        let rtxn = env.read_txn().unwrap();
        assert_eq!(db.get(&rtxn, b"key").unwrap(), None);
    }
}
