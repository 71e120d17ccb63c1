//! Positional cursor over an ordered keyspace.
//!
//! The cursor tracks a position (the key of the entry it last landed on)
//! and exposes seek and step operations. Every positional operation
//! *returns* the entry it lands on: there is no separate "read current"
//! step, so a caller can never observe a stale cached pair. Returned
//! slices borrow the read transaction, not the cursor, so they stay valid
//! across later moves and die with the transaction.

use crate::KvError;
use heed::types::Bytes;
use heed::{Database, RoTxn};

/// A (key, value) pair borrowed from the owning transaction.
pub type RawEntry<'txn> = (&'txn [u8], &'txn [u8]);

/// Cursor over one sub-database.
///
/// Step operations are anchored on an owned copy of the current key, so
/// the cursor itself carries no borrow and many cursors may coexist on
/// one transaction.
pub struct Cursor<'txn> {
    db: Database<Bytes, Bytes>,
    txn: &'txn RoTxn<'txn>,
    /// Key of the entry the cursor last landed on; `None` when unset or
    /// after a failed seek.
    pos: Option<Vec<u8>>,
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor").field("pos", &self.pos).finish_non_exhaustive()
    }
}

impl<'txn> Cursor<'txn> {
    /// Create a cursor with no position.
    pub(crate) const fn new(db: Database<Bytes, Bytes>, txn: &'txn RoTxn<'txn>) -> Self {
        Self { db, txn, pos: None }
    }

    fn land(&mut self, entry: Option<RawEntry<'txn>>) -> Option<RawEntry<'txn>> {
        self.pos = entry.map(|(k, _)| k.to_vec());
        entry
    }

    /// The key of the entry the cursor currently rests on.
    pub fn position(&self) -> Option<&[u8]> {
        self.pos.as_deref()
    }

    /// Move to the first entry.
    pub fn to_first(&mut self) -> Result<Option<RawEntry<'txn>>, KvError> {
        let entry = self.db.first(self.txn)?;
        Ok(self.land(entry))
    }

    /// Move to the last entry.
    pub fn to_last(&mut self) -> Result<Option<RawEntry<'txn>>, KvError> {
        let entry = self.db.last(self.txn)?;
        Ok(self.land(entry))
    }

    /// Move to the first entry with key >= `key`.
    pub fn seek_ge(&mut self, key: &[u8]) -> Result<Option<RawEntry<'txn>>, KvError> {
        let entry = self.db.get_greater_than_or_equal_to(self.txn, key)?;
        Ok(self.land(entry))
    }

    /// Move to the last entry with key <= `key`.
    pub fn seek_le(&mut self, key: &[u8]) -> Result<Option<RawEntry<'txn>>, KvError> {
        let entry = self.db.get_lower_than_or_equal_to(self.txn, key)?;
        Ok(self.land(entry))
    }

    /// Move to `key` exactly; miss if it is absent.
    ///
    /// On a miss the cursor still lands on the next greater entry (if
    /// any), matching seek-then-compare semantics.
    pub fn seek_to_exact(&mut self, key: &[u8]) -> Result<Option<RawEntry<'txn>>, KvError> {
        match self.seek_ge(key)? {
            Some((k, v)) if k == key => Ok(Some((k, v))),
            _ => Ok(None),
        }
    }

    /// Move to the first entry whose key starts with `prefix`; miss if no
    /// such entry exists.
    pub fn seek_to_starts_with(&mut self, prefix: &[u8]) -> Result<Option<RawEntry<'txn>>, KvError> {
        match self.seek_ge(prefix)? {
            Some((k, v)) if k.starts_with(prefix) => Ok(Some((k, v))),
            _ => Ok(None),
        }
    }

    /// Move to the last entry with key <= `key` (the entry "before" the
    /// given position in an insertion sense).
    pub fn seek_to_before(&mut self, key: &[u8]) -> Result<Option<RawEntry<'txn>>, KvError> {
        self.seek_le(key)
    }

    /// Step to the next entry.
    ///
    /// With no position (fresh cursor or failed seek) this is a miss;
    /// position with a seek first.
    pub fn advance(&mut self) -> Result<Option<RawEntry<'txn>>, KvError> {
        let Some(pos) = self.pos.take() else { return Ok(None) };
        let entry = self.db.get_greater_than(self.txn, &pos)?;
        Ok(self.land(entry))
    }

    /// Step to the previous entry.
    pub fn retreat(&mut self) -> Result<Option<RawEntry<'txn>>, KvError> {
        let Some(pos) = self.pos.take() else { return Ok(None) };
        let entry = self.db.get_lower_than(self.txn, &pos)?;
        Ok(self.land(entry))
    }

    /// Step to the next entry, but report a miss unless its key starts
    /// with `prefix`. The cursor still moves on a prefix mismatch, so a
    /// scan that walks off its prefix leaves the cursor on the first
    /// foreign entry.
    pub fn advance_within(&mut self, prefix: &[u8]) -> Result<Option<RawEntry<'txn>>, KvError> {
        match self.advance()? {
            Some((k, v)) if k.starts_with(prefix) => Ok(Some((k, v))),
            _ => Ok(None),
        }
    }

    /// Re-read the value at the current position.
    pub fn value(&self) -> Result<Option<&'txn [u8]>, KvError> {
        match &self.pos {
            Some(key) => Ok(self.db.get(self.txn, key)?),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{DatabaseEnv, EnvArguments, SubDb, MEGABYTE};
    use tempfile::tempdir;

    fn seeded_db() -> (tempfile::TempDir, DatabaseEnv, SubDb) {
        let dir = tempdir().unwrap();
        let env = DatabaseEnv::open(dir.path(), EnvArguments::new().with_map_size(MEGABYTE * 64))
            .unwrap();
        let mut wtxn = env.write_txn().unwrap();
        let db = env.create_db(&mut wtxn, "cursor_test").unwrap();
        for (k, v) in [
            (&b"\x01aaa"[..], &b"one"[..]),
            (&b"\x01bbb"[..], &b"two"[..]),
            (&b"\x01ccc"[..], &b"three"[..]),
            (&b"\x02aaa"[..], &b"four"[..]),
            (&b"\x02bbb"[..], &b"five"[..]),
        ] {
            db.put(&mut wtxn, k, v).unwrap();
        }
        wtxn.commit().unwrap();
        (dir, env, db)
    }

    #[test]
    fn seek_ge_lands_at_or_above() {
        let (_dir, env, db) = seeded_db();
        let rtxn = env.read_txn().unwrap();
        let mut cur = db.cursor(&rtxn);

        let (k, v) = cur.seek_ge(b"\x01bb").unwrap().unwrap();
        assert_eq!(k, b"\x01bbb");
        assert_eq!(v, b"two");

        let (k, _) = cur.seek_ge(b"\x01bbb").unwrap().unwrap();
        assert_eq!(k, b"\x01bbb");

        assert!(cur.seek_ge(b"\x03").unwrap().is_none());
    }

    #[test]
    fn seek_le_lands_at_or_below() {
        let (_dir, env, db) = seeded_db();
        let rtxn = env.read_txn().unwrap();
        let mut cur = db.cursor(&rtxn);

        let (k, _) = cur.seek_le(b"\x01bbz").unwrap().unwrap();
        assert_eq!(k, b"\x01bbb");

        let (k, _) = cur.seek_le(b"\x02aaa").unwrap().unwrap();
        assert_eq!(k, b"\x02aaa");

        assert!(cur.seek_le(b"\x00").unwrap().is_none());
    }

    #[test]
    fn exact_and_prefix_seeks() {
        let (_dir, env, db) = seeded_db();
        let rtxn = env.read_txn().unwrap();
        let mut cur = db.cursor(&rtxn);

        assert!(cur.seek_to_exact(b"\x01bbb").unwrap().is_some());
        assert!(cur.seek_to_exact(b"\x01bbc").unwrap().is_none());

        let (k, _) = cur.seek_to_starts_with(b"\x02").unwrap().unwrap();
        assert_eq!(k, b"\x02aaa");
        assert!(cur.seek_to_starts_with(b"\x03").unwrap().is_none());
    }

    #[test]
    fn advance_and_retreat_walk_in_order() {
        let (_dir, env, db) = seeded_db();
        let rtxn = env.read_txn().unwrap();
        let mut cur = db.cursor(&rtxn);

        cur.to_first().unwrap().unwrap();
        let mut walked = vec![];
        while let Some((k, _)) = cur.advance().unwrap() {
            walked.push(k.to_vec());
        }
        assert_eq!(
            walked,
            vec![b"\x01bbb".to_vec(), b"\x01ccc".to_vec(), b"\x02aaa".to_vec(), b"\x02bbb".to_vec()]
        );

        // Cursor ran off the end; position is gone.
        assert!(cur.advance().unwrap().is_none());

        let (k, _) = cur.to_last().unwrap().unwrap();
        assert_eq!(k, b"\x02bbb");
        let (k, _) = cur.retreat().unwrap().unwrap();
        assert_eq!(k, b"\x02aaa");
    }

    #[test]
    fn advance_within_stops_at_prefix_boundary() {
        let (_dir, env, db) = seeded_db();
        let rtxn = env.read_txn().unwrap();
        let mut cur = db.cursor(&rtxn);

        cur.seek_to_starts_with(b"\x01").unwrap().unwrap();
        let mut count = 1;
        while cur.advance_within(b"\x01").unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);

        // The cursor moved onto the first \x02 entry when the scan ended.
        assert_eq!(cur.position(), Some(&b"\x02aaa"[..]));
    }

    #[test]
    fn values_outlive_cursor_moves() {
        let (_dir, env, db) = seeded_db();
        let rtxn = env.read_txn().unwrap();
        let mut cur = db.cursor(&rtxn);

        let (_, first_val) = cur.to_first().unwrap().unwrap();
        cur.advance().unwrap();
        cur.advance().unwrap();
        // Borrowed from the transaction, not the cursor.
        assert_eq!(first_val, b"one");
    }

    #[test]
    fn fresh_cursor_has_no_step() {
        let (_dir, env, db) = seeded_db();
        let rtxn = env.read_txn().unwrap();
        let mut cur = db.cursor(&rtxn);
        assert!(cur.advance().unwrap().is_none());
        assert!(cur.retreat().unwrap().is_none());
        assert!(cur.value().unwrap().is_none());
    }
}
