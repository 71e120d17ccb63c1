//! Profile-dependent schema placement.
//!
//! Call sites name a logical sub-database ([`DbSelect`]); the schema maps
//! it to the environment and named database that back it under the active
//! profile. The mapping is fixed at open time, so no operation needs to
//! branch on the profile beyond asking the schema.

use chaindb_types::Profile;

/// Logical sub-database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DbSelect {
    /// Headers by hash and per-height duplicate lists.
    Headers,
    /// Block data: whole blobs (FULL) or block/tx/tx-out rows (SUPER).
    Blkdata,
    /// Script histories, tracked tx-outs, zero-conf records (FULL).
    History,
    /// Tx-hash hint lists (FULL).
    Txhints,
}

/// The schema dispatcher: logical sub-database to physical placement.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Schema {
    profile: Profile,
}

impl Schema {
    pub(crate) const fn new(profile: Profile) -> Self {
        Self { profile }
    }

    pub(crate) const fn profile(&self) -> Profile {
        self.profile
    }

    /// Where rows addressed to `db` actually live.
    ///
    /// Under SUPER everything but headers shares the single block-data
    /// table; under FULL the mapping is the identity.
    pub(crate) const fn select(&self, db: DbSelect) -> DbSelect {
        match self.profile {
            Profile::Super => match db {
                DbSelect::Headers => DbSelect::Headers,
                _ => DbSelect::Blkdata,
            },
            Profile::Full => db,
        }
    }

    /// The environment directory backing `db`.
    pub(crate) const fn env_name(&self, db: DbSelect) -> &'static str {
        match self.profile {
            Profile::Super => "blocks",
            Profile::Full => match db {
                DbSelect::Headers => "headers",
                DbSelect::Blkdata => "blocks",
                DbSelect::History => "history",
                DbSelect::Txhints => "txhints",
            },
        }
    }

    /// The named database inside that environment.
    pub(crate) const fn table_name(&self, db: DbSelect) -> &'static str {
        match self.profile {
            Profile::Super => match db {
                DbSelect::Headers => "headers",
                _ => "blkdata",
            },
            Profile::Full => match db {
                DbSelect::Headers => "headers",
                DbSelect::Blkdata => "blocks",
                DbSelect::History => "history",
                DbSelect::Txhints => "txhints",
            },
        }
    }

    /// Every environment directory the profile uses. The blocks
    /// environment comes first so the open-time profile probe runs
    /// before any other environment is created on disk.
    pub(crate) const fn env_names(&self) -> &'static [&'static str] {
        match self.profile {
            Profile::Super => &["blocks"],
            Profile::Full => &["blocks", "headers", "history", "txhints"],
        }
    }

    /// Whether `db` carries a metadata row under this profile.
    ///
    /// TXHINTS never does. Under FULL the block-data metadata lives in
    /// HISTORY instead, and asking BLKDATA for it is a schema misuse.
    pub(crate) const fn has_db_info(&self, db: DbSelect) -> bool {
        match self.profile {
            Profile::Super => matches!(db, DbSelect::Headers | DbSelect::Blkdata),
            Profile::Full => matches!(db, DbSelect::Headers | DbSelect::History),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn super_shares_one_file() {
        let schema = Schema::new(Profile::Super);
        for db in [DbSelect::Headers, DbSelect::Blkdata, DbSelect::History, DbSelect::Txhints] {
            assert_eq!(schema.env_name(db), "blocks");
        }
        assert_eq!(schema.table_name(DbSelect::Headers), "headers");
        assert_eq!(schema.table_name(DbSelect::History), "blkdata");
        assert_eq!(schema.select(DbSelect::Txhints), DbSelect::Blkdata);
    }

    #[test]
    fn full_separates_files() {
        let schema = Schema::new(Profile::Full);
        assert_eq!(schema.env_names().len(), 4);
        assert_eq!(schema.env_name(DbSelect::Txhints), "txhints");
        assert_eq!(schema.select(DbSelect::History), DbSelect::History);
        assert!(!schema.has_db_info(DbSelect::Blkdata));
        assert!(schema.has_db_info(DbSelect::History));
    }
}
