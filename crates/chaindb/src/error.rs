use crate::schema::DbSelect;
use chaindb_kv::KvError;
use chaindb_types::{DeserError, Profile};
use thiserror::Error;

/// Error type for the block store.
///
/// Only environment-level faults surface here. A missing record is
/// `Ok(None)`/`Ok(false)` on the operation that looked for it, and
/// per-record corruption is logged and converted to a miss.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The on-disk store was built with the other node profile.
    #[error("Mismatch in DB type")]
    ProfileMismatch,

    /// The on-disk magic bytes disagree with the caller's.
    #[error("magic bytes mismatch, different blockchain?")]
    MagicMismatch,

    /// The on-disk prune policy disagrees with the caller's.
    #[error("mismatch in DB prune mode")]
    PruneMismatch,

    /// The operation is only valid under the named profile.
    #[error("operation requires the {required:?} profile")]
    SchemaMisuse {
        /// The profile the operation is defined for.
        required: Profile,
    },

    /// The sub-database carries no metadata row under this profile.
    #[error("no DB info in {0:?} under this profile")]
    NoDbInfo(DbSelect),

    /// Open parameters were unusable before any engine work started.
    #[error("{0}")]
    Config(&'static str),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Engine fault.
    #[error(transparent)]
    Kv(#[from] KvError),

    /// Engine fault surfaced directly by the underlying heed transaction.
    #[error(transparent)]
    Heed(#[from] heed::Error),

    /// Codec fault outside a per-record read path.
    #[error(transparent)]
    Deser(#[from] DeserError),

    /// Filesystem fault while destroying or probing environments.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
