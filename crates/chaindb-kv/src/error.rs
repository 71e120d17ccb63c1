use thiserror::Error;

/// Error type for the LMDB-backed engine adapter.
#[derive(Debug, Error)]
pub enum KvError {
    /// Inner engine error.
    #[error(transparent)]
    Heed(#[from] heed::Error),

    /// Filesystem error while creating or destroying an environment.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
