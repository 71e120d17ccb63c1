//! Record types and codecs for the chaindb block store.
//!
//! Every persisted record family lives here, together with the composite
//! key codec shared by all sub-databases. The layouts are byte-exact: the
//! store's on-disk format is defined by the `encode_*`/`decode_*` pairs in
//! this crate and nothing else.
//!
//! ## Keys
//!
//! Composite keys begin with a 1-byte [`KeyPrefix`] tag followed by a
//! family-specific payload. Block data is addressed by [`BlkDataKey`], a
//! packed (height, dup) pair optionally extended with a tx index and a
//! tx-out index. All integers are big-endian so that lexicographic key
//! order agrees with numeric order.
//!
//! ## Values
//!
//! Value layouts are described on each record type. Tx and tx-out values
//! lead with a 2-byte packed flags field carrying the db version, the tx
//! version, and either the serialization variant (txs) or the spentness
//! (tx-outs).

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

pub mod ser;
pub use ser::{DbValue, DeserError};

pub mod keys;
pub use keys::{BlkDataKey, BlkDataKind, HgtX, KeyPrefix, ZcKey};

mod dbinfo;
pub use dbinfo::{Profile, PruneType, StoredDbInfo, DB_VERSION};

mod header;
pub use header::{StoredHeadHgtList, StoredHeader};

mod txdata;
pub use txdata::{Spentness, StoredTx, StoredTxOut, TxSerVariant};

mod hints;
pub use hints::{StoredTxHints, TX_HINT_PREFIX_LEN};

mod history;
pub use history::{StoredScriptHistory, StoredSubHistory, TxioPair};
