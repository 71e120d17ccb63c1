//! Typed blockchain object store over an ordered key-value engine.
//!
//! The store persists four classes of chain artifacts — block headers,
//! block bodies, per-address script histories, and tx-hash hints — in
//! LMDB, under a family of prefixed composite keys arranged so that
//! ordered iteration answers the range queries the outer system needs
//! (all txs of a block, all sub-histories of an address within a height
//! window, all headers at a height).
//!
//! Two node profiles share the code base with different schemas:
//!
//! - [`Profile::Super`] keeps everything in one file and decomposes each
//!   block into block / tx / tx-out rows;
//! - [`Profile::Full`] keeps four files, stores each block as a single
//!   blob, and tracks history and hints only for data the outer system
//!   registers.
//!
//! The profile is chosen at [`BlockStore::open`] and verified against the
//! on-disk metadata; a mismatch fails the open.
//!
//! [`Profile::Super`]: chaindb_types::Profile::Super
//! [`Profile::Full`]: chaindb_types::Profile::Full

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

mod error;
pub use error::StoreError;

mod schema;
pub use schema::DbSelect;

mod store;
pub use store::{BlockRef, BlockStore, OpenParams};

pub use chaindb_kv as kv;
pub use chaindb_types as types;
