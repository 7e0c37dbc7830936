//! Durable storage of a node's own committee key shares.
//!
//! For each era it takes part in, a node keeps two secrets: its share of
//! the group key (`msk`) and the ephemeral key its share pieces were
//! encrypted under. Both are stored together, keyed by the era seed,
//! encrypted at rest, and deleted once the group they belong to is
//! dismissed.
//!
//! # Layout
//!
//! - Primary keyspace: seed hash -> (expiry height, encrypted record)
//! - Expiry keyspace: big-endian expiry height and seed hash, ordered
//!
//! Both live in one RocksDB instance and change together in a single write
//! batch.

mod db;
mod error;
mod gc;
mod store;

pub use error::KeyStoreError;
pub use store::{KeyShareRecord, KeyShareStore};
