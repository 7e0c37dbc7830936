//! Ordered byte keyspace the key share store is laid out in.
//!
//! On disk this is a RocksDB instance; nodes that never persist (tests,
//! simulations) use an in-memory ordered map with the same semantics. All
//! writes go through [`Keyspace::write`], which applies a batch atomically.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};

use crate::error::KeyStoreError;

/// One mutation in a write batch.
#[derive(Debug, Clone)]
pub(crate) enum Op {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

pub(crate) enum Keyspace {
    Rocks { db: DB, path: PathBuf },
    Memory(MemoryKeyspace),
}

#[derive(Default)]
pub(crate) struct MemoryKeyspace {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    #[cfg(test)]
    pub(crate) refuse_writes: std::sync::atomic::AtomicBool,
}

impl Keyspace {
    pub fn open(path: &Path) -> Result<Self, KeyStoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| KeyStoreError::io(parent, e))?;
        }
        let db = DB::open(&rocksdb_options(), path)?;
        Ok(Keyspace::Rocks {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn memory() -> Self {
        Keyspace::Memory(MemoryKeyspace::default())
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Keyspace::Rocks { path, .. } => Some(path),
            Keyspace::Memory(_) => None,
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KeyStoreError> {
        match self {
            Keyspace::Rocks { db, .. } => Ok(db.get(key)?),
            Keyspace::Memory(mem) => Ok(mem.entries.read().get(key).cloned()),
        }
    }

    /// Entries with `start <= key <= end`, in key order.
    pub fn range(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KeyStoreError> {
        match self {
            Keyspace::Rocks { db, .. } => {
                let mut entries = Vec::new();
                for item in db.iterator(IteratorMode::From(start, Direction::Forward)) {
                    let (key, value) = item?;
                    if &*key > end {
                        break;
                    }
                    entries.push((key.into_vec(), value.into_vec()));
                }
                Ok(entries)
            }
            Keyspace::Memory(mem) => Ok(mem
                .entries
                .read()
                .range(start.to_vec()..=end.to_vec())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()),
        }
    }

    /// Apply every op or none of them.
    pub fn write(&self, ops: Vec<Op>) -> Result<(), KeyStoreError> {
        match self {
            Keyspace::Rocks { db, .. } => {
                let mut batch = WriteBatch::default();
                for op in ops {
                    match op {
                        Op::Put(key, value) => batch.put(key, value),
                        Op::Delete(key) => batch.delete(key),
                    }
                }
                let mut opts = WriteOptions::default();
                opts.set_sync(true);
                db.write_opt(batch, &opts)?;
                Ok(())
            }
            Keyspace::Memory(mem) => {
                #[cfg(test)]
                if mem.refuse_writes.load(std::sync::atomic::Ordering::SeqCst) {
                    return Err(KeyStoreError::io(
                        "memory",
                        std::io::Error::new(std::io::ErrorKind::Other, "write refused"),
                    ));
                }
                let mut entries = mem.entries.write();
                for op in ops {
                    match op {
                        Op::Put(key, value) => {
                            entries.insert(key, value);
                        }
                        Op::Delete(key) => {
                            entries.remove(&key);
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn rocksdb_options() -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.set_max_background_jobs(2);
    opts.set_keep_log_file_num(4);
    opts
}
