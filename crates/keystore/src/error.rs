//! Key store errors.

use std::path::PathBuf;

use committee_types::Hash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Key store database error: {0}")]
    Db(#[from] rocksdb::Error),

    #[error("Failed to encrypt key share for {0}")]
    Encryption(Hash),

    #[error("Failed to decrypt key share for {0}")]
    Decryption(Hash),

    #[error("Unsupported record version {0}")]
    UnsupportedVersion(u8),

    #[error("Corrupt key store data: {0}")]
    Corrupt(String),
}

impl KeyStoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KeyStoreError::Io {
            path: path.into(),
            source,
        }
    }
}
