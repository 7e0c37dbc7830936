//! The key share store proper.
//!
//! Two keyspaces share one database:
//!
//! - `r || seed` -> `expire_height (8 bytes BE) || nonce || AES-GCM(version || borsh(record))`
//! - `e || expire_height (8 bytes BE) || seed` -> empty
//!
//! Big-endian heights make the expiry keyspace sort by height, so expiry is
//! a single range scan. Every mutation is one atomic batch covering both
//! keyspaces; nothing is cached, so a failed write leaves the store as it
//! was.

use std::path::Path;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use borsh::{BorshDeserialize, BorshSerialize};
use committee_crypto::Seckey;
use committee_types::{sha256, Hash, HASH_LENGTH};
use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};
use tracing::{debug, info};

use crate::db::{Keyspace, Op};
use crate::error::KeyStoreError;

const RECORD_VERSION: u8 = 1;
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;
const HEIGHT_LENGTH: usize = 8;

const RECORD_PREFIX: u8 = b'r';
const EXPIRY_PREFIX: u8 = b'e';

/// Key material a node holds for one era.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct KeyShareRecord {
    /// The node's share of the group secret
    pub msk: Option<Seckey>,
    /// Ephemeral key the node's share pieces were encrypted under
    pub enc_seckey: Option<Seckey>,
}

/// Encrypted key shares indexed by era seed and by expiry height.
pub struct KeyShareStore {
    db: Keyspace,
    cipher: Aes256Gcm,
    /// Serializes read-modify-write cycles; reads go straight to the db.
    write_lock: Mutex<()>,
}

impl KeyShareStore {
    /// Open the store persisted at `path`, creating it if missing.
    ///
    /// Records are encrypted under a key derived from `node_key`; a store
    /// written under another key fails to decrypt on read.
    pub fn open(path: impl AsRef<Path>, node_key: &Seckey) -> Result<Self, KeyStoreError> {
        let db = Keyspace::open(path.as_ref())?;
        debug!(path = ?path.as_ref(), "Opened key share store");
        Ok(Self::with_keyspace(db, node_key))
    }

    /// A store that never touches disk.
    pub fn in_memory(node_key: &Seckey) -> Self {
        Self::with_keyspace(Keyspace::memory(), node_key)
    }

    fn with_keyspace(db: Keyspace, node_key: &Seckey) -> Self {
        Self {
            db,
            cipher: cipher_for(node_key),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.db.path()
    }

    pub fn store_encryption_seckey(
        &self,
        seed: &Hash,
        enc_seckey: Seckey,
        expire_height: u64,
    ) -> Result<(), KeyStoreError> {
        self.update(seed, expire_height, |record| record.enc_seckey = Some(enc_seckey))
    }

    pub fn store_group_signature_seckey(
        &self,
        seed: &Hash,
        msk: Seckey,
        expire_height: u64,
    ) -> Result<(), KeyStoreError> {
        self.update(seed, expire_height, |record| record.msk = Some(msk))
    }

    pub fn get_key_share(&self, seed: &Hash) -> Result<Option<KeyShareRecord>, KeyStoreError> {
        match self.db.get(&record_key(seed))? {
            Some(value) => {
                let (_, blob) = split_record_value(seed, &value)?;
                self.open_blob(seed, blob).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn get_group_signature_seckey(&self, seed: &Hash) -> Result<Option<Seckey>, KeyStoreError> {
        Ok(self.get_key_share(seed)?.and_then(|r| r.msk))
    }

    pub fn get_encryption_seckey(&self, seed: &Hash) -> Result<Option<Seckey>, KeyStoreError> {
        Ok(self.get_key_share(seed)?.and_then(|r| r.enc_seckey))
    }

    /// Height after which the record for `seed` is deleted.
    pub fn expire_height(&self, seed: &Hash) -> Result<Option<u64>, KeyStoreError> {
        match self.db.get(&record_key(seed))? {
            Some(value) => Ok(Some(split_record_value(seed, &value)?.0)),
            None => Ok(None),
        }
    }

    /// Delete every record expiring at or below `height`.
    ///
    /// Returns the number of records removed; deleting nothing is not an
    /// error. On failure nothing is deleted and the next call retries.
    pub fn remove_expired(&self, height: u64) -> Result<usize, KeyStoreError> {
        let _guard = self.write_lock.lock();
        let expired = self.db.range(&[EXPIRY_PREFIX], &expiry_key(height, &Hash([0xff; HASH_LENGTH])))?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut ops = Vec::with_capacity(expired.len() * 2);
        for (key, _) in expired {
            let seed = seed_of_expiry_key(&key)?;
            ops.push(Op::Delete(record_key(&seed)));
            ops.push(Op::Delete(key));
        }
        let removed = ops.len() / 2;
        self.db.write(ops)?;
        info!(height, removed, "Removed expired key shares");
        Ok(removed)
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize, KeyStoreError> {
        let mut end = vec![RECORD_PREFIX];
        end.extend_from_slice(&[0xff; HASH_LENGTH]);
        Ok(self.db.range(&[RECORD_PREFIX], &end)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, KeyStoreError> {
        Ok(self.len()? == 0)
    }

    fn update(
        &self,
        seed: &Hash,
        expire_height: u64,
        apply: impl FnOnce(&mut KeyShareRecord),
    ) -> Result<(), KeyStoreError> {
        let _guard = self.write_lock.lock();
        let key = record_key(seed);
        let (previous_expiry, mut record) = match self.db.get(&key)? {
            Some(value) => {
                let (expiry, blob) = split_record_value(seed, &value)?;
                (Some(expiry), self.open_blob(seed, blob)?)
            }
            None => (None, KeyShareRecord::default()),
        };
        apply(&mut record);
        let blob = self.seal(seed, &record)?;

        let mut value = Vec::with_capacity(HEIGHT_LENGTH + blob.len());
        value.extend_from_slice(&expire_height.to_be_bytes());
        value.extend_from_slice(&blob);

        let mut ops = Vec::with_capacity(3);
        if let Some(previous) = previous_expiry.filter(|h| *h != expire_height) {
            ops.push(Op::Delete(expiry_key(previous, seed)));
        }
        ops.push(Op::Put(key, value));
        ops.push(Op::Put(expiry_key(expire_height, seed), Vec::new()));
        self.db.write(ops)?;
        debug!(%seed, expire_height, "Stored key share");
        Ok(())
    }

    fn seal(&self, seed: &Hash, record: &KeyShareRecord) -> Result<Vec<u8>, KeyStoreError> {
        let mut plaintext = vec![RECORD_VERSION];
        record
            .serialize(&mut plaintext)
            .map_err(|e| KeyStoreError::Corrupt(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|_| KeyStoreError::Encryption(*seed))?;

        let mut blob = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn open_blob(&self, seed: &Hash, blob: &[u8]) -> Result<KeyShareRecord, KeyStoreError> {
        if blob.len() < NONCE_LENGTH + TAG_LENGTH + 1 {
            return Err(KeyStoreError::Corrupt(format!(
                "record for {} is {} bytes",
                seed,
                blob.len()
            )));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LENGTH);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| KeyStoreError::Decryption(*seed))?;
        match plaintext.split_first() {
            Some((&RECORD_VERSION, body)) => KeyShareRecord::try_from_slice(body)
                .map_err(|e| KeyStoreError::Corrupt(e.to_string())),
            Some((&version, _)) => Err(KeyStoreError::UnsupportedVersion(version)),
            None => Err(KeyStoreError::Corrupt("empty record".to_string())),
        }
    }
}

fn cipher_for(node_key: &Seckey) -> Aes256Gcm {
    let key = sha256(&node_key.to_bytes());
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))
}

fn record_key(seed: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + HASH_LENGTH);
    key.push(RECORD_PREFIX);
    key.extend_from_slice(seed.as_bytes());
    key
}

fn expiry_key(height: u64, seed: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + HEIGHT_LENGTH + HASH_LENGTH);
    key.push(EXPIRY_PREFIX);
    key.extend_from_slice(&height.to_be_bytes());
    key.extend_from_slice(seed.as_bytes());
    key
}

fn seed_of_expiry_key(key: &[u8]) -> Result<Hash, KeyStoreError> {
    key.get(1 + HEIGHT_LENGTH..)
        .and_then(|bytes| Hash::from_slice(bytes).ok())
        .ok_or_else(|| KeyStoreError::Corrupt(format!("expiry key of {} bytes", key.len())))
}

fn split_record_value<'a>(seed: &Hash, value: &'a [u8]) -> Result<(u64, &'a [u8]), KeyStoreError> {
    if value.len() < HEIGHT_LENGTH {
        return Err(KeyStoreError::Corrupt(format!("record for {seed} has no expiry height")));
    }
    let (height, blob) = value.split_at(HEIGHT_LENGTH);
    let mut bytes = [0u8; HEIGHT_LENGTH];
    bytes.copy_from_slice(height);
    Ok((u64::from_be_bytes(bytes), blob))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;

    fn seed(n: u8) -> Hash {
        Hash([n; 32])
    }

    fn refuse_writes(store: &KeyShareStore, refuse: bool) {
        match &store.db {
            Keyspace::Memory(mem) => mem.refuse_writes.store(refuse, Ordering::SeqCst),
            Keyspace::Rocks { .. } => panic!("expected an in-memory store"),
        }
    }

    #[test]
    fn test_fields_merge_into_one_record() {
        let store = KeyShareStore::in_memory(&Seckey::from_u64(1));
        store
            .store_encryption_seckey(&seed(1), Seckey::from_u64(10), 100)
            .unwrap();
        store
            .store_group_signature_seckey(&seed(1), Seckey::from_u64(20), 100)
            .unwrap();

        let record = store.get_key_share(&seed(1)).unwrap().unwrap();
        assert_eq!(record.enc_seckey, Some(Seckey::from_u64(10)));
        assert_eq!(record.msk, Some(Seckey::from_u64(20)));
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.get_key_share(&seed(2)).unwrap(), None);
    }

    #[test]
    fn test_restore_moves_expiry_entry() {
        let store = KeyShareStore::in_memory(&Seckey::from_u64(1));
        store
            .store_encryption_seckey(&seed(1), Seckey::from_u64(10), 100)
            .unwrap();
        store
            .store_group_signature_seckey(&seed(1), Seckey::from_u64(20), 300)
            .unwrap();
        assert_eq!(store.expire_height(&seed(1)).unwrap(), Some(300));
        assert!(store.db.get(&expiry_key(100, &seed(1))).unwrap().is_none());
        assert!(store.db.get(&expiry_key(300, &seed(1))).unwrap().is_some());

        assert_eq!(store.remove_expired(150).unwrap(), 0);
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.remove_expired(300).unwrap(), 1);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_remove_expired_is_inclusive_and_idempotent() {
        let store = KeyShareStore::in_memory(&Seckey::from_u64(1));
        for (i, expire) in [(1u8, 10u64), (2, 20), (3, 30)] {
            store
                .store_encryption_seckey(&seed(i), Seckey::from_u64(i as u64), expire)
                .unwrap();
        }
        assert_eq!(store.remove_expired(20).unwrap(), 2);
        assert_eq!(store.remove_expired(20).unwrap(), 0);
        assert_eq!(store.get_encryption_seckey(&seed(3)).unwrap(), Some(Seckey::from_u64(3)));
        assert_eq!(store.get_encryption_seckey(&seed(1)).unwrap(), None);
    }

    #[test]
    fn test_expiry_keys_sort_by_height() {
        // 256 > 255 only compares correctly in big-endian
        assert!(expiry_key(255, &seed(9)) < expiry_key(256, &seed(1)));
        assert_eq!(seed_of_expiry_key(&expiry_key(7, &seed(4))).unwrap(), seed(4));
        assert!(seed_of_expiry_key(&[EXPIRY_PREFIX, 1, 2]).is_err());

        let store = KeyShareStore::in_memory(&Seckey::from_u64(1));
        store.store_encryption_seckey(&seed(1), Seckey::from_u64(1), 256).unwrap();
        store.store_encryption_seckey(&seed(2), Seckey::from_u64(2), 255).unwrap();
        assert_eq!(store.remove_expired(255).unwrap(), 1);
        assert!(store.get_key_share(&seed(2)).unwrap().is_none());
        assert!(store.get_key_share(&seed(1)).unwrap().is_some());
    }

    #[test]
    fn test_failed_expiry_is_retried() {
        let store = KeyShareStore::in_memory(&Seckey::from_u64(1));
        store.store_group_signature_seckey(&seed(1), Seckey::from_u64(5), 100).unwrap();

        refuse_writes(&store, true);
        assert!(matches!(store.remove_expired(150), Err(KeyStoreError::Io { .. })));
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.expire_height(&seed(1)).unwrap(), Some(100));

        refuse_writes(&store, false);
        assert_eq!(store.remove_expired(600).unwrap(), 1);
        assert!(store.is_empty().unwrap());
        assert!(store.db.get(&expiry_key(100, &seed(1))).unwrap().is_none());
    }

    #[test]
    fn test_failed_store_leaves_previous_record() {
        let store = KeyShareStore::in_memory(&Seckey::from_u64(1));
        store.store_encryption_seckey(&seed(1), Seckey::from_u64(3), 100).unwrap();

        refuse_writes(&store, true);
        assert!(store.store_group_signature_seckey(&seed(1), Seckey::from_u64(4), 200).is_err());
        assert!(store.store_encryption_seckey(&seed(2), Seckey::from_u64(6), 200).is_err());
        refuse_writes(&store, false);

        let record = store.get_key_share(&seed(1)).unwrap().unwrap();
        assert_eq!(record.enc_seckey, Some(Seckey::from_u64(3)));
        assert_eq!(record.msk, None);
        assert_eq!(store.expire_height(&seed(1)).unwrap(), Some(100));
        assert_eq!(store.get_key_share(&seed(2)).unwrap(), None);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_blobs_are_encrypted() {
        let store = KeyShareStore::in_memory(&Seckey::from_u64(1));
        let secret = Seckey::from_u64(0xdead_beef);
        store.store_group_signature_seckey(&seed(1), secret, 10).unwrap();

        let value = store.db.get(&record_key(&seed(1))).unwrap().unwrap();
        let plain = secret.to_bytes();
        assert!(!value.windows(plain.len()).any(|w| w == plain));
    }

    #[test]
    fn test_tampered_blob_fails_to_open() {
        let store = KeyShareStore::in_memory(&Seckey::from_u64(1));
        store.store_group_signature_seckey(&seed(1), Seckey::from_u64(5), 10).unwrap();

        let key = record_key(&seed(1));
        let mut value = store.db.get(&key).unwrap().unwrap();
        let last = value.len() - 1;
        value[last] ^= 1;
        store.db.write(vec![Op::Put(key, value)]).unwrap();

        assert!(matches!(
            store.get_key_share(&seed(1)),
            Err(KeyStoreError::Decryption(_))
        ));
    }

    #[test]
    fn test_truncated_value_is_corrupt() {
        let store = KeyShareStore::in_memory(&Seckey::from_u64(1));
        store.db.write(vec![Op::Put(record_key(&seed(1)), vec![0, 1, 2])]).unwrap();
        assert!(matches!(store.get_key_share(&seed(1)), Err(KeyStoreError::Corrupt(_))));
        assert!(matches!(store.expire_height(&seed(1)), Err(KeyStoreError::Corrupt(_))));
    }
}
