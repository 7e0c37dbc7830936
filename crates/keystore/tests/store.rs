use std::sync::Arc;

use committee_crypto::Seckey;
use committee_keystore::{KeyShareStore, KeyStoreError};
use committee_types::Hash;
use tokio::sync::mpsc;

fn seed(n: u8) -> Hash {
    Hash([n; 32])
}

#[test]
fn test_reopen_restores_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keyshares.db");
    let node_key = Seckey::from_u64(77);

    {
        let store = KeyShareStore::open(&path, &node_key).unwrap();
        store.store_encryption_seckey(&seed(1), Seckey::from_u64(3), 100).unwrap();
        store.store_group_signature_seckey(&seed(1), Seckey::from_u64(4), 100).unwrap();
        store.store_group_signature_seckey(&seed(2), Seckey::from_u64(5), 500).unwrap();
    }

    let store = KeyShareStore::open(&path, &node_key).unwrap();
    assert_eq!(store.len().unwrap(), 2);
    assert_eq!(store.get_encryption_seckey(&seed(1)).unwrap(), Some(Seckey::from_u64(3)));
    assert_eq!(store.get_group_signature_seckey(&seed(1)).unwrap(), Some(Seckey::from_u64(4)));
    assert_eq!(store.expire_height(&seed(2)).unwrap(), Some(500));

    // The expiry keyspace is on disk too
    assert_eq!(store.remove_expired(100).unwrap(), 1);
    drop(store);
    let store = KeyShareStore::open(&path, &node_key).unwrap();
    assert_eq!(store.len().unwrap(), 1);
    assert_eq!(store.remove_expired(499).unwrap(), 0);
    assert_eq!(store.remove_expired(500).unwrap(), 1);
    drop(store);
    assert!(KeyShareStore::open(&path, &node_key).unwrap().is_empty().unwrap());
}

#[test]
fn test_moved_expiry_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keyshares.db");
    let node_key = Seckey::from_u64(8);
    {
        let store = KeyShareStore::open(&path, &node_key).unwrap();
        store.store_encryption_seckey(&seed(1), Seckey::from_u64(1), 100).unwrap();
        store.store_group_signature_seckey(&seed(1), Seckey::from_u64(2), 900).unwrap();
    }

    let store = KeyShareStore::open(&path, &node_key).unwrap();
    assert_eq!(store.remove_expired(100).unwrap(), 0);
    let record = store.get_key_share(&seed(1)).unwrap().unwrap();
    assert_eq!(record.enc_seckey, Some(Seckey::from_u64(1)));
    assert_eq!(record.msk, Some(Seckey::from_u64(2)));
    assert_eq!(store.remove_expired(900).unwrap(), 1);
}

#[test]
fn test_wrong_node_key_cannot_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keyshares.db");
    KeyShareStore::open(&path, &Seckey::from_u64(1))
        .unwrap()
        .store_group_signature_seckey(&seed(1), Seckey::from_u64(9), 10)
        .unwrap();

    let other = KeyShareStore::open(&path, &Seckey::from_u64(2)).unwrap();
    assert!(matches!(
        other.get_key_share(&seed(1)),
        Err(KeyStoreError::Decryption(_))
    ));
}

#[test]
fn test_unusable_path_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keyshares.db");
    std::fs::write(&path, b"a file, not a database").unwrap();
    assert!(KeyShareStore::open(&path, &Seckey::from_u64(1)).is_err());
}

#[test]
fn test_store_is_locked_while_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keyshares.db");
    let first = KeyShareStore::open(&path, &Seckey::from_u64(1)).unwrap();
    assert!(matches!(
        KeyShareStore::open(&path, &Seckey::from_u64(1)),
        Err(KeyStoreError::Db(_))
    ));
    drop(first);
    assert!(KeyShareStore::open(&path, &Seckey::from_u64(1)).is_ok());
}

/// Records expiring at 100 and 500; height events 50, 150, 600.
#[tokio::test]
async fn test_expiry_follows_height_events() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(KeyShareStore::open(dir.path().join("keyshares.db"), &Seckey::from_u64(1)).unwrap());
    store.store_group_signature_seckey(&seed(1), Seckey::from_u64(11), 100).unwrap();
    store.store_group_signature_seckey(&seed(5), Seckey::from_u64(55), 500).unwrap();

    let (tx, rx) = mpsc::channel(8);
    tx.send(50).await.unwrap();
    drop(tx);
    Arc::clone(&store).run_expiry_loop(rx).await;
    assert!(store.get_key_share(&seed(1)).unwrap().is_some());
    assert!(store.get_key_share(&seed(5)).unwrap().is_some());

    let (tx, rx) = mpsc::channel(8);
    tx.send(150).await.unwrap();
    drop(tx);
    Arc::clone(&store).run_expiry_loop(rx).await;
    assert!(store.get_key_share(&seed(1)).unwrap().is_none());
    assert!(store.get_key_share(&seed(5)).unwrap().is_some());

    let (tx, handle) = store.spawn_expiry_loop(8);
    tx.send(600).await.unwrap();
    drop(tx);
    handle.await.unwrap();
    assert!(store.get_key_share(&seed(5)).unwrap().is_none());
    assert!(store.is_empty().unwrap());
}

#[test]
fn test_concurrent_writers_and_gc() {
    let store = Arc::new(KeyShareStore::in_memory(&Seckey::from_u64(1)));
    let writers: Vec<_> = (0..4u8)
        .map(|t| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..25u8 {
                    let s = Hash([t * 25 + i; 32]);
                    store
                        .store_encryption_seckey(&s, Seckey::from_u64(i as u64 + 1), (t as u64 + 1) * 100)
                        .unwrap();
                }
            })
        })
        .collect();
    let gc = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for _ in 0..50 {
                store.remove_expired(100).unwrap();
            }
        })
    };
    for w in writers {
        w.join().unwrap();
    }
    gc.join().unwrap();

    store.remove_expired(100).unwrap();
    assert_eq!(store.len().unwrap(), 75);
    assert_eq!(store.remove_expired(400).unwrap(), 75);
}
