//! Background expiry of key shares.
//!
//! The routine feeds every new chain height into a bounded channel; the loop
//! deletes all records whose expiry height has been reached. Deletion runs
//! on the blocking pool since it waits for a synced database write. A
//! failed deletion is retried by the next height event.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::store::KeyShareStore;

impl KeyShareStore {
    /// Spawn the expiry loop on the current runtime.
    ///
    /// The loop stops once every sender is dropped.
    pub fn spawn_expiry_loop(self: &Arc<Self>, capacity: usize) -> (mpsc::Sender<u64>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(Arc::clone(self).run_expiry_loop(rx));
        (tx, handle)
    }

    /// Consume height events until the channel closes.
    pub async fn run_expiry_loop(self: Arc<Self>, mut heights: mpsc::Receiver<u64>) {
        while let Some(height) = heights.recv().await {
            let store = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || store.remove_expired(height)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(height, error = %e, "Key share expiry failed"),
                Err(e) => error!(height, error = %e, "Key share expiry task panicked"),
            }
        }
        debug!("Key share expiry loop stopped");
    }
}
