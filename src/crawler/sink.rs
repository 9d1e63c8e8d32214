//! Result Sink
//!
//! Hands finished items to a [`Storage`] backend, either one save per item
//! or one `save_batch` per full batch. Storage failures are logged and
//! dropped; the sink never retries them.

use crate::item::Item;
use crate::storage::Storage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct ResultSink {
    storage: Arc<dyn Storage>,
    batch_size: usize,
    pending: Mutex<Vec<Item>>,
}

impl ResultSink {
    /// `batch_size == 0` saves every item individually
    pub fn new(storage: Arc<dyn Storage>, batch_size: usize) -> Self {
        Self {
            storage,
            batch_size,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Forwards one item
    ///
    /// Returns the number of items storage accepted during this call: 0 or
    /// 1 in per-item mode, 0 or a whole batch in batch mode. Storage calls
    /// run on the blocking thread pool.
    pub async fn submit(&self, item: Item) -> u64 {
        if self.batch_size == 0 {
            let url = item.url.clone();
            let storage = Arc::clone(&self.storage);
            let saved = tokio::task::spawn_blocking(move || storage.save(&item)).await;
            return match saved {
                Ok(Ok(())) => 1,
                Ok(Err(e)) => {
                    tracing::warn!(url = %url, error = %e, "failed to save item");
                    0
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "storage task aborted");
                    0
                }
            };
        }

        let batch = {
            let mut pending = self.lock();
            pending.push(item);
            if pending.len() < self.batch_size {
                return 0;
            }
            std::mem::take(&mut *pending)
        };

        self.write_batch(batch).await
    }

    /// Saves whatever is still buffered; returns the accepted count
    pub async fn flush(&self) -> u64 {
        let batch = std::mem::take(&mut *self.lock());
        if batch.is_empty() {
            return 0;
        }
        self.write_batch(batch).await
    }

    /// Items buffered but not yet handed to storage
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    async fn write_batch(&self, batch: Vec<Item>) -> u64 {
        let count = batch.len();
        let storage = Arc::clone(&self.storage);
        match tokio::task::spawn_blocking(move || storage.save_batch(&batch)).await {
            Ok(Ok(())) => {
                tracing::debug!(count, "saved item batch");
                count as u64
            }
            Ok(Err(e)) => {
                tracing::warn!(count, error = %e, "failed to save item batch");
                0
            }
            Err(e) => {
                tracing::warn!(count, error = %e, "storage task aborted");
                0
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Item>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
