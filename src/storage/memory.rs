//! In-memory storage backend

use crate::item::Item;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    items: HashMap<String, Item>,
    closed: bool,
}

/// Keeps items in a map keyed by URL
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, url: &str) -> Option<Item> {
        self.lock().items.get(url).cloned()
    }

    /// All stored items, sorted by URL
    pub fn items(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self.lock().items.values().cloned().collect();
        items.sort_by(|a, b| a.url.cmp(&b.url));
        items
    }
}

impl Storage for MemoryStorage {
    fn save(&self, item: &Item) -> StorageResult<()> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        inner.items.insert(item.url.clone(), item.clone());
        Ok(())
    }

    fn save_batch(&self, items: &[Item]) -> StorageResult<()> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        for item in items {
            inner.items.insert(item.url.clone(), item.clone());
        }
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        self.lock().closed = true;
        Ok(())
    }
}
