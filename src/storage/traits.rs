//! Storage traits and error types
//!
//! This module defines the interface the Result Sink writes items through and
//! the errors a backend may report.

use crate::item::Item;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for item storage backends
///
/// Saves are upserts keyed by item URL: a later save for the same URL
/// replaces the earlier record. Implementations are shared between crawl
/// workers, so every method takes `&self`.
pub trait Storage: Send + Sync {
    /// Inserts or replaces one item
    fn save(&self, item: &Item) -> StorageResult<()>;

    /// Inserts or replaces a batch of items
    ///
    /// Either every item of the batch is stored or none is.
    fn save_batch(&self, items: &[Item]) -> StorageResult<()>;

    /// Flushes and releases the backend; later saves fail with `Closed`
    fn close(&self) -> StorageResult<()>;
}
