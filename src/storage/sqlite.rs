//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::item::{Item, ItemStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const UPSERT_SQL: &str = "
    INSERT INTO items (
        url, title, content, description, author, source, publish_date, timestamp,
        keywords, tags, category, links, images, videos, language, status, metadata,
        view_count, comment_count, like_count, share_count, content_hash, updated_at
    ) VALUES (
        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
        ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23
    )
    ON CONFLICT(url) DO UPDATE SET
        title = excluded.title,
        content = excluded.content,
        description = excluded.description,
        author = excluded.author,
        source = excluded.source,
        publish_date = excluded.publish_date,
        timestamp = excluded.timestamp,
        keywords = excluded.keywords,
        tags = excluded.tags,
        category = excluded.category,
        links = excluded.links,
        images = excluded.images,
        videos = excluded.videos,
        language = excluded.language,
        status = excluded.status,
        metadata = excluded.metadata,
        view_count = excluded.view_count,
        comment_count = excluded.comment_count,
        like_count = excluded.like_count,
        share_count = excluded.share_count,
        content_hash = excluded.content_hash,
        updated_at = excluded.updated_at
";

const SELECT_ITEM_SQL: &str = "
    SELECT url, title, content, description, author, source, publish_date, timestamp,
           keywords, tags, category, links, images, videos, language, status, metadata,
           view_count, comment_count, like_count, share_count
    FROM items WHERE url = ?1
";

/// SQLite storage backend
///
/// The connection sits behind a mutex so one backend can be shared by every
/// crawl worker. `None` marks a closed backend.
pub struct SqliteStorage {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// Missing parent directories of `path` are created.
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored items
    pub fn count_items(&self) -> StorageResult<u64> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(from_sql_count(count))
    }

    /// Loads the item stored under `url`
    pub fn get_item(&self, url: &str) -> StorageResult<Option<Item>> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;

        let raw = conn
            .query_row(SELECT_ITEM_SQL, params![url], RawItem::from_row)
            .optional()?;

        raw.map(RawItem::into_item).transpose()
    }

    /// Item counts grouped by source domain, largest first
    pub fn count_by_source(&self) -> StorageResult<Vec<(String, u64)>> {
        self.grouped_counts("source")
    }

    /// Item counts grouped by detected language, largest first
    pub fn count_by_language(&self) -> StorageResult<Vec<(String, u64)>> {
        self.grouped_counts("language")
    }

    fn grouped_counts(&self, column: &'static str) -> StorageResult<Vec<(String, u64)>> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;

        let sql = format!(
            "SELECT {col}, COUNT(*) AS n FROM items GROUP BY {col} ORDER BY n DESC, {col} ASC",
            col = column
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((key, from_sql_count(count)))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }
}

impl Storage for SqliteStorage {
    fn save(&self, item: &Item) -> StorageResult<()> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;
        upsert(conn, item)
    }

    fn save_batch(&self, items: &[Item]) -> StorageResult<()> {
        let mut guard = self.lock();
        let conn = guard.as_mut().ok_or(StorageError::Closed)?;

        let tx = conn.transaction()?;
        for item in items {
            upsert(&tx, item)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        let mut guard = self.lock();
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
        }
        Ok(())
    }
}

fn upsert(conn: &Connection, item: &Item) -> StorageResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        UPSERT_SQL,
        params![
            item.url,
            item.title,
            item.content,
            item.description,
            item.author,
            item.source,
            item.publish_date.map(|d| d.to_rfc3339()),
            item.timestamp.to_rfc3339(),
            serde_json::to_string(&item.keywords)?,
            serde_json::to_string(&item.tags)?,
            item.category,
            serde_json::to_string(&item.links)?,
            serde_json::to_string(&item.images)?,
            serde_json::to_string(&item.videos)?,
            item.language,
            item.status.as_str(),
            serde_json::to_string(&item.metadata)?,
            to_sql_count(item.view_count),
            to_sql_count(item.comment_count),
            to_sql_count(item.like_count),
            to_sql_count(item.share_count),
            item.content_hash(),
            now,
        ],
    )?;
    Ok(())
}

fn to_sql_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn from_sql_count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Database(format!("invalid timestamp '{}': {}", raw, e)))
}

/// Column values as read, before JSON and date decoding
struct RawItem {
    url: String,
    title: String,
    content: String,
    description: String,
    author: String,
    source: String,
    publish_date: Option<String>,
    timestamp: String,
    keywords: String,
    tags: String,
    category: String,
    links: String,
    images: String,
    videos: String,
    language: String,
    status: String,
    metadata: String,
    counts: [i64; 4],
}

impl RawItem {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            url: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            description: row.get(3)?,
            author: row.get(4)?,
            source: row.get(5)?,
            publish_date: row.get(6)?,
            timestamp: row.get(7)?,
            keywords: row.get(8)?,
            tags: row.get(9)?,
            category: row.get(10)?,
            links: row.get(11)?,
            images: row.get(12)?,
            videos: row.get(13)?,
            language: row.get(14)?,
            status: row.get(15)?,
            metadata: row.get(16)?,
            counts: [row.get(17)?, row.get(18)?, row.get(19)?, row.get(20)?],
        })
    }

    fn into_item(self) -> StorageResult<Item> {
        let publish_date = match self.publish_date.as_deref() {
            Some(raw) => Some(parse_timestamp(raw)?),
            None => None,
        };
        let [views, comments, likes, shares] = self.counts;

        Ok(Item {
            url: self.url,
            title: self.title,
            content: self.content,
            description: self.description,
            author: self.author,
            source: self.source,
            publish_date,
            timestamp: parse_timestamp(&self.timestamp)?,
            keywords: serde_json::from_str(&self.keywords)?,
            tags: serde_json::from_str(&self.tags)?,
            category: self.category,
            links: serde_json::from_str(&self.links)?,
            images: serde_json::from_str(&self.images)?,
            videos: serde_json::from_str(&self.videos)?,
            language: self.language,
            status: ItemStatus::parse(&self.status).unwrap_or_default(),
            metadata: serde_json::from_str(&self.metadata)?,
            view_count: from_sql_count(views),
            comment_count: from_sql_count(comments),
            like_count: from_sql_count(likes),
            share_count: from_sql_count(shares),
        })
    }
}
