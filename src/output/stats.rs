//! Statistics generation from the item database and task records
//!
//! This module provides functionality for extracting and displaying
//! item statistics from the storage layer, and for summarizing a finished
//! task run.

use crate::storage::{SqliteStorage, StorageResult};
use crate::task::CrawlTask;

/// Item statistics summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemStatistics {
    /// Total number of stored items
    pub total_items: u64,

    /// Item counts per source domain, largest first
    pub by_source: Vec<(String, u64)>,

    /// Item counts per language, largest first
    pub by_language: Vec<(String, u64)>,
}

/// Loads statistics from storage
///
/// # Returns
///
/// * `Ok(ItemStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(storage: &SqliteStorage) -> StorageResult<ItemStatistics> {
    Ok(ItemStatistics {
        total_items: storage.count_items()?,
        by_source: storage.count_by_source()?,
        by_language: storage.count_by_language()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &ItemStatistics) {
    println!("=== Item Statistics ===\n");
    println!("Total items: {}", stats.total_items);
    println!();

    println!("Items by Source ({}):", stats.by_source.len());
    for (source, count) in &stats.by_source {
        println!(
            "  {}: {} ({:.1}%)",
            display_key(source),
            count,
            percentage(*count, stats.total_items)
        );
    }
    println!();

    println!("Items by Language ({}):", stats.by_language.len());
    for (language, count) in &stats.by_language {
        println!(
            "  {}: {} ({:.1}%)",
            display_key(language),
            count,
            percentage(*count, stats.total_items)
        );
    }
}

/// Condensed view of a task run for reporting
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSummary {
    pub id: String,
    pub name: String,
    pub status: String,
    pub duration_seconds: Option<i64>,
    pub total_urls: u64,
    pub processed_urls: u64,
    pub success_urls: u64,
    pub failed_urls: u64,
    pub items_count: u64,
    pub error_message: Option<String>,
}

impl TaskSummary {
    pub fn from_task(task: &CrawlTask) -> Self {
        let c = task.counters;
        Self {
            id: task.id.clone(),
            name: task.name.clone(),
            status: task.status.to_string(),
            duration_seconds: task.duration().map(|d| d.num_seconds()),
            total_urls: c.total_urls,
            processed_urls: c.processed_urls,
            success_urls: c.success_urls,
            failed_urls: c.failed_urls,
            items_count: c.items_count,
            error_message: task.error_message.clone(),
        }
    }

    /// Share of processed pages that succeeded, in percent
    pub fn success_rate(&self) -> f64 {
        percentage(self.success_urls, self.processed_urls)
    }
}

/// Prints a finished task's status and counters
pub fn print_task_summary(task: &CrawlTask) {
    let summary = TaskSummary::from_task(task);

    println!("=== Task {} ({}) ===", summary.name, summary.id);
    println!("  Status: {}", summary.status);
    if let Some(secs) = summary.duration_seconds {
        println!("  Duration: {}s", secs);
    }
    println!("  URLs admitted: {}", summary.total_urls);
    println!("  URLs processed: {}", summary.processed_urls);
    println!(
        "  Succeeded: {} ({:.1}%)",
        summary.success_urls,
        summary.success_rate()
    );
    println!("  Failed: {}", summary.failed_urls);
    println!("  Items saved: {}", summary.items_count);
    if let Some(message) = &summary.error_message {
        println!("  Error: {}", message);
    }
    println!();
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64) * 100.0
    }
}

fn display_key(key: &str) -> &str {
    if key.is_empty() {
        "(unknown)"
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Item;
    use crate::state::TaskStatus;
    use crate::storage::Storage;

    #[test]
    fn test_load_statistics() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        for (url, source, lang) in [
            ("https://a.test/1", "a.test", "en"),
            ("https://a.test/2", "a.test", ""),
            ("https://b.test/1", "b.test", "en"),
        ] {
            let mut item = Item::new(url);
            item.source = source.to_string();
            item.language = lang.to_string();
            storage.save(&item).unwrap();
        }

        let stats = load_statistics(&storage).unwrap();
        assert_eq!(stats.total_items, 3);
        assert_eq!(stats.by_source[0], ("a.test".to_string(), 2));
        assert_eq!(stats.by_language[0], ("en".to_string(), 2));
    }

    #[test]
    fn test_task_summary() {
        let mut task = CrawlTask::new("t1", "news", "https://a.test", vec![]);
        task.status = TaskStatus::Completed;
        task.counters.processed_urls = 4;
        task.counters.success_urls = 3;
        task.counters.failed_urls = 1;

        let summary = TaskSummary::from_task(&task);
        assert_eq!(summary.status, "completed");
        assert_eq!(summary.duration_seconds, None);
        assert!((summary.success_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_percentage_of_zero() {
        assert_eq!(percentage(5, 0), 0.0);
        assert_eq!(display_key(""), "(unknown)");
    }
}
