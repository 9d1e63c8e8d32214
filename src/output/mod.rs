//! Output module for crawl summaries and reports
//!
//! This module handles:
//! - Item statistics read back from the database
//! - Summaries of finished task runs

pub mod stats;

pub use stats::{load_statistics, print_statistics, print_task_summary, ItemStatistics, TaskSummary};
