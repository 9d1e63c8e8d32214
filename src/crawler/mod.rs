//! Crawler module for web page fetching and processing
//!
//! This module contains the crawl engine, including:
//! - Per-domain politeness and concurrency control
//! - The URL frontier with dedup, depth and page budget
//! - HTTP fetching with outcome classification and bounded retries
//! - Selector-driven extraction and link discovery
//! - Handing items to storage and tracking the task lifecycle

mod engine;
mod extractor;
mod fetcher;
mod frontier;
mod limiter;
mod retry;
mod sink;
mod text;
mod tracker;

pub use engine::{Engine, StopHandle, TaskHandle};
pub use extractor::{Extraction, Extractor, Page};
pub use fetcher::{
    build_http_client, content_type_allowed, FetchOutcome, FetchSettings, HttpFetcher,
    PageFetcher,
};
pub use frontier::{Admission, Frontier, FrontierEntry};
pub use limiter::{Acquire, DomainLimiter};
pub use retry::{RetryDecision, RetryPolicy};
pub use sink::ResultSink;
pub use text::{clean_text, detect_language, parse_count, parse_date};
pub use tracker::TaskTracker;
