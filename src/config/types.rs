use serde::Deserialize;
use std::collections::BTreeMap;

/// Default values used when the config file leaves a setting out
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_DELAY_MS: u64 = 1000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 2000;
pub const DEFAULT_MAX_DEPTH: u32 = 10;
pub const DEFAULT_MAX_PAGES: u32 = 1000;
pub const DEFAULT_DATABASE_PATH: &str = "./data/crawler.db";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Content types accepted when the config does not name any
pub const DEFAULT_CONTENT_TYPES: &[&str] = &[
    "text/html",
    "text/plain",
    "application/json",
    "application/xml",
    "text/xml",
    "application/rss+xml",
    "application/atom+xml",
];

/// Main configuration structure for Kumo-Harvest
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub spider: SpiderConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(rename = "site", default)]
    pub sites: Vec<SiteConfig>,
}

/// Global crawl defaults shared by every task
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SpiderConfig {
    /// Worker pool size, also used as per-domain parallelism
    pub concurrency: usize,

    /// Minimum time between two requests to the same domain (milliseconds)
    pub delay_ms: u64,

    /// Request timeout (seconds)
    pub timeout_secs: u64,

    /// Maximum number of retries for transient failures
    pub retries: u32,

    /// Fixed wait before a retried request is resubmitted (milliseconds)
    pub retry_backoff_ms: u64,

    pub user_agent: String,
    pub proxy_url: Option<String>,
    pub max_depth: u32,

    /// Maximum number of pages per task, 0 means unlimited
    pub max_pages: u32,

    pub allowed_domains: Vec<String>,
    pub forbidden_domains: Vec<String>,
    pub url_patterns: Vec<String>,
    pub content_types: Vec<String>,
    pub respect_robots: bool,
}

impl Default for SpiderConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            delay_ms: DEFAULT_DELAY_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retries: DEFAULT_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy_url: None,
            max_depth: DEFAULT_MAX_DEPTH,
            max_pages: DEFAULT_MAX_PAGES,
            allowed_domains: Vec::new(),
            forbidden_domains: Vec::new(),
            url_patterns: Vec::new(),
            content_types: DEFAULT_CONTENT_TYPES.iter().map(|s| s.to_string()).collect(),
            respect_robots: false,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    pub database_path: String,

    /// Items per `save_batch` call, 0 saves every item individually
    pub batch_size: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            batch_size: 0,
        }
    }
}

/// A configured web property that becomes one crawl task per run
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SiteConfig {
    pub name: String,
    pub base_url: String,
    pub start_urls: Vec<String>,

    /// Field name to selector string (item/title/content/description/keywords/author/links/images)
    #[serde(default)]
    pub selectors: BTreeMap<String, String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub rules: RulesOverride,
}

fn default_enabled() -> bool {
    true
}

/// Per-site overrides of the [`SpiderConfig`] defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RulesOverride {
    pub max_depth: Option<u32>,
    pub max_pages: Option<u32>,
    pub concurrency: Option<usize>,
    pub delay_ms: Option<u64>,
    pub allowed_domains: Option<Vec<String>>,
    pub forbidden_domains: Option<Vec<String>>,
    pub url_patterns: Option<Vec<String>>,
    pub content_types: Option<Vec<String>>,
    pub respect_robots: Option<bool>,
}
