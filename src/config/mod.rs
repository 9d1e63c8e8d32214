//! Configuration module for Kumo-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! The loaded [`Config`] supplies global crawl defaults and the list of sites;
//! the engine treats it as read-only input.
//!
//! # Example
//!
//! ```no_run
//! use kumo_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Default concurrency: {}", config.spider.concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, OutputConfig, RulesOverride, SiteConfig, SpiderConfig, DEFAULT_CONCURRENCY,
    DEFAULT_CONTENT_TYPES, DEFAULT_DATABASE_PATH, DEFAULT_DELAY_MS, DEFAULT_MAX_DEPTH,
    DEFAULT_MAX_PAGES, DEFAULT_RETRIES, DEFAULT_RETRY_BACKOFF_MS, DEFAULT_TIMEOUT_SECS,
    DEFAULT_USER_AGENT,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::{validate, validate_domain_pattern};
