//! Crawl task descriptor and its rules
//!
//! A [`CrawlTask`] is the immutable-per-run input of the engine (seeds,
//! selectors, rules) plus the status and counters the task tracker maintains
//! while the run is in progress.

use crate::config::{SiteConfig, SpiderConfig};
use crate::state::TaskStatus;
use crate::url::{normalize_url, AdmissionPolicy};
use crate::CrawlError;
use chrono::{DateTime, Utc};
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Crawl rules applied to one task run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlRules {
    /// Maximum link depth, seeds are depth 0
    pub max_depth: u32,

    /// Maximum number of URLs admitted in one run, 0 means unlimited
    pub max_pages: u32,

    /// Worker pool size and per-domain parallelism, `None` uses the global default
    pub concurrency: Option<usize>,

    /// Minimum delay between two dispatches to one domain, `None` uses the global default
    pub delay_ms: Option<u64>,

    /// Empty means every domain is allowed
    pub allowed_domains: BTreeSet<String>,
    pub forbidden_domains: BTreeSet<String>,

    /// Regex patterns, a URL must match at least one when the list is non-empty
    pub url_patterns: Vec<String>,

    /// Accepted response content types, empty accepts every type
    pub content_types: BTreeSet<String>,

    /// Carried for callers; robots.txt is not evaluated by the engine
    pub respect_robots: bool,
}

impl Default for CrawlRules {
    fn default() -> Self {
        Self {
            max_depth: crate::config::DEFAULT_MAX_DEPTH,
            max_pages: crate::config::DEFAULT_MAX_PAGES,
            concurrency: None,
            delay_ms: None,
            allowed_domains: BTreeSet::new(),
            forbidden_domains: BTreeSet::new(),
            url_patterns: Vec::new(),
            content_types: BTreeSet::new(),
            respect_robots: false,
        }
    }
}

impl CrawlRules {
    /// Builds rules from the global defaults of the config source
    pub fn from_defaults(spider: &SpiderConfig) -> Self {
        Self {
            max_depth: spider.max_depth,
            max_pages: spider.max_pages,
            concurrency: None,
            delay_ms: None,
            allowed_domains: spider.allowed_domains.iter().cloned().collect(),
            forbidden_domains: spider.forbidden_domains.iter().cloned().collect(),
            url_patterns: spider.url_patterns.clone(),
            content_types: spider.content_types.iter().cloned().collect(),
            respect_robots: spider.respect_robots,
        }
    }

    /// Effective worker pool size for this task
    pub fn effective_concurrency(&self, spider: &SpiderConfig) -> usize {
        self.concurrency.unwrap_or(spider.concurrency).max(1)
    }

    /// Effective per-domain politeness delay for this task
    pub fn effective_delay(&self, spider: &SpiderConfig) -> Duration {
        Duration::from_millis(self.delay_ms.unwrap_or(spider.delay_ms))
    }

    /// Returns true if `admitted` URLs already exhaust the page budget
    pub fn budget_exhausted(&self, admitted: u64) -> bool {
        self.max_pages > 0 && admitted >= u64::from(self.max_pages)
    }

    fn validate(&self) -> Result<(), CrawlError> {
        if self.concurrency == Some(0) {
            return Err(CrawlError::Validation(
                "concurrency must be at least 1".to_string(),
            ));
        }

        // Domain entries and URL patterns must compile into an admission policy
        AdmissionPolicy::from_rules(self)?;

        if self.content_types.iter().any(|ct| ct.trim().is_empty()) {
            return Err(CrawlError::Validation(
                "content types cannot be blank".to_string(),
            ));
        }

        Ok(())
    }
}

/// A field the extractor can fill from a selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Item,
    Title,
    Content,
    Description,
    Keywords,
    Author,
    Links,
    Images,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Item,
        Field::Title,
        Field::Content,
        Field::Description,
        Field::Keywords,
        Field::Author,
        Field::Links,
        Field::Images,
    ];

    /// Selector map key for this field
    pub fn key(&self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Title => "title",
            Self::Content => "content",
            Self::Description => "description",
            Self::Keywords => "keywords",
            Self::Author => "author",
            Self::Links => "links",
            Self::Images => "images",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.key() == key)
    }
}

/// Task-provided selectors, one optional selector string per field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelectors {
    pub item: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub author: Option<String>,
    pub links: Option<String>,
    pub images: Option<String>,
}

impl FieldSelectors {
    /// Builds typed selectors from a field-name map
    ///
    /// Keys outside the known field set are ignored and returned so the
    /// caller can report them.
    pub fn from_map(map: &BTreeMap<String, String>) -> (Self, Vec<String>) {
        let mut selectors = Self::default();
        let mut unknown = Vec::new();

        for (key, value) in map {
            match Field::from_key(key.trim()) {
                Some(field) => selectors.set(field, value.clone()),
                None => unknown.push(key.clone()),
            }
        }

        (selectors, unknown)
    }

    pub fn set(&mut self, field: Field, selector: impl Into<String>) {
        let slot = match field {
            Field::Item => &mut self.item,
            Field::Title => &mut self.title,
            Field::Content => &mut self.content,
            Field::Description => &mut self.description,
            Field::Keywords => &mut self.keywords,
            Field::Author => &mut self.author,
            Field::Links => &mut self.links,
            Field::Images => &mut self.images,
        };
        *slot = Some(selector.into());
    }

    /// Returns the selector for `field` when present and non-blank
    pub fn get(&self, field: Field) -> Option<&str> {
        let slot = match field {
            Field::Item => &self.item,
            Field::Title => &self.title,
            Field::Content => &self.content,
            Field::Description => &self.description,
            Field::Keywords => &self.keywords,
            Field::Author => &self.author,
            Field::Links => &self.links,
            Field::Images => &self.images,
        };
        slot.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    fn validate(&self) -> Result<(), CrawlError> {
        for field in Field::ALL {
            if let Some(raw) = self.get(field) {
                Selector::parse(raw).map_err(|e| {
                    CrawlError::Validation(format!(
                        "invalid {} selector '{}': {:?}",
                        field.key(),
                        raw,
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

/// Progress counters maintained by the task tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounters {
    /// URLs admitted to the frontier
    pub total_urls: u64,
    /// URLs with a final outcome (success or abandoned)
    pub processed_urls: u64,
    pub success_urls: u64,
    pub failed_urls: u64,
    /// Items accepted by storage
    pub items_count: u64,
}

/// One crawl task and its run state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlTask {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub start_urls: Vec<String>,
    pub selectors: FieldSelectors,
    pub rules: CrawlRules,
    pub status: TaskStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub counters: TaskCounters,
    pub error_message: Option<String>,
}

impl CrawlTask {
    /// Creates a pending task with default selectors and rules
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        base_url: impl Into<String>,
        start_urls: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            base_url: base_url.into(),
            start_urls,
            selectors: FieldSelectors::default(),
            rules: CrawlRules::default(),
            status: TaskStatus::Pending,
            start_time: None,
            end_time: None,
            counters: TaskCounters::default(),
            error_message: None,
        }
    }

    pub fn with_selectors(mut self, selectors: FieldSelectors) -> Self {
        self.selectors = selectors;
        self
    }

    pub fn with_rules(mut self, rules: CrawlRules) -> Self {
        self.rules = rules;
        self
    }

    /// Builds a task from a configured site, merging its rule overrides
    /// over the global defaults
    pub fn from_site(id: impl Into<String>, site: &SiteConfig, spider: &SpiderConfig) -> Self {
        let mut rules = CrawlRules::from_defaults(spider);
        let overrides = &site.rules;

        if let Some(depth) = overrides.max_depth {
            rules.max_depth = depth;
        }
        if let Some(pages) = overrides.max_pages {
            rules.max_pages = pages;
        }
        rules.concurrency = overrides.concurrency;
        rules.delay_ms = overrides.delay_ms;
        if let Some(domains) = &overrides.allowed_domains {
            rules.allowed_domains = domains.iter().cloned().collect();
        }
        if let Some(domains) = &overrides.forbidden_domains {
            rules.forbidden_domains = domains.iter().cloned().collect();
        }
        if let Some(patterns) = &overrides.url_patterns {
            rules.url_patterns = patterns.clone();
        }
        if let Some(types) = &overrides.content_types {
            rules.content_types = types.iter().cloned().collect();
        }
        if let Some(respect) = overrides.respect_robots {
            rules.respect_robots = respect;
        }

        let (selectors, unknown) = FieldSelectors::from_map(&site.selectors);
        for key in &unknown {
            tracing::warn!(site = %site.name, key = %key, "ignoring unknown selector field");
        }

        Self::new(id, site.name.clone(), site.base_url.clone(), site.start_urls.clone())
            .with_selectors(selectors)
            .with_rules(rules)
    }

    /// Checks everything that must hold before any network activity
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.base_url.trim().is_empty() {
            return Err(CrawlError::Validation("base URL is empty".to_string()));
        }
        if self.start_urls.is_empty() {
            return Err(CrawlError::Validation("no start URLs".to_string()));
        }
        for seed in &self.start_urls {
            normalize_url(seed).map_err(|e| {
                CrawlError::Validation(format!("invalid start URL '{}': {}", seed, e))
            })?;
        }

        self.rules.validate()?;
        self.selectors.validate()?;
        Ok(())
    }

    /// Time between start and end, or start and now while running
    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.start_time?;
        let end = self.end_time.unwrap_or_else(Utc::now);
        Some(end - start)
    }
}
