//! Structured record produced from one fetched page

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Processing status of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    New,
    Processed,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A record extracted from one successfully fetched page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub url: String,
    pub title: String,
    pub content: String,
    pub description: String,
    pub author: String,

    /// Domain the page was fetched from
    pub source: String,
    pub publish_date: Option<DateTime<Utc>>,

    /// Fetch time
    pub timestamp: DateTime<Utc>,

    pub keywords: Vec<String>,
    pub tags: Vec<String>,
    pub category: String,
    pub links: Vec<String>,
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub language: String,
    pub status: ItemStatus,
    pub metadata: BTreeMap<String, Value>,

    pub view_count: u64,
    pub comment_count: u64,
    pub like_count: u64,
    pub share_count: u64,
}

impl Item {
    /// Creates an empty item for `url`, timestamped now
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            content: String::new(),
            description: String::new(),
            author: String::new(),
            source: String::new(),
            publish_date: None,
            timestamp: Utc::now(),
            keywords: Vec::new(),
            tags: Vec::new(),
            category: String::new(),
            links: Vec::new(),
            images: Vec::new(),
            videos: Vec::new(),
            language: String::new(),
            status: ItemStatus::New,
            metadata: BTreeMap::new(),
            view_count: 0,
            comment_count: 0,
            like_count: 0,
            share_count: 0,
        }
    }

    pub fn add_keyword(&mut self, keyword: impl Into<String>) {
        push_unique(&mut self.keywords, keyword.into());
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        push_unique(&mut self.tags, tag.into());
    }

    pub fn add_link(&mut self, link: impl Into<String>) {
        push_unique(&mut self.links, link.into());
    }

    pub fn add_image(&mut self, image: impl Into<String>) {
        push_unique(&mut self.images, image.into());
    }

    pub fn add_video(&mut self, video: impl Into<String>) {
        push_unique(&mut self.videos, video.into());
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// An item is valid when it has both a URL and a title
    pub fn is_valid(&self) -> bool {
        !self.url.is_empty() && !self.title.is_empty()
    }

    /// SHA-256 hex digest of URL, title and content
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.url.as_bytes());
        hasher.update(b"|");
        hasher.update(self.title.as_bytes());
        hasher.update(b"|");
        hasher.update(self.content.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !value.is_empty() && !list.contains(&value) {
        list.push(value);
    }
}
