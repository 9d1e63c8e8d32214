//! Retry controller for transient fetch failures
//!
//! Retries use a fixed backoff with no exponential growth. The retry count
//! travels on the [`FrontierEntry`] as an integer.

use crate::config::SpiderConfig;
use crate::crawler::frontier::FrontierEntry;
use std::time::Duration;

/// What to do with an entry whose fetch failed transiently
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resubmit `entry` (its count already incremented) after `after`
    Retry { entry: FrontierEntry, after: Duration },
    /// Retry budget exhausted
    Abandon { entry: FrontierEntry },
}

/// Bounded fixed-backoff retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: crate::config::DEFAULT_RETRIES,
            backoff: Duration::from_millis(crate::config::DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn from_config(spider: &SpiderConfig) -> Self {
        Self::new(
            spider.retries,
            Duration::from_millis(spider.retry_backoff_ms),
        )
    }

    /// Decides between another attempt and abandonment
    ///
    /// An entry is retried while `retry_count < max_retries`; it is
    /// abandoned with `retry_count == max_retries`.
    pub fn decide(&self, mut entry: FrontierEntry) -> RetryDecision {
        if entry.retry_count < self.max_retries {
            entry.retry_count += 1;
            RetryDecision::Retry {
                entry,
                after: self.backoff,
            }
        } else {
            RetryDecision::Abandon { entry }
        }
    }
}
