//! URL handling module for Kumo-Harvest
//!
//! This module provides URL normalization, domain extraction, wildcard domain
//! matching, and the per-task admission policy built from a task's rules.

mod matcher;
mod normalize;

use crate::task::CrawlRules;
use crate::CrawlError;
use regex::Regex;
use url::Url;

// Re-export main functions
pub use matcher::{matches_any, matches_wildcard};
pub use normalize::{extract_domain, normalize_url, resolve_and_normalize};

/// Outcome of checking a URL against a task's domain and pattern rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyVerdict {
    /// URL may be admitted
    Allowed,
    /// Domain is listed in `forbidden_domains`
    ForbiddenDomain,
    /// `allowed_domains` is non-empty and the domain is not in it
    DomainNotAllowed,
    /// `url_patterns` is non-empty and no pattern matches
    PatternMismatch,
}

impl PolicyVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Compiled domain and URL-pattern rules for one task run
///
/// Evaluation order:
/// 1. Forbidden domains (highest priority)
/// 2. Allowed domains (an empty list means unrestricted)
/// 3. URL patterns (an empty list means every URL matches)
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    allowed_domains: Vec<String>,
    forbidden_domains: Vec<String>,
    url_patterns: Vec<Regex>,
}

impl AdmissionPolicy {
    /// Compiles the policy from task rules
    ///
    /// # Returns
    ///
    /// * `Err(CrawlError::Validation)` - A URL pattern is not a valid regex
    ///   or a domain entry is blank
    pub fn from_rules(rules: &CrawlRules) -> Result<Self, CrawlError> {
        for domain in rules.allowed_domains.iter().chain(&rules.forbidden_domains) {
            if domain.trim().is_empty() || domain.contains(char::is_whitespace) {
                return Err(CrawlError::Validation(format!(
                    "invalid domain entry '{}'",
                    domain
                )));
            }
        }

        let url_patterns = rules
            .url_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    CrawlError::Validation(format!("invalid URL pattern '{}': {}", pattern, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            allowed_domains: rules.allowed_domains.iter().cloned().collect(),
            forbidden_domains: rules.forbidden_domains.iter().cloned().collect(),
            url_patterns,
        })
    }

    /// Checks a normalized URL and its domain against the policy
    pub fn check(&self, url: &Url, domain: &str) -> PolicyVerdict {
        if matches_any(&self.forbidden_domains, domain) {
            return PolicyVerdict::ForbiddenDomain;
        }

        if !self.allowed_domains.is_empty() && !matches_any(&self.allowed_domains, domain) {
            return PolicyVerdict::DomainNotAllowed;
        }

        if !self.url_patterns.is_empty()
            && !self.url_patterns.iter().any(|re| re.is_match(url.as_str()))
        {
            return PolicyVerdict::PatternMismatch;
        }

        PolicyVerdict::Allowed
    }
}
