//! The crawl frontier
//!
//! The frontier owns the pending work of one task run, partitioned by domain,
//! together with the visited set used as the single dedup authority. Workers
//! pull entries through [`Frontier::next_entry`], which only hands out an
//! entry once the [`DomainLimiter`] grants its domain a dispatch slot.
//! Throttled domains are skipped so other domains stay dispatchable.
//!
//! Lock order is frontier, then limiter.

use crate::crawler::limiter::{Acquire, DomainLimiter};
use crate::task::CrawlRules;
use crate::url::{extract_domain, normalize_url, AdmissionPolicy, PolicyVerdict};
use crate::CrawlError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use url::Url;

/// Upper bound on how long an idle worker sleeps before re-checking the queue
const IDLE_POLL: Duration = Duration::from_millis(250);

/// A unit of pending work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Normalized URL (fragment stripped)
    pub url: Url,
    pub depth: u32,
    pub domain: String,
    pub retry_count: u32,
}

/// Outcome of an enqueue attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Already in the visited set
    Duplicate,
    /// Depth above `max_depth`
    TooDeep,
    /// `max_pages` URLs were already admitted
    BudgetExhausted,
    /// Filtered by the domain lists or URL patterns
    Rejected(PolicyVerdict),
    /// Not an http(s) URL with a host
    Invalid,
    /// The run was stopped
    Stopped,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

#[derive(Debug, Default)]
struct FrontierInner {
    queues: HashMap<String, VecDeque<FrontierEntry>>,
    /// Domains with a non-empty queue, in round-robin order
    order: VecDeque<String>,
    visited: HashSet<String>,
    admitted: u64,
    queued: usize,
    in_flight: usize,
    retrying: usize,
    stopped: bool,
}

impl FrontierInner {
    fn push(&mut self, entry: FrontierEntry) {
        let queue = self.queues.entry(entry.domain.clone()).or_default();
        if queue.is_empty() {
            self.order.push_back(entry.domain.clone());
        }
        queue.push_back(entry);
        self.queued += 1;
    }

    fn is_drained(&self) -> bool {
        self.queued == 0 && self.in_flight == 0 && self.retrying == 0
    }
}

enum Pick {
    Entry(FrontierEntry),
    Wait(Option<Duration>),
    Drained,
}

/// Pending work, visited set and run-completion bookkeeping for one task run
#[derive(Debug)]
pub struct Frontier {
    inner: Mutex<FrontierInner>,
    notify: Notify,
    limiter: Arc<DomainLimiter>,
    policy: AdmissionPolicy,
    rules: CrawlRules,
}

impl Frontier {
    /// Creates an empty frontier for a task's rules
    ///
    /// # Returns
    ///
    /// * `Err(CrawlError::Validation)` - The rules contain an invalid pattern
    pub fn new(rules: &CrawlRules, limiter: Arc<DomainLimiter>) -> Result<Self, CrawlError> {
        Ok(Self {
            inner: Mutex::new(FrontierInner::default()),
            notify: Notify::new(),
            limiter,
            policy: AdmissionPolicy::from_rules(rules)?,
            rules: rules.clone(),
        })
    }

    /// Normalizes `raw` and admits it at `depth`
    pub fn enqueue(&self, raw: &str, depth: u32) -> Admission {
        match normalize_url(raw) {
            Ok(url) => self.enqueue_url(url, depth),
            Err(e) => {
                tracing::debug!(url = raw, error = %e, "rejected malformed URL");
                Admission::Invalid
            }
        }
    }

    /// Admits an already normalized URL at `depth`
    ///
    /// Checks run in order: depth, domain lists and URL patterns, visited
    /// set, page budget. An admitted URL is marked visited immediately.
    pub fn enqueue_url(&self, url: Url, depth: u32) -> Admission {
        let Some(domain) = extract_domain(&url) else {
            return Admission::Invalid;
        };

        if depth > self.rules.max_depth {
            return Admission::TooDeep;
        }

        let verdict = self.policy.check(&url, &domain);
        if !verdict.is_allowed() {
            tracing::debug!(url = %url, ?verdict, "rejected by task rules");
            return Admission::Rejected(verdict);
        }

        let mut inner = self.lock();
        if inner.stopped {
            return Admission::Stopped;
        }
        if inner.visited.contains(url.as_str()) {
            return Admission::Duplicate;
        }
        if self.rules.budget_exhausted(inner.admitted) {
            return Admission::BudgetExhausted;
        }

        inner.visited.insert(url.as_str().to_string());
        inner.admitted += 1;
        tracing::debug!(url = %url, depth, "admitted");
        inner.push(FrontierEntry {
            url,
            depth,
            domain,
            retry_count: 0,
        });
        drop(inner);

        self.notify.notify_waiters();
        Admission::Admitted
    }

    /// Waits for the next dispatchable entry
    ///
    /// Returns `None` once the run is stopped, or once nothing is queued,
    /// in flight, or waiting for a retry. A returned entry counts as in
    /// flight until [`Frontier::complete`] is called, and holds a limiter
    /// slot for its domain until the caller releases it.
    pub async fn next_entry(&self) -> Option<FrontierEntry> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait = {
                let mut inner = self.lock();
                if inner.stopped {
                    return None;
                }

                match self.pick(&mut inner) {
                    Pick::Entry(entry) => {
                        inner.in_flight += 1;
                        return Some(entry);
                    }
                    Pick::Drained if inner.is_drained() => {
                        drop(inner);
                        self.notify.notify_waiters();
                        return None;
                    }
                    Pick::Drained => None,
                    Pick::Wait(retry_after) => retry_after,
                }
            };

            let sleep = wait.map_or(IDLE_POLL, |d| d.min(IDLE_POLL));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    }

    /// Round-robins over domains with queued entries until one is granted
    fn pick(&self, inner: &mut FrontierInner) -> Pick {
        if inner.order.is_empty() {
            return Pick::Drained;
        }

        let mut soonest: Option<Duration> = None;
        for _ in 0..inner.order.len() {
            let Some(domain) = inner.order.pop_front() else {
                break;
            };

            match self.limiter.try_acquire(&domain) {
                Acquire::Granted => {
                    let queue = inner.queues.entry(domain.clone()).or_default();
                    let entry = queue.pop_front();
                    if queue.is_empty() {
                        inner.queues.remove(&domain);
                    } else {
                        inner.order.push_back(domain.clone());
                    }

                    if let Some(entry) = entry {
                        inner.queued -= 1;
                        return Pick::Entry(entry);
                    }
                    // Granted for an empty queue: hand the slot back
                    self.limiter.release(&domain);
                }
                Acquire::Denied { retry_after } => {
                    if let Some(after) = retry_after {
                        soonest = Some(soonest.map_or(after, |s| s.min(after)));
                    }
                    inner.order.push_back(domain);
                }
            }
        }

        Pick::Wait(soonest)
    }

    /// Releases the limiter slot of a fetched entry
    pub fn release_domain(&self, domain: &str) {
        self.limiter.release(domain);
        self.notify.notify_waiters();
    }

    /// Marks a dispatched entry as fully routed
    ///
    /// Links and retries produced by the entry must be enqueued before this
    /// call so the run cannot look drained in between.
    pub fn complete(&self) {
        {
            let mut inner = self.lock();
            inner.in_flight = inner.in_flight.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    /// Resubmits an already admitted entry after `backoff`
    ///
    /// The visited set is bypassed. The run is not drained while the retry
    /// is pending. If the run is stopped before the backoff elapses the
    /// entry is dropped.
    pub fn schedule_retry(self: &Arc<Self>, entry: FrontierEntry, backoff: Duration) {
        self.lock().retrying += 1;

        let frontier = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            frontier.requeue(entry);
        });
    }

    fn requeue(&self, entry: FrontierEntry) {
        {
            let mut inner = self.lock();
            inner.retrying = inner.retrying.saturating_sub(1);
            if inner.stopped {
                tracing::debug!(url = %entry.url, "dropping retry after stop");
            } else {
                inner.push(entry);
            }
        }
        self.notify.notify_waiters();
    }

    /// Stops dispatching; waiting workers return `None`
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// True once the run is stopped or has nothing queued, in flight, or
    /// waiting for a retry
    pub fn is_finished(&self) -> bool {
        let inner = self.lock();
        inner.stopped || inner.is_drained()
    }

    /// Number of entries waiting for dispatch
    pub fn len(&self) -> usize {
        self.lock().queued
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub fn pending_retries(&self) -> usize {
        self.lock().retrying
    }

    /// Number of URLs admitted so far in this run
    pub fn admitted(&self) -> u64 {
        self.lock().admitted
    }

    pub fn is_visited(&self, url: &Url) -> bool {
        self.lock().visited.contains(url.as_str())
    }

    fn lock(&self) -> MutexGuard<'_, FrontierInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn frontier_with(rules: CrawlRules, parallel: usize, delay: Duration) -> Arc<Frontier> {
        let limiter = Arc::new(DomainLimiter::new(parallel, delay));
        Arc::new(Frontier::new(&rules, limiter).unwrap())
    }

    fn open_frontier() -> Arc<Frontier> {
        frontier_with(
            CrawlRules {
                max_pages: 0,
                ..CrawlRules::default()
            },
            4,
            Duration::ZERO,
        )
    }

    #[test]
    fn test_enqueue_marks_visited_and_dedups() {
        let frontier = open_frontier();
        assert_eq!(frontier.enqueue("https://a.test/x#one", 0), Admission::Admitted);
        assert_eq!(frontier.enqueue("https://A.test/x#two", 1), Admission::Duplicate);
        assert_eq!(frontier.len(), 1);
        assert_eq!(frontier.admitted(), 1);
        assert!(frontier.is_visited(&Url::parse("https://a.test/x").unwrap()));
    }

    #[test]
    fn test_enqueue_rejects_depth_and_domains() {
        let rules = CrawlRules {
            max_depth: 1,
            max_pages: 0,
            forbidden_domains: ["bad.test".to_string()].into_iter().collect(),
            ..CrawlRules::default()
        };
        let frontier = frontier_with(rules, 1, Duration::ZERO);

        assert_eq!(frontier.enqueue("https://a.test/deep", 2), Admission::TooDeep);
        assert_eq!(
            frontier.enqueue("https://bad.test/", 0),
            Admission::Rejected(PolicyVerdict::ForbiddenDomain)
        );
        assert_eq!(frontier.enqueue("mailto:x@a.test", 0), Admission::Invalid);
        assert_eq!(frontier.admitted(), 0);
    }

    #[test]
    fn test_page_budget_limits_admission() {
        let rules = CrawlRules {
            max_pages: 2,
            ..CrawlRules::default()
        };
        let frontier = frontier_with(rules, 1, Duration::ZERO);
        assert!(frontier.enqueue("https://a.test/1", 0).is_admitted());
        assert!(frontier.enqueue("https://a.test/2", 0).is_admitted());
        assert_eq!(
            frontier.enqueue("https://a.test/3", 0),
            Admission::BudgetExhausted
        );
        assert_eq!(frontier.enqueue("https://a.test/1", 0), Admission::Duplicate);
    }

    #[tokio::test]
    async fn test_empty_frontier_returns_none() {
        let frontier = open_frontier();
        assert!(frontier.next_entry().await.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_in_discovery_order_within_domain() {
        let frontier = open_frontier();
        for path in ["/1", "/2", "/3"] {
            frontier.enqueue(&format!("https://a.test{}", path), 0);
        }

        let mut seen = Vec::new();
        while let Some(entry) = frontier.next_entry().await {
            seen.push(entry.url.path().to_string());
            frontier.release_domain(&entry.domain);
            frontier.complete();
        }
        assert_eq!(seen, vec!["/1", "/2", "/3"]);
    }

    #[tokio::test]
    async fn test_throttled_domain_does_not_block_others() {
        let frontier = frontier_with(
            CrawlRules {
                max_pages: 0,
                ..CrawlRules::default()
            },
            1,
            Duration::from_secs(60),
        );
        frontier.enqueue("https://a.test/1", 0);
        frontier.enqueue("https://a.test/2", 0);
        frontier.enqueue("https://b.test/1", 0);

        let first = frontier.next_entry().await.unwrap();
        let second = frontier.next_entry().await.unwrap();
        assert_eq!(first.domain, "a.test");
        assert_eq!(second.domain, "b.test");
        assert_eq!(frontier.in_flight(), 2);
        assert_eq!(frontier.len(), 1);
    }

    #[tokio::test]
    async fn test_waits_for_delay_window() {
        let frontier = frontier_with(
            CrawlRules {
                max_pages: 0,
                ..CrawlRules::default()
            },
            1,
            Duration::from_millis(200),
        );
        frontier.enqueue("https://a.test/1", 0);
        frontier.enqueue("https://a.test/2", 0);

        let start = Instant::now();
        let first = frontier.next_entry().await.unwrap();
        frontier.release_domain(&first.domain);
        frontier.complete();

        let second = frontier.next_entry().await.unwrap();
        assert_eq!(second.url.path(), "/2");
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_pending_retry_keeps_run_alive() {
        let frontier = open_frontier();
        frontier.enqueue("https://a.test/flaky", 0);

        let mut entry = frontier.next_entry().await.unwrap();
        frontier.release_domain(&entry.domain);
        entry.retry_count += 1;
        frontier.schedule_retry(entry, Duration::from_millis(50));
        frontier.complete();
        assert_eq!(frontier.pending_retries(), 1);

        let again = frontier.next_entry().await.unwrap();
        assert_eq!(again.retry_count, 1);
        assert_eq!(again.url.path(), "/flaky");
        frontier.release_domain(&again.domain);
        frontier.complete();

        assert!(frontier.next_entry().await.is_none());
        assert_eq!(frontier.admitted(), 1);
    }

    #[tokio::test]
    async fn test_stop_wakes_waiting_worker() {
        let frontier = open_frontier();
        frontier.enqueue("https://a.test/1", 0);
        let _held = frontier.next_entry().await.unwrap();

        let waiter = {
            let frontier = Arc::clone(&frontier);
            tokio::spawn(async move { frontier.next_entry().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        frontier.stop();

        assert!(waiter.await.unwrap().is_none());
        assert_eq!(
            frontier.enqueue("https://a.test/2", 0),
            Admission::Stopped
        );
    }

    #[tokio::test]
    async fn test_completion_wakes_idle_workers() {
        let frontier = open_frontier();
        frontier.enqueue("https://a.test/1", 0);
        let entry = frontier.next_entry().await.unwrap();

        let waiter = {
            let frontier = Arc::clone(&frontier);
            tokio::spawn(async move { frontier.next_entry().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        frontier.enqueue("https://a.test/2", 1);
        frontier.release_domain(&entry.domain);
        frontier.complete();

        let next = waiter.await.unwrap().unwrap();
        assert_eq!(next.url.path(), "/2");
        assert_eq!(next.depth, 1);
    }

    #[tokio::test]
    async fn test_is_finished_tracks_in_flight_work() {
        let frontier = open_frontier();
        assert!(frontier.is_finished());

        frontier.enqueue("https://a.test/1", 0);
        assert!(!frontier.is_finished());

        let entry = frontier.next_entry().await.unwrap();
        assert!(!frontier.is_finished());

        frontier.release_domain(&entry.domain);
        frontier.complete();
        assert!(frontier.is_finished());

        frontier.enqueue("https://a.test/2", 0);
        frontier.stop();
        assert!(frontier.is_finished());
    }
}
