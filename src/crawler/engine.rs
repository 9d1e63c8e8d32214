//! Crawl engine
//!
//! [`Engine::start`] validates a task, seeds the frontier and spawns a fixed
//! pool of workers. Each worker loops:
//!
//! 1. Take the next domain-eligible entry from the frontier
//! 2. Fetch it (no lock held during the request)
//! 3. Route the outcome: extract and admit links, hand the item to the
//!    sink, or ask the retry policy what to do
//! 4. Report counters to the task tracker
//!
//! The run ends once the frontier is drained or stopped, after which the
//! sink is flushed and the tracker closes the task record.

use crate::config::SpiderConfig;
use crate::crawler::extractor::{Extraction, Extractor, Page};
use crate::crawler::fetcher::{FetchOutcome, FetchSettings, HttpFetcher, PageFetcher};
use crate::crawler::frontier::{Frontier, FrontierEntry};
use crate::crawler::limiter::DomainLimiter;
use crate::crawler::retry::{RetryDecision, RetryPolicy};
use crate::crawler::sink::ResultSink;
use crate::crawler::tracker::TaskTracker;
use crate::state::TaskStatus;
use crate::storage::Storage;
use crate::task::CrawlTask;
use crate::CrawlError;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};

/// Runs crawl tasks against one storage backend
pub struct Engine {
    spider: SpiderConfig,
    storage: Arc<dyn Storage>,
    batch_size: usize,
    fetcher: Option<Arc<dyn PageFetcher>>,
}

impl Engine {
    /// Creates an engine using `spider` as the global defaults
    pub fn new(spider: SpiderConfig, storage: Arc<dyn Storage>) -> Self {
        Self {
            spider,
            storage,
            batch_size: 0,
            fetcher: None,
        }
    }

    /// Saves items in batches of `batch_size` (0 saves each item on its own)
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Uses `fetcher` instead of building an HTTP client per task
    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn spider(&self) -> &SpiderConfig {
        &self.spider
    }

    /// Starts a task and returns a handle to observe or stop it
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Returns
    ///
    /// * `Ok(TaskHandle)` - The task is running, or already failed during setup
    /// * `Err(CrawlError::Validation)` - The task is invalid and stays pending
    pub fn start(&self, task: CrawlTask) -> Result<TaskHandle, CrawlError> {
        let tracker = Arc::new(TaskTracker::new(task));
        tracker.begin()?;

        let ctx = match self.prepare(&tracker) {
            Ok(ctx) => Arc::new(ctx),
            Err(e) => {
                // Status is running, so fail() cannot be rejected here
                let _ = tracker.fail(e.to_string());
                let finished = Arc::clone(&tracker);
                return Ok(TaskHandle {
                    stopper: StopHandle {
                        tracker,
                        frontier: None,
                    },
                    join: tokio::spawn(async move { finished.finish() }),
                });
            }
        };

        let snapshot = tracker.snapshot();
        for seed in &snapshot.start_urls {
            let admission = ctx.frontier.enqueue(seed, 0);
            if admission.is_admitted() {
                tracker.url_admitted();
            } else {
                tracing::debug!(url = %seed, ?admission, "start URL not admitted");
            }
        }

        let workers = snapshot.rules.effective_concurrency(&self.spider);
        tracing::info!(
            task = %snapshot.id,
            workers,
            seeds = tracker.counters().total_urls,
            "starting crawl workers"
        );

        let join = tokio::spawn(drive(Arc::clone(&ctx), workers));
        Ok(TaskHandle {
            stopper: StopHandle {
                tracker,
                frontier: Some(Arc::clone(&ctx.frontier)),
            },
            join,
        })
    }

    /// Starts a task and waits for it to end
    pub async fn run(&self, task: CrawlTask) -> Result<CrawlTask, CrawlError> {
        self.start(task)?.wait().await
    }

    /// Builds the per-run context: limiter, frontier, fetcher, extractor
    fn prepare(&self, tracker: &Arc<TaskTracker>) -> Result<RunContext, CrawlError> {
        let task = tracker.snapshot();
        let rules = &task.rules;

        let limiter = Arc::new(DomainLimiter::new(
            rules.effective_concurrency(&self.spider),
            rules.effective_delay(&self.spider),
        ));
        let frontier = Arc::new(Frontier::new(rules, limiter)?);

        let fetcher: Arc<dyn PageFetcher> = match &self.fetcher {
            Some(fetcher) => Arc::clone(fetcher),
            None => {
                let settings = FetchSettings::from_config(&self.spider, &rules.content_types);
                Arc::new(HttpFetcher::new(&settings)?)
            }
        };

        Ok(RunContext {
            frontier,
            fetcher,
            extractor: Extractor::new(&task.selectors)?,
            retry: RetryPolicy::from_config(&self.spider),
            sink: ResultSink::new(Arc::clone(&self.storage), self.batch_size),
            tracker: Arc::clone(tracker),
            max_depth: rules.max_depth,
        })
    }
}

/// Cloneable handle that requests a cooperative stop
#[derive(Clone)]
pub struct StopHandle {
    tracker: Arc<TaskTracker>,
    frontier: Option<Arc<Frontier>>,
}

impl StopHandle {
    /// Stops dispatching new work
    ///
    /// Fetches already in flight finish normally and their items are still
    /// saved. Has no effect on a task that already ended.
    pub fn stop(&self) {
        if self.tracker.stop() {
            if let Some(frontier) = &self.frontier {
                frontier.stop();
            }
        }
    }
}

/// Handle to a running task
pub struct TaskHandle {
    stopper: StopHandle,
    join: JoinHandle<CrawlTask>,
}

impl TaskHandle {
    pub fn stop(&self) {
        self.stopper.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stopper.clone()
    }

    /// Snapshot of the task record with its current status and counters
    pub fn progress(&self) -> CrawlTask {
        self.stopper.tracker.snapshot()
    }

    pub fn status(&self) -> TaskStatus {
        self.stopper.tracker.status()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the run to end and returns the final task record
    pub async fn wait(self) -> Result<CrawlTask, CrawlError> {
        self.join
            .await
            .map_err(|e| CrawlError::Join(e.to_string()))
    }
}

/// Shared state of one task run
struct RunContext {
    frontier: Arc<Frontier>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Extractor,
    retry: RetryPolicy,
    sink: ResultSink,
    tracker: Arc<TaskTracker>,
    max_depth: u32,
}

impl RunContext {
    /// Applies a fetch outcome to the frontier, sink and tracker
    async fn route(&self, entry: FrontierEntry, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Success {
                status_code,
                content_type,
                body,
                final_url,
            } => {
                let Extraction { mut item, links } = self.extractor.extract(&Page {
                    url: &entry.url,
                    final_url: &final_url,
                    body: &body,
                    fetched_at: Utc::now(),
                });
                item.set_metadata("status_code", status_code);
                item.set_metadata("content_type", content_type);
                item.set_metadata("depth", entry.depth);
                item.set_metadata("final_url", final_url.as_str());

                if let Some(next_depth) = child_depth(entry.depth, self.max_depth) {
                    let admitted = links
                        .into_iter()
                        .filter(|link| self.frontier.enqueue_url(link.clone(), next_depth).is_admitted())
                        .count();
                    self.tracker.urls_admitted(admitted as u64);
                }

                tracing::debug!(url = %entry.url, status_code, title = %item.title, "page extracted");
                let saved = self.sink.submit(item).await;
                self.tracker.items_saved(saved);
                self.tracker.record_success();
            }

            FetchOutcome::TransientFailure { reason } => match self.retry.decide(entry) {
                RetryDecision::Retry { entry, after } => {
                    tracing::warn!(
                        url = %entry.url,
                        retry = entry.retry_count,
                        reason = %reason,
                        "transient failure, retrying"
                    );
                    self.frontier.schedule_retry(entry, after);
                }
                RetryDecision::Abandon { entry } => {
                    tracing::warn!(
                        url = %entry.url,
                        retries = entry.retry_count,
                        reason = %reason,
                        "retries exhausted, abandoning page"
                    );
                    self.tracker.record_failure();
                }
            },

            FetchOutcome::PermanentFailure { reason } => {
                tracing::warn!(url = %entry.url, reason = %reason, "permanent failure");
                self.tracker.record_failure();
            }
        }
    }
}

/// Depth of links found on a page at `depth`, if still within `max_depth`
fn child_depth(depth: u32, max_depth: u32) -> Option<u32> {
    depth.checked_add(1).filter(|next| *next <= max_depth)
}

/// Keeps the frontier's in-flight bookkeeping right even if a fetch or
/// routing panics
///
/// An entry dropped before it was routed is recorded as a failed page.
struct Dispatched<'a> {
    frontier: &'a Frontier,
    tracker: &'a TaskTracker,
    domain: String,
    released: bool,
    routed: bool,
}

impl Dispatched<'_> {
    fn release_domain(&mut self) {
        if !self.released {
            self.frontier.release_domain(&self.domain);
            self.released = true;
        }
    }
}

impl Drop for Dispatched<'_> {
    fn drop(&mut self) {
        if !self.routed {
            tracing::error!(domain = %self.domain, "page dropped before routing");
            self.tracker.record_failure();
        }
        self.release_domain();
        self.frontier.complete();
    }
}

async fn worker_loop(ctx: Arc<RunContext>, worker: usize) {
    while let Some(entry) = ctx.frontier.next_entry().await {
        let mut dispatched = Dispatched {
            frontier: &ctx.frontier,
            tracker: &ctx.tracker,
            domain: entry.domain.clone(),
            released: false,
            routed: false,
        };

        tracing::debug!(
            worker,
            url = %entry.url,
            depth = entry.depth,
            retry = entry.retry_count,
            "dispatching"
        );
        let outcome = ctx.fetcher.fetch(&entry.url).await;
        dispatched.release_domain();

        ctx.route(entry, outcome).await;
        dispatched.routed = true;
    }
    tracing::debug!(worker, "worker finished");
}

/// Runs the worker pool to the end and closes the task record
async fn drive(ctx: Arc<RunContext>, workers: usize) -> CrawlTask {
    let mut pool = JoinSet::new();
    for worker in 0..workers {
        pool.spawn(worker_loop(Arc::clone(&ctx), worker));
    }

    // A panicking worker is replaced while work remains
    let mut next_worker = workers;
    while let Some(joined) = pool.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "crawl worker panicked");
            if !ctx.frontier.is_finished() {
                tracing::info!(worker = next_worker, "respawning crawl worker");
                pool.spawn(worker_loop(Arc::clone(&ctx), next_worker));
                next_worker += 1;
            }
        }
    }

    let flushed = ctx.sink.flush().await;
    ctx.tracker.items_saved(flushed);
    ctx.tracker.finish()
}
