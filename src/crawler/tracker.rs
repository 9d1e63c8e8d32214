//! Task Tracker
//!
//! Owns the [`CrawlTask`] record of one run. Status transitions and counter
//! updates all go through here, under one lock, so concurrent workers can
//! report completions without racing each other.

use crate::state::TaskStatus;
use crate::task::{CrawlTask, TaskCounters};
use crate::CrawlError;
use chrono::Utc;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct TaskTracker {
    task: Mutex<CrawlTask>,
}

impl TaskTracker {
    pub fn new(task: CrawlTask) -> Self {
        Self {
            task: Mutex::new(task),
        }
    }

    /// Validates the task and moves it `pending -> running`
    ///
    /// On a validation error the task stays pending.
    pub fn begin(&self) -> Result<(), CrawlError> {
        let mut task = self.lock();
        check_transition(task.status, TaskStatus::Running)?;
        task.validate()?;

        task.status = TaskStatus::Running;
        task.start_time = Some(Utc::now());
        task.end_time = None;
        task.error_message = None;
        task.counters = TaskCounters::default();
        tracing::info!(task = %task.id, name = %task.name, "task running");
        Ok(())
    }

    /// Ends the run as failed with `message`
    pub fn fail(&self, message: impl Into<String>) -> Result<(), CrawlError> {
        let mut task = self.lock();
        check_transition(task.status, TaskStatus::Failed)?;

        let message = message.into();
        tracing::error!(task = %task.id, error = %message, "task failed");
        task.status = TaskStatus::Failed;
        task.error_message = Some(message);
        task.end_time = Some(Utc::now());
        Ok(())
    }

    /// Moves a running task to stopped; returns false if it was not running
    pub fn stop(&self) -> bool {
        let mut task = self.lock();
        if !task.status.can_transition_to(TaskStatus::Stopped) {
            return false;
        }
        task.status = TaskStatus::Stopped;
        tracing::info!(task = %task.id, "stop requested");
        true
    }

    /// Closes the run once no work remains
    ///
    /// A running task becomes completed; a stopped task keeps its status.
    /// Either way the end time is recorded.
    pub fn finish(&self) -> CrawlTask {
        let mut task = self.lock();
        if task.status.can_transition_to(TaskStatus::Completed) {
            task.status = TaskStatus::Completed;
        }
        if task.end_time.is_none() {
            task.end_time = Some(Utc::now());
        }

        let c = task.counters;
        tracing::info!(
            task = %task.id,
            status = %task.status,
            total = c.total_urls,
            processed = c.processed_urls,
            success = c.success_urls,
            failed = c.failed_urls,
            items = c.items_count,
            "task finished"
        );
        task.clone()
    }

    // ===== Counters =====

    /// A URL entered the frontier
    pub fn url_admitted(&self) {
        self.lock().counters.total_urls += 1;
    }

    pub fn urls_admitted(&self, n: u64) {
        self.lock().counters.total_urls += n;
    }

    /// A page was fetched and routed
    pub fn record_success(&self) {
        let mut task = self.lock();
        task.counters.processed_urls += 1;
        task.counters.success_urls += 1;
    }

    /// A page was abandoned after a permanent failure or exhausted retries
    pub fn record_failure(&self) {
        let mut task = self.lock();
        task.counters.processed_urls += 1;
        task.counters.failed_urls += 1;
    }

    /// Storage accepted `n` items
    pub fn items_saved(&self, n: u64) {
        if n > 0 {
            self.lock().counters.items_count += n;
        }
    }

    // ===== Reads =====

    pub fn status(&self) -> TaskStatus {
        self.lock().status
    }

    pub fn counters(&self) -> TaskCounters {
        self.lock().counters
    }

    /// Copy of the task record as it is right now
    pub fn snapshot(&self) -> CrawlTask {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, CrawlTask> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_transition(from: TaskStatus, to: TaskStatus) -> Result<(), CrawlError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(CrawlError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn task() -> CrawlTask {
        CrawlTask::new(
            "t1",
            "test",
            "https://a.test",
            vec!["https://a.test/".to_string()],
        )
    }

    #[test]
    fn test_begin_moves_to_running() {
        let tracker = TaskTracker::new(task());
        tracker.begin().unwrap();

        let snap = tracker.snapshot();
        assert_eq!(snap.status, TaskStatus::Running);
        assert!(snap.start_time.is_some());
        assert!(snap.end_time.is_none());
    }

    #[test]
    fn test_invalid_task_stays_pending() {
        let mut t = task();
        t.start_urls.clear();
        let tracker = TaskTracker::new(t);

        assert!(matches!(tracker.begin(), Err(CrawlError::Validation(_))));
        assert_eq!(tracker.status(), TaskStatus::Pending);
        assert!(tracker.snapshot().start_time.is_none());
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let tracker = TaskTracker::new(task());
        tracker.begin().unwrap();
        assert!(matches!(
            tracker.begin(),
            Err(CrawlError::InvalidTransition {
                from: TaskStatus::Running,
                to: TaskStatus::Running
            })
        ));
    }

    #[test]
    fn test_finish_completes_running_task() {
        let tracker = TaskTracker::new(task());
        tracker.begin().unwrap();
        let done = tracker.finish();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.end_time.is_some());
        assert!(done.duration().is_some());
    }

    #[test]
    fn test_stop_is_kept_by_finish() {
        let tracker = TaskTracker::new(task());
        assert!(!tracker.stop());

        tracker.begin().unwrap();
        assert!(tracker.stop());
        assert!(!tracker.stop());
        assert_eq!(tracker.finish().status, TaskStatus::Stopped);
    }

    #[test]
    fn test_fail_records_message() {
        let tracker = TaskTracker::new(task());
        tracker.begin().unwrap();
        tracker.fail("cannot build HTTP client").unwrap();

        let snap = tracker.snapshot();
        assert_eq!(snap.status, TaskStatus::Failed);
        assert_eq!(snap.error_message.as_deref(), Some("cannot build HTTP client"));
        assert!(tracker.fail("again").is_err());
        assert_eq!(tracker.finish().status, TaskStatus::Failed);
    }

    #[test]
    fn test_counters() {
        let tracker = TaskTracker::new(task());
        tracker.begin().unwrap();
        tracker.url_admitted();
        tracker.urls_admitted(2);
        tracker.record_success();
        tracker.record_failure();
        tracker.items_saved(1);
        tracker.items_saved(0);

        let c = tracker.counters();
        assert_eq!(c.total_urls, 3);
        assert_eq!(c.processed_urls, 2);
        assert_eq!(c.success_urls, 1);
        assert_eq!(c.failed_urls, 1);
        assert_eq!(c.items_count, 1);
    }

    #[test]
    fn test_concurrent_counter_updates() {
        let tracker = Arc::new(TaskTracker::new(task()));
        tracker.begin().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        tracker.record_success();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.counters().success_urls, 800);
        assert_eq!(tracker.counters().processed_urls, 800);
    }
}
