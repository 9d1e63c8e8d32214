//! Per-domain politeness control
//!
//! The limiter is the only writer of [`DomainState`]. A dispatch is granted
//! when the domain has fewer than `max_parallel` requests in flight and at
//! least `min_delay` has passed since the previous grant.

use crate::state::DomainState;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Result of asking the limiter for a dispatch slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    /// `retry_after` is set when the delay window is closed; `None` means the
    /// domain is at its parallelism limit and must wait for a release
    Denied { retry_after: Option<Duration> },
}

impl Acquire {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Enforces per-domain parallelism and minimum inter-request delay
#[derive(Debug)]
pub struct DomainLimiter {
    max_parallel: usize,
    min_delay: Duration,
    domains: Mutex<HashMap<String, DomainState>>,
}

impl DomainLimiter {
    /// Creates a limiter; `max_parallel` is clamped to at least 1
    pub fn new(max_parallel: usize, min_delay: Duration) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            min_delay,
            domains: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Tries to acquire a dispatch slot for `domain` now
    pub fn try_acquire(&self, domain: &str) -> Acquire {
        self.try_acquire_at(domain, Instant::now())
    }

    /// Tries to acquire a dispatch slot for `domain` at `now`
    ///
    /// On grant the dispatch timestamp is updated immediately.
    pub fn try_acquire_at(&self, domain: &str, now: Instant) -> Acquire {
        let mut domains = self.lock();
        let state = domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(domain));

        if state.can_dispatch(self.max_parallel, self.min_delay, now) {
            state.record_dispatch(now);
            tracing::trace!(domain, active = state.active, "dispatch granted");
            return Acquire::Granted;
        }

        let retry_after = if state.active >= self.max_parallel {
            None
        } else {
            state.time_until_next_dispatch(self.min_delay, now)
        };
        tracing::trace!(domain, active = state.active, ?retry_after, "dispatch denied");
        Acquire::Denied { retry_after }
    }

    /// Releases the slot held by a finished request
    pub fn release(&self, domain: &str) {
        if let Some(state) = self.lock().get_mut(domain) {
            state.record_completion();
        }
    }

    /// Number of in-flight requests for `domain`
    pub fn active(&self, domain: &str) -> usize {
        self.lock().get(domain).map(|s| s.active).unwrap_or(0)
    }

    /// Copy of every tracked domain's state
    pub fn snapshot(&self) -> Vec<DomainState> {
        let mut states: Vec<DomainState> = self.lock().values().cloned().collect();
        states.sort_by(|a, b| a.domain.cmp(&b.domain));
        states
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DomainState>> {
        self.domains.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
