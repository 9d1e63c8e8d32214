use std::time::{Duration, Instant};

/// Tracks the politeness state of one domain during a task run
///
/// Only the domain limiter mutates these values. The dispatch timestamp is
/// recorded when a request is granted, not when it completes, so overlapping
/// grants still respect the minimum delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainState {
    /// Lowercase host this state belongs to
    pub domain: String,

    /// Number of requests to this domain currently in flight
    pub active: usize,

    /// Timestamp of the last granted dispatch
    pub last_dispatch: Option<Instant>,

    /// Total number of dispatches granted in this run
    pub dispatch_count: u64,
}

impl DomainState {
    /// Creates a new DomainState with no request history
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            active: 0,
            last_dispatch: None,
            dispatch_count: 0,
        }
    }

    /// Checks if a request can be dispatched to this domain
    ///
    /// # Arguments
    ///
    /// * `max_parallel` - Maximum number of in-flight requests for the domain
    /// * `min_delay` - Minimum time between two dispatches
    /// * `now` - The current time instant
    pub fn can_dispatch(&self, max_parallel: usize, min_delay: Duration, now: Instant) -> bool {
        self.active < max_parallel && self.time_until_next_dispatch(min_delay, now).is_none()
    }

    /// Calculates the time until the delay window opens again
    ///
    /// Returns None if the delay has already elapsed.
    pub fn time_until_next_dispatch(&self, min_delay: Duration, now: Instant) -> Option<Duration> {
        let last = self.last_dispatch?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed < min_delay {
            Some(min_delay - elapsed)
        } else {
            None
        }
    }

    /// Records a granted dispatch
    pub fn record_dispatch(&mut self, now: Instant) {
        self.active += 1;
        self.dispatch_count += 1;
        self.last_dispatch = Some(now);
    }

    /// Records the completion of an in-flight request
    pub fn record_completion(&mut self) {
        self.active = self.active.saturating_sub(1);
    }

    /// Returns true if no request to this domain is in flight
    pub fn is_idle(&self) -> bool {
        self.active == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(1000);

    #[test]
    fn test_new_domain_state() {
        let state = DomainState::new("example.com");
        assert_eq!(state.domain, "example.com");
        assert_eq!(state.active, 0);
        assert!(state.last_dispatch.is_none());
        assert!(state.is_idle());
    }

    #[test]
    fn test_can_dispatch_initially() {
        let state = DomainState::new("example.com");
        assert!(state.can_dispatch(1, DELAY, Instant::now()));
    }

    #[test]
    fn test_cannot_dispatch_at_parallel_limit() {
        let mut state = DomainState::new("example.com");
        let now = Instant::now();
        state.record_dispatch(now);

        let later = now + Duration::from_secs(5);
        assert!(!state.can_dispatch(1, DELAY, later));
        assert!(state.can_dispatch(2, DELAY, later));
    }

    #[test]
    fn test_cannot_dispatch_too_soon() {
        let mut state = DomainState::new("example.com");
        let now = Instant::now();
        state.record_dispatch(now);
        state.record_completion();

        assert!(!state.can_dispatch(4, DELAY, now));
        assert!(!state.can_dispatch(4, DELAY, now + Duration::from_millis(500)));
        assert!(state.can_dispatch(4, DELAY, now + Duration::from_millis(1000)));
    }

    #[test]
    fn test_zero_delay_only_limits_parallelism() {
        let mut state = DomainState::new("example.com");
        let now = Instant::now();
        state.record_dispatch(now);
        assert!(state.can_dispatch(2, Duration::ZERO, now));
    }

    #[test]
    fn test_record_dispatch_and_completion() {
        let mut state = DomainState::new("example.com");
        let now = Instant::now();

        state.record_dispatch(now);
        state.record_dispatch(now);
        assert_eq!(state.active, 2);
        assert_eq!(state.dispatch_count, 2);
        assert_eq!(state.last_dispatch, Some(now));

        state.record_completion();
        state.record_completion();
        state.record_completion();
        assert_eq!(state.active, 0);
        assert_eq!(state.dispatch_count, 2);
    }

    #[test]
    fn test_time_until_next_dispatch() {
        let mut state = DomainState::new("example.com");
        let now = Instant::now();

        assert!(state.time_until_next_dispatch(DELAY, now).is_none());

        state.record_dispatch(now);
        assert_eq!(state.time_until_next_dispatch(DELAY, now), Some(DELAY));

        let soon = now + Duration::from_millis(400);
        assert_eq!(
            state.time_until_next_dispatch(DELAY, soon),
            Some(Duration::from_millis(600))
        );

        let later = now + Duration::from_millis(1100);
        assert!(state.time_until_next_dispatch(DELAY, later).is_none());
    }
}
