//! Rate-limited error coalescing.
//!
//! The control loop sees transient errors on every upheaval (nodes
//! restarting, handshakes in flight). The feed collapses identical
//! messages, holds everything back for a threshold window and only then
//! surfaces a summary; errors that recover before the window elapses are
//! suppressed entirely.

use std::time::{Duration, Instant};

/// One distinct error message and how often it was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorItem {
    pub message: String,
    pub count: u64,
}

type Clock = Box<dyn Fn() -> Instant + Send + Sync>;

/// A feed of coalesced error observations.
pub struct ErrorFeed {
    threshold: Duration,
    clock: Clock,
    first_error_at: Option<Instant>,
    errors: Vec<ErrorItem>,
}

impl ErrorFeed {
    pub fn new(threshold: Duration) -> Self {
        Self::with_clock(threshold, Instant::now)
    }

    /// A feed with an injected clock, for deterministic tests.
    pub fn with_clock(
        threshold: Duration,
        clock: impl Fn() -> Instant + Send + Sync + 'static,
    ) -> Self {
        Self {
            threshold,
            clock: Box::new(clock),
            first_error_at: None,
            errors: Vec::new(),
        }
    }

    /// Record an error observation.
    ///
    /// The first observation opens the window; identical messages bump
    /// their count, new messages append in insertion order.
    pub fn add(&mut self, error: impl std::fmt::Display) {
        let message = error.to_string();

        if self.first_error_at.is_none() {
            self.first_error_at = Some((self.clock)());
            self.errors = vec![ErrorItem { message, count: 1 }];
            return;
        }

        match self.errors.iter_mut().find(|item| item.message == message) {
            Some(item) => item.count += 1,
            None => self.errors.push(ErrorItem { message, count: 1 }),
        }
    }

    /// Drain the feed once the threshold has elapsed since the first error.
    ///
    /// Returns an empty list (and keeps accumulating) before that.
    pub fn pop_errors(&mut self) -> Vec<ErrorItem> {
        let Some(first_error_at) = self.first_error_at else {
            return Vec::new();
        };

        if (self.clock)() <= first_error_at + self.threshold {
            return Vec::new();
        }

        self.first_error_at = None;
        std::mem::take(&mut self.errors)
    }

    /// Forget everything observed so far.
    pub fn reset(&mut self) {
        self.first_error_at = None;
        self.errors.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A clock that can be advanced from the test body.
    fn manual_clock() -> (Arc<AtomicU64>, impl Fn() -> Instant + Send + Sync) {
        let base = Instant::now();
        let offset = Arc::new(AtomicU64::new(0));
        let handle = offset.clone();
        (offset, move || {
            base + Duration::from_secs(handle.load(Ordering::SeqCst))
        })
    }

    #[test]
    fn test_holds_errors_before_threshold() {
        let (_, clock) = manual_clock();
        let mut feed = ErrorFeed::with_clock(Duration::from_secs(1), clock);

        feed.add("a");
        feed.add("b");
        feed.add("a");

        assert!(feed.pop_errors().is_empty());
    }

    #[test]
    fn test_pops_coalesced_errors_after_threshold() {
        let (offset, clock) = manual_clock();
        let mut feed = ErrorFeed::with_clock(Duration::from_secs(1), clock);

        feed.add("a");
        feed.add("b");
        feed.add("a");

        offset.store(3, Ordering::SeqCst);
        let items = feed.pop_errors();

        assert_eq!(
            items,
            vec![
                ErrorItem {
                    message: "a".to_string(),
                    count: 2,
                },
                ErrorItem {
                    message: "b".to_string(),
                    count: 1,
                },
            ]
        );

        // A successful pop resets the feed.
        assert!(feed.pop_errors().is_empty());
    }

    #[test]
    fn test_exact_threshold_is_not_enough() {
        let (offset, clock) = manual_clock();
        let mut feed = ErrorFeed::with_clock(Duration::from_secs(2), clock);

        feed.add("a");
        offset.store(2, Ordering::SeqCst);

        assert!(feed.pop_errors().is_empty());
    }

    #[test]
    fn test_reset_suppresses_recovered_errors() {
        let (offset, clock) = manual_clock();
        let mut feed = ErrorFeed::with_clock(Duration::from_secs(1), clock);

        feed.add("a");
        feed.reset();

        offset.store(5, Ordering::SeqCst);
        assert!(feed.pop_errors().is_empty());
    }

    #[test]
    fn test_window_reopens_after_pop() {
        let (offset, clock) = manual_clock();
        let mut feed = ErrorFeed::with_clock(Duration::from_secs(1), clock);

        feed.add("a");
        offset.store(2, Ordering::SeqCst);
        assert_eq!(feed.pop_errors().len(), 1);

        feed.add("b");
        assert!(feed.pop_errors().is_empty());

        offset.store(5, Ordering::SeqCst);
        assert_eq!(feed.pop_errors()[0].message, "b");
    }
}
