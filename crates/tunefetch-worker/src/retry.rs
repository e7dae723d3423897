//! Log suppression for loops that keep failing while the store is down.
//!
//! Ticks and sweeps do not retry in place: they skip and try again on the
//! next interval. This tracker keeps that from flooding the log.

use std::fmt::Display;

use tracing::{info, warn};

/// Consecutive-failure tracker for one periodic task.
#[derive(Debug)]
pub struct FailureTracker {
    task: &'static str,
    consecutive_failures: u32,
    max_logged_failures: u32,
}

impl FailureTracker {
    pub fn new(task: &'static str, max_logged_failures: u32) -> Self {
        Self {
            task,
            consecutive_failures: 0,
            max_logged_failures,
        }
    }

    /// Record a successful run (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > self.max_logged_failures {
            info!(
                task = self.task,
                "Recovered after {} consecutive failures", self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    /// Record a failed run, logging it unless suppressed.
    ///
    /// Returns `true` if the failure was logged.
    pub fn record_failure(&mut self, error: &impl Display) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            warn!(task = self.task, "{} failed: {}", self.task, error);
            true
        } else {
            if self.consecutive_failures == self.max_logged_failures + 1 {
                warn!(
                    task = self.task,
                    "Suppressing further failure logs after {} consecutive failures",
                    self.max_logged_failures
                );
            }
            false
        }
    }

    /// Feed a run's result into the tracker.
    pub fn observe<T, E: Display>(&mut self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.record_success(),
            Err(e) => {
                self.record_failure(e);
            }
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_tracker_suppression() {
        let mut tracker = FailureTracker::new("tick", 2);

        assert!(tracker.record_failure(&"store down"));
        assert!(tracker.record_failure(&"store down"));
        assert!(!tracker.record_failure(&"store down"));
        assert!(!tracker.record_failure(&"store down"));
        assert_eq!(tracker.failure_count(), 4);

        tracker.observe::<(), String>(&Ok(()));
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure(&"store down"));
    }
}
