//! Repeated-failures circuit breaker
//!
//! Counts commit failures inside a rolling window. Reaching the threshold
//! trips the breaker once and fires the fatal callback; a success clears the
//! failure history. A tripped breaker stays tripped.

use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// No recent failures.
    Disarmed,
    /// Failures seen inside the window, below the threshold.
    Armed,
    /// Threshold reached; the fatal callback has fired.
    Tripped,
}

pub type FatalCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct BreakerInner {
    state: BreakerState,
    failures: VecDeque<Instant>,
}

pub struct RepeatedFailuresCircuitBreaker {
    name: String,
    threshold: usize,
    window: Duration,
    inner: Mutex<BreakerInner>,
    on_trip: FatalCallback,
}

impl RepeatedFailuresCircuitBreaker {
    pub fn new(name: impl Into<String>, threshold: u32, window: Duration, on_trip: FatalCallback) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1) as usize,
            window,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Disarmed,
                failures: VecDeque::new(),
            }),
            on_trip,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn is_tripped(&self) -> bool {
        self.state() == BreakerState::Tripped
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Armed {
            inner.state = BreakerState::Disarmed;
            inner.failures.clear();
            info!(breaker = %self.name, "Circuit breaker disarmed");
        }
    }

    /// Returns true when this failure tripped the breaker.
    pub fn record_failure(&self, err: &dyn Display) -> bool {
        self.record_failure_at(Instant::now(), err)
    }

    pub fn record_failure_at(&self, now: Instant, err: &dyn Display) -> bool {
        let reason = {
            let mut inner = self.inner.lock();
            if inner.state == BreakerState::Tripped {
                return false;
            }

            inner.failures.push_back(now);
            while let Some(oldest) = inner.failures.front() {
                if now.saturating_duration_since(*oldest) > self.window {
                    inner.failures.pop_front();
                } else {
                    break;
                }
            }

            if inner.failures.len() < self.threshold {
                inner.state = BreakerState::Armed;
                warn!(
                    breaker = %self.name,
                    failures = inner.failures.len(),
                    threshold = self.threshold,
                    error = %err,
                    "Circuit breaker armed"
                );
                return false;
            }

            inner.state = BreakerState::Tripped;
            format!(
                "{}: {} failures within {}s, last error: {}",
                self.name,
                inner.failures.len(),
                self.window.as_secs(),
                err
            )
        };

        error!(breaker = %self.name, reason = %reason, "Circuit breaker tripped");
        (self.on_trip)(&reason);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker() -> (RepeatedFailuresCircuitBreaker, Arc<AtomicUsize>) {
        let trips = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&trips);
        let breaker = RepeatedFailuresCircuitBreaker::new(
            "ingestion",
            5,
            Duration::from_secs(120),
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (breaker, trips)
    }

    #[test]
    fn test_trips_after_threshold_inside_window() {
        let (breaker, trips) = breaker();
        let t0 = Instant::now();
        for i in 0..4 {
            assert!(!breaker.record_failure_at(t0 + Duration::from_secs(i * 10), &"boom"));
            assert_eq!(breaker.state(), BreakerState::Armed);
        }
        assert!(breaker.record_failure_at(t0 + Duration::from_secs(50), &"boom"));
        assert_eq!(breaker.state(), BreakerState::Tripped);

        // fires only once
        assert!(!breaker.record_failure_at(t0 + Duration::from_secs(51), &"boom"));
        assert_eq!(trips.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failures_spread_beyond_window_do_not_trip() {
        let (breaker, trips) = breaker();
        let t0 = Instant::now();
        for i in 0..20 {
            breaker.record_failure_at(t0 + Duration::from_secs(i * 40), &"slow");
        }
        assert_eq!(breaker.state(), BreakerState::Armed);
        assert_eq!(trips.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_success_resets_history() {
        let (breaker, trips) = breaker();
        let t0 = Instant::now();
        for i in 0..4 {
            breaker.record_failure_at(t0 + Duration::from_secs(i), &"boom");
        }
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Disarmed);

        for i in 4..8 {
            breaker.record_failure_at(t0 + Duration::from_secs(i), &"boom");
        }
        assert_eq!(trips.load(Ordering::SeqCst), 0);
    }
}
