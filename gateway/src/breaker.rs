//! Circuit breaker for upstream resilience.
//!
//! The circuit breaker stops calling a failing upstream for a while. It has
//! three states:
//!
//! - **Closed**: requests pass through, failures are counted
//! - **Open**: requests are rejected immediately until the cooldown elapses
//! - **HalfOpen**: a limited number of trial requests decide whether to
//!   close again or reopen

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::{BreakerSettings, BreakersConfig};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    /// Failure times inside the rolling window, oldest first.
    recent_failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    half_open_successes: u32,
}

/// Circuit breaker for one named upstream dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                recent_failures: VecDeque::new(),
                opened_at: None,
                half_open_in_flight: 0,
                half_open_successes: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State is plain counters; a poisoned lock still holds usable data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a request may go to the upstream now.
    ///
    /// Every `true` must be followed by exactly one `record_success` or
    /// `record_failure`; `try_acquire` does that bookkeeping on drop.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map_or(true, |t| t.elapsed() >= self.cooldown());
                if !cooled {
                    return false;
                }

                inner.state = CircuitState::HalfOpen;
                inner.half_open_in_flight = 1;
                inner.half_open_successes = 0;
                tracing::info!(breaker = %self.name, "Circuit breaker transitioning to half-open");
                true
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.settings.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Admit one upstream call, returning a permit that must be settled
    /// with its outcome.
    ///
    /// A permit dropped unsettled (the caller went away mid-call) frees its
    /// half-open trial slot without counting as success or failure.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BreakerPermit> {
        self.allow_request().then(|| BreakerPermit {
            breaker: Arc::clone(self),
            settled: false,
        })
    }

    fn release(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            tracing::debug!(breaker = %self.name, "Abandoned half-open trial released");
        }
    }

    /// Record a successful request.
    pub fn record_success(&self) {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.settings.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.recent_failures.clear();
                    inner.opened_at = None;
                    inner.half_open_in_flight = 0;
                    tracing::info!(breaker = %self.name, "Circuit breaker closed after successful recovery");
                }
            }
            // A request admitted before the breaker opened
            CircuitState::Open => {}
        }
    }

    /// Record a failed request (transport error, timeout or 5xx).
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                inner.recent_failures.push_back(now);
                let window = Duration::from_millis(self.settings.window_ms);
                while inner
                    .recent_failures
                    .front()
                    .is_some_and(|t| now.duration_since(*t) > window)
                {
                    inner.recent_failures.pop_front();
                }

                let in_window = inner.recent_failures.len() as u32;
                if inner.consecutive_failures >= self.settings.failure_threshold
                    || in_window >= self.settings.failure_threshold
                {
                    self.open(&mut inner, now);
                    tracing::warn!(
                        breaker = %self.name,
                        consecutive_failures = inner.consecutive_failures,
                        failures_in_window = in_window,
                        "Circuit breaker opened due to failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open immediately reopens the circuit
                self.open(&mut inner, now);
                tracing::warn!(breaker = %self.name, "Circuit breaker reopened after failure in half-open state");
            }
            CircuitState::Open => {}
        }
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.half_open_in_flight = 0;
        inner.half_open_successes = 0;
    }

    fn cooldown(&self) -> Duration {
        Duration::from_millis(self.settings.cooldown_ms)
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }
}

/// One admitted upstream call.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    settled: bool,
}

impl BreakerPermit {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release();
        }
    }
}

/// Circuit breakers keyed by breaker name, created on first use.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: BreakersConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakersConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Get or create the breaker with the given name.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(name) {
            return breaker.value().clone();
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(name, self.config.settings_for(name)))
            })
            .value()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_settings() -> BreakerSettings {
        BreakerSettings {
            failure_threshold: 3,
            window_ms: 60_000,
            cooldown_ms: 50,
            half_open_max_calls: 1,
            success_threshold: 2,
        }
    }

    fn opened(settings: BreakerSettings) -> CircuitBreaker {
        let cb = CircuitBreaker::new("test", settings.clone());
        for _ in 0..settings.failure_threshold {
            assert!(cb.allow_request());
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        cb
    }

    #[test]
    fn starts_closed() {
        let cb = CircuitBreaker::new("test", test_settings());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new("test", test_settings());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // Short-circuits without reaching the upstream
        assert!(!cb.allow_request());
    }

    #[test]
    fn opens_on_failures_within_window_despite_successes() {
        let cb = CircuitBreaker::new("test", test_settings());

        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn failures_outside_window_are_forgotten() {
        let cb = CircuitBreaker::new(
            "test",
            BreakerSettings {
                window_ms: 20,
                ..test_settings()
            },
        );

        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_success();
        std::thread::sleep(Duration::from_millis(40));

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_cooldown_limits_trials() {
        let cb = opened(test_settings());
        assert!(!cb.allow_request());

        std::thread::sleep(Duration::from_millis(70));

        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Only one trial in flight
        assert!(!cb.allow_request());
    }

    #[test]
    fn half_open_successes_close() {
        let cb = opened(test_settings());
        std::thread::sleep(Duration::from_millis(70));

        assert!(cb.allow_request());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(cb.allow_request());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        // Closing resets the failure history
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = opened(test_settings());
        std::thread::sleep(Duration::from_millis(70));

        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn abandoned_half_open_trial_frees_its_slot() {
        let cb = Arc::new(opened(test_settings()));
        std::thread::sleep(Duration::from_millis(70));

        let trial = cb.try_acquire().expect("trial admitted after cooldown");
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire().is_none());

        drop(trial);

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let retry = cb.try_acquire().expect("slot freed by dropped permit");
        retry.success();
        cb.try_acquire().expect("second trial").success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn settled_permits_record_outcome() {
        let cb = Arc::new(CircuitBreaker::new(
            "test",
            BreakerSettings {
                failure_threshold: 2,
                ..test_settings()
            },
        ));

        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        // Dropping in the closed state records nothing
        drop(cb.try_acquire().unwrap());
        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_none());
    }

    #[test]
    fn registry_creates_breakers_with_named_settings() {
        let mut named = HashMap::new();
        named.insert(
            "strict".to_string(),
            BreakerSettings {
                failure_threshold: 1,
                ..test_settings()
            },
        );
        let registry = BreakerRegistry::new(BreakersConfig {
            default: test_settings(),
            named,
        });

        let a1 = registry.get_or_create("mycmd");
        let a2 = registry.get_or_create("mycmd");
        let strict = registry.get_or_create("strict");

        // Same name returns same breaker
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &strict));
        assert_eq!(registry.len(), 2);

        strict.record_failure();
        assert_eq!(strict.state(), CircuitState::Open);
        a1.record_failure();
        assert_eq!(a1.state(), CircuitState::Closed);
        assert_eq!(a1.name(), "mycmd");
    }
}
