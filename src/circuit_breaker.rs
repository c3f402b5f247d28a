//! Circuit Breaker Module
//!
//! Per-provider failure gate with the classic closed / open / half-open state
//! machine. All mutable state sits behind a single mutex per breaker so a
//! transition decision is always made against a consistent snapshot of the
//! counters. The open-to-half-open transition is evaluated lazily at call
//! time through the injected [`Clock`], so there are no background timers.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::events::ObserverList;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are refused until the reset timeout elapses
    Open,
    /// Trial period: requests are allowed while recovery is evaluated
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Cool-down before an open circuit admits a trial request
    pub reset_timeout_ms: u64,
    /// Successes during half-open needed to close the circuit
    pub success_threshold: u32,
    /// Disabled breakers always permit requests and never trip
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            success_threshold: 2,
            enabled: true,
        }
    }
}

/// Read-only snapshot of a breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStatus {
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub enabled: bool,
    pub blocked_requests: u64,
    pub state_transitions: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Notification emitted on every state transition
#[derive(Debug, Clone)]
pub struct StateChange {
    pub previous: CircuitState,
    pub next: CircuitState,
    pub reason: String,
}

struct BreakerInner {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failures: u32,
    successes: u32,
    blocked_requests: u64,
    state_transitions: u64,
    last_failure_at: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
}

impl BreakerInner {
    fn transition(&mut self, next: CircuitState, reason: &str, now: DateTime<Utc>) -> StateChange {
        let previous = self.state;
        self.state = next;
        self.last_state_change = now;
        if previous != next {
            self.state_transitions += 1;
        }
        StateChange {
            previous,
            next,
            reason: reason.to_string(),
        }
    }

    fn retry_at(&self) -> DateTime<Utc> {
        self.last_state_change + Duration::milliseconds(self.config.reset_timeout_ms as i64)
    }
}

/// Per-provider failure gate
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<BreakerInner>,
    clock: Arc<dyn Clock>,
    observers: ObserverList<StateChange>,
}

impl CircuitBreaker {
    /// Create a breaker for the named provider
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            inner: Mutex::new(BreakerInner {
                config,
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                blocked_requests: 0,
                state_transitions: 0,
                last_failure_at: None,
                last_state_change: now,
            }),
            clock,
            observers: ObserverList::new(),
        }
    }

    /// Provider this breaker gates
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gate check. Advances open to half-open once the reset timeout has
    /// elapsed; increments `blocked_requests` when refusing while open.
    /// Returns the earliest retry time on refusal.
    fn check(&self) -> std::result::Result<(), DateTime<Utc>> {
        let change = {
            let mut inner = self.lock();
            if !inner.config.enabled {
                return Ok(());
            }
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => return Ok(()),
                CircuitState::Open => {
                    let now = self.clock.now();
                    let elapsed = now - inner.last_state_change;
                    if elapsed >= Duration::milliseconds(inner.config.reset_timeout_ms as i64) {
                        inner.successes = 0;
                        let change =
                            inner.transition(CircuitState::HalfOpen, "reset timeout elapsed", now);
                        info!(breaker = %self.name, "circuit breaker transitioning to half-open");
                        change
                    } else {
                        inner.blocked_requests += 1;
                        debug!(breaker = %self.name, "request blocked, circuit open");
                        return Err(inner.retry_at());
                    }
                }
            }
        };
        self.observers.notify(&change);
        Ok(())
    }

    /// Whether a request may be attempted right now
    pub fn can_request(&self) -> bool {
        self.check().is_ok()
    }

    /// Record a successful call against this provider
    pub fn record_success(&self) {
        let change = {
            let mut inner = self.lock();
            if !inner.config.enabled {
                return;
            }
            match inner.state {
                CircuitState::Closed => {
                    // A success clears prior failure history
                    inner.failures = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.successes += 1;
                    if inner.successes >= inner.config.success_threshold {
                        inner.failures = 0;
                        inner.successes = 0;
                        let now = self.clock.now();
                        info!(breaker = %self.name, "circuit breaker closing after recovery");
                        Some(inner.transition(
                            CircuitState::Closed,
                            "success threshold reached",
                            now,
                        ))
                    } else {
                        None
                    }
                }
                // Late result from a call that started before the trip
                CircuitState::Open => None,
            }
        };
        if let Some(change) = change {
            self.observers.notify(&change);
        }
    }

    /// Record a failed call against this provider
    pub fn record_failure(&self, reason: &str) {
        let change = {
            let mut inner = self.lock();
            if !inner.config.enabled {
                return;
            }
            let now = self.clock.now();
            inner.failures += 1;
            inner.last_failure_at = Some(now);
            match inner.state {
                CircuitState::Closed => {
                    if inner.failures >= inner.config.failure_threshold {
                        inner.successes = 0;
                        warn!(
                            breaker = %self.name,
                            failures = inner.failures,
                            "circuit breaker opening"
                        );
                        Some(inner.transition(CircuitState::Open, "failure threshold reached", now))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    // A single failure during the trial reopens the circuit
                    // and restarts the reset-timeout window.
                    warn!(breaker = %self.name, %reason, "circuit breaker reopening from half-open");
                    Some(inner.transition(CircuitState::Open, "failure during half-open trial", now))
                }
                CircuitState::Open => None,
            }
        };
        if let Some(change) = change {
            self.observers.notify(&change);
        }
    }

    /// Run `operation` if the gate permits, recording the outcome.
    ///
    /// Refusals fail immediately with [`Error::CircuitOpen`]; operation
    /// errors are recorded and returned unchanged.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        if let Err(retry_at) = self.check() {
            return Err(Error::CircuitOpen {
                provider: self.name.clone(),
                retry_at,
            });
        }
        match operation().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                self.record_failure(&e.to_string());
                Err(e)
            }
        }
    }

    /// Side-effect-free snapshot. Does not advance the timeout transition.
    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.lock();
        CircuitBreakerStatus {
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            enabled: inner.config.enabled,
            blocked_requests: inner.blocked_requests,
            state_transitions: inner.state_transitions,
            last_failure_at: inner.last_failure_at,
        }
    }

    /// Current configuration
    pub fn config(&self) -> CircuitBreakerConfig {
        self.lock().config.clone()
    }

    /// Replace the configuration
    pub fn update_config(&self, config: CircuitBreakerConfig) {
        self.lock().config = config;
    }

    /// Administrative override: set the state unconditionally
    pub fn force_state(&self, state: CircuitState, reason: &str) {
        let change = {
            let mut inner = self.lock();
            let now = self.clock.now();
            warn!(breaker = %self.name, %state, %reason, "circuit breaker state forced");
            inner.transition(state, reason, now)
        };
        self.observers.notify(&change);
    }

    /// Return to closed with all counters zeroed
    pub fn reset(&self) {
        let change = {
            let mut inner = self.lock();
            let now = self.clock.now();
            let previous = inner.state;
            inner.state = CircuitState::Closed;
            inner.failures = 0;
            inner.successes = 0;
            inner.blocked_requests = 0;
            inner.state_transitions = 0;
            inner.last_failure_at = None;
            inner.last_state_change = now;
            info!(breaker = %self.name, "circuit breaker reset");
            StateChange {
                previous,
                next: CircuitState::Closed,
                reason: "manual reset".to_string(),
            }
        };
        self.observers.notify(&change);
    }

    /// Subscribe to state transitions
    pub fn on_state_change<F>(&self, observer: F)
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.observers.subscribe(observer);
    }
}

/// Named collection of breakers, one per provider, created lazily under a
/// shared default configuration. Instances are constructed at the
/// composition root; tests build independent registries.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    /// Create a registry handing out breakers with the given default config
    pub fn new(default_config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
            clock,
        }
    }

    /// Existing breaker for `name`, or a freshly constructed one
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    name,
                    self.default_config.clone(),
                    Arc::clone(&self.clock),
                ))
            })
            .clone()
    }

    /// Snapshot across all known breakers
    pub fn all_status(&self) -> HashMap<String, CircuitBreakerStatus> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn test_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        ))
    }

    fn breaker_with(
        failure_threshold: u32,
        reset_timeout_ms: u64,
        success_threshold: u32,
        clock: Arc<ManualClock>,
    ) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold,
                reset_timeout_ms,
                success_threshold,
                enabled: true,
            },
            clock,
        )
    }

    #[test]
    fn test_opens_exactly_once_at_threshold() {
        let clock = test_clock();
        let breaker = breaker_with(3, 1_000, 1, clock);

        for _ in 0..5 {
            breaker.record_failure("boom");
        }

        let status = breaker.status();
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.state_transitions, 1);
        assert_eq!(status.failures, 5);
        assert!(status.last_failure_at.is_some());
    }

    #[test]
    fn test_blocked_requests_count_only_while_open() {
        let clock = test_clock();
        let breaker = breaker_with(1, 60_000, 1, Arc::clone(&clock));

        assert!(breaker.can_request());
        assert_eq!(breaker.status().blocked_requests, 0);

        breaker.record_failure("boom");
        assert!(!breaker.can_request());
        assert!(!breaker.can_request());
        assert_eq!(breaker.status().blocked_requests, 2);
    }

    #[test]
    fn test_open_to_half_open_after_timeout() {
        let clock = test_clock();
        let breaker = breaker_with(1, 2_000, 1, Arc::clone(&clock));

        breaker.record_failure("boom");
        assert_eq!(breaker.status().state, CircuitState::Open);
        assert!(!breaker.can_request());

        clock.advance_ms(2_100);
        // status() must not advance the transition on its own
        assert_eq!(breaker.status().state, CircuitState::Open);

        assert!(breaker.can_request());
        assert_eq!(breaker.status().state, CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let clock = test_clock();
        let breaker = breaker_with(1, 2_000, 2, Arc::clone(&clock));

        breaker.record_failure("boom");
        clock.advance_ms(2_001);
        assert!(breaker.can_request());
        assert_eq!(breaker.status().state, CircuitState::HalfOpen);

        breaker.record_failure("still broken");
        assert_eq!(breaker.status().state, CircuitState::Open);

        // The reset window restarts from the reopen
        clock.advance_ms(1_000);
        assert!(!breaker.can_request());
        clock.advance_ms(1_001);
        assert!(breaker.can_request());
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let clock = test_clock();
        let breaker = breaker_with(1, 2_000, 2, Arc::clone(&clock));

        breaker.record_failure("boom");
        clock.advance_ms(2_001);
        assert!(breaker.can_request());

        breaker.record_success();
        assert_eq!(breaker.status().state, CircuitState::HalfOpen);
        breaker.record_success();

        let status = breaker.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failures, 0);
    }

    #[test]
    fn test_full_recovery_cycle() {
        // threshold 3, timeout 2000ms, one success with threshold 1 closes
        let clock = test_clock();
        let breaker = breaker_with(3, 2_000, 1, Arc::clone(&clock));

        for _ in 0..3 {
            breaker.record_failure("boom");
        }
        assert_eq!(breaker.status().state, CircuitState::Open);

        clock.advance_ms(2_100);
        assert!(breaker.can_request());
        assert_eq!(breaker.status().state, CircuitState::HalfOpen);

        breaker.record_success();
        let status = breaker.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failures, 0);
    }

    #[test]
    fn test_closed_success_clears_failures() {
        let clock = test_clock();
        let breaker = breaker_with(3, 1_000, 1, clock);

        breaker.record_failure("a");
        breaker.record_failure("b");
        breaker.record_success();
        breaker.record_failure("c");
        breaker.record_failure("d");

        // Never reached three consecutive failures
        assert_eq!(breaker.status().state, CircuitState::Closed);
    }

    #[test]
    fn test_disabled_breaker_never_trips() {
        let clock = test_clock();
        let breaker = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 1,
                reset_timeout_ms: 1_000,
                success_threshold: 1,
                enabled: false,
            },
            clock,
        );

        for _ in 0..10 {
            breaker.record_failure("boom");
        }
        assert!(breaker.can_request());
        assert_eq!(breaker.status().state, CircuitState::Closed);
        assert_eq!(breaker.status().blocked_requests, 0);
    }

    #[test]
    fn test_force_state_and_reset() {
        let clock = test_clock();
        let breaker = breaker_with(5, 1_000, 1, clock);

        breaker.force_state(CircuitState::Open, "maintenance");
        assert_eq!(breaker.status().state, CircuitState::Open);
        assert_eq!(breaker.status().state_transitions, 1);

        breaker.reset();
        let status = breaker.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failures, 0);
        assert_eq!(status.blocked_requests, 0);
        assert_eq!(status.state_transitions, 0);
        assert!(status.last_failure_at.is_none());
    }

    #[test]
    fn test_state_change_observers() {
        let clock = test_clock();
        let breaker = Arc::new(breaker_with(1, 1_000, 1, clock));
        let transitions = Arc::new(AtomicU64::new(0));

        let seen = Arc::clone(&transitions);
        breaker.on_state_change(move |change| {
            assert_ne!(change.previous, change.next);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        breaker.record_failure("boom");
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_refuses_while_open() {
        let clock = test_clock();
        let breaker = breaker_with(1, 60_000, 1, clock);
        breaker.record_failure("boom");

        let result: Result<()> = breaker.execute(|| async { Ok(()) }).await;
        match result {
            Err(Error::CircuitOpen { provider, .. }) => assert_eq!(provider, "test"),
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
        assert_eq!(breaker.status().blocked_requests, 1);
    }

    #[tokio::test]
    async fn test_execute_records_outcome_and_rethrows() {
        let clock = test_clock();
        let breaker = breaker_with(2, 1_000, 1, clock);

        let err: Result<()> = breaker
            .execute(|| async { Err(Error::provider("test", "boom")) })
            .await;
        assert!(matches!(err, Err(Error::Provider { .. })));
        assert_eq!(breaker.status().failures, 1);

        let ok: Result<u32> = breaker.execute(|| async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
        assert_eq!(breaker.status().failures, 0);
    }

    #[test]
    fn test_registry_idempotent_per_name() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), test_clock());
        let a = registry.breaker("kie");
        let b = registry.breaker("kie");
        assert!(Arc::ptr_eq(&a, &b));

        a.record_failure("boom");
        assert_eq!(registry.all_status().get("kie").unwrap().failures, 1);
    }

    #[test]
    fn test_registries_are_isolated() {
        let clock = test_clock();
        let first = CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), Arc::clone(&clock) as Arc<dyn Clock>);
        let second = CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), clock);

        first.breaker("kie").record_failure("boom");
        assert_eq!(second.breaker("kie").status().failures, 0);
    }
}
