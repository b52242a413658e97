// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Circuit breaker for provider resilience
//!
//! One breaker exists per provider name for the process lifetime, owned by
//! an explicit `BreakerRegistry` (no ambient globals). State transitions are
//! guarded by a mutex so concurrent runs report failures atomically, and the
//! open → half-open transition is measured on a monotonic clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::ResilienceConfig;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests allowed
    Closed,
    /// Too many failures, requests blocked
    Open,
    /// Cooldown elapsed, a single trial request is allowed
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    /// Consecutive retryable-failure count
    consecutive_failures: u32,
    /// When the circuit opened; None while closed
    opened_at: Option<Instant>,
    /// Whether the half-open trial request has been handed out
    probe_in_flight: bool,
}

/// Circuit breaker tracking one provider's health
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            cooldown,
            inner: Mutex::new(BreakerInner {
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(breaker = %self.name, "breaker lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn derive_state(&self, inner: &BreakerInner) -> CircuitState {
        match inner.opened_at {
            None => CircuitState::Closed,
            Some(opened_at) => {
                if opened_at.elapsed() >= self.cooldown {
                    CircuitState::HalfOpen
                } else {
                    CircuitState::Open
                }
            }
        }
    }

    /// Provider name this breaker guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        self.derive_state(&inner)
    }

    /// Check whether a request may proceed.
    ///
    /// In half-open state this hands out exactly one trial slot; further
    /// requests are refused until the trial reports success or failure.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match self.derive_state(&inner) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful request
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.opened_at.is_some() {
            tracing::info!(breaker = %self.name, "circuit breaker closed after successful trial");
        }
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    /// Record a failed request
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        if inner.opened_at.is_some() {
            // Half-open trial failed (or a stale call failed while open):
            // reopen and restart the cooldown.
            inner.opened_at = Some(Instant::now());
            inner.probe_in_flight = false;
            tracing::warn!(
                breaker = %self.name,
                cooldown_secs = self.cooldown.as_secs(),
                "circuit breaker reopened after failed trial"
            );
            return;
        }

        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.failure_threshold {
            inner.opened_at = Some(Instant::now());
            inner.probe_in_flight = false;
            tracing::warn!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "circuit breaker opened"
            );
        }
    }

    /// Get current consecutive-failure count
    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Reset the breaker to closed with a zeroed counter
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }
}

/// Process-wide registry of per-provider circuit breakers
///
/// Breakers are created lazily on first use and live for the registry's
/// lifetime. `reset_all` exists for test isolation and operational resets.
pub struct BreakerRegistry {
    failure_threshold: u32,
    cooldown: Duration,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create a registry from resilience settings
    pub fn new(config: &ResilienceConfig) -> Self {
        Self {
            failure_threshold: config.circuit_failure_threshold,
            cooldown: Duration::from_secs(config.circuit_cooldown_secs),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Create a registry with a custom cooldown (short cooldowns for tests)
    pub fn with_thresholds(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        match self.breakers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("breaker registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Get the breaker for a provider, creating it on first use
    pub fn breaker(&self, provider: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock();
        breakers
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    provider,
                    self.failure_threshold,
                    self.cooldown,
                ))
            })
            .clone()
    }

    /// Number of breakers created so far
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether any breakers exist
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clear the registry (test/operational escape hatch)
    pub fn reset_all(&self) {
        self.lock().clear();
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(&ResilienceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn fast_breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new("test", threshold, Duration::from_millis(50))
    }

    #[test]
    fn test_breaker_initial_state() {
        let cb = fast_breaker(3);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_breaker_success_resets_counter() {
        let cb = fast_breaker(3);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.failure_count(), 2);

        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_breaker_opens_at_threshold() {
        let cb = fast_breaker(3);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_breaker_default_threshold_is_five() {
        let registry = BreakerRegistry::default();
        let cb = registry.breaker("anthropic");

        for _ in 0..4 {
            cb.record_failure();
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_breaker_half_open_after_cooldown() {
        let cb = fast_breaker(2);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        sleep(Duration::from_millis(80));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_admits_exactly_one_trial() {
        let cb = fast_breaker(2);
        cb.record_failure();
        cb.record_failure();
        sleep(Duration::from_millis(80));

        assert!(cb.allow_request());
        // Second caller is refused while the trial is in flight
        assert!(!cb.allow_request());
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_half_open_success_closes() {
        let cb = fast_breaker(2);
        cb.record_failure();
        cb.record_failure();
        sleep(Duration::from_millis(80));

        assert!(cb.allow_request());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        // Fully open for traffic again
        assert!(cb.allow_request());
        assert!(cb.allow_request());
    }

    #[test]
    fn test_half_open_failure_reopens_and_restarts_cooldown() {
        let cb = fast_breaker(2);
        cb.record_failure();
        cb.record_failure();
        sleep(Duration::from_millis(80));

        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // A fresh cooldown makes it half-open again, with a fresh probe slot
        sleep(Duration::from_millis(80));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_breaker_reset() {
        let cb = fast_breaker(2);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_registry_lazy_create_and_singleton() {
        let registry = BreakerRegistry::default();
        assert!(registry.is_empty());

        let a = registry.breaker("anthropic");
        let b = registry.breaker("anthropic");
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&a, &b));

        registry.breaker("openai");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registry_state_shared_across_handles() {
        let registry = BreakerRegistry::with_thresholds(2, Duration::from_secs(30));
        registry.breaker("openai").record_failure();
        registry.breaker("openai").record_failure();
        assert_eq!(registry.breaker("openai").state(), CircuitState::Open);
        // Other providers unaffected
        assert_eq!(registry.breaker("gemini").state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_reset_all() {
        let registry = BreakerRegistry::default();
        registry.breaker("anthropic");
        registry.breaker("openai");
        assert_eq!(registry.len(), 2);

        registry.reset_all();
        assert!(registry.is_empty());
        // Lazily recreated fresh
        assert_eq!(registry.breaker("anthropic").failure_count(), 0);
    }

    #[test]
    fn test_concurrent_failure_reports() {
        let registry = Arc::new(BreakerRegistry::with_thresholds(
            100,
            Duration::from_secs(30),
        ));
        let mut handles = vec![];
        for _ in 0..10 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                for _ in 0..10 {
                    registry.breaker("anthropic").record_failure();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.breaker("anthropic").failure_count(), 100);
        assert_eq!(registry.breaker("anthropic").state(), CircuitState::Open);
    }
}
