// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Budgeted retry for provider calls
//!
//! Composes the error classifier, the per-run retry budget, the provider's
//! circuit breaker, and exponential backoff into a single call wrapper.
//! Server-supplied retry directives override the backoff schedule.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::ResilienceConfig;
use crate::error::{ProviderError, Result, SleuthError};
use crate::llm::circuit_breaker::{BreakerRegistry, CircuitState};
use crate::llm::classify::{classify, ClassifiedError};

/// Cross-call retry cap for one agent run.
///
/// Independent of the per-call attempt limit: many small per-call retries
/// cannot collectively stall a session past this budget. Run-local, so no
/// locking is needed.
#[derive(Debug)]
pub struct RetryBudget {
    max_retries: u32,
    consumed: u32,
}

impl RetryBudget {
    /// Create a fresh budget for one agent run
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            consumed: 0,
        }
    }

    /// Whether any budget remains
    pub fn can_retry(&self) -> bool {
        self.consumed < self.max_retries
    }

    /// Consume one retry. No-op once exhausted; never panics.
    pub fn consume(&mut self) {
        if self.consumed < self.max_retries {
            self.consumed += 1;
        }
    }

    /// Retries consumed so far
    pub fn consumed(&self) -> u32 {
        self.consumed
    }
}

/// Per-call retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retry attempts per call-site
    pub max_retries: u32,
    /// Base delay in milliseconds (exponentially increased)
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for RetryConfig {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl RetryConfig {
    /// Backoff delay for a given retry attempt (0-based)
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential_ms = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(exponential_ms.min(self.max_delay_ms))
    }

    /// Delay before the next attempt. A server directive wins over backoff,
    /// and re-overrides on every retry that carries one.
    fn next_delay(&self, classified: &ClassifiedError, attempt: u32) -> Duration {
        match classified.retry_after_secs {
            Some(secs) => Duration::from_millis(secs.saturating_mul(1000)),
            None => self.backoff_delay(attempt),
        }
    }
}

/// Call wrapper applying classification, budget, breaker, and backoff
pub struct RetryPolicy {
    config: RetryConfig,
    breakers: Arc<BreakerRegistry>,
}

impl RetryPolicy {
    /// Create a policy over a breaker registry
    pub fn new(config: RetryConfig, breakers: Arc<BreakerRegistry>) -> Self {
        Self { config, breakers }
    }

    /// Access the underlying breaker registry
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Attempt a provider call, retrying retryable failures.
    ///
    /// The failure propagates immediately when the error is not retryable,
    /// the per-call cap or the run budget is exhausted, or the provider's
    /// breaker is open. An open breaker refuses the call before any network
    /// attempt, regardless of remaining budget.
    pub async fn wrap_call<F, Fut, T>(
        &self,
        provider: &str,
        budget: &mut RetryBudget,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let breaker = self.breakers.breaker(provider);
        let mut attempt = 0u32;

        loop {
            if !breaker.allow_request() {
                tracing::warn!(provider, "call refused: circuit breaker open");
                return Err(SleuthError::CircuitOpen {
                    provider: provider.to_string(),
                });
            }

            match operation().await {
                Ok(result) => {
                    breaker.record_success();
                    if attempt > 0 {
                        tracing::debug!(provider, attempt, "call succeeded after retries");
                    }
                    return Ok(result);
                }
                Err(raw) => {
                    let classified = classify(provider, &raw);

                    if !classified.retryable {
                        // The provider answered; only retryable failures
                        // count against its health.
                        breaker.record_success();
                        tracing::debug!(provider, error = %raw, "non-retryable provider error");
                        return Err(raw.into());
                    }

                    breaker.record_failure();

                    // A failure that trips the breaker refuses the call now;
                    // no budget is spent and no backoff delay is served.
                    if breaker.state() == CircuitState::Open {
                        tracing::warn!(provider, "call refused: circuit breaker opened");
                        return Err(SleuthError::CircuitOpen {
                            provider: provider.to_string(),
                        });
                    }

                    if attempt >= self.config.max_retries {
                        tracing::warn!(
                            provider,
                            retries = self.config.max_retries,
                            "per-call retry cap exhausted"
                        );
                        return Err(raw.into());
                    }

                    if !budget.can_retry() {
                        tracing::warn!(provider, "session retry budget exhausted");
                        return Err(raw.into());
                    }

                    budget.consume();
                    let delay = self.config.next_delay(&classified, attempt);
                    tracing::debug!(
                        provider,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        kind = ?classified.kind,
                        "retrying provider call"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::circuit_breaker::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_policy() -> RetryPolicy {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 1, // fast tests
            max_delay_ms: 10,
        };
        RetryPolicy::new(config, Arc::new(BreakerRegistry::default()))
    }

    #[test]
    fn test_budget_counts_down() {
        let mut budget = RetryBudget::new(2);
        assert!(budget.can_retry());
        budget.consume();
        assert!(budget.can_retry());
        budget.consume();
        assert!(!budget.can_retry());
        assert_eq!(budget.consumed(), 2);
    }

    #[test]
    fn test_budget_exhaustion_is_idempotent() {
        let mut budget = RetryBudget::new(1);
        budget.consume();
        budget.consume();
        budget.consume();
        assert!(!budget.can_retry());
        assert_eq!(budget.consumed(), 1);
    }

    #[test]
    fn test_budget_zero_never_retries() {
        let budget = RetryBudget::new(0);
        assert!(!budget.can_retry());
    }

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 10_000);
    }

    #[test]
    fn test_backoff_schedule() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff_delay(0).as_millis(), 500);
        assert_eq!(config.backoff_delay(1).as_millis(), 1000);
        assert_eq!(config.backoff_delay(2).as_millis(), 2000);
        assert_eq!(config.backoff_delay(3).as_millis(), 4000);
        assert_eq!(config.backoff_delay(4).as_millis(), 8000);
        // Capped
        assert_eq!(config.backoff_delay(5).as_millis(), 10_000);
        assert_eq!(config.backoff_delay(50).as_millis(), 10_000);
    }

    #[test]
    fn test_server_directive_overrides_backoff() {
        let config = RetryConfig::default();
        let classified = classify(
            "anthropic",
            &ProviderError::RateLimited {
                retry_after_secs: Some(2),
            },
        );
        assert_eq!(config.next_delay(&classified, 0).as_millis(), 2000);
        // Overrides regardless of attempt number
        assert_eq!(config.next_delay(&classified, 4).as_millis(), 2000);
    }

    #[test]
    fn test_no_directive_falls_back_to_backoff() {
        let config = RetryConfig::default();
        let classified = classify("anthropic", &ProviderError::Timeout);
        assert_eq!(config.next_delay(&classified, 1).as_millis(), 1000);
    }

    #[tokio::test]
    async fn test_wrap_call_success_first_try() {
        let policy = test_policy();
        let mut budget = RetryBudget::new(10);
        let calls = AtomicU32::new(0);

        let result = policy
            .wrap_call("anthropic", &mut budget, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProviderError>(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(budget.consumed(), 0);
    }

    #[tokio::test]
    async fn test_wrap_call_retries_transient_then_succeeds() {
        let policy = test_policy();
        let mut budget = RetryBudget::new(10);
        let calls = AtomicU32::new(0);

        let result = policy
            .wrap_call("anthropic", &mut budget, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Timeout)
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(budget.consumed(), 2);
    }

    #[tokio::test]
    async fn test_wrap_call_fatal_propagates_immediately() {
        let policy = test_policy();
        let mut budget = RetryBudget::new(10);
        let calls = AtomicU32::new(0);

        let result = policy
            .wrap_call("anthropic", &mut budget, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(ProviderError::AuthenticationFailed)
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(budget.consumed(), 0);
    }

    #[tokio::test]
    async fn test_wrap_call_per_call_cap() {
        let policy = test_policy();
        let mut budget = RetryBudget::new(100);
        let calls = AtomicU32::new(0);

        let result = policy
            .wrap_call("anthropic", &mut budget, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(ProviderError::Network("reset".to_string()))
            })
            .await;

        assert!(result.is_err());
        // Initial attempt + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(budget.consumed(), 3);
    }

    #[tokio::test]
    async fn test_wrap_call_stops_when_budget_exhausted() {
        let policy = test_policy();
        let mut budget = RetryBudget::new(1);
        let calls = AtomicU32::new(0);

        let result = policy
            .wrap_call("anthropic", &mut budget, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(ProviderError::Timeout)
            })
            .await;

        assert!(result.is_err());
        // Initial attempt + the single budgeted retry
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!budget.can_retry());
    }

    #[tokio::test]
    async fn test_open_breaker_refuses_without_attempt() {
        let policy = RetryPolicy::new(
            RetryConfig {
                max_retries: 3,
                base_delay_ms: 1,
                max_delay_ms: 10,
            },
            Arc::new(BreakerRegistry::with_thresholds(
                2,
                Duration::from_secs(30),
            )),
        );
        let breaker = policy.breakers().breaker("anthropic");
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        let mut budget = RetryBudget::new(10);
        let calls = AtomicU32::new(0);
        let result = policy
            .wrap_call("anthropic", &mut budget, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProviderError>(1)
            })
            .await;

        assert!(matches!(result, Err(SleuthError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(budget.consumed(), 0);
    }

    #[tokio::test]
    async fn test_breaker_opens_mid_call_short_circuits_retries() {
        // Threshold 2: the second transient failure opens the breaker, and
        // the loop stops before its next attempt even with budget left.
        let policy = RetryPolicy::new(
            RetryConfig {
                max_retries: 5,
                base_delay_ms: 1,
                max_delay_ms: 10,
            },
            Arc::new(BreakerRegistry::with_thresholds(
                2,
                Duration::from_secs(30),
            )),
        );
        let mut budget = RetryBudget::new(100);
        let calls = AtomicU32::new(0);

        let result = policy
            .wrap_call("anthropic", &mut budget, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(ProviderError::Timeout)
            })
            .await;

        assert!(matches!(result, Err(SleuthError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_success_closes_failure_streak() {
        let policy = test_policy();
        let breaker = policy.breakers().breaker("anthropic");
        let mut budget = RetryBudget::new(10);
        let calls = AtomicU32::new(0);

        let result = policy
            .wrap_call("anthropic", &mut budget, || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ProviderError::Timeout)
                } else {
                    Ok(1)
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_trip_refuses_without_budget_or_delay() {
        // Default backoff (500 ms base) with a threshold of 2: the second
        // failure opens the breaker and the refusal must come back without
        // serving another backoff sleep or consuming another budget unit.
        let policy = RetryPolicy::new(
            RetryConfig::default(),
            Arc::new(BreakerRegistry::with_thresholds(
                2,
                Duration::from_secs(30),
            )),
        );
        let mut budget = RetryBudget::new(10);
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result = policy
            .wrap_call("anthropic", &mut budget, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(ProviderError::Timeout)
            })
            .await;

        assert!(matches!(result, Err(SleuthError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // One backoff between the two attempts, nothing after the trip
        assert_eq!(start.elapsed(), Duration::from_millis(500));
        assert_eq!(budget.consumed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_wait_is_exact() {
        let policy = RetryPolicy::new(RetryConfig::default(), Arc::new(BreakerRegistry::default()));
        let mut budget = RetryBudget::new(10);
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result = policy
            .wrap_call("anthropic", &mut budget, || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ProviderError::RateLimited {
                        retry_after_secs: Some(2),
                    })
                } else {
                    Ok(9)
                }
            })
            .await;

        assert!(result.is_ok());
        // The directive (2 s) replaced the 500 ms backoff entirely
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }
}
