//! Retry orchestration for external AI calls.
//!
//! One logical call is driven by a plain loop over an explicit [`RetryState`]:
//! wait out any known rate limit, attempt (optionally under a [`TimeoutRace`]),
//! classify the failure, then either stop or back off and go again. Attempts are
//! strictly sequential.

use super::rate_limiter::{RateLimitStatus, RateLimitTracker};
use super::timeout::TimeoutRace;
use crate::client::error_classification::{ClassifiedError, ErrorClassifier, ProviderFailure};
use crate::error_code::ErrorKind;
use crate::{Error, Result};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration for retry logic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Fraction in `[0, 1]`; each delay is perturbed uniformly by `±jitter_factor`.
    pub jitter_factor: f64,
    /// Per-attempt deadline; `None` disables the race.
    pub attempt_timeout_ms: Option<u64>,
    /// Total time one call may spend waiting out shared rate limits. A call whose
    /// budget runs out while the limit is still active fails as `RATE_LIMITED`
    /// without attempting.
    pub max_rate_limit_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            attempt_timeout_ms: Some(60_000),
            max_rate_limit_wait_ms: 600_000,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay_ms = initial.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout_ms = timeout.map(|d| d.as_millis() as u64);
        self
    }

    pub fn with_max_rate_limit_wait(mut self, budget: Duration) -> Self {
        self.max_rate_limit_wait_ms = budget.as_millis() as u64;
        self
    }

    /// Unjittered delay after the `retry`-th failure (0-based):
    /// `min(max_delay, initial_delay * multiplier^retry)`.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.max(0.0).powi(exp);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(if capped.is_finite() { capped as u64 } else { self.max_delay_ms })
    }

    /// [`base_delay`](Self::base_delay) perturbed by `±jitter_factor`.
    pub fn jittered_delay<R: Rng>(&self, retry: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(retry).as_millis() as f64;
        let j = self.jitter_factor.clamp(0.0, 1.0);
        if j == 0.0 || base == 0.0 {
            return Duration::from_millis(base as u64);
        }
        let factor = 1.0 + rng.gen_range(-j..=j);
        Duration::from_millis((base * factor).round().max(0.0) as u64)
    }
}

/// Per-call retry bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts started so far (1-based once the first attempt begins)
    pub attempt: u32,
    pub last_error: Option<ErrorKind>,
    pub next_delay_ms: u64,
    /// Time spent so far waiting out shared rate limits
    pub rate_limit_waited_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Exponential backoff after a failed attempt
    Backoff,
    /// Waiting out a rate limit known to the tracker
    RateLimited,
}

/// Reported to the progress callback before every wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryProgress {
    /// Attempts made so far
    pub attempt: u32,
    pub error_kind: ErrorKind,
    pub delay: Duration,
    pub reason: WaitReason,
}

pub type ProgressFn<'a> = dyn Fn(&RetryProgress) + Send + Sync + 'a;

/// Suspension used between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub struct RetryOrchestrator {
    config: RetryConfig,
    classifier: Arc<ErrorClassifier>,
    tracker: Arc<RateLimitTracker>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryOrchestrator {
    pub fn new(
        config: RetryConfig,
        classifier: Arc<ErrorClassifier>,
        tracker: Arc<RateLimitTracker>,
    ) -> Self {
        Self {
            config,
            classifier,
            tracker,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<RateLimitTracker> {
        &self.tracker
    }

    /// Runs `operation` until it succeeds, fails non-retryably, or retries run out.
    ///
    /// `operation` receives the 1-based attempt number. The returned error is the
    /// last classified failure annotated with the number of attempts made.
    pub async fn execute<T, F, Fut>(
        &self,
        mut operation: F,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, ProviderFailure>> + Send,
        T: Send,
    {
        let mut state = RetryState::default();
        loop {
            if let Err(status) = self.wait_for_rate_limit(&mut state, progress).await {
                warn!(
                    attempt = state.attempt,
                    waited_ms = state.rate_limit_waited_ms,
                    remaining_ms = status.wait_time_ms,
                    "rate limit outlasted the wait budget, giving up"
                );
                return Err(Error::Ai {
                    kind: ErrorKind::RateLimited,
                    message: format!(
                        "provider still rate limited after waiting {} ms",
                        state.rate_limit_waited_ms
                    ),
                    attempts: state.attempt,
                    retry_after_ms: Some(status.wait_time_ms),
                });
            }

            state.attempt += 1;
            let outcome = match self.config.attempt_timeout_ms {
                Some(ms) => match TimeoutRace::from_millis(ms).run(operation(state.attempt)).await {
                    Ok(outcome) => outcome,
                    Err(elapsed) => Err(ProviderFailure::Timeout {
                        after_ms: elapsed.deadline.as_millis() as u64,
                    }),
                },
                None => operation(state.attempt).await,
            };

            let failure = match outcome {
                Ok(value) => {
                    self.tracker.record_success();
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            let classified = self.classifier.classify(&failure);
            state.last_error = Some(classified.kind);
            if classified.kind == ErrorKind::RateLimited {
                self.tracker.record(classified.kind, classified.retry_after());
            }

            let retries_used = state.attempt - 1;
            if !classified.retryable || retries_used >= self.config.max_retries {
                warn!(
                    attempt = state.attempt,
                    error_kind = classified.kind.code(),
                    retryable = classified.retryable,
                    error = classified.message.as_str(),
                    "ai call failed, giving up"
                );
                return Err(self.final_error(classified, state.attempt));
            }

            let delay = self
                .config
                .jittered_delay(retries_used, &mut rand::thread_rng());
            state.next_delay_ms = delay.as_millis() as u64;
            let report = RetryProgress {
                attempt: state.attempt,
                error_kind: classified.kind,
                delay,
                reason: WaitReason::Backoff,
            };
            if let Some(cb) = progress {
                cb(&report);
            }
            info!(
                attempt = state.attempt,
                error_kind = classified.kind.code(),
                delay_ms = state.next_delay_ms,
                error = classified.message.as_str(),
                "ai call failed, retrying"
            );
            self.sleeper.sleep(delay).await;
        }
    }

    /// Sleeps while the shared tracker reports a limit. Does not consume an attempt.
    ///
    /// Other callers may keep extending the limit, so this loops until it clears.
    /// Returns the still-active status once the call's wait budget is spent.
    async fn wait_for_rate_limit(
        &self,
        state: &mut RetryState,
        progress: Option<&ProgressFn<'_>>,
    ) -> std::result::Result<(), RateLimitStatus> {
        loop {
            let status = self.tracker.status();
            if !status.is_limited {
                return Ok(());
            }
            let budget_left = self
                .config
                .max_rate_limit_wait_ms
                .saturating_sub(state.rate_limit_waited_ms);
            if budget_left == 0 {
                return Err(status);
            }
            let delay = Duration::from_millis(status.wait_time_ms.min(budget_left));
            if let Some(cb) = progress {
                cb(&RetryProgress {
                    attempt: state.attempt,
                    error_kind: ErrorKind::RateLimited,
                    delay,
                    reason: WaitReason::RateLimited,
                });
            }
            info!(
                attempt = state.attempt,
                delay_ms = delay.as_millis() as u64,
                consecutive_hits = status.consecutive_hits,
                "waiting out provider rate limit"
            );
            self.sleeper.sleep(delay).await;
            state.rate_limit_waited_ms = state
                .rate_limit_waited_ms
                .saturating_add(delay.as_millis() as u64);
        }
    }

    fn final_error(&self, classified: ClassifiedError, attempts: u32) -> Error {
        let retry_after_ms = match classified.kind {
            ErrorKind::RateLimited => classified.retry_after_ms.or_else(|| {
                let status = self.tracker.status();
                status.is_limited.then_some(status.wait_time_ms)
            }),
            _ => None,
        };
        Error::Ai {
            kind: classified.kind,
            message: classified.message,
            attempts,
            retry_after_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_unjittered_sequence_caps_at_max() {
        let cfg = RetryConfig::new()
            .with_delays(Duration::from_millis(1_000), Duration::from_millis(30_000))
            .with_backoff_multiplier(2.0);
        let seq: Vec<u64> = (0..8).map(|i| cfg.base_delay(i).as_millis() as u64).collect();
        assert_eq!(seq, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000]);
    }

    #[test]
    fn test_huge_attempt_numbers_stay_capped() {
        let cfg = RetryConfig::new();
        assert_eq!(cfg.base_delay(10_000), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let cfg = RetryConfig::new().with_jitter_factor(0.25);
        let mut rng = StdRng::seed_from_u64(7);
        for retry in 0..7 {
            let base = cfg.base_delay(retry).as_millis() as f64;
            for _ in 0..200 {
                let d = cfg.jittered_delay(retry, &mut rng).as_millis() as f64;
                assert!(d >= (base * 0.75).floor() && d <= (base * 1.25).ceil(), "{} vs {}", d, base);
            }
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let cfg = RetryConfig::new().with_jitter_factor(0.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(cfg.jittered_delay(2, &mut rng), Duration::from_millis(4_000));
    }

    use crate::resilience::rate_limiter::RateLimitConfig;
    use crate::testing::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Stands in for other callers that keep hitting the limit while this one waits.
    struct ExtendingSleeper {
        clock: Arc<ManualClock>,
        tracker: Arc<RateLimitTracker>,
        extensions_left: AtomicU32,
        slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for ExtendingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
            self.clock.advance_ms(duration.as_millis() as u64);
            let left = self.extensions_left.load(Ordering::SeqCst);
            if left > 0 {
                self.extensions_left.store(left - 1, Ordering::SeqCst);
                self.tracker
                    .record(ErrorKind::RateLimited, Some(Duration::from_millis(1_000)));
            }
        }
    }

    fn limited(extensions: u32, budget: Duration) -> (RetryOrchestrator, Arc<ExtendingSleeper>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let tracker = Arc::new(RateLimitTracker::with_clock(
            RateLimitConfig::new(),
            clock.clone(),
        ));
        tracker.record(ErrorKind::RateLimited, Some(Duration::from_millis(1_000)));
        let sleeper = Arc::new(ExtendingSleeper {
            clock,
            tracker: tracker.clone(),
            extensions_left: AtomicU32::new(extensions),
            slept: Mutex::new(Vec::new()),
        });
        let orchestrator = RetryOrchestrator::new(
            RetryConfig::new()
                .with_jitter_factor(0.0)
                .with_attempt_timeout(None)
                .with_max_rate_limit_wait(budget),
            Arc::new(ErrorClassifier::default()),
            tracker,
        )
        .with_sleeper(sleeper.clone());
        (orchestrator, sleeper)
    }

    #[tokio::test]
    async fn test_no_attempt_while_limit_keeps_being_extended() {
        let (orchestrator, sleeper) = limited(12, Duration::from_secs(600));
        let tracker = orchestrator.tracker().clone();
        let limited_attempts = AtomicU32::new(0);
        let limited_attempts = &limited_attempts;

        let out = orchestrator
            .execute(
                move |attempt| {
                    let tracker = tracker.clone();
                    async move {
                        if tracker.status().is_limited {
                            limited_attempts.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok::<_, ProviderFailure>(attempt)
                    }
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(out, 1);
        assert_eq!(limited_attempts.load(Ordering::SeqCst), 0);
        assert_eq!(sleeper.slept.lock().unwrap().len(), 13);
    }

    #[tokio::test]
    async fn test_wait_budget_exhaustion_fails_without_attempting() {
        let (orchestrator, sleeper) = limited(u32::MAX, Duration::from_millis(2_500));
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let err = orchestrator
            .execute(
                move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ProviderFailure>(())
                },
                None,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::RateLimited));
        assert_eq!(err.attempts(), Some(0));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1_000)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            *sleeper.slept.lock().unwrap(),
            vec![
                Duration::from_millis(1_000),
                Duration::from_millis(1_000),
                Duration::from_millis(500)
            ]
        );
    }
}
