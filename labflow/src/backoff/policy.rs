//! Backoff policy with capped exponential delays and a retry loop.

use super::classify::{Classification, ClassifyError, DEFAULT_MESSAGE_TOKENS, DEFAULT_RETRY_STATUSES};
use crate::cancellation::CancellationToken;
use crate::errors::{LabflowError, RemoteError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Jitter applied to computed backoff (never to server hints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter.
    #[default]
    None,
    /// Random from 0 to delay.
    Full,
    /// Half fixed, half random.
    Equal,
}

impl JitterStrategy {
    /// Applies jitter to a delay.
    #[must_use]
    pub fn apply(&self, delay: Duration) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match self {
            Self::None => delay,
            Self::Full => {
                if millis == 0 {
                    delay
                } else {
                    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
                }
            }
            Self::Equal => {
                let half = millis / 2;
                if half == 0 {
                    delay
                } else {
                    Duration::from_millis(half + rand::thread_rng().gen_range(0..=half))
                }
            }
        }
    }
}

/// Outcome of a backoff decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Fatal error or attempts exhausted.
    Stop,
    /// Retry after waiting.
    Wait(Duration),
}

/// Retry policy for a class of remote calls.
///
/// Wait priority: numeric `Retry-After` header, then a structured `RetryInfo`
/// payload, then `min(max_wait, base * 2^attempt)` with optional jitter.
/// Server hints are not capped by `max_wait`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Base delay for exponential backoff.
    pub base: Duration,
    /// Cap for computed backoff.
    pub max_wait: Duration,
    /// Maximum attempts, including the first one.
    pub max_attempts: u32,
    /// Jitter applied to computed backoff.
    pub jitter: JitterStrategy,
    /// HTTP statuses considered transient.
    pub retry_statuses: Vec<u16>,
    /// Message tokens considered transient (case-insensitive).
    pub message_tokens: Vec<String>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::primary()
    }
}

impl BackoffPolicy {
    /// Policy for the primary (LLM-facing) caller: 1s base, 600s cap, 50 attempts.
    #[must_use]
    pub fn primary() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_wait: Duration::from_secs(600),
            max_attempts: 50,
            jitter: JitterStrategy::None,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
            message_tokens: DEFAULT_MESSAGE_TOKENS.iter().map(|t| (*t).to_string()).collect(),
        }
    }

    /// Policy for the secondary caller with a 180s ceiling.
    #[must_use]
    pub fn secondary() -> Self {
        Self {
            max_wait: Duration::from_secs(180),
            ..Self::primary()
        }
    }

    /// Policy for VCS-hosting API calls.
    #[must_use]
    pub fn vcs() -> Self {
        Self {
            max_attempts: 5,
            ..Self::primary()
        }
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Sets the backoff cap.
    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the message tokens.
    #[must_use]
    pub fn with_message_tokens(mut self, tokens: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.message_tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// Classifies an error under this policy.
    #[must_use]
    pub fn classify<E: ClassifyError + ?Sized>(&self, err: &E) -> Classification {
        err.classify_with(self)
    }

    /// Returns true if the message contains one of the throttling tokens.
    #[must_use]
    pub fn matches_message_token(&self, message: &str) -> bool {
        let upper = message.to_uppercase();
        self.message_tokens
            .iter()
            .any(|token| upper.contains(&token.to_uppercase()))
    }

    /// Computed backoff for a zero-based retry index, capped and jittered.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self.base.checked_mul(factor).unwrap_or(self.max_wait);
        self.jitter.apply(delay.min(self.max_wait))
    }

    /// Decides what to do after the zero-based `attempt` failed with `err`.
    #[must_use]
    pub fn decide<E: ClassifyError + ?Sized>(&self, err: &E, attempt: u32) -> BackoffDecision {
        let class = self.classify(err);
        if !class.retryable || attempt.saturating_add(1) >= self.max_attempts {
            return BackoffDecision::Stop;
        }
        BackoffDecision::Wait(class.wait_hint.unwrap_or_else(|| self.backoff_delay(attempt)))
    }

    /// Sorts a remote error into the transient or fatal category.
    #[must_use]
    pub fn into_error(&self, err: RemoteError) -> LabflowError {
        if self.classify(&err).retryable {
            LabflowError::TransientNetwork(err)
        } else {
            LabflowError::FatalRemote(err)
        }
    }

    /// Runs `operation` until it succeeds, fails fatally, or attempts run out.
    ///
    /// The last error is returned unchanged.
    pub async fn retry<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyError + Display,
    {
        self.run(None, operation).await
    }

    /// Like [`retry`](Self::retry), but stops waiting when `token` is cancelled.
    ///
    /// A cancellation during a backoff wait returns the last error.
    pub async fn retry_with_cancel<T, E, F, Fut>(
        &self,
        token: &CancellationToken,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyError + Display,
    {
        self.run(Some(token), operation).await
    }

    async fn run<T, E, F, Fut>(
        &self,
        token: Option<&CancellationToken>,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyError + Display,
    {
        let mut attempt = 0u32;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match self.decide(&err, attempt) {
                BackoffDecision::Stop => return Err(err),
                BackoffDecision::Wait(delay) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Retrying after transient error"
                    );

                    match token {
                        Some(token) => {
                            if !token.sleep(delay).await {
                                return Err(err);
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                }
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy::primary()
            .with_base(Duration::from_millis(1))
            .with_max_wait(Duration::from_millis(5))
            .with_max_attempts(4)
    }

    #[test]
    fn test_presets() {
        let primary = BackoffPolicy::primary();
        assert_eq!(primary.base, Duration::from_secs(1));
        assert_eq!(primary.max_wait, Duration::from_secs(600));
        assert_eq!(primary.max_attempts, 50);

        assert_eq!(BackoffPolicy::secondary().max_wait, Duration::from_secs(180));
        assert_eq!(BackoffPolicy::vcs().max_attempts, 5);
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let policy = BackoffPolicy::primary();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(600));
        assert_eq!(policy.backoff_delay(40), Duration::from_secs(600));
    }

    #[test]
    fn test_full_jitter_bounds() {
        let policy = BackoffPolicy::primary().with_jitter(JitterStrategy::Full);
        for _ in 0..50 {
            assert!(policy.backoff_delay(2) <= Duration::from_secs(4));
        }
    }

    #[test]
    fn test_equal_jitter_bounds() {
        let delay = Duration::from_millis(1000);
        for _ in 0..50 {
            let jittered = JitterStrategy::Equal.apply(delay);
            assert!(jittered >= Duration::from_millis(500));
            assert!(jittered <= delay);
        }
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let policy = BackoffPolicy::primary();
        let err = RemoteError::status(429, "Too Many Requests").with_retry_after("5");

        assert_eq!(policy.decide(&err, 7), BackoffDecision::Wait(Duration::from_secs(5)));
    }

    #[test]
    fn test_hint_not_capped_by_max_wait() {
        let policy = BackoffPolicy::secondary();
        let err = RemoteError::status(503, "down").with_retry_after("900");

        assert_eq!(policy.decide(&err, 0), BackoffDecision::Wait(Duration::from_secs(900)));
    }

    #[test]
    fn test_decide_stops_on_fatal_and_exhaustion() {
        let policy = BackoffPolicy::primary().with_max_attempts(3);
        let transient = RemoteError::status(502, "bad gateway");

        assert_eq!(policy.decide(&RemoteError::status(400, "bad"), 0), BackoffDecision::Stop);
        assert_eq!(policy.decide(&transient, 0), BackoffDecision::Wait(Duration::from_secs(1)));
        assert_eq!(policy.decide(&transient, 1), BackoffDecision::Wait(Duration::from_secs(2)));
        assert_eq!(policy.decide(&transient, 2), BackoffDecision::Stop);
    }

    #[test]
    fn test_into_error_categories() {
        let policy = BackoffPolicy::vcs();
        assert!(matches!(
            policy.into_error(RemoteError::status(503, "x")),
            LabflowError::TransientNetwork(_)
        ));
        assert!(matches!(
            policy.into_error(RemoteError::status(404, "x")),
            LabflowError::FatalRemote(_)
        ));
    }

    #[tokio::test]
    async fn test_retry_success_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<u32, RemoteError> = fast_policy()
            .retry(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(RemoteError::status(503, "unavailable"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fatal_error_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<u32, RemoteError> = fast_policy()
            .retry(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::status(401, "Bad credentials")) }
            })
            .await;

        let err = result.err();
        assert_eq!(err.and_then(|e| e.status_code()), Some(401));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_returns_last_error_unchanged() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<u32, RemoteError> = fast_policy()
            .retry(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move { Err(RemoteError::timeout(format!("attempt {n}"))) }
            })
            .await;

        let err = result.err();
        assert_eq!(err.map(|e| e.message), Some("attempt 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retry_with_cancel_stops_waiting() {
        let policy = BackoffPolicy::primary().with_base(Duration::from_secs(30));
        let token = CancellationToken::new();
        token.cancel("shutdown");

        let result: Result<u32, RemoteError> = policy
            .retry_with_cancel(&token, || async { Err(RemoteError::status(503, "down")) })
            .await;

        assert_eq!(result.err().and_then(|e| e.status_code()), Some(503));
    }
}
