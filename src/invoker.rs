//! Retry-with-rotation wrapper around a single LLM call.
//!
//! Every analysis goes through [`ResilientInvoker::invoke`]. The caller
//! supplies a factory that binds a fresh [`UnitOfWork`] to one API key; the
//! invoker owns the coupling between provider failures and the key pool.
//!
//! # Retry Strategy
//!
//! - Rate-limit or authentication failure (HTTP 429, "rate limit", HTTP 401)
//!   → rotate to the next key, pause, retry
//! - Any other failure → propagate immediately, key untouched
//! - `max_retries` rate-limit/auth failures in a row →
//!   [`LlmError::ExhaustedRetries`]

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::LlmError;
use crate::keys::KeyRotator;
use crate::llm::ApiError;

/// One LLM invocation bound to a single API key.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Run the query and return the model's raw text answer.
    async fn invoke(&self, query: &str) -> Result<String>;
}

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The key was rate limited or rejected; another key may succeed.
    RateLimitOrAuth,
    /// Anything else. Retrying with another key would not help.
    Fatal,
}

/// Decides whether a failure is worth a key rotation.
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, err: &anyhow::Error) -> FailureKind;
}

/// Default classifier.
///
/// Typed [`ApiError`]s are classified by status code. Everything else is
/// matched case-insensitively against the full error chain text, so errors
/// from other clients that only carry the status in their message are still
/// recognised.
pub struct StatusClassifier {
    markers: Vec<String>,
}

impl Default for StatusClassifier {
    fn default() -> Self {
        Self {
            markers: vec!["429".into(), "rate limit".into(), "401".into()],
        }
    }
}

impl FailureClassifier for StatusClassifier {
    fn classify(&self, err: &anyhow::Error) -> FailureKind {
        if let Some(api) = err.downcast_ref::<ApiError>() {
            if matches!(api.status, 401 | 429) {
                return FailureKind::RateLimitOrAuth;
            }
        }
        let text = format!("{:#}", err).to_lowercase();
        if self.markers.iter().any(|m| text.contains(m.as_str())) {
            FailureKind::RateLimitOrAuth
        } else {
            FailureKind::Fatal
        }
    }
}

/// Runs units of work with key rotation on rate-limit/auth failures.
#[derive(Clone)]
pub struct ResilientInvoker {
    keys: Arc<KeyRotator>,
    max_retries: u32,
    pause: Duration,
    classifier: Arc<dyn FailureClassifier>,
}

impl ResilientInvoker {
    pub fn new(keys: Arc<KeyRotator>, max_retries: u32, pause: Duration) -> Self {
        Self {
            keys,
            max_retries,
            pause,
            classifier: Arc::new(StatusClassifier::default()),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn keys(&self) -> &Arc<KeyRotator> {
        &self.keys
    }

    /// Run `query` through units built by `build`, retrying with the next
    /// key whenever an attempt is rate limited or rejected.
    pub async fn invoke<F, U>(&self, build: F, query: &str) -> Result<String, LlmError>
    where
        F: Fn(&str) -> U,
        U: UnitOfWork,
    {
        let mut attempts = 0;

        while attempts < self.max_retries {
            let key = self.keys.current()?;
            let unit = build(&key);

            let err = match unit.invoke(query).await {
                Ok(answer) => return Ok(answer),
                Err(e) => e,
            };

            match self.classifier.classify(&err) {
                FailureKind::RateLimitOrAuth => {
                    tracing::warn!(
                        attempt = attempts + 1,
                        max = self.max_retries,
                        error = %format!("{:#}", err),
                        "LLM call rate limited or unauthorized, rotating key"
                    );
                    self.keys.rotate();
                    attempts += 1;
                    if attempts < self.max_retries && !self.pause.is_zero() {
                        tokio::time::sleep(self.pause).await;
                    }
                }
                FailureKind::Fatal => return Err(LlmError::Failed(err)),
            }
        }

        Err(LlmError::ExhaustedRetries { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with `message` until `succeed_on` attempts have been made.
    struct Scripted {
        key: String,
        calls: Arc<AtomicU32>,
        seen: Arc<Mutex<Vec<String>>>,
        succeed_on: Option<u32>,
        message: &'static str,
    }

    #[async_trait]
    impl UnitOfWork for Scripted {
        async fn invoke(&self, query: &str) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen.lock().push(self.key.clone());
            match self.succeed_on {
                Some(k) if n >= k => Ok(format!("answer to {}", query)),
                _ => Err(anyhow::anyhow!("{}", self.message)),
            }
        }
    }

    struct Harness {
        calls: Arc<AtomicU32>,
        seen: Arc<Mutex<Vec<String>>>,
        keys: Arc<KeyRotator>,
        invoker: ResilientInvoker,
    }

    fn harness(pool: usize, max_retries: u32) -> Harness {
        harness_with_pause(pool, max_retries, Duration::ZERO)
    }

    fn harness_with_pause(pool: usize, max_retries: u32, pause: Duration) -> Harness {
        let keys: Vec<String> = (0..pool).map(|i| format!("k{}", i)).collect();
        let keys = Arc::new(KeyRotator::with_start(keys, "KEYS", 0));
        Harness {
            calls: Arc::new(AtomicU32::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
            invoker: ResilientInvoker::new(keys.clone(), max_retries, pause),
            keys,
        }
    }

    impl Harness {
        async fn run(&self, succeed_on: Option<u32>, message: &'static str) -> Result<String, LlmError> {
            let calls = self.calls.clone();
            let seen = self.seen.clone();
            self.invoker
                .invoke(
                    move |key| Scripted {
                        key: key.to_string(),
                        calls: calls.clone(),
                        seen: seen.clone(),
                        succeed_on,
                        message,
                    },
                    "q",
                )
                .await
        }
    }

    #[tokio::test]
    async fn test_success_first_attempt_no_rotation() {
        let h = harness(3, 3);
        let answer = h.run(Some(1), "unused").await.unwrap();
        assert_eq!(answer, "answer to q");
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.keys.index(), 0);
    }

    #[tokio::test]
    async fn test_always_rate_limited_exhausts_retries() {
        let h = harness(2, 3);
        let err = h.run(None, "Error code: 429 - Too Many Requests").await.unwrap_err();
        assert!(matches!(err, LlmError::ExhaustedRetries { attempts: 3 }));
        assert!(err.to_string().contains("exhausted"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
        // Three rotations on a pool of two: 0 -> 1 -> 0 -> 1
        assert_eq!(h.keys.index(), 1);
    }

    #[tokio::test]
    async fn test_success_on_kth_attempt_rotates_k_minus_one_times() {
        for k in 1..=4u32 {
            let h = harness(5, 4);
            h.run(Some(k), "Rate limit reached for model").await.unwrap();
            assert_eq!(h.calls.load(Ordering::SeqCst), k);
            assert_eq!(h.keys.index(), (k - 1) as usize);
            let expected: Vec<String> = (0..k).map(|i| format!("k{}", i)).collect();
            assert_eq!(*h.seen.lock(), expected, "each attempt uses a fresh key");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pauses_between_attempts_but_not_after_last() {
        let h = harness_with_pause(2, 2, Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        let err = h.run(None, "429 Too Many Requests").await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, LlmError::ExhaustedRetries { attempts: 2 }));
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        // One pause between the two attempts, none after the final one.
        assert!(elapsed >= Duration::from_secs(1), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_pause() {
        let h = harness_with_pause(3, 3, Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        h.run(Some(3), "rate limit reached").await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(3), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_does_not_pause() {
        let h = harness_with_pause(2, 3, Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        h.run(None, "model not found").await.unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unauthorized_is_retried() {
        let h = harness(2, 3);
        h.run(Some(2), "HTTP 401 Unauthorized: invalid api key").await.unwrap();
        assert_eq!(h.keys.index(), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_propagates_without_rotation() {
        let h = harness(3, 3);
        let err = h.run(None, "connection reset by peer").await.unwrap_err();
        assert!(matches!(err, LlmError::Failed(_)));
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.keys.index(), 0);
    }

    #[tokio::test]
    async fn test_empty_pool_is_configuration_error() {
        let keys = Arc::new(KeyRotator::new(Vec::new(), "GROQ_API_KEYS"));
        let invoker = ResilientInvoker::new(keys, 3, Duration::ZERO);
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let err = invoker
            .invoke(
                |key| Scripted {
                    key: key.to_string(),
                    calls: calls.clone(),
                    seen: seen.clone(),
                    succeed_on: Some(1),
                    message: "",
                },
                "q",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Configuration { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_classifier_matches_typed_status() {
        let classifier = StatusClassifier::default();
        let limited = anyhow::Error::new(ApiError {
            status: 429,
            body: String::new(),
        });
        let server = anyhow::Error::new(ApiError {
            status: 500,
            body: "oops".into(),
        });
        assert_eq!(classifier.classify(&limited), FailureKind::RateLimitOrAuth);
        assert_eq!(classifier.classify(&server), FailureKind::Fatal);
    }

    #[test]
    fn test_classifier_is_case_insensitive_on_context_chain() {
        let classifier = StatusClassifier::default();
        let err = anyhow::anyhow!("RATE LIMIT exceeded").context("analysis failed");
        assert_eq!(classifier.classify(&err), FailureKind::RateLimitOrAuth);
        let err = anyhow::anyhow!("model not found");
        assert_eq!(classifier.classify(&err), FailureKind::Fatal);
    }

    #[tokio::test]
    async fn test_custom_classifier_is_used() {
        struct NeverRetry;
        impl FailureClassifier for NeverRetry {
            fn classify(&self, _err: &anyhow::Error) -> FailureKind {
                FailureKind::Fatal
            }
        }
        let mut h = harness(2, 3);
        h.invoker = h.invoker.clone().with_classifier(Arc::new(NeverRetry));
        let err = h.run(None, "429").await.unwrap_err();
        assert!(matches!(err, LlmError::Failed(_)));
        assert_eq!(h.keys.index(), 0);
    }
}
