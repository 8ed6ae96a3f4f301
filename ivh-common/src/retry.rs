//! Bounded retry with error-signature classification.
//!
//! Provisioning errors arrive as opaque provider text. A [`RetryPolicy`]
//! carries an ordered table of [`RetrySignature`]s; when a failure matches
//! any signature it is treated as transient and retried after a delay, up
//! to the attempt budget. Anything else fails on the first attempt.
//!
//! Classification is pluggable through [`ErrorClassifier`]; the substring
//! table is one implementation, so the engine's contract does not depend on
//! specific provider error-text formats.

use std::future::Future;
use std::time::Duration;

use memchr::memmem;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// One (error-signature, rationale) pair.
///
/// The pattern is matched as a case-sensitive substring of the error text;
/// the rationale is what gets logged when the match triggers a retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySignature {
    pub pattern: String,
    pub rationale: String,
}

impl RetrySignature {
    pub fn new(pattern: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            rationale: rationale.into(),
        }
    }
}

/// Inter-attempt delay growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay between every attempt (the default).
    Fixed,
    /// Delay doubles per attempt, capped at `max_delay`.
    Exponential,
}

/// Retry policy: signature table plus attempt budget and delay schedule.
///
/// Immutable; constructed once per deployment context and reused by every
/// retry-wrapped operation in that context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Ordered transient-error signatures.
    pub signatures: Vec<RetrySignature>,
    /// Maximum attempts including the first try (minimum 1).
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub delay: Duration,
    /// Cap for exponential growth.
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            signatures: Vec::new(),
            max_attempts: 3,
            delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(120),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Policy with no retryable signatures: everything fails fast.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_signature(
        mut self,
        pattern: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        self.signatures.push(RetrySignature::new(pattern, rationale));
        self
    }

    /// Delay before the attempt following `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1).min(16));
                self.delay
                    .saturating_mul(multiplier)
                    .min(self.max_delay)
            }
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// The substring classifier for this policy's signature table.
    #[must_use]
    pub fn classifier(&self) -> SignatureClassifier {
        SignatureClassifier::new(self.signatures.clone())
    }
}

/// Outcome of classifying one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Expected to resolve itself if retried after a delay.
    Transient { rationale: String },
    /// Not worth retrying.
    Fatal,
}

/// Pluggable failure classifier.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, message: &str) -> Classification;
}

/// Substring-table classifier.
///
/// Matching is existential: any signature triggers a retry. Order matters
/// only in that the first matching signature supplies the logged rationale.
#[derive(Debug, Clone)]
pub struct SignatureClassifier {
    signatures: Vec<RetrySignature>,
}

impl SignatureClassifier {
    pub fn new(signatures: Vec<RetrySignature>) -> Self {
        Self { signatures }
    }
}

impl ErrorClassifier for SignatureClassifier {
    fn classify(&self, message: &str) -> Classification {
        for sig in &self.signatures {
            if memmem::find(message.as_bytes(), sig.pattern.as_bytes()).is_some() {
                return Classification::Transient {
                    rationale: sig.rationale.clone(),
                };
            }
        }
        Classification::Fatal
    }
}

/// Error returned when a retried operation does not succeed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The error matched no signature; zero retries were performed beyond
    /// the failing attempt.
    #[error("non-retryable error: {0}")]
    NonRetryable(E),

    /// Every attempt failed with a transient error.
    #[error("retry budget exhausted after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// The underlying error from the final attempt.
    pub fn into_last(self) -> E {
        match self {
            Self::NonRetryable(e) | Self::Exhausted { last: e, .. } => e,
        }
    }
}

/// Run `op` under the policy's attempt budget.
///
/// Attempts are strictly serial for one call site; independent call sites
/// proceed concurrently under the orchestrator.
pub async fn run_with_retry<F, Fut, T, E>(
    operation: &str,
    policy: &RetryPolicy,
    classifier: &dyn ErrorClassifier,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        debug!(operation, attempt, max_attempts, "starting attempt");

        match op().await {
            Ok(value) => {
                info!(operation, attempt, "attempt succeeded");
                return Ok(value);
            }
            Err(err) => match classifier.classify(&err.to_string()) {
                Classification::Transient { rationale } if attempt < max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        rationale,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "transient failure, retrying after delay"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Classification::Transient { rationale } => {
                    warn!(operation, attempt, rationale, error = %err, "retry budget exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                Classification::Fatal => {
                    warn!(operation, attempt, error = %err, "non-retryable failure");
                    return Err(RetryError::NonRetryable(err));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        }
        .with_signature("AuthorizationFailed", "waiting for RBAC propagation")
        .with_signature("ResourceGroupNotFound", "resource group not yet visible")
    }

    #[tokio::test]
    async fn test_matching_error_retries_until_budget_then_exhausts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let policy = fast_policy(5);

        let result: Result<(), _> =
            run_with_retry("apply", &policy, &policy.classifier(), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("Error: AuthorizationFailed on scope /subscriptions/x".to_string())
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 5);
                assert!(last.contains("AuthorizationFailed"));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_matching_error_fails_on_first_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let policy = fast_policy(5);

        let result: Result<(), _> =
            run_with_retry("apply", &policy, &policy.classifier(), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("Error: InvalidTemplate: unknown variable".to_string())
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1, "zero retries performed");
        assert!(matches!(result, Err(RetryError::NonRetryable(_))));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let policy = fast_policy(5);

        let result = run_with_retry("apply", &policy, &policy.classifier(), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("ResourceGroupNotFound: rg-minitrue-test-ab12cd".to_string())
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_first_matching_signature_supplies_rationale() {
        let classifier = SignatureClassifier::new(vec![
            RetrySignature::new("NotFound", "first"),
            RetrySignature::new("ResourceGroupNotFound", "second"),
        ]);
        match classifier.classify("ResourceGroupNotFound") {
            Classification::Transient { rationale } => assert_eq!(rationale, "first"),
            Classification::Fatal => panic!("should match"),
        }
    }

    #[test]
    fn test_empty_table_classifies_everything_fatal() {
        let classifier = SignatureClassifier::new(Vec::new());
        assert_eq!(classifier.classify("anything"), Classification::Fatal);
    }

    #[test]
    fn test_fixed_delay_is_constant() {
        let policy = RetryPolicy {
            delay: Duration::from_secs(30),
            backoff: Backoff::Fixed,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(4), Duration::from_secs(30));
    }

    #[test]
    fn test_exponential_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Exponential,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for(3), Duration::from_secs(30));
        assert_eq!(policy.delay_for(8), Duration::from_secs(30));
    }

    #[test]
    fn test_max_attempts_minimum_is_one() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.max_attempts(), 1);
    }
}
