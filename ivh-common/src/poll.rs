//! Consistency polling for eventually-consistent external state.
//!
//! "Apply returned" and "the control plane reflects the new state" are two
//! different moments. [`poll_until`] bridges them: it invokes a probe at a
//! fixed interval and feeds each observed state to a terminal-state
//! predicate. The predicate distinguishes *still converging* from
//! *converged to a bad state*, so a fast-failing resource short-circuits
//! immediately instead of burning the whole budget.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Poll budget and cadence. Immutable per invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Maximum probe invocations (minimum 1).
    pub max_attempts: u32,
    /// Delay between probe invocations.
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(30),
        }
    }
}

impl PollPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Verdict of the terminal-state predicate for one observed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollDecision {
    /// Not terminal yet; consume one attempt and probe again.
    Continue,
    /// Converged to the desired state; stop and return it.
    Success,
    /// Converged to a state from which no recovery is expected; stop now.
    Fail(String),
}

/// Error returned when polling does not reach a successful terminal state.
#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    /// Budget exhausted without reaching `Success` or `Fail`.
    #[error("poll budget exhausted after {attempts} attempt(s)")]
    Timeout {
        attempts: u32,
        /// Probe error from the final attempt, when the probe itself failed.
        last_error: Option<E>,
    },

    /// The predicate reported a bad terminal state.
    #[error("terminal failure: {reason}")]
    Terminal { reason: String },
}

/// Repeatedly invoke `probe` until the predicate reaches a terminal state
/// or the attempt budget is exhausted.
///
/// A probe error consumes one attempt and polling continues; only the
/// predicate can end polling early.
pub async fn poll_until<F, Fut, S, E, P>(
    operation: &str,
    policy: &PollPolicy,
    mut probe: F,
    predicate: P,
) -> Result<S, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, E>>,
    P: Fn(&S) -> PollDecision,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts();
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        debug!(operation, attempt, max_attempts, "probing external state");

        match probe().await {
            Ok(state) => match predicate(&state) {
                PollDecision::Success => {
                    debug!(operation, attempt, "reached desired terminal state");
                    return Ok(state);
                }
                PollDecision::Fail(reason) => {
                    warn!(operation, attempt, reason, "bad terminal state, aborting poll");
                    return Err(PollError::Terminal { reason });
                }
                PollDecision::Continue => {
                    debug!(operation, attempt, "still converging");
                    last_error = None;
                }
            },
            Err(err) => {
                warn!(operation, attempt, error = %err, "probe failed, counting attempt");
                last_error = Some(err);
            }
        }

        if attempt < max_attempts {
            sleep(policy.interval).await;
        }
    }

    Err(PollError::Timeout {
        attempts: max_attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(max_attempts, Duration::from_millis(1))
    }

    /// Probe returning a scripted sequence of provisioning states.
    fn scripted_probe(
        states: &'static [&'static str],
        calls: Arc<AtomicU32>,
    ) -> impl FnMut() -> std::future::Ready<Result<String, String>> {
        move || {
            let idx = calls.fetch_add(1, Ordering::SeqCst) as usize;
            std::future::ready(Ok(states[idx.min(states.len() - 1)].to_string()))
        }
    }

    fn vault_predicate(state: &String) -> PollDecision {
        match state.as_str() {
            "Succeeded" => PollDecision::Success,
            "Failed" => PollDecision::Fail(format!("provisioning state is {state}")),
            _ => PollDecision::Continue,
        }
    }

    #[tokio::test]
    async fn test_success_after_exactly_three_probes() {
        let calls = Arc::new(AtomicU32::new(0));
        let probe = scripted_probe(&["Provisioning", "Provisioning", "Succeeded"], calls.clone());

        let state = poll_until("vault state", &fast_policy(5), probe, vault_predicate)
            .await
            .expect("should converge");

        assert_eq!(state, "Succeeded");
        assert_eq!(calls.load(Ordering::SeqCst), 3, "no probes after success");
    }

    #[tokio::test]
    async fn test_exhausted_budget_times_out() {
        let calls = Arc::new(AtomicU32::new(0));
        let probe = scripted_probe(&["Provisioning"], calls.clone());

        let result = poll_until("vault state", &fast_policy(5), probe, vault_predicate).await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        match result {
            Err(PollError::Timeout {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 5);
                assert!(last_error.is_none(), "probe itself never failed");
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_terminal_state_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let probe = scripted_probe(&["Provisioning", "Failed", "Succeeded"], calls.clone());

        let result = poll_until("vault state", &fast_policy(5), probe, vault_predicate).await;

        assert_eq!(
            calls.load(Ordering::SeqCst),
            2,
            "must stop immediately after the second probe, not exhaust the budget"
        );
        match result {
            Err(PollError::Terminal { reason }) => assert!(reason.contains("Failed")),
            other => panic!("expected Terminal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_errors_count_as_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let probe = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < 2 {
                Err(format!("GET vault: 503 on attempt {n}"))
            } else {
                Ok("Succeeded".to_string())
            })
        };

        let state = poll_until("vault state", &fast_policy(5), probe, vault_predicate)
            .await
            .expect("probe recovers before budget");
        assert_eq!(state, "Succeeded");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_all_probe_errors_surface_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let probe = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err::<String, _>(format!("boom {n}")))
        };

        match poll_until("vault state", &fast_policy(3), probe, vault_predicate).await {
            Err(PollError::Timeout {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.as_deref(), Some("boom 2"));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }
}
