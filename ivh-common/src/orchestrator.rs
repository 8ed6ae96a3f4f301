//! Parallel fixture orchestration.
//!
//! Runs N independent fixture lifecycles concurrently, one task per
//! fixture, with no shared mutable state between them beyond the read-only
//! configuration template. A panic or quota exhaustion in one fixture
//! surfaces as that fixture's failed report, never a process-wide abort.
//! Ordering across fixtures is unspecified.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

use crate::validate::ValidationOutcome;

/// Boxed suite execution: everything a fixture lifecycle needs, packaged
/// as one future producing an isolated report.
pub type SuiteFuture = Pin<Box<dyn Future<Output = FixtureReport> + Send + 'static>>;

/// Isolated outcome of one fixture lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureReport {
    pub suite: String,
    /// Naming suffix of the fixture, when one was prepared.
    pub suffix: Option<String>,
    pub outcome: Option<ValidationOutcome>,
    /// Primary failure, when the lifecycle did not reach validation or a
    /// check failed.
    pub error: Option<String>,
    /// Secondary diagnostic: teardown problems never mask the primary
    /// result but are never silently dropped either.
    pub teardown_error: Option<String>,
    pub elapsed: Duration,
}

impl FixtureReport {
    pub fn failed(suite: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
            suffix: None,
            outcome: None,
            error: Some(error.into()),
            teardown_error: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn passed(&self) -> bool {
        self.error.is_none()
            && self
                .outcome
                .as_ref()
                .is_some_and(ValidationOutcome::passed)
    }
}

/// Aggregated result of one harness run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub reports: Vec<FixtureReport>,
}

impl RunSummary {
    pub fn passed(&self) -> bool {
        !self.reports.is_empty() && self.reports.iter().all(FixtureReport::passed)
    }

    pub fn passed_count(&self) -> usize {
        self.reports.iter().filter(|r| r.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.reports.len() - self.passed_count()
    }
}

/// Worker-per-fixture executor.
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    /// Per-fixture wall-clock bound. When exceeded mid-poll or mid-retry
    /// the in-flight operation is abandoned; the fixture's drop guard
    /// still attempts teardown on a best-effort basis.
    pub fixture_deadline: Option<Duration>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fixture_deadline(mut self, deadline: Duration) -> Self {
        self.fixture_deadline = Some(deadline);
        self
    }

    /// Run all suites concurrently and aggregate their isolated reports.
    ///
    /// Reports are returned in completion order deliberately: nothing may
    /// rely on cross-fixture ordering.
    pub async fn run_all(&self, jobs: Vec<(String, SuiteFuture)>) -> RunSummary {
        let started_at = Utc::now();
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        info!(%run_id, suites = jobs.len(), "starting parallel fixture run");

        let deadline = self.fixture_deadline;
        let mut names: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut set = JoinSet::new();
        for (name, job) in jobs {
            let task_name = name.clone();
            let handle = set.spawn(async move {
                let task_started = Instant::now();
                match deadline {
                    None => job.await,
                    Some(limit) => match tokio::time::timeout(limit, job).await {
                        Ok(report) => report,
                        // The timed-out lifecycle future was just dropped,
                        // which ran the fixture's teardown guard.
                        Err(_) => {
                            let mut report = FixtureReport::failed(
                                task_name.clone(),
                                format!("fixture deadline of {limit:?} exceeded"),
                            );
                            report.elapsed = task_started.elapsed();
                            report
                        }
                    },
                }
            });
            names.insert(handle.id(), name);
        }

        let mut reports = Vec::with_capacity(names.len());
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((_, report)) => reports.push(report),
                Err(join_err) => {
                    let suite = names
                        .get(&join_err.id())
                        .cloned()
                        .unwrap_or_else(|| "<unknown>".to_string());
                    error!(suite, error = %join_err, "fixture task did not complete");
                    reports.push(FixtureReport::failed(
                        suite,
                        format!("fixture task panicked: {join_err}"),
                    ));
                }
            }
        }

        let summary = RunSummary {
            run_id,
            started_at,
            elapsed: started.elapsed(),
            reports,
        };
        info!(
            %run_id,
            passed = summary.passed_count(),
            failed = summary.failed_count(),
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "fixture run finished"
        );
        summary
    }
}
