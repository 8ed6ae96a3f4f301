//! Fixture lifecycle manager.
//!
//! A [`Fixture`] owns exactly one [`DeploymentContext`] from creation
//! through guaranteed teardown. The lifecycle is
//! `created → prepared → (provisioned | plan-only) → torn-down`; once a
//! context is prepared, no exit path skips teardown: the `Drop`
//! implementation destroys the topology if the owner panics or returns
//! early, so an assertion failure in suite code can never leak a vault.
//!
//! Teardown failures are logged as secondary diagnostics and surfaced via
//! [`crate::errors::HarnessError::Teardown`]; they never mask the
//! substantive result.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::BaseConfig;
use crate::engine::{DeclaredOutputs, PlanSummary, ProvisioningEngine, VarValue};
use crate::errors::{HarnessError, HarnessResult};
use crate::naming::NamingToken;
use crate::retry::{RetryError, RetryPolicy, run_with_retry};

/// Lifecycle state of one deployment context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureState {
    /// Context object exists but nothing has been derived from it.
    Created,
    /// Inputs merged and collision-free; teardown guard armed.
    Prepared,
    /// External apply succeeded; declared outputs captured.
    Provisioned,
    /// Dry-run executed; no external state was mutated.
    PlanOnly,
    /// External destroy has run (successfully or not).
    TornDown,
}

impl std::fmt::Display for FixtureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Prepared => "prepared",
            Self::Provisioned => "provisioned",
            Self::PlanOnly => "plan-only",
            Self::TornDown => "torn-down",
        };
        write!(f, "{label}")
    }
}

/// One test run's deployment context: concrete input variables, regions,
/// plan-artifact path, and retry policy.
///
/// Immutable once constructed. Owned exclusively by the [`Fixture`] that
/// created it; never shared across concurrent fixtures.
#[derive(Debug, Clone)]
pub struct DeploymentContext {
    suffix: String,
    resource_group: String,
    location: String,
    secondary_location: String,
    working_dir: PathBuf,
    plan_path: PathBuf,
    vars: BTreeMap<String, VarValue>,
    retry: RetryPolicy,
}

impl DeploymentContext {
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Caller-derived resource-group name. See [`Fixture::resource_group`]
    /// for the output-aware variant.
    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn secondary_location(&self) -> &str {
        &self.secondary_location
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn plan_path(&self) -> &Path {
        &self.plan_path
    }

    pub fn vars(&self) -> &BTreeMap<String, VarValue> {
        &self.vars
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}

/// Owns one deployment context and drives it through its lifecycle.
pub struct Fixture {
    ctx: Arc<DeploymentContext>,
    engine: Arc<dyn ProvisioningEngine>,
    state: FixtureState,
    outputs: Option<DeclaredOutputs>,
    keep: bool,
}

impl std::fmt::Debug for Fixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fixture")
            .field("ctx", &self.ctx)
            .field("engine", &"<dyn ProvisioningEngine>")
            .field("state", &self.state)
            .field("outputs", &self.outputs)
            .field("keep", &self.keep)
            .finish()
    }
}

impl Fixture {
    /// Merge the base template with a naming token into a concrete,
    /// collision-free context and arm the teardown guard.
    ///
    /// Fails only on malformed base configuration; that failure is fatal
    /// and never retried.
    pub fn prepare(
        config: &BaseConfig,
        token: NamingToken,
        engine: Arc<dyn ProvisioningEngine>,
    ) -> HarnessResult<Self> {
        config.validate()?;

        let suffix = token.as_str().to_string();
        let vars = config.input_vars(&suffix)?;
        let resource_group = match vars.get("resource_group_name") {
            Some(VarValue::String(rg)) => rg.clone(),
            _ => {
                return Err(HarnessError::Configuration(
                    "resource_group_name variable missing from template".to_string(),
                ));
            }
        };

        let ctx = DeploymentContext {
            resource_group,
            location: config.location.clone(),
            secondary_location: config.secondary_location.clone(),
            working_dir: config.module_dir.clone(),
            plan_path: config.plan_path(&suffix),
            vars,
            retry: config.retry.clone(),
            suffix,
        };

        info!(
            suffix = %ctx.suffix,
            resource_group = %ctx.resource_group,
            location = %ctx.location,
            "fixture prepared"
        );

        Ok(Self {
            ctx: Arc::new(ctx),
            engine,
            state: FixtureState::Prepared,
            outputs: None,
            keep: false,
        })
    }

    pub fn state(&self) -> FixtureState {
        self.state
    }

    pub fn context(&self) -> &DeploymentContext {
        &self.ctx
    }

    pub fn suffix(&self) -> &str {
        &self.ctx.suffix
    }

    /// Declared outputs captured by the last successful apply.
    pub fn outputs(&self) -> Option<&DeclaredOutputs> {
        self.outputs.as_ref()
    }

    /// One declared output by key; requires a provisioned fixture.
    pub fn output(&self, key: &str) -> HarnessResult<&str> {
        let outputs = self.outputs.as_ref().ok_or_else(|| {
            HarnessError::State(format!(
                "outputs requested in state {} (provision first)",
                self.state
            ))
        })?;
        Ok(outputs.require(key)?)
    }

    /// Resource-group name, preferring the engine's declared output over
    /// the caller-derived value so a module rename cannot drift silently.
    pub fn resource_group(&self) -> &str {
        self.outputs
            .as_ref()
            .and_then(|outputs| outputs.get("resource_group_name"))
            .filter(|rg| !rg.is_empty())
            .unwrap_or_else(|| self.ctx.resource_group())
    }

    /// Leave resources in place when the fixture is dropped. Used by the
    /// CLI's `--keep` flag for post-mortem inspection.
    pub fn keep_resources(&mut self) {
        self.keep = true;
    }

    pub fn is_kept(&self) -> bool {
        self.keep
    }

    /// Apply the topology through the retry engine and capture declared
    /// outputs.
    ///
    /// Allowed from `prepared` and, idempotently, from `provisioned`;
    /// whether a second apply changes anything is a property the hygiene
    /// suite verifies, not an assumption.
    pub async fn provision(&mut self) -> HarnessResult<&DeclaredOutputs> {
        if !matches!(
            self.state,
            FixtureState::Prepared | FixtureState::Provisioned
        ) {
            return Err(HarnessError::State(format!(
                "provision called in state {}",
                self.state
            )));
        }

        let policy = self.ctx.retry.clone();
        let classifier = policy.classifier();
        let engine = self.engine.clone();
        let ctx = self.ctx.clone();

        let op = move || {
            let engine = engine.clone();
            let ctx = ctx.clone();
            async move {
                run_blocking(move || -> Result<DeclaredOutputs, String> {
                    engine.init(&ctx).map_err(|err| err.to_string())?;
                    engine.apply(&ctx).map_err(|err| err.to_string())
                })
                .await
            }
        };

        let outputs = run_with_retry("provision", &policy, &classifier, op)
            .await
            .map_err(|err| match err {
                RetryError::Exhausted { attempts, last } => HarnessError::ProvisioningFailed {
                    attempts,
                    last_error: last,
                },
                RetryError::NonRetryable(last) => HarnessError::NonRetryable(last),
            })?;

        info!(
            suffix = %self.ctx.suffix,
            outputs = outputs.len(),
            "provisioning succeeded"
        );
        self.state = FixtureState::Provisioned;
        Ok(self.outputs.insert(outputs))
    }

    /// Dry-run the topology; never mutates external state.
    pub async fn plan_only(&mut self) -> HarnessResult<PlanSummary> {
        if !matches!(
            self.state,
            FixtureState::Prepared | FixtureState::Provisioned | FixtureState::PlanOnly
        ) {
            return Err(HarnessError::State(format!(
                "plan_only called in state {}",
                self.state
            )));
        }

        let engine = self.engine.clone();
        let ctx = self.ctx.clone();
        let summary = run_blocking(move || engine.plan(&ctx)).await?;

        if self.state == FixtureState::Prepared {
            self.state = FixtureState::PlanOnly;
        }
        Ok(summary)
    }

    /// Detailed plan exit code (0 = no changes, 2 = changes pending),
    /// used for the idempotency property after a successful apply.
    pub async fn plan_exit_code(&self) -> HarnessResult<i32> {
        if self.state == FixtureState::TornDown {
            return Err(HarnessError::State(
                "plan_exit_code called after teardown".to_string(),
            ));
        }
        let engine = self.engine.clone();
        let ctx = self.ctx.clone();
        Ok(run_blocking(move || engine.plan_exit_code(&ctx)).await?)
    }

    /// Destroy the topology. Runs at most once; the drop guard observes
    /// the state transition and will not destroy again.
    pub async fn teardown(&mut self) -> HarnessResult<()> {
        if self.state == FixtureState::TornDown {
            return Err(HarnessError::State("teardown already ran".to_string()));
        }

        // Transition before the destroy call so that a panic inside it
        // cannot trigger a second destroy from the drop guard.
        self.state = FixtureState::TornDown;

        let engine = self.engine.clone();
        let ctx = self.ctx.clone();
        match run_blocking(move || engine.destroy(&ctx)).await {
            Ok(_) => {
                info!(suffix = %self.ctx.suffix, "teardown completed");
                Ok(())
            }
            Err(err) => {
                error!(
                    suffix = %self.ctx.suffix,
                    error = %err,
                    "teardown failed; resources may require manual cleanup"
                );
                Err(HarnessError::Teardown(err.to_string()))
            }
        }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        if matches!(self.state, FixtureState::Created | FixtureState::TornDown) {
            return;
        }
        if self.keep {
            warn!(
                suffix = %self.ctx.suffix,
                resource_group = %self.ctx.resource_group,
                "keeping resources on request; destroy manually when done"
            );
            return;
        }

        // Reached on panic or early return. Destroy synchronously on the
        // current thread; blocking here is acceptable because reclaiming
        // resources outranks everything else on this code path.
        warn!(
            suffix = %self.ctx.suffix,
            state = %self.state,
            "fixture dropped without explicit teardown, destroying"
        );
        self.state = FixtureState::TornDown;
        match self.engine.destroy(&self.ctx) {
            Ok(_) => info!(suffix = %self.ctx.suffix, "teardown completed"),
            Err(err) => error!(
                suffix = %self.ctx.suffix,
                error = %err,
                "teardown failed; resources may require manual cleanup"
            ),
        }
    }
}

/// Lift a blocking engine call onto the async runtime. A panic inside the
/// engine resumes on the calling task so the fixture's drop guard still
/// observes it.
async fn run_blocking<T, F>(task: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(value) => value,
        Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
        Err(join) => panic!("blocking engine task cancelled: {join}"),
    }
}

#[cfg(test)]
pub(crate) fn test_context(suffix: &str) -> DeploymentContext {
    DeploymentContext {
        suffix: suffix.to_string(),
        resource_group: format!("rg-minitrue-test-{suffix}"),
        location: "eastus".to_string(),
        secondary_location: "westus".to_string(),
        working_dir: PathBuf::from("."),
        plan_path: std::env::temp_dir().join(format!("tfplan-{suffix}")),
        vars: BTreeMap::new(),
        retry: RetryPolicy::default(),
    }
}
