//! Suite registry and shared fixture plumbing.
//!
//! Each suite is one isolated provision-validate-teardown cycle against
//! its own deployment context. Suites share nothing mutable; the common
//! code here is the bookkeeping every suite repeats: prepare, conclude
//! with guaranteed teardown, and turning query errors into failed checks
//! instead of aborts.

pub mod automation;
pub mod hygiene;
pub mod monitoring;
pub mod policies;
pub mod snapshots;
pub mod vault;

use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use tracing::warn;

use ivh_azure::ArmClient;
use ivh_common::engine::{ProvisioningEngine, VarValue};
use ivh_common::errors::HarnessError;
use ivh_common::fixture::Fixture;
use ivh_common::naming::NamingToken;
use ivh_common::orchestrator::{FixtureReport, SuiteFuture};
use ivh_common::validate::ValidationOutcome;
use ivh_common::BaseConfig;

/// Everything a suite needs. Cheap to clone per spawned fixture.
#[derive(Clone)]
pub struct SuiteCtx {
    pub config: Arc<BaseConfig>,
    pub engine: Arc<dyn ProvisioningEngine>,
    /// Absent for plan-only invocations, which need no credentials.
    pub arm: Option<Arc<ArmClient>>,
    pub keep: bool,
}

impl SuiteCtx {
    /// The ARM client, or a descriptive failure for suites that cannot run
    /// without one.
    pub fn arm(&self) -> Result<&ArmClient, HarnessError> {
        self.arm.as_deref().ok_or_else(|| {
            HarnessError::Credential("this suite requires Azure credentials".to_string())
        })
    }
}

/// One registered suite.
#[derive(Debug, Clone, Copy)]
pub struct SuiteDef {
    pub name: &'static str,
    pub description: &'static str,
}

/// All suites, in the order `ivh list` prints them.
pub const REGISTRY: &[SuiteDef] = &[
    SuiteDef {
        name: "plan",
        description: "plan-only sanity check, no resources created",
    },
    SuiteDef {
        name: "vault",
        description: "Recovery Services vault configuration (soft delete, CRR, redundancy)",
    },
    SuiteDef {
        name: "policies",
        description: "standard and enhanced VM backup policy retention and scheduling",
    },
    SuiteDef {
        name: "snapshots",
        description: "disk snapshot vault and 7-day retention policy",
    },
    SuiteDef {
        name: "automation",
        description: "restore automation account, runbooks, and RBAC",
    },
    SuiteDef {
        name: "monitoring",
        description: "backup alert action group and Log Analytics workspace",
    },
    SuiteDef {
        name: "idempotency",
        description: "second apply produces zero changes",
    },
    SuiteDef {
        name: "outputs",
        description: "every documented declared output is present and non-empty",
    },
    SuiteDef {
        name: "convergence",
        description: "vault provisioning state converges to Succeeded",
    },
];

/// Resolve requested suite names, defaulting to the full registry.
pub fn select(requested: &[String]) -> anyhow::Result<Vec<SuiteDef>> {
    if requested.is_empty() {
        return Ok(REGISTRY.to_vec());
    }
    let mut selected = Vec::with_capacity(requested.len());
    for name in requested {
        match REGISTRY.iter().find(|def| def.name == name) {
            Some(def) => selected.push(*def),
            None => bail!(
                "unknown suite {name:?}; run `ivh list` for the registered set"
            ),
        }
    }
    Ok(selected)
}

/// Boxed future for one suite, ready for the orchestrator.
pub fn future(name: &str, ctx: SuiteCtx) -> SuiteFuture {
    match name {
        "plan" => Box::pin(hygiene::plan(ctx)),
        "vault" => Box::pin(vault::run(ctx)),
        "policies" => Box::pin(policies::run(ctx)),
        "snapshots" => Box::pin(snapshots::run(ctx)),
        "automation" => Box::pin(automation::run(ctx)),
        "monitoring" => Box::pin(monitoring::run(ctx)),
        "idempotency" => Box::pin(hygiene::idempotency(ctx)),
        "outputs" => Box::pin(hygiene::outputs(ctx)),
        "convergence" => Box::pin(vault::convergence(ctx)),
        other => {
            let suite = other.to_string();
            Box::pin(async move {
                FixtureReport::failed(suite.clone(), format!("unknown suite {suite:?}"))
            })
        }
    }
}

// ── Shared plumbing ────────────────────────────────────────────────────────

/// Prepare a fixture for one suite, honoring `--keep`.
pub(crate) fn prepare_fixture(name: &str, ctx: &SuiteCtx) -> Result<Fixture, FixtureReport> {
    match Fixture::prepare(&ctx.config, NamingToken::generate(), ctx.engine.clone()) {
        Ok(mut fixture) => {
            if ctx.keep {
                fixture.keep_resources();
            }
            Ok(fixture)
        }
        Err(err) => Err(FixtureReport::failed(
            name,
            format!("prepare failed: {err}"),
        )),
    }
}

/// Finish a suite: fold the outcome into the verdict, tear the fixture
/// down, and attach any teardown problem as a secondary diagnostic.
pub(crate) async fn conclude(
    name: &str,
    mut fixture: Fixture,
    outcome: Option<ValidationOutcome>,
    error: Option<String>,
    started: Instant,
) -> FixtureReport {
    let suffix = fixture.suffix().to_string();

    // `--keep` is recorded on the fixture itself; an explicit teardown
    // would override it, so skip the call and let the disarmed drop guard
    // log the kept resources.
    let teardown_error = if fixture.is_kept() {
        None
    } else {
        match fixture.teardown().await {
            Ok(()) => None,
            Err(err) => {
                warn!(suite = name, error = %err, "teardown reported a problem");
                Some(err.to_string())
            }
        }
    };

    let error = error.or_else(|| {
        outcome
            .as_ref()
            .and_then(ValidationOutcome::error)
            .map(|err| err.to_string())
    });

    FixtureReport {
        suite: name.to_string(),
        suffix: Some(suffix),
        outcome,
        error,
        teardown_error,
        elapsed: started.elapsed(),
    }
}

/// A context input variable that must be a string (e.g. the snapshot
/// resource-group name).
pub(crate) fn string_var(fixture: &Fixture, key: &str) -> Option<String> {
    match fixture.context().vars().get(key) {
        Some(VarValue::String(value)) => Some(value.clone()),
        _ => None,
    }
}

/// Last `/`-separated segment of an ARM resource ID.
pub(crate) fn last_id_segment(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_defaults_to_full_registry() {
        let selected = select(&[]).expect("default selection");
        assert_eq!(selected.len(), REGISTRY.len());
    }

    #[test]
    fn test_select_rejects_unknown_suite() {
        let err = select(&["vautl".to_string()]).unwrap_err();
        assert!(err.to_string().contains("vautl"));
    }

    #[test]
    fn test_select_preserves_request_order() {
        let selected =
            select(&["policies".to_string(), "vault".to_string()]).expect("selection");
        let names: Vec<_> = selected.iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["policies", "vault"]);
    }

    #[test]
    fn test_registry_names_are_unique() {
        let mut names: Vec<_> = REGISTRY.iter().map(|d| d.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), REGISTRY.len());
    }

    #[test]
    fn test_last_id_segment() {
        assert_eq!(
            last_id_segment("/subscriptions/x/providers/Microsoft.DataProtection/backupVaults/dpv-1"),
            "dpv-1"
        );
        assert_eq!(last_id_segment("bare-name"), "bare-name");
    }
}
