//! Infrastructure-as-code hygiene suites.
//!
//! Three cheap but load-bearing properties: the module plans cleanly
//! without touching Azure, a second apply is a no-op, and every documented
//! output is declared and non-empty after apply.

use std::time::Instant;

use ivh_common::orchestrator::FixtureReport;
use ivh_common::validate::ValidationOutcome;

use super::{SuiteCtx, conclude, prepare_fixture};

/// Resource type that must appear in the plan even when the VM lists are
/// empty (`for_each` over an empty set still registers the address).
const PROTECTED_VM_TYPE: &str = "azurerm_backup_protected_vm";

/// Every output the module documents.
const REQUIRED_OUTPUTS: [&str; 8] = [
    "recovery_services_vault_id",
    "recovery_services_vault_name",
    "data_protection_backup_vault_id",
    "automation_account_name",
    "action_group_id",
    "log_analytics_workspace_id",
    "standard_backup_policy_id",
    "enhanced_backup_policy_id",
];

/// Plan-only sanity: fast, no real resources, runs on every PR.
pub async fn plan(ctx: SuiteCtx) -> FixtureReport {
    const NAME: &str = "plan";

    let started = Instant::now();
    let mut fixture = match prepare_fixture(NAME, &ctx) {
        Ok(fixture) => fixture,
        Err(report) => return report,
    };

    let mut outcome = ValidationOutcome::new(NAME);
    match fixture.plan_only().await {
        Ok(summary) => {
            outcome.check_true(
                "plan produces pending changes",
                summary.pending() > 0,
                "a fresh fixture plans at least one change",
                &format!("{} pending change(s)", summary.pending()),
            );
            outcome.check_true(
                "selective disk backup planned",
                summary.contains_resource_type(PROTECTED_VM_TYPE),
                &format!("plan includes {PROTECTED_VM_TYPE} resources"),
                &format!("{} planned address(es)", summary.len()),
            );
        }
        Err(err) => {
            return conclude(NAME, fixture, Some(outcome), Some(err.to_string()), started).await;
        }
    }

    conclude(NAME, fixture, Some(outcome), None, started).await
}

/// Applying the module twice must produce zero further changes.
pub async fn idempotency(ctx: SuiteCtx) -> FixtureReport {
    const NAME: &str = "idempotency";

    let started = Instant::now();
    let mut fixture = match prepare_fixture(NAME, &ctx) {
        Ok(fixture) => fixture,
        Err(report) => return report,
    };
    if let Err(err) = fixture.provision().await {
        return conclude(NAME, fixture, None, Some(err.to_string()), started).await;
    }

    let mut outcome = ValidationOutcome::new(NAME);
    match fixture.plan_exit_code().await {
        Ok(code) => {
            outcome.check_eq("post-apply plan exit code", 0, code);
        }
        Err(err) => {
            outcome.check_true(
                "post-apply plan executes",
                false,
                "detailed plan succeeds",
                &err.to_string(),
            );
        }
    }

    conclude(NAME, fixture, Some(outcome), None, started).await
}

/// Every documented output must be present and non-empty after apply.
pub async fn outputs(ctx: SuiteCtx) -> FixtureReport {
    const NAME: &str = "outputs";

    let started = Instant::now();
    let mut fixture = match prepare_fixture(NAME, &ctx) {
        Ok(fixture) => fixture,
        Err(report) => return report,
    };
    if let Err(err) = fixture.provision().await {
        return conclude(NAME, fixture, None, Some(err.to_string()), started).await;
    }

    let mut outcome = ValidationOutcome::new(NAME);
    for name in REQUIRED_OUTPUTS {
        match fixture.output(name) {
            Ok(value) => {
                outcome.check_not_empty(&format!("output {name}"), value);
            }
            Err(err) => {
                outcome.check_true(
                    &format!("output {name}"),
                    false,
                    "declared by the module",
                    &err.to_string(),
                );
            }
        }
    }

    // Drift guard: when the module also declares the resource-group name,
    // it must agree with the caller-derived one.
    if let Some(declared) = fixture
        .outputs()
        .and_then(|outputs| outputs.get("resource_group_name"))
    {
        outcome.check_eq(
            "resource group name drift",
            fixture.context().resource_group(),
            declared,
        );
    }

    conclude(NAME, fixture, Some(outcome), None, started).await
}
