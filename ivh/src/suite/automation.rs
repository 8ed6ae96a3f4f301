//! Restore automation suite.
//!
//! The module ships an Automation account whose runbooks drive restore
//! testing. This suite verifies the account exists under its fixed name
//! with a system-assigned identity, that every restore runbook is
//! published as PowerShell, and that the identity holds the Backup
//! Contributor role on the vault scope.

use std::time::Instant;

use ivh_azure::models::{AutomationAccount, RoleAssignment, Runbook};
use ivh_common::orchestrator::FixtureReport;
use ivh_common::validate::ValidationOutcome;

use super::{SuiteCtx, conclude, prepare_fixture};

const NAME: &str = "automation";

/// Fixed account name the module creates.
const EXPECTED_ACCOUNT: &str = "aa-minitrue-backup-restore";

/// Restore runbooks that must be published.
const EXPECTED_RUNBOOKS: [&str; 3] = [
    "Invoke-FullVMRestore",
    "Invoke-DiskRestore",
    "Invoke-FileLevelRecovery",
];

/// Built-in Backup Contributor role definition GUID. Role-definition IDs
/// vary by rendering, so matching falls back to this suffix.
const BACKUP_CONTRIBUTOR_GUID: &str = "5e467623-bb1f-42f4-a55d-6e525e11384b";

pub async fn run(ctx: SuiteCtx) -> FixtureReport {
    let started = Instant::now();
    let mut fixture = match prepare_fixture(NAME, &ctx) {
        Ok(fixture) => fixture,
        Err(report) => return report,
    };
    if let Err(err) = fixture.provision().await {
        return conclude(NAME, fixture, None, Some(err.to_string()), started).await;
    }

    let mut outcome = ValidationOutcome::new(NAME);

    let account_name = match fixture.output("automation_account_name") {
        Ok(name) => {
            outcome.check_eq("automation account name", EXPECTED_ACCOUNT, name);
            Some(name.to_string())
        }
        Err(err) => {
            outcome.check_true(
                "automation_account_name output",
                false,
                "declared by the module",
                &err.to_string(),
            );
            None
        }
    };

    if let Some(account_name) = account_name {
        match ctx.arm() {
            Ok(arm) => {
                let resource_group = fixture.resource_group();

                let principal_id = match arm
                    .automation_account(resource_group, &account_name)
                    .await
                {
                    Ok(account) => check_identity(&mut outcome, &account),
                    Err(err) => {
                        outcome.check_true(
                            "automation account reachable via ARM",
                            false,
                            "GET succeeds",
                            &err.to_string(),
                        );
                        None
                    }
                };

                for runbook_name in EXPECTED_RUNBOOKS {
                    match arm
                        .runbook(resource_group, &account_name, runbook_name)
                        .await
                    {
                        Ok(runbook) => check_runbook(&mut outcome, runbook_name, &runbook),
                        Err(err) => {
                            outcome.check_true(
                                &format!("runbook {runbook_name} exists"),
                                false,
                                "GET succeeds",
                                &err.to_string(),
                            );
                        }
                    }
                }

                if let (Some(principal_id), Ok(vault_id)) =
                    (principal_id, fixture.output("recovery_services_vault_id"))
                {
                    match arm.role_assignments_for_scope(vault_id).await {
                        Ok(assignments) => {
                            check_backup_contributor(&mut outcome, &assignments, &principal_id);
                        }
                        Err(err) => {
                            outcome.check_true(
                                "role assignments listable on vault scope",
                                false,
                                "list succeeds",
                                &err.to_string(),
                            );
                        }
                    }
                }
            }
            Err(err) => {
                outcome.check_true(
                    "azure credentials available",
                    false,
                    "credential provider initialized",
                    &err.to_string(),
                );
            }
        }
    }

    conclude(NAME, fixture, Some(outcome), None, started).await
}

/// The account needs a system-assigned identity for its restore runbooks.
/// Returns the principal ID for the RBAC check.
pub(crate) fn check_identity(
    outcome: &mut ValidationOutcome,
    account: &AutomationAccount,
) -> Option<String> {
    let identity = outcome.field("automation account identity", account.identity.as_ref())?;
    if let Some(identity_type) = outcome.field(
        "automation account identity.type",
        identity.identity_type.as_ref(),
    ) {
        outcome.check_eq(
            "automation account identity type",
            "SystemAssigned",
            identity_type.as_str(),
        );
    }
    outcome
        .field(
            "automation account identity.principalId",
            identity.principal_id.as_ref(),
        )
        .cloned()
}

/// Each restore runbook must be a published PowerShell runbook.
pub(crate) fn check_runbook(outcome: &mut ValidationOutcome, name: &str, runbook: &Runbook) {
    let Some(props) = outcome.field(&format!("runbook {name} properties"), runbook.properties.as_ref())
    else {
        return;
    };
    if let Some(runbook_type) =
        outcome.field(&format!("runbook {name} runbookType"), props.runbook_type.as_ref())
    {
        outcome.check_eq(
            &format!("runbook {name} type"),
            "PowerShell",
            runbook_type.as_str(),
        );
    }
    if let Some(state) = outcome.field(&format!("runbook {name} state"), props.state.as_ref()) {
        outcome.check_eq(&format!("runbook {name} state"), "Published", state.as_str());
    }
}

/// The account's principal must hold Backup Contributor on the vault.
pub(crate) fn check_backup_contributor(
    outcome: &mut ValidationOutcome,
    assignments: &[RoleAssignment],
    principal_id: &str,
) {
    let held = assignments
        .iter()
        .filter_map(|assignment| assignment.properties.as_ref())
        .filter(|props| props.principal_id.as_deref() == Some(principal_id))
        .filter_map(|props| props.role_definition_id.as_deref())
        .any(|role| {
            role.contains("Backup Contributor") || role.ends_with(BACKUP_CONTRIBUTOR_GUID)
        });

    outcome.check_true(
        "backup contributor role on vault scope",
        held,
        &format!("principal {principal_id} holds {BACKUP_CONTRIBUTOR_GUID}"),
        &format!("{} assignment(s) on scope", assignments.len()),
    );
}
