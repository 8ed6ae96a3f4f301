//! Disk snapshot vault suite.
//!
//! Verifies the Data Protection backup vault used for managed-disk
//! snapshots: correct resource type, geo-redundant storage, and a policy
//! whose retention lifecycle deletes after seven days.

use std::time::Instant;

use ivh_azure::models::{DataProtectionPolicy, DataProtectionVault};
use ivh_common::orchestrator::FixtureReport;
use ivh_common::validate::ValidationOutcome;

use super::{SuiteCtx, conclude, last_id_segment, prepare_fixture, string_var};

const NAME: &str = "snapshots";

const DP_VAULT_ID_TYPE: &str = "Microsoft.DataProtection/backupVaults";
/// Snapshot policy shipped by the module.
const SNAPSHOT_POLICY: &str = "diskpol-minitrue-daily-7d";
/// ISO-8601 retention the policy must carry.
const SNAPSHOT_RETENTION: &str = "P7D";

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

    let vault_id = match fixture.output("data_protection_backup_vault_id") {
        Ok(id) => {
            outcome.check_not_empty("data_protection_backup_vault_id output", id);
            outcome.check_contains("snapshot vault id resource type", id, DP_VAULT_ID_TYPE);
            Some(id.to_string())
        }
        Err(err) => {
            outcome.check_true(
                "data_protection_backup_vault_id output",
                false,
                "declared by the module",
                &err.to_string(),
            );
            None
        }
    };

    let snapshot_rg = string_var(&fixture, "snapshot_resource_group_name");
    if snapshot_rg.is_none() {
        outcome.check_true(
            "snapshot_resource_group_name variable",
            false,
            "present in the deployment context",
            "absent",
        );
    }

    if let (Some(vault_id), Some(snapshot_rg)) = (vault_id, snapshot_rg) {
        let vault_name = last_id_segment(&vault_id).to_string();
        match ctx.arm() {
            Ok(arm) => {
                match arm.data_protection_vault(&snapshot_rg, &vault_name).await {
                    Ok(vault) => check_snapshot_vault(&mut outcome, &vault),
                    Err(err) => {
                        outcome.check_true(
                            "snapshot vault reachable via ARM",
                            false,
                            "GET succeeds",
                            &err.to_string(),
                        );
                    }
                }
                match arm
                    .data_protection_policy(&snapshot_rg, &vault_name, SNAPSHOT_POLICY)
                    .await
                {
                    Ok(policy) => check_snapshot_policy(&mut outcome, &policy),
                    Err(err) => {
                        outcome.check_true(
                            "snapshot policy reachable via ARM",
                            false,
                            "GET succeeds",
                            &err.to_string(),
                        );
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

/// The snapshot vault must store geo-redundantly.
pub(crate) fn check_snapshot_vault(outcome: &mut ValidationOutcome, vault: &DataProtectionVault) {
    let Some(props) = outcome.field("snapshot vault properties", vault.properties.as_ref())
    else {
        return;
    };
    let Some(setting) = outcome.field(
        "snapshot vault storageSettings[0]",
        props.storage_settings.first(),
    ) else {
        return;
    };
    if let Some(redundancy) = outcome.field(
        "snapshot vault storageSettings[0].type",
        setting.redundancy.as_ref(),
    ) {
        outcome.check_eq(
            "snapshot vault storage redundancy",
            "GeoRedundant",
            redundancy.as_str(),
        );
    }
}

/// At least one retention rule must delete after [`SNAPSHOT_RETENTION`].
pub(crate) fn check_snapshot_policy(outcome: &mut ValidationOutcome, policy: &DataProtectionPolicy) {
    let Some(props) = outcome.field("snapshot policy properties", policy.properties.as_ref())
    else {
        return;
    };

    let durations: Vec<&str> = props
        .policy_rules
        .iter()
        .flat_map(|rule| &rule.lifecycles)
        .filter_map(|lifecycle| lifecycle.delete_after.as_ref())
        .filter_map(|delete| delete.duration.as_deref())
        .collect();

    outcome.check_true(
        "snapshot policy 7-day retention lifecycle",
        durations.iter().any(|d| d.contains(SNAPSHOT_RETENTION)),
        &format!("a lifecycle deleting after {SNAPSHOT_RETENTION}"),
        &if durations.is_empty() {
            "no delete-after lifecycles found".to_string()
        } else {
            format!("lifecycles: {durations:?}")
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_redundant_vault_passes() {
        let vault: DataProtectionVault = serde_json::from_str(
            r#"{
                "name": "dpv-minitrue-ab12cd",
                "properties": {
                    "storageSettings": [
                        {"datastoreType": "VaultStore", "type": "GeoRedundant"}
                    ]
                }
            }"#,
        )
        .expect("vault payload");

        let mut outcome = ValidationOutcome::new(NAME);
        check_snapshot_vault(&mut outcome, &vault);
        assert!(outcome.passed());
    }

    #[test]
    fn test_locally_redundant_vault_is_flagged() {
        let vault: DataProtectionVault = serde_json::from_str(
            r#"{"properties": {"storageSettings": [{"type": "LocallyRedundant"}]}}"#,
        )
        .expect("vault payload");

        let mut outcome = ValidationOutcome::new(NAME);
        check_snapshot_vault(&mut outcome, &vault);
        let failure = outcome.failures().next().expect("redundancy failure");
        assert_eq!(failure.observed, "LocallyRedundant");
    }

    #[test]
    fn test_vault_without_storage_settings_fails_descriptively() {
        let vault: DataProtectionVault =
            serde_json::from_str(r#"{"properties": {"storageSettings": []}}"#).expect("payload");

        let mut outcome = ValidationOutcome::new(NAME);
        check_snapshot_vault(&mut outcome, &vault);
        assert!(
            outcome
                .failures()
                .next()
                .expect("failure")
                .name
                .contains("storageSettings[0]")
        );
    }

    #[test]
    fn test_policy_with_seven_day_lifecycle_passes() {
        let policy: DataProtectionPolicy = serde_json::from_str(
            r#"{
                "name": "diskpol-minitrue-daily-7d",
                "properties": {
                    "objectType": "BackupPolicy",
                    "policyRules": [
                        {
                            "name": "Default",
                            "objectType": "AzureRetentionRule",
                            "lifecycles": [
                                {"deleteAfter": {"objectType": "AbsoluteDeleteOption", "duration": "P7D"}}
                            ]
                        },
                        {"name": "BackupDaily", "objectType": "AzureBackupRule"}
                    ]
                }
            }"#,
        )
        .expect("policy payload");

        let mut outcome = ValidationOutcome::new(NAME);
        check_snapshot_policy(&mut outcome, &policy);
        assert!(outcome.passed());
    }

    #[test]
    fn test_policy_with_wrong_retention_is_flagged() {
        let policy: DataProtectionPolicy = serde_json::from_str(
            r#"{
                "properties": {
                    "policyRules": [
                        {
                            "objectType": "AzureRetentionRule",
                            "lifecycles": [{"deleteAfter": {"duration": "P30D"}}]
                        }
                    ]
                }
            }"#,
        )
        .expect("policy payload");

        let mut outcome = ValidationOutcome::new(NAME);
        check_snapshot_policy(&mut outcome, &policy);
        let failure = outcome.failures().next().expect("retention failure");
        assert!(failure.observed.contains("P30D"));
    }
}
