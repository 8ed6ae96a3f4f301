//! Recovery Services vault suite.
//!
//! Provisions the module and verifies the vault's declared invariants:
//! resource type in the ID output, Standard SKU, soft delete enabled,
//! cross-region restore enabled on geo-redundant storage. The companion
//! `convergence` suite polls the vault's provisioning state, mirroring how
//! a real backup job's completion would be awaited.

use std::time::Instant;

use ivh_azure::models::Vault;
use ivh_common::orchestrator::FixtureReport;
use ivh_common::poll::{PollDecision, PollError, poll_until};
use ivh_common::validate::ValidationOutcome;

use super::{SuiteCtx, conclude, prepare_fixture};

const NAME: &str = "vault";

/// Resource-type fragment every vault ID must carry.
const VAULT_ID_TYPE: &str = "Microsoft.RecoveryServices/vaults";

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

    match fixture.output("recovery_services_vault_id") {
        Ok(id) => {
            outcome.check_not_empty("recovery_services_vault_id output", id);
            outcome.check_contains("vault id resource type", id, VAULT_ID_TYPE);
        }
        Err(err) => {
            outcome.check_true(
                "recovery_services_vault_id output",
                false,
                "declared by the module",
                &err.to_string(),
            );
        }
    }

    let vault_name = match fixture.output("recovery_services_vault_name") {
        Ok(name) => {
            outcome.check_not_empty("recovery_services_vault_name output", name);
            Some(name.to_string())
        }
        Err(err) => {
            outcome.check_true(
                "recovery_services_vault_name output",
                false,
                "declared by the module",
                &err.to_string(),
            );
            None
        }
    };

    if let Some(name) = vault_name {
        match ctx.arm() {
            Ok(arm) => match arm.vault(fixture.resource_group(), &name).await {
                Ok(vault) => check_vault(&mut outcome, &vault),
                Err(err) => {
                    outcome.check_true(
                        "vault reachable via ARM",
                        false,
                        "GET succeeds",
                        &err.to_string(),
                    );
                }
            },
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

/// Structural invariants of the fetched vault representation.
pub(crate) fn check_vault(outcome: &mut ValidationOutcome, vault: &Vault) {
    if let Some(sku) = outcome.field("sku", vault.sku.as_ref())
        && let Some(sku_name) = outcome.field("sku.name", sku.name.as_ref())
    {
        outcome.check_eq("vault sku", "Standard", sku_name.as_str());
    }

    let Some(props) = outcome.field("properties", vault.properties.as_ref()) else {
        return;
    };

    if let Some(security) = outcome.field(
        "properties.securitySettings",
        props.security_settings.as_ref(),
    ) && let Some(soft_delete) = outcome.field(
        "properties.securitySettings.softDeleteSettings",
        security.soft_delete_settings.as_ref(),
    ) && let Some(state) = outcome.field(
        "properties.securitySettings.softDeleteSettings.softDeleteState",
        soft_delete.soft_delete_state.as_ref(),
    ) {
        outcome.check_eq("soft delete state", "Enabled", state.as_str());
    }

    if let Some(redundancy) = outcome.field(
        "properties.redundancySettings",
        props.redundancy_settings.as_ref(),
    ) {
        if let Some(crr) = outcome.field(
            "properties.redundancySettings.crossRegionRestore",
            redundancy.cross_region_restore.as_ref(),
        ) {
            outcome.check_eq("cross region restore", "Enabled", crr.as_str());
        }
        if let Some(tier) = outcome.field(
            "properties.redundancySettings.standardTierStorageRedundancy",
            redundancy.standard_tier_storage_redundancy.as_ref(),
        ) {
            outcome.check_eq("storage redundancy", "GeoRedundant", tier.as_str());
        }
    }
}

/// Poll the vault until its provisioning state reaches `Succeeded`,
/// short-circuiting if the control plane reports `Failed`.
pub async fn convergence(ctx: SuiteCtx) -> FixtureReport {
    const SUITE: &str = "convergence";

    let started = Instant::now();
    let mut fixture = match prepare_fixture(SUITE, &ctx) {
        Ok(fixture) => fixture,
        Err(report) => return report,
    };
    if let Err(err) = fixture.provision().await {
        return conclude(SUITE, fixture, None, Some(err.to_string()), started).await;
    }

    let mut outcome = ValidationOutcome::new(SUITE);
    let vault_name = fixture
        .output("recovery_services_vault_name")
        .map(ToString::to_string);

    match (ctx.arm(), vault_name) {
        (Ok(arm), Ok(name)) => {
            let resource_group = fixture.resource_group();
            let poll = poll_until(
                "vault provisioning state",
                &ctx.config.poll,
                || async {
                    let vault = arm.vault(resource_group, &name).await?;
                    Ok::<_, ivh_azure::ArmError>(
                        vault
                            .properties
                            .and_then(|p| p.provisioning_state)
                            .unwrap_or_default(),
                    )
                },
                |state: &String| match state.as_str() {
                    "Succeeded" => PollDecision::Success,
                    "Failed" => PollDecision::Fail(format!("provisioning state is {state:?}")),
                    _ => PollDecision::Continue,
                },
            )
            .await;

            match poll {
                Ok(state) => {
                    outcome.check_eq("vault provisioning state", "Succeeded", state.as_str());
                }
                Err(PollError::Terminal { reason }) => {
                    outcome.check_true(
                        "vault provisioning state",
                        false,
                        "Succeeded",
                        &format!("terminal failure: {reason}"),
                    );
                }
                Err(err @ PollError::Timeout { .. }) => {
                    outcome.check_true(
                        "vault provisioning state",
                        false,
                        "Succeeded within the poll budget",
                        &err.to_string(),
                    );
                }
            }
        }
        (Err(err), _) => {
            outcome.check_true(
                "azure credentials available",
                false,
                "credential provider initialized",
                &err.to_string(),
            );
        }
        (_, Err(err)) => {
            outcome.check_true(
                "recovery_services_vault_name output",
                false,
                "declared by the module",
                &err.to_string(),
            );
        }
    }

    conclude(SUITE, fixture, Some(outcome), None, started).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conforming_vault() -> Vault {
        serde_json::from_str(
            r#"{
                "id": "/subscriptions/x/providers/Microsoft.RecoveryServices/vaults/rsv-minitrue-ab12cd",
                "name": "rsv-minitrue-ab12cd",
                "sku": {"name": "Standard"},
                "properties": {
                    "provisioningState": "Succeeded",
                    "securitySettings": {
                        "softDeleteSettings": {"softDeleteState": "Enabled"}
                    },
                    "redundancySettings": {
                        "crossRegionRestore": "Enabled",
                        "standardTierStorageRedundancy": "GeoRedundant"
                    }
                }
            }"#,
        )
        .expect("vault payload")
    }

    #[test]
    fn test_conforming_vault_passes_every_check() {
        let mut outcome = ValidationOutcome::new("vault");
        check_vault(&mut outcome, &conforming_vault());
        assert!(outcome.passed(), "failures: {:?}", outcome.failures().collect::<Vec<_>>());
        assert_eq!(outcome.failed_count(), 0);
    }

    #[test]
    fn test_disabled_soft_delete_is_flagged() {
        let mut vault = conforming_vault();
        vault
            .properties
            .as_mut()
            .unwrap()
            .security_settings
            .as_mut()
            .unwrap()
            .soft_delete_settings
            .as_mut()
            .unwrap()
            .soft_delete_state = Some("Disabled".to_string());

        let mut outcome = ValidationOutcome::new("vault");
        check_vault(&mut outcome, &vault);
        let failure = outcome.failures().next().expect("soft delete failure");
        assert_eq!(failure.name, "soft delete state");
        assert_eq!(failure.observed, "Disabled");
    }

    #[test]
    fn test_sparse_vault_fails_descriptively_without_panicking() {
        let vault: Vault = serde_json::from_str(r#"{"name": "rsv-bare"}"#).expect("sparse");
        let mut outcome = ValidationOutcome::new("vault");
        check_vault(&mut outcome, &vault);

        assert!(!outcome.passed());
        let names: Vec<&str> = outcome.failures().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"sku present"));
        assert!(names.contains(&"properties present"));
    }

    #[test]
    fn test_missing_redundancy_section_only_fails_that_section() {
        let vault: Vault = serde_json::from_str(
            r#"{
                "sku": {"name": "Standard"},
                "properties": {
                    "securitySettings": {
                        "softDeleteSettings": {"softDeleteState": "Enabled"}
                    }
                }
            }"#,
        )
        .expect("payload");

        let mut outcome = ValidationOutcome::new("vault");
        check_vault(&mut outcome, &vault);

        assert_eq!(outcome.failed_count(), 1);
        assert!(
            outcome
                .failures()
                .next()
                .expect("failure")
                .name
                .contains("redundancySettings")
        );
        // The passing checks still ran.
        assert!(outcome.len() > 1);
    }
}
