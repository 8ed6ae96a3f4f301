//! Backup alerting suite.
//!
//! Verifies the action group wired to backup alerts is enabled with the
//! configured email receiver, and that the Log Analytics workspace output
//! references a real workspace resource.

use std::time::Instant;

use ivh_azure::models::ActionGroup;
use ivh_common::orchestrator::FixtureReport;
use ivh_common::validate::ValidationOutcome;

use super::{SuiteCtx, conclude, last_id_segment, prepare_fixture};

const NAME: &str = "monitoring";

const WORKSPACE_ID_TYPE: &str = "Microsoft.OperationalInsights/workspaces";

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

    match fixture.output("log_analytics_workspace_id") {
        Ok(law_id) => {
            outcome.check_not_empty("log_analytics_workspace_id output", law_id);
            outcome.check_contains("workspace id resource type", law_id, WORKSPACE_ID_TYPE);
        }
        Err(err) => {
            outcome.check_true(
                "log_analytics_workspace_id output",
                false,
                "declared by the module",
                &err.to_string(),
            );
        }
    }

    let action_group_id = match fixture.output("action_group_id") {
        Ok(id) => {
            outcome.check_not_empty("action_group_id output", id);
            Some(id.to_string())
        }
        Err(err) => {
            outcome.check_true(
                "action_group_id output",
                false,
                "declared by the module",
                &err.to_string(),
            );
            None
        }
    };

    if let Some(action_group_id) = action_group_id {
        let group_name = last_id_segment(&action_group_id).to_string();
        match ctx.arm() {
            Ok(arm) => match arm.action_group(fixture.resource_group(), &group_name).await {
                Ok(group) => {
                    let expected_email =
                        ctx.config.alert_emails.first().cloned().unwrap_or_default();
                    check_action_group(&mut outcome, &group, &expected_email);
                }
                Err(err) => {
                    outcome.check_true(
                        "action group reachable via ARM",
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

/// The action group must be enabled and carry the configured alert email.
pub(crate) fn check_action_group(
    outcome: &mut ValidationOutcome,
    group: &ActionGroup,
    expected_email: &str,
) {
    let Some(props) = outcome.field("action group properties", group.properties.as_ref())
    else {
        return;
    };

    if let Some(enabled) = outcome.field("action group enabled", props.enabled.as_ref()) {
        outcome.check_eq("action group enabled", true, *enabled);
    }

    outcome.check_true(
        "action group has email receivers",
        !props.email_receivers.is_empty(),
        "at least one email receiver",
        &format!("{} receiver(s)", props.email_receivers.len()),
    );

    let observed: Vec<&str> = props
        .email_receivers
        .iter()
        .filter_map(|receiver| receiver.email_address.as_deref())
        .collect();
    outcome.check_true(
        "alert email receiver configured",
        observed.iter().any(|email| email.contains(expected_email)),
        &format!("receiver for {expected_email}"),
        &format!("receivers: {observed:?}"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(enabled: bool, email: &str) -> ActionGroup {
        serde_json::from_str(&format!(
            r#"{{
                "name": "ag-minitrue-backup-alerts",
                "properties": {{
                    "groupShortName": "bkpalerts",
                    "enabled": {enabled},
                    "emailReceivers": [{{"name": "ops", "emailAddress": "{email}"}}]
                }}
            }}"#
        ))
        .expect("action group payload")
    }

    #[test]
    fn test_enabled_group_with_expected_email_passes() {
        let mut outcome = ValidationOutcome::new(NAME);
        check_action_group(&mut outcome, &group(true, "backup-ci@example.com"), "backup-ci@example.com");
        assert!(outcome.passed(), "failures: {:?}", outcome.failures().collect::<Vec<_>>());
    }

    #[test]
    fn test_disabled_group_is_flagged() {
        let mut outcome = ValidationOutcome::new(NAME);
        check_action_group(&mut outcome, &group(false, "backup-ci@example.com"), "backup-ci@example.com");
        let failure = outcome.failures().next().expect("enabled failure");
        assert_eq!(failure.name, "action group enabled");
    }

    #[test]
    fn test_wrong_receiver_is_flagged() {
        let mut outcome = ValidationOutcome::new(NAME);
        check_action_group(&mut outcome, &group(true, "noc@example.com"), "backup-ci@example.com");
        let names: Vec<&str> = outcome.failures().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["alert email receiver configured"]);
    }

    #[test]
    fn test_group_without_receivers_fails_both_receiver_checks() {
        let group: ActionGroup = serde_json::from_str(
            r#"{"properties": {"enabled": true, "emailReceivers": []}}"#,
        )
        .expect("payload");

        let mut outcome = ValidationOutcome::new(NAME);
        check_action_group(&mut outcome, &group, "backup-ci@example.com");
        assert_eq!(outcome.failed_count(), 2);
    }
}
