//! VM backup policy suite.
//!
//! Asserts both the standard and the enhanced backup policy exist with
//! the declared retention and scheduling settings.

use std::time::Instant;

use ivh_azure::models::BackupPolicy;
use ivh_common::orchestrator::FixtureReport;
use ivh_common::validate::ValidationOutcome;

use super::{SuiteCtx, conclude, prepare_fixture};

const NAME: &str = "policies";

/// Standard policy: daily at 23:00, 30d/12w/12m/3y retention.
const STANDARD_POLICY: &str = "bkpol-standard-daily-30d";
/// Enhanced policy: V2, 4-hourly over a 12-hour window.
const ENHANCED_POLICY: &str = "bkpol-enhanced-daily-30d";

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

    for output in ["standard_backup_policy_id", "enhanced_backup_policy_id"] {
        match fixture.output(output) {
            Ok(value) => {
                outcome.check_not_empty(&format!("{output} output"), value);
            }
            Err(err) => {
                outcome.check_true(
                    &format!("{output} output"),
                    false,
                    "declared by the module",
                    &err.to_string(),
                );
            }
        }
    }

    let vault_name = fixture
        .output("recovery_services_vault_name")
        .map(ToString::to_string);

    match (ctx.arm(), vault_name) {
        (Ok(arm), Ok(vault_name)) => {
            let resource_group = fixture.resource_group();

            match arm
                .backup_policy(resource_group, &vault_name, STANDARD_POLICY)
                .await
            {
                Ok(policy) => check_standard_policy(&mut outcome, &policy),
                Err(err) => {
                    outcome.check_true(
                        "standard policy reachable via ARM",
                        false,
                        "GET succeeds",
                        &err.to_string(),
                    );
                }
            }

            match arm
                .backup_policy(resource_group, &vault_name, ENHANCED_POLICY)
                .await
            {
                Ok(policy) => check_enhanced_policy(&mut outcome, &policy),
                Err(err) => {
                    outcome.check_true(
                        "enhanced policy reachable via ARM",
                        false,
                        "GET succeeds",
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

    conclude(NAME, fixture, Some(outcome), None, started).await
}

/// Standard policy invariants: daily schedule with long-term retention and
/// a 5-day instant restore window.
pub(crate) fn check_standard_policy(outcome: &mut ValidationOutcome, policy: &BackupPolicy) {
    let Some(props) = outcome.field("standard policy properties", policy.properties.as_ref())
    else {
        return;
    };

    if let Some(schedule) = outcome.field(
        "standard policy schedulePolicy",
        props.schedule_policy.as_ref(),
    ) && let Some(frequency) = outcome.field(
        "standard policy scheduleRunFrequency",
        schedule.schedule_run_frequency.as_ref(),
    ) {
        outcome.check_eq("standard policy frequency", "Daily", frequency.as_str());
    }

    if let Some(retention) = outcome.field(
        "standard policy retentionPolicy",
        props.retention_policy.as_ref(),
    ) {
        let schedules = [
            ("daily retention days", retention.daily_schedule.as_ref(), 30),
            ("weekly retention weeks", retention.weekly_schedule.as_ref(), 12),
            ("monthly retention months", retention.monthly_schedule.as_ref(), 12),
            ("yearly retention years", retention.yearly_schedule.as_ref(), 3),
        ];
        for (name, schedule, expected) in schedules {
            if let Some(schedule) = outcome.field(&format!("{name} schedule"), schedule)
                && let Some(duration) = outcome.field(
                    &format!("{name} retentionDuration"),
                    schedule.retention_duration.as_ref(),
                )
                && let Some(count) =
                    outcome.field(&format!("{name} count"), duration.count.as_ref())
            {
                outcome.check_eq(name, expected, *count);
            }
        }
    }

    if let Some(window) = outcome.field(
        "standard policy instantRpRetentionRangeInDays",
        props.instant_rp_retention_range_in_days.as_ref(),
    ) {
        outcome.check_eq("standard instant restore window days", 5, *window);
    }
}

/// Enhanced policy invariants: V2 hourly schedule, 4h interval over a 12h
/// window, 7-day instant restore.
pub(crate) fn check_enhanced_policy(outcome: &mut ValidationOutcome, policy: &BackupPolicy) {
    let Some(props) = outcome.field("enhanced policy properties", policy.properties.as_ref())
    else {
        return;
    };

    if let Some(policy_type) =
        outcome.field("enhanced policy policyType", props.policy_type.as_ref())
    {
        outcome.check_eq("enhanced policy type", "V2", policy_type.as_str());
    }

    if let Some(schedule) = outcome.field(
        "enhanced policy schedulePolicy",
        props.schedule_policy.as_ref(),
    ) {
        if let Some(frequency) = outcome.field(
            "enhanced policy scheduleRunFrequency",
            schedule.schedule_run_frequency.as_ref(),
        ) {
            outcome.check_eq("enhanced policy frequency", "Hourly", frequency.as_str());
        }
        if let Some(hourly) = outcome.field(
            "enhanced policy hourlySchedule",
            schedule.hourly_schedule.as_ref(),
        ) {
            if let Some(interval) =
                outcome.field("enhanced policy interval", hourly.interval.as_ref())
            {
                outcome.check_eq("enhanced policy interval hours", 4, *interval);
            }
            if let Some(window) = outcome.field(
                "enhanced policy scheduleWindowDuration",
                hourly.schedule_window_duration.as_ref(),
            ) {
                outcome.check_eq("enhanced policy window hours", 12, *window);
            }
        }
    }

    if let Some(window) = outcome.field(
        "enhanced policy instantRpRetentionRangeInDays",
        props.instant_rp_retention_range_in_days.as_ref(),
    ) {
        outcome.check_eq("enhanced instant restore window days", 7, *window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard_policy() -> BackupPolicy {
        serde_json::from_str(
            r#"{
                "name": "bkpol-standard-daily-30d",
                "properties": {
                    "policyType": "V1",
                    "instantRpRetentionRangeInDays": 5,
                    "schedulePolicy": {
                        "schedulePolicyType": "SimpleSchedulePolicy",
                        "scheduleRunFrequency": "Daily",
                        "scheduleRunTimes": ["2024-01-01T23:00:00Z"]
                    },
                    "retentionPolicy": {
                        "retentionPolicyType": "LongTermRetentionPolicy",
                        "dailySchedule": {"retentionDuration": {"count": 30, "durationType": "Days"}},
                        "weeklySchedule": {"retentionDuration": {"count": 12, "durationType": "Weeks"}},
                        "monthlySchedule": {"retentionDuration": {"count": 12, "durationType": "Months"}},
                        "yearlySchedule": {"retentionDuration": {"count": 3, "durationType": "Years"}}
                    }
                }
            }"#,
        )
        .expect("standard policy payload")
    }

    fn enhanced_policy() -> BackupPolicy {
        serde_json::from_str(
            r#"{
                "name": "bkpol-enhanced-daily-30d",
                "properties": {
                    "policyType": "V2",
                    "instantRpRetentionRangeInDays": 7,
                    "schedulePolicy": {
                        "schedulePolicyType": "SimpleSchedulePolicyV2",
                        "scheduleRunFrequency": "Hourly",
                        "hourlySchedule": {"interval": 4, "scheduleWindowDuration": 12}
                    }
                }
            }"#,
        )
        .expect("enhanced policy payload")
    }

    #[test]
    fn test_conforming_standard_policy_passes() {
        let mut outcome = ValidationOutcome::new(NAME);
        check_standard_policy(&mut outcome, &standard_policy());
        assert!(outcome.passed(), "failures: {:?}", outcome.failures().collect::<Vec<_>>());
    }

    #[test]
    fn test_short_daily_retention_is_flagged() {
        let mut policy = standard_policy();
        policy
            .properties
            .as_mut()
            .unwrap()
            .retention_policy
            .as_mut()
            .unwrap()
            .daily_schedule
            .as_mut()
            .unwrap()
            .retention_duration
            .as_mut()
            .unwrap()
            .count = Some(7);

        let mut outcome = ValidationOutcome::new(NAME);
        check_standard_policy(&mut outcome, &policy);
        let failure = outcome.failures().next().expect("retention failure");
        assert_eq!(failure.name, "daily retention days");
        assert_eq!(failure.expected, "30");
        assert_eq!(failure.observed, "7");
    }

    #[test]
    fn test_conforming_enhanced_policy_passes() {
        let mut outcome = ValidationOutcome::new(NAME);
        check_enhanced_policy(&mut outcome, &enhanced_policy());
        assert!(outcome.passed(), "failures: {:?}", outcome.failures().collect::<Vec<_>>());
    }

    #[test]
    fn test_v1_enhanced_policy_is_flagged() {
        let mut policy = enhanced_policy();
        policy.properties.as_mut().unwrap().policy_type = Some("V1".to_string());

        let mut outcome = ValidationOutcome::new(NAME);
        check_enhanced_policy(&mut outcome, &policy);
        let failure = outcome.failures().next().expect("type failure");
        assert_eq!(failure.name, "enhanced policy type");
        assert_eq!(failure.observed, "V1");
    }

    #[test]
    fn test_policy_without_retention_fails_each_absent_field_once() {
        let policy: BackupPolicy =
            serde_json::from_str(r#"{"name": "p", "properties": {}}"#).expect("sparse");
        let mut outcome = ValidationOutcome::new(NAME);
        check_standard_policy(&mut outcome, &policy);

        assert!(!outcome.passed());
        // schedulePolicy, retentionPolicy, and the instant-restore window.
        assert_eq!(outcome.failed_count(), 3);
    }
}
