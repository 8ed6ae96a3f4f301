//! ARM resource representations.
//!
//! Deliberately partial: only the fields the validation suites read.
//! Every nested field is optional; the control plane omits sections
//! freely across api-versions, and a missing field must become a
//! descriptive check failure, never a deserialization error or a panic.

use serde::{Deserialize, Serialize};

// ── Recovery Services vault ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vault {
    pub id: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub sku: Option<VaultSku>,
    pub properties: Option<VaultProperties>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSku {
    pub name: Option<String>,
    pub tier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultProperties {
    pub provisioning_state: Option<String>,
    pub security_settings: Option<SecuritySettings>,
    pub redundancy_settings: Option<RedundancySettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySettings {
    pub soft_delete_settings: Option<SoftDeleteSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftDeleteSettings {
    pub soft_delete_state: Option<String>,
    pub soft_delete_retention_period_in_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedundancySettings {
    pub cross_region_restore: Option<String>,
    pub standard_tier_storage_redundancy: Option<String>,
}

// ── Recovery Services backup policy ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPolicy {
    pub id: Option<String>,
    pub name: Option<String>,
    pub properties: Option<BackupPolicyProperties>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPolicyProperties {
    pub backup_management_type: Option<String>,
    /// "V1" for standard policies, "V2" for enhanced.
    pub policy_type: Option<String>,
    pub instant_rp_retention_range_in_days: Option<i64>,
    pub schedule_policy: Option<SchedulePolicy>,
    pub retention_policy: Option<RetentionPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePolicy {
    pub schedule_policy_type: Option<String>,
    pub schedule_run_frequency: Option<String>,
    #[serde(default)]
    pub schedule_run_times: Vec<String>,
    pub hourly_schedule: Option<HourlySchedule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlySchedule {
    pub interval: Option<i64>,
    pub schedule_window_start_time: Option<String>,
    pub schedule_window_duration: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    pub retention_policy_type: Option<String>,
    pub daily_schedule: Option<RetentionSchedule>,
    pub weekly_schedule: Option<RetentionSchedule>,
    pub monthly_schedule: Option<RetentionSchedule>,
    pub yearly_schedule: Option<RetentionSchedule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionSchedule {
    pub retention_duration: Option<RetentionDuration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionDuration {
    pub count: Option<i64>,
    pub duration_type: Option<String>,
}

// ── Data Protection vault & policy ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProtectionVault {
    pub id: Option<String>,
    pub name: Option<String>,
    pub properties: Option<DataProtectionVaultProperties>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProtectionVaultProperties {
    #[serde(default)]
    pub storage_settings: Vec<StorageSetting>,
    pub provisioning_state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSetting {
    pub datastore_type: Option<String>,
    #[serde(rename = "type")]
    pub redundancy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProtectionPolicy {
    pub id: Option<String>,
    pub name: Option<String>,
    pub properties: Option<DataProtectionPolicyProperties>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProtectionPolicyProperties {
    pub object_type: Option<String>,
    #[serde(default)]
    pub policy_rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub name: Option<String>,
    pub object_type: Option<String>,
    #[serde(default)]
    pub lifecycles: Vec<Lifecycle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    pub delete_after: Option<DeleteOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOption {
    pub object_type: Option<String>,
    /// ISO-8601 duration, e.g. "P7D".
    pub duration: Option<String>,
}

// ── Automation account & runbooks ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationAccount {
    pub id: Option<String>,
    pub name: Option<String>,
    pub identity: Option<ManagedIdentity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedIdentity {
    #[serde(rename = "type")]
    pub identity_type: Option<String>,
    pub principal_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Runbook {
    pub name: Option<String>,
    pub properties: Option<RunbookProperties>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunbookProperties {
    pub runbook_type: Option<String>,
    pub state: Option<String>,
}

// ── Monitoring ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionGroup {
    pub id: Option<String>,
    pub name: Option<String>,
    pub properties: Option<ActionGroupProperties>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionGroupProperties {
    pub group_short_name: Option<String>,
    pub enabled: Option<bool>,
    #[serde(default)]
    pub email_receivers: Vec<EmailReceiver>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailReceiver {
    pub name: Option<String>,
    pub email_address: Option<String>,
}

// ── RBAC ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignmentList {
    #[serde(default)]
    pub value: Vec<RoleAssignment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    pub id: Option<String>,
    pub properties: Option<RoleAssignmentProperties>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignmentProperties {
    pub principal_id: Option<String>,
    pub role_definition_id: Option<String>,
    pub scope: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_deserializes_from_arm_payload() {
        let raw = r#"{
            "id": "/subscriptions/x/resourceGroups/rg-minitrue-test-ab12cd/providers/Microsoft.RecoveryServices/vaults/rsv-minitrue-ab12cd",
            "name": "rsv-minitrue-ab12cd",
            "location": "eastus",
            "sku": {"name": "Standard", "tier": "Standard"},
            "properties": {
                "provisioningState": "Succeeded",
                "securitySettings": {
                    "softDeleteSettings": {
                        "softDeleteState": "Enabled",
                        "softDeleteRetentionPeriodInDays": 14
                    }
                },
                "redundancySettings": {
                    "crossRegionRestore": "Enabled",
                    "standardTierStorageRedundancy": "GeoRedundant"
                }
            }
        }"#;

        let vault: Vault = serde_json::from_str(raw).expect("vault payload");
        assert_eq!(vault.sku.as_ref().and_then(|s| s.name.as_deref()), Some("Standard"));
        let props = vault.properties.expect("properties");
        assert_eq!(props.provisioning_state.as_deref(), Some("Succeeded"));
        assert_eq!(
            props
                .security_settings
                .and_then(|s| s.soft_delete_settings)
                .and_then(|s| s.soft_delete_state)
                .as_deref(),
            Some("Enabled")
        );
        assert_eq!(
            props
                .redundancy_settings
                .and_then(|r| r.cross_region_restore)
                .as_deref(),
            Some("Enabled")
        );
    }

    #[test]
    fn test_vault_with_absent_sections_still_parses() {
        let vault: Vault =
            serde_json::from_str(r#"{"name": "rsv-bare", "properties": {}}"#).expect("sparse");
        assert!(vault.sku.is_none());
        assert!(vault.properties.expect("props").security_settings.is_none());
    }

    #[test]
    fn test_standard_backup_policy_deserializes() {
        let raw = r#"{
            "name": "bkpol-standard-daily-30d",
            "properties": {
                "backupManagementType": "AzureIaasVM",
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
        }"#;

        let policy: BackupPolicy = serde_json::from_str(raw).expect("policy payload");
        let props = policy.properties.expect("properties");
        assert_eq!(props.instant_rp_retention_range_in_days, Some(5));
        let retention = props.retention_policy.expect("retention");
        assert_eq!(
            retention
                .daily_schedule
                .and_then(|s| s.retention_duration)
                .and_then(|d| d.count),
            Some(30)
        );
        assert_eq!(
            retention
                .yearly_schedule
                .and_then(|s| s.retention_duration)
                .and_then(|d| d.count),
            Some(3)
        );
    }

    #[test]
    fn test_enhanced_policy_hourly_schedule_deserializes() {
        let raw = r#"{
            "name": "bkpol-enhanced-daily-30d",
            "properties": {
                "policyType": "V2",
                "instantRpRetentionRangeInDays": 7,
                "schedulePolicy": {
                    "schedulePolicyType": "SimpleSchedulePolicyV2",
                    "scheduleRunFrequency": "Hourly",
                    "hourlySchedule": {
                        "interval": 4,
                        "scheduleWindowStartTime": "2024-01-01T08:00:00Z",
                        "scheduleWindowDuration": 12
                    }
                }
            }
        }"#;

        let policy: BackupPolicy = serde_json::from_str(raw).expect("policy payload");
        let schedule = policy
            .properties
            .and_then(|p| p.schedule_policy)
            .expect("schedule");
        assert_eq!(schedule.schedule_run_frequency.as_deref(), Some("Hourly"));
        let hourly = schedule.hourly_schedule.expect("hourly");
        assert_eq!(hourly.interval, Some(4));
        assert_eq!(hourly.schedule_window_duration, Some(12));
    }

    #[test]
    fn test_data_protection_policy_retention_rule_deserializes() {
        let raw = r#"{
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
        }"#;

        let policy: DataProtectionPolicy = serde_json::from_str(raw).expect("dp policy");
        let rules = policy.properties.expect("props").policy_rules;
        assert_eq!(rules.len(), 2);
        let durations: Vec<&str> = rules
            .iter()
            .flat_map(|r| &r.lifecycles)
            .filter_map(|l| l.delete_after.as_ref())
            .filter_map(|d| d.duration.as_deref())
            .collect();
        assert_eq!(durations, vec!["P7D"]);
    }

    #[test]
    fn test_action_group_deserializes() {
        let raw = r#"{
            "name": "ag-minitrue-backup-alerts",
            "properties": {
                "groupShortName": "bkpalerts",
                "enabled": true,
                "emailReceivers": [
                    {"name": "ops", "emailAddress": "backup-ci@example.com"}
                ]
            }
        }"#;

        let group: ActionGroup = serde_json::from_str(raw).expect("action group");
        let props = group.properties.expect("props");
        assert_eq!(props.enabled, Some(true));
        assert_eq!(
            props.email_receivers[0].email_address.as_deref(),
            Some("backup-ci@example.com")
        );
    }

    #[test]
    fn test_role_assignment_list_deserializes() {
        let raw = r#"{
            "value": [
                {
                    "id": "/subscriptions/x/providers/Microsoft.Authorization/roleAssignments/1",
                    "properties": {
                        "principalId": "aaaa-bbbb",
                        "roleDefinitionId": "/subscriptions/x/providers/Microsoft.Authorization/roleDefinitions/5e467623-bb1f-42f4-a55d-6e525e11384b",
                        "scope": "/subscriptions/x/resourceGroups/rg/providers/Microsoft.RecoveryServices/vaults/rsv-1"
                    }
                }
            ]
        }"#;

        let list: RoleAssignmentList = serde_json::from_str(raw).expect("assignments");
        assert_eq!(list.value.len(), 1);
        let props = list.value[0].properties.as_ref().expect("props");
        assert!(
            props
                .role_definition_id
                .as_deref()
                .unwrap_or("")
                .ends_with("5e467623-bb1f-42f4-a55d-6e525e11384b")
        );
    }
}
