//! Read-only ARM clients, one `get` per resource kind.
//!
//! A single [`ArmClient`] carries the HTTP client, the subscription scope,
//! and the token provider; per-kind methods differ only in path shape and
//! api-version. Writes are deliberately absent: all mutation flows
//! through the provisioning engine.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::credentials::TokenProvider;
use crate::models::{
    ActionGroup, AutomationAccount, BackupPolicy, DataProtectionPolicy, DataProtectionVault,
    RoleAssignment, RoleAssignmentList, Runbook, Vault,
};

const DEFAULT_BASE_URL: &str = "https://management.azure.com";

const RECOVERY_SERVICES_API: &str = "2024-04-01";
const RECOVERY_SERVICES_BACKUP_API: &str = "2024-04-01";
const DATA_PROTECTION_API: &str = "2024-04-01";
const AUTOMATION_API: &str = "2023-11-01";
const MONITOR_API: &str = "2023-01-01";
const AUTHORIZATION_API: &str = "2022-04-01";

/// Errors from ARM reads.
#[derive(Debug, thiserror::Error)]
pub enum ArmError {
    #[error("credential error: {0}")]
    Token(String),

    #[error("resource not found: {resource}")]
    NotFound { resource: String },

    #[error("ARM returned {status} for {resource}: {detail}")]
    Status {
        status: u16,
        resource: String,
        detail: String,
    },

    #[error("ARM request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Read-only ARM client scoped to one subscription.
#[derive(Clone)]
pub struct ArmClient {
    http: reqwest::Client,
    token: Arc<TokenProvider>,
    subscription_id: String,
    base_url: String,
}

impl ArmClient {
    pub fn new(token: Arc<TokenProvider>) -> Self {
        let subscription_id = token.subscription_id().to_string();
        Self {
            http: reqwest::Client::new(),
            token,
            subscription_id,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Override the management endpoint, for sovereign clouds and tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    fn rg_path(&self, resource_group: &str, provider_suffix: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{resource_group}/providers/{provider_suffix}",
            self.subscription_id
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        api_version: &str,
    ) -> Result<T, ArmError> {
        let url = format!("{}{path}?api-version={api_version}", self.base_url);
        debug!(%path, api_version, "ARM GET");

        let bearer = self
            .token
            .bearer()
            .await
            .map_err(|err| ArmError::Token(err.to_string()))?;
        let response = self.http.get(&url).bearer_auth(bearer).send().await?;
        let status = response.status();

        if status.as_u16() == 404 {
            return Err(ArmError::NotFound {
                resource: path.to_string(),
            });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ArmError::Status {
                status: status.as_u16(),
                resource: path.to_string(),
                detail,
            });
        }
        Ok(response.json().await?)
    }

    // ── Recovery Services ──────────────────────────────────────────────────

    /// Fetch one Recovery Services vault.
    pub async fn vault(&self, resource_group: &str, name: &str) -> Result<Vault, ArmError> {
        let path = self.rg_path(
            resource_group,
            &format!("Microsoft.RecoveryServices/vaults/{name}"),
        );
        self.get_json(&path, RECOVERY_SERVICES_API).await
    }

    /// Fetch one VM backup protection policy from a vault.
    pub async fn backup_policy(
        &self,
        resource_group: &str,
        vault_name: &str,
        policy_name: &str,
    ) -> Result<BackupPolicy, ArmError> {
        let path = self.rg_path(
            resource_group,
            &format!("Microsoft.RecoveryServices/vaults/{vault_name}/backupPolicies/{policy_name}"),
        );
        self.get_json(&path, RECOVERY_SERVICES_BACKUP_API).await
    }

    // ── Data Protection ────────────────────────────────────────────────────

    /// Fetch one Data Protection backup vault.
    pub async fn data_protection_vault(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<DataProtectionVault, ArmError> {
        let path = self.rg_path(
            resource_group,
            &format!("Microsoft.DataProtection/backupVaults/{name}"),
        );
        self.get_json(&path, DATA_PROTECTION_API).await
    }

    /// Fetch one Data Protection backup policy.
    pub async fn data_protection_policy(
        &self,
        resource_group: &str,
        vault_name: &str,
        policy_name: &str,
    ) -> Result<DataProtectionPolicy, ArmError> {
        let path = self.rg_path(
            resource_group,
            &format!(
                "Microsoft.DataProtection/backupVaults/{vault_name}/backupPolicies/{policy_name}"
            ),
        );
        self.get_json(&path, DATA_PROTECTION_API).await
    }

    // ── Automation ─────────────────────────────────────────────────────────

    /// Fetch one Automation account.
    pub async fn automation_account(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<AutomationAccount, ArmError> {
        let path = self.rg_path(
            resource_group,
            &format!("Microsoft.Automation/automationAccounts/{name}"),
        );
        self.get_json(&path, AUTOMATION_API).await
    }

    /// Fetch one runbook from an Automation account.
    pub async fn runbook(
        &self,
        resource_group: &str,
        account_name: &str,
        runbook_name: &str,
    ) -> Result<Runbook, ArmError> {
        let path = self.rg_path(
            resource_group,
            &format!("Microsoft.Automation/automationAccounts/{account_name}/runbooks/{runbook_name}"),
        );
        self.get_json(&path, AUTOMATION_API).await
    }

    // ── Monitoring ─────────────────────────────────────────────────────────

    /// Fetch one action group.
    pub async fn action_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<ActionGroup, ArmError> {
        let path = self.rg_path(
            resource_group,
            &format!("Microsoft.Insights/actionGroups/{name}"),
        );
        self.get_json(&path, MONITOR_API).await
    }

    // ── RBAC ───────────────────────────────────────────────────────────────

    /// List role assignments at an arbitrary scope (e.g. a vault ID).
    pub async fn role_assignments_for_scope(
        &self,
        scope: &str,
    ) -> Result<Vec<RoleAssignment>, ArmError> {
        let path = format!("{scope}/providers/Microsoft.Authorization/roleAssignments");
        let list: RoleAssignmentList = self.get_json(&path, AUTHORIZATION_API).await?;
        Ok(list.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::AzureCredentials;

    fn test_client() -> ArmClient {
        let credentials =
            AzureCredentials::new("00000000-0000-0000-0000-000000000000", "t", "c", "s");
        ArmClient::new(Arc::new(TokenProvider::new(credentials)))
    }

    #[test]
    fn test_resource_group_path_shape() {
        let client = test_client();
        let path = client.rg_path(
            "rg-minitrue-test-ab12cd",
            "Microsoft.RecoveryServices/vaults/rsv-minitrue-ab12cd",
        );
        assert_eq!(
            path,
            "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg-minitrue-test-ab12cd/providers/Microsoft.RecoveryServices/vaults/rsv-minitrue-ab12cd"
        );
    }

    #[test]
    fn test_base_url_override() {
        let client = test_client().with_base_url("http://127.0.0.1:8443");
        assert_eq!(client.base_url, "http://127.0.0.1:8443");
    }
}
