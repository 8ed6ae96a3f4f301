//! Process-wide credential provider.
//!
//! One service-principal credential is constructed from the `ARM_*`
//! environment, wrapped in a [`TokenProvider`] that caches the AAD access
//! token until shortly before expiry, and shared read-only across every
//! concurrent fixture through [`shared`]. Construction failure is fatal:
//! no credential, no run.

use std::env;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

/// Scope for ARM data-plane reads.
const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Refresh this long before the token actually expires.
const EXPIRY_SKEW_SECS: i64 = 300;

/// Errors from credential construction or token acquisition.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("missing environment variables: {0}")]
    MissingEnv(String),

    #[error("token request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("token response malformed: {0}")]
    Malformed(String),

    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Service-principal credentials read from the environment.
#[derive(Clone)]
pub struct AzureCredentials {
    pub subscription_id: String,
    pub tenant_id: String,
    pub client_id: String,
    client_secret: String,
}

impl AzureCredentials {
    pub fn new(
        subscription_id: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Read `ARM_SUBSCRIPTION_ID`, `ARM_TENANT_ID`, `ARM_CLIENT_ID`, and
    /// `ARM_CLIENT_SECRET`, reporting every missing variable at once.
    pub fn from_env() -> Result<Self, CredentialError> {
        let mut missing = Vec::new();
        let mut read = |key: &'static str| match env::var(key) {
            Ok(v) if !v.is_empty() => v,
            _ => {
                missing.push(key);
                String::new()
            }
        };

        let credentials = Self {
            subscription_id: read("ARM_SUBSCRIPTION_ID"),
            tenant_id: read("ARM_TENANT_ID"),
            client_id: read("ARM_CLIENT_ID"),
            client_secret: read("ARM_CLIENT_SECRET"),
        };

        if missing.is_empty() {
            Ok(credentials)
        } else {
            Err(CredentialError::MissingEnv(missing.join(", ")))
        }
    }
}

// The secret must never reach logs, so Debug is hand-rolled.
impl std::fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("subscription_id", &self.subscription_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(EXPIRY_SKEW_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Client-credentials token flow with a cached access token.
///
/// Construct once, read many: the cache lock is held only for the cheap
/// freshness check or the single refresh request.
pub struct TokenProvider {
    credentials: AzureCredentials,
    http: reqwest::Client,
    authority: String,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(credentials: AzureCredentials) -> Self {
        Self {
            credentials,
            http: reqwest::Client::new(),
            authority: "https://login.microsoftonline.com".to_string(),
            cache: Mutex::new(None),
        }
    }

    /// Override the AAD authority, for sovereign clouds and tests.
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    pub fn subscription_id(&self) -> &str {
        &self.credentials.subscription_id
    }

    /// A bearer token for ARM, refreshed when within the expiry skew.
    pub async fn bearer(&self) -> Result<String, CredentialError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && cached.is_fresh(Utc::now())
        {
            return Ok(cached.access_token.clone());
        }

        debug!(tenant = %self.credentials.tenant_id, "requesting AAD access token");
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority, self.credentials.tenant_id
        );
        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("scope", MANAGEMENT_SCOPE),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CredentialError::Rejected {
                status: status.as_u16(),
                detail: truncate(&detail, 512),
            });
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|err| CredentialError::Malformed(err.to_string()))?;

        let token = CachedToken {
            access_token: parsed.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(parsed.expires_in),
        };
        let bearer = token.access_token.clone();
        *cache = Some(token);
        Ok(bearer)
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}

/// The process-wide provider: constructed on first use from the `ARM_*`
/// environment, then reused by every fixture for the life of the process.
pub fn shared() -> Result<Arc<TokenProvider>, &'static CredentialError> {
    static SHARED: OnceLock<Result<Arc<TokenProvider>, CredentialError>> = OnceLock::new();
    SHARED
        .get_or_init(|| {
            AzureCredentials::from_env().map(|credentials| Arc::new(TokenProvider::new(credentials)))
        })
        .as_ref()
        .map(Arc::clone)
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex as StdMutex, OnceLock};

    static ENV_LOCK: OnceLock<StdMutex<()>> = OnceLock::new();
    ENV_LOCK.get_or_init(|| StdMutex::new(())).lock().unwrap()
}

#[cfg(test)]
// set_var/remove_var are unsafe in edition 2024; serialized via env_test_lock.
#[allow(unsafe_code)]
mod tests {
    use super::*;

    const ARM_VARS: [&str; 4] = [
        "ARM_SUBSCRIPTION_ID",
        "ARM_TENANT_ID",
        "ARM_CLIENT_ID",
        "ARM_CLIENT_SECRET",
    ];

    fn clear_arm_vars() {
        for key in ARM_VARS {
            unsafe { env::remove_var(key) };
        }
    }

    #[test]
    fn test_from_env_reports_every_missing_variable() {
        let _guard = env_test_lock();
        clear_arm_vars();
        unsafe { env::set_var("ARM_SUBSCRIPTION_ID", "00000000-0000-0000-0000-000000000000") };

        let err = AzureCredentials::from_env().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("ARM_TENANT_ID"));
        assert!(text.contains("ARM_CLIENT_ID"));
        assert!(text.contains("ARM_CLIENT_SECRET"));
        assert!(!text.contains("ARM_SUBSCRIPTION_ID,"), "present var not listed");

        clear_arm_vars();
    }

    #[test]
    fn test_from_env_succeeds_with_full_environment() {
        let _guard = env_test_lock();
        for key in ARM_VARS {
            unsafe { env::set_var(key, "value") };
        }

        let credentials = AzureCredentials::from_env().expect("all vars set");
        assert_eq!(credentials.subscription_id, "value");

        clear_arm_vars();
    }

    #[test]
    fn test_debug_masks_the_client_secret() {
        let credentials = AzureCredentials {
            subscription_id: "sub".into(),
            tenant_id: "tenant".into(),
            client_id: "client".into(),
            client_secret: "hunter2".into(),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_cached_token_freshness_honors_skew() {
        let now = Utc::now();
        let fresh = CachedToken {
            access_token: "t".into(),
            expires_at: now + ChronoDuration::seconds(EXPIRY_SKEW_SECS + 60),
        };
        let stale = CachedToken {
            access_token: "t".into(),
            expires_at: now + ChronoDuration::seconds(EXPIRY_SKEW_SECS - 60),
        };
        assert!(fresh.is_fresh(now));
        assert!(!stale.is_fresh(now), "inside the skew window counts as expired");
    }

    #[test]
    fn test_token_response_parses() {
        let parsed: TokenResponse = serde_json::from_str(
            r#"{"token_type":"Bearer","expires_in":3599,"ext_expires_in":3599,"access_token":"eyJ0eXAi"}"#,
        )
        .expect("AAD response shape");
        assert_eq!(parsed.access_token, "eyJ0eXAi");
        assert_eq!(parsed.expires_in, 3599);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 512), "short");
        let long = "é".repeat(600);
        let cut = truncate(&long, 511);
        assert!(cut.len() <= 515);
        assert!(cut.ends_with('…'));
    }
}
