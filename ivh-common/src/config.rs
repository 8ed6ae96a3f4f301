//! Base configuration for fixture construction.
//!
//! A [`BaseConfig`] is the read-only template shared by every concurrent
//! fixture: module location, regions, name templates, input variables, and
//! the retry/poll budgets. Values come from an `ivh.toml` file merged with
//! `IVH_`-prefixed environment overrides, plus the bare `TEST_*` variables
//! the CI pipelines already set.
//!
//! Name templates may reference the `{suffix}` placeholder, replaced with
//! the fixture's naming token at prepare time.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::engine::VarValue;
use crate::errors::{HarnessError, HarnessResult};
use crate::poll::PollPolicy;
use crate::retry::{Backoff, RetryPolicy};

/// Default primary region, matching the module's CI environment.
pub const DEFAULT_LOCATION: &str = "eastus";
/// Default secondary region for cross-region restore.
pub const DEFAULT_SECONDARY_LOCATION: &str = "westus";

/// Read an environment variable or fall back to the supplied default.
pub fn env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

/// Base configuration template. Effectively immutable after load; shared
/// read-only across all fixtures of a run.
#[derive(Debug, Clone)]
pub struct BaseConfig {
    /// Terraform module root.
    pub module_dir: PathBuf,
    /// Directory for plan artifacts.
    pub scratch_dir: PathBuf,
    /// Resource-group name template. When `TEST_RESOURCE_GROUP` is set the
    /// template is replaced with that fixed, pre-existing group.
    pub resource_group: String,
    pub location: String,
    pub secondary_location: String,
    pub environment: String,
    pub alert_emails: Vec<String>,
    /// Input-variable templates beyond the built-in set.
    pub extra_vars: BTreeMap<String, VarValue>,
    pub retry: RetryPolicy,
    pub poll: PollPolicy,
    pub apply_timeout: Duration,
    pub destroy_timeout: Duration,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            module_dir: PathBuf::from("."),
            scratch_dir: env::temp_dir().join("ivh"),
            resource_group: "rg-minitrue-test-{suffix}".to_string(),
            location: DEFAULT_LOCATION.to_string(),
            secondary_location: DEFAULT_SECONDARY_LOCATION.to_string(),
            environment: "test".to_string(),
            alert_emails: vec!["backup-ci@example.com".to_string()],
            extra_vars: BTreeMap::new(),
            retry: default_retry_policy(),
            poll: PollPolicy::new(10, Duration::from_secs(30)),
            apply_timeout: Duration::from_secs(1800),
            destroy_timeout: Duration::from_secs(3600),
        }
    }
}

/// Transient provider errors retried by default: control-plane propagation
/// lag and the vault soft-delete conflict.
fn default_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(120),
        backoff: Backoff::Fixed,
        signatures: Vec::new(),
    }
    .with_signature("AuthorizationFailed", "waiting for RBAC propagation")
    .with_signature("ResourceGroupNotFound", "resource group not yet visible")
    .with_signature(
        "PrincipalNotFound",
        "waiting for service-principal propagation",
    )
    .with_signature(
        "VaultAlreadySoftDeletedOrExists",
        "vault is in soft-delete state",
    )
}

impl BaseConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            HarnessError::Configuration(format!(
                "configuration file {} not found: {err}",
                path.display()
            ))
        })?;
        let parsed: RawConfig = toml::from_str(&raw).map_err(|err| {
            HarnessError::Configuration(format!("invalid TOML in {}: {err}", path.display()))
        })?;

        let mut config = Self::default();
        parsed.merge_into(&mut config)?;
        config.apply_env_overrides()?;
        config.validate()?;
        debug!(module_dir = %config.module_dir.display(), "base configuration loaded");
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without an ivh.toml.
    pub fn from_env(module_dir: impl Into<PathBuf>) -> HarnessResult<Self> {
        let mut config = Self {
            module_dir: module_dir.into(),
            ..Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> HarnessResult<()> {
        // Bare CI variables predate the IVH_ prefix and keep working.
        if let Ok(rg) = env::var("TEST_RESOURCE_GROUP")
            && !rg.is_empty()
        {
            self.resource_group = rg;
        }
        self.location = env_or_default("TEST_LOCATION", &self.location);
        self.secondary_location =
            env_or_default("TEST_SECONDARY_LOCATION", &self.secondary_location);

        let mut parser = EnvParser::new();
        if let Some(dir) = parser.get_path("MODULE_DIR") {
            self.module_dir = dir;
        }
        if let Some(dir) = parser.get_path("SCRATCH_DIR") {
            self.scratch_dir = dir;
        }
        if let Some(n) = parser.get_u32("RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = n;
        }
        if let Some(d) = parser.get_duration("RETRY_DELAY") {
            self.retry.delay = d;
        }
        if let Some(n) = parser.get_u32("POLL_MAX_ATTEMPTS") {
            self.poll.max_attempts = n;
        }
        if let Some(d) = parser.get_duration("POLL_INTERVAL") {
            self.poll.interval = d;
        }
        if let Some(d) = parser.get_duration("APPLY_TIMEOUT") {
            self.apply_timeout = d;
        }
        if let Some(d) = parser.get_duration("DESTROY_TIMEOUT") {
            self.destroy_timeout = d;
        }

        if parser.has_errors() {
            let details: Vec<String> =
                parser.take_errors().iter().map(ToString::to_string).collect();
            return Err(HarnessError::Configuration(details.join("; ")));
        }
        Ok(())
    }

    /// Fail on malformed configuration. Fatal, never retried.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.location.is_empty() || self.secondary_location.is_empty() {
            return Err(HarnessError::Configuration(
                "location and secondary_location must be set".to_string(),
            ));
        }
        if self.location == self.secondary_location {
            return Err(HarnessError::Configuration(format!(
                "secondary_location must differ from location ({})",
                self.location
            )));
        }
        if self.environment.is_empty() {
            return Err(HarnessError::Configuration(
                "environment must be set".to_string(),
            ));
        }
        // Probe-expand every template so bad placeholders fail at prepare
        // time, not mid-apply.
        expand_template(&self.resource_group, "probe0")?;
        for (key, value) in &self.extra_vars {
            if let VarValue::String(s) = value {
                expand_template(s, "probe0").map_err(|err| {
                    HarnessError::Configuration(format!("var {key}: {err}"))
                })?;
            }
        }
        Ok(())
    }

    /// Concrete, collision-free input variables for one fixture.
    pub fn input_vars(&self, suffix: &str) -> HarnessResult<BTreeMap<String, VarValue>> {
        let mut vars: BTreeMap<String, VarValue> = BTreeMap::new();
        vars.insert(
            "resource_group_name".into(),
            expand_template(&self.resource_group, suffix)?.into(),
        );
        vars.insert("location".into(), self.location.as_str().into());
        vars.insert(
            "secondary_location".into(),
            self.secondary_location.as_str().into(),
        );
        vars.insert("environment".into(), self.environment.as_str().into());
        vars.insert("vault_name".into(), format!("rsv-minitrue-{suffix}").into());
        vars.insert(
            "snapshot_resource_group_name".into(),
            format!("rg-minitrue-snaps-{suffix}").into(),
        );
        vars.insert(
            "alert_email_addresses".into(),
            VarValue::List(self.alert_emails.clone()),
        );
        // Leave workspace_id empty so the module creates one.
        vars.insert("log_analytics_workspace_id".into(), "".into());
        vars.insert(
            "log_analytics_workspace_name".into(),
            format!("law-minitrue-{suffix}").into(),
        );
        // No real VMs are attached for infra-level runs.
        for key in [
            "app_vm_ids",
            "web_vm_ids",
            "app_vm_os_disk_ids",
            "web_vm_os_disk_ids",
            "app_vm_data_disk_ids",
            "web_vm_data_disk_ids",
        ] {
            vars.insert(key.into(), VarValue::List(Vec::new()));
        }

        for (key, value) in &self.extra_vars {
            let concrete = match value {
                VarValue::String(s) => VarValue::String(expand_template(s, suffix)?),
                other => other.clone(),
            };
            vars.insert(key.clone(), concrete);
        }
        Ok(vars)
    }

    /// Plan-artifact path for one fixture.
    pub fn plan_path(&self, suffix: &str) -> PathBuf {
        self.scratch_dir.join(format!("tfplan-{suffix}"))
    }
}

/// Expand `{suffix}` in a name template; any other placeholder is a
/// configuration error.
pub fn expand_template(template: &str, suffix: &str) -> HarnessResult<String> {
    let expanded = template.replace("{suffix}", suffix);
    if let Some(start) = expanded.find('{') {
        let rest = &expanded[start..];
        let end = rest.find('}').map(|i| start + i + 1).unwrap_or(expanded.len());
        return Err(HarnessError::Configuration(format!(
            "unknown placeholder {} in template {template:?}",
            &expanded[start..end]
        )));
    }
    Ok(expanded)
}

// ── TOML schema ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    module_dir: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
    resource_group: Option<String>,
    location: Option<String>,
    secondary_location: Option<String>,
    environment: Option<String>,
    alert_emails: Option<Vec<String>>,
    apply_timeout: Option<String>,
    destroy_timeout: Option<String>,
    #[serde(default)]
    retry: Option<RawRetry>,
    #[serde(default)]
    poll: Option<RawPoll>,
    #[serde(default)]
    vars: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRetry {
    max_attempts: Option<u32>,
    delay: Option<String>,
    max_delay: Option<String>,
    backoff: Option<String>,
    /// Replaces the default signature table when present.
    signatures: Option<Vec<RawSignature>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSignature {
    pattern: String,
    rationale: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPoll {
    max_attempts: Option<u32>,
    interval: Option<String>,
}

impl RawConfig {
    fn merge_into(self, config: &mut BaseConfig) -> HarnessResult<()> {
        if let Some(v) = self.module_dir {
            config.module_dir = v;
        }
        if let Some(v) = self.scratch_dir {
            config.scratch_dir = v;
        }
        if let Some(v) = self.resource_group {
            config.resource_group = v;
        }
        if let Some(v) = self.location {
            config.location = v;
        }
        if let Some(v) = self.secondary_location {
            config.secondary_location = v;
        }
        if let Some(v) = self.environment {
            config.environment = v;
        }
        if let Some(v) = self.alert_emails {
            config.alert_emails = v;
        }
        if let Some(v) = self.apply_timeout {
            config.apply_timeout = parse_duration("apply_timeout", &v)?;
        }
        if let Some(v) = self.destroy_timeout {
            config.destroy_timeout = parse_duration("destroy_timeout", &v)?;
        }
        if let Some(retry) = self.retry {
            if let Some(v) = retry.max_attempts {
                config.retry.max_attempts = v;
            }
            if let Some(v) = retry.delay {
                config.retry.delay = parse_duration("retry.delay", &v)?;
            }
            if let Some(v) = retry.max_delay {
                config.retry.max_delay = parse_duration("retry.max_delay", &v)?;
            }
            if let Some(v) = retry.backoff {
                config.retry.backoff = match v.as_str() {
                    "fixed" => Backoff::Fixed,
                    "exponential" => Backoff::Exponential,
                    other => {
                        return Err(HarnessError::Configuration(format!(
                            "retry.backoff must be \"fixed\" or \"exponential\", got {other:?}"
                        )));
                    }
                };
            }
            if let Some(signatures) = retry.signatures {
                config.retry.signatures = signatures
                    .into_iter()
                    .map(|s| crate::retry::RetrySignature::new(s.pattern, s.rationale))
                    .collect();
            }
        }
        if let Some(poll) = self.poll {
            if let Some(v) = poll.max_attempts {
                config.poll.max_attempts = v;
            }
            if let Some(v) = poll.interval {
                config.poll.interval = parse_duration("poll.interval", &v)?;
            }
        }
        for (key, value) in self.vars {
            config.extra_vars.insert(key.clone(), toml_var(&key, value)?);
        }
        Ok(())
    }
}

fn parse_duration(field: &str, raw: &str) -> HarnessResult<Duration> {
    humantime::parse_duration(raw).map_err(|err| {
        HarnessError::Configuration(format!("invalid duration for {field}: {raw:?} ({err})"))
    })
}

fn toml_var(key: &str, value: toml::Value) -> HarnessResult<VarValue> {
    match value {
        toml::Value::String(s) => Ok(VarValue::String(s)),
        toml::Value::Boolean(b) => Ok(VarValue::Bool(b)),
        toml::Value::Integer(i) => Ok(VarValue::Int(i)),
        toml::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    toml::Value::String(s) => out.push(s),
                    other => {
                        return Err(HarnessError::Configuration(format!(
                            "var {key}: list elements must be strings, got {other}"
                        )));
                    }
                }
            }
            Ok(VarValue::List(out))
        }
        other => Err(HarnessError::Configuration(format!(
            "var {key}: unsupported value {other}"
        ))),
    }
}

// ── Environment parsing ────────────────────────────────────────────────────

/// Type-safe parser for `IVH_`-prefixed environment variables.
///
/// Collects errors during parsing so all issues can be reported at once.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<String>,
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvParser {
    pub fn new() -> Self {
        Self {
            prefix: "IVH_",
            errors: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }

    fn var(&self, name: &str) -> Option<String> {
        env::var(format!("{}{}", self.prefix, name)).ok().filter(|v| !v.is_empty())
    }

    pub fn get_path(&mut self, name: &str) -> Option<PathBuf> {
        self.var(name).map(PathBuf::from)
    }

    pub fn get_u32(&mut self, name: &str) -> Option<u32> {
        let raw = self.var(name)?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                self.errors.push(format!(
                    "invalid value for {}{name}: expected integer, got {raw:?}",
                    self.prefix
                ));
                None
            }
        }
    }

    pub fn get_duration(&mut self, name: &str) -> Option<Duration> {
        let raw = self.var(name)?;
        match humantime::parse_duration(&raw) {
            Ok(v) => Some(v),
            Err(_) => {
                self.errors.push(format!(
                    "invalid duration for {}{name}: {raw:?}",
                    self.prefix
                ));
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap()
}
