//! Error catalog for the Infrastructure Validation Harness.
//!
//! Defines a stable set of error codes, categorized by subsystem. Each
//! error carries a unique code (IVH-E001 through IVH-E399), a message
//! template, and remediation steps surfaced in failure reports.
//!
//! # Error Code Ranges
//!
//! | Range      | Category   | Description                              |
//! |------------|------------|------------------------------------------|
//! | E001-E049  | Config     | Base configuration and template errors   |
//! | E050-E099  | Credential | Credential provider errors               |
//! | E100-E199  | Provision  | Provisioning engine (apply/plan) errors  |
//! | E200-E249  | Poll       | Consistency polling errors               |
//! | E250-E299  | Validation | Declared-invariant check failures        |
//! | E300-E349  | Teardown   | Destroy and cleanup errors               |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering harness failure scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E049)
    // =========================================================================
    /// Configuration file not found
    ConfigNotFound,
    /// Configuration file contains invalid TOML syntax
    ConfigParseError,
    /// Configuration contains invalid values
    ConfigValidationError,
    /// Environment variable has invalid value
    ConfigEnvError,
    /// Terraform module directory missing or unreadable
    ConfigModuleDirMissing,
    /// Name template references an unknown placeholder
    ConfigBadTemplate,

    // =========================================================================
    // Credential Errors (E050-E099)
    // =========================================================================
    /// Required ARM_* environment variable is unset
    CredentialMissingEnv,
    /// AAD token request was rejected
    CredentialTokenRejected,
    /// AAD token response could not be parsed
    CredentialMalformedResponse,

    // =========================================================================
    // Provision Errors (E100-E199)
    // =========================================================================
    /// terraform init failed
    ProvisionInitFailed,
    /// terraform apply failed with a non-retryable error
    ProvisionNonRetryable,
    /// terraform apply failed after exhausting the retry budget
    ProvisionRetryExhausted,
    /// terraform plan failed
    ProvisionPlanFailed,
    /// Plan artifact JSON could not be parsed
    ProvisionPlanParseError,
    /// Declared output missing after successful apply
    ProvisionOutputMissing,
    /// Provisioning operation exceeded its deadline
    ProvisionTimeout,
    /// Lifecycle operation invoked from an invalid state
    ProvisionStateError,

    // =========================================================================
    // Poll Errors (E200-E249)
    // =========================================================================
    /// Poll budget exhausted before reaching a terminal state
    PollTimeout,
    /// External system converged to a failed terminal state
    PollTerminalFailure,

    // =========================================================================
    // Validation Errors (E250-E299)
    // =========================================================================
    /// A declared invariant check failed
    ValidationCheckFailed,
    /// Required field absent from an external representation
    ValidationFieldAbsent,

    // =========================================================================
    // Teardown Errors (E300-E349)
    // =========================================================================
    /// terraform destroy failed
    TeardownDestroyFailed,
    /// terraform destroy exceeded its deadline
    TeardownTimeout,
}

impl ErrorCode {
    /// Returns the numeric error code (without prefix).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            // Config (001-049)
            Self::ConfigNotFound => 1,
            Self::ConfigParseError => 2,
            Self::ConfigValidationError => 3,
            Self::ConfigEnvError => 4,
            Self::ConfigModuleDirMissing => 5,
            Self::ConfigBadTemplate => 6,

            // Credential (050-099)
            Self::CredentialMissingEnv => 50,
            Self::CredentialTokenRejected => 51,
            Self::CredentialMalformedResponse => 52,

            // Provision (100-199)
            Self::ProvisionInitFailed => 100,
            Self::ProvisionNonRetryable => 101,
            Self::ProvisionRetryExhausted => 102,
            Self::ProvisionPlanFailed => 103,
            Self::ProvisionPlanParseError => 104,
            Self::ProvisionOutputMissing => 105,
            Self::ProvisionTimeout => 106,
            Self::ProvisionStateError => 107,

            // Poll (200-249)
            Self::PollTimeout => 200,
            Self::PollTerminalFailure => 201,

            // Validation (250-299)
            Self::ValidationCheckFailed => 250,
            Self::ValidationFieldAbsent => 251,

            // Teardown (300-349)
            Self::TeardownDestroyFailed => 300,
            Self::TeardownTimeout => 301,
        }
    }

    /// Returns the formatted error code string (e.g., "IVH-E102").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("IVH-E{:03}", self.code_number())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=49 => ErrorCategory::Config,
            50..=99 => ErrorCategory::Credential,
            100..=199 => ErrorCategory::Provision,
            200..=249 => ErrorCategory::Poll,
            250..=299 => ErrorCategory::Validation,
            _ => ErrorCategory::Teardown,
        }
    }

    /// Returns the error message template.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            // Config
            Self::ConfigNotFound => "Configuration file not found",
            Self::ConfigParseError => "Configuration file contains invalid TOML syntax",
            Self::ConfigValidationError => "Configuration contains invalid values",
            Self::ConfigEnvError => "Environment variable has invalid value",
            Self::ConfigModuleDirMissing => "Terraform module directory missing or unreadable",
            Self::ConfigBadTemplate => "Name template references an unknown placeholder",

            // Credential
            Self::CredentialMissingEnv => "Required ARM_* environment variable is not set",
            Self::CredentialTokenRejected => "Azure AD token request was rejected",
            Self::CredentialMalformedResponse => "Azure AD token response could not be parsed",

            // Provision
            Self::ProvisionInitFailed => "terraform init failed",
            Self::ProvisionNonRetryable => {
                "terraform apply failed and the error matched no retryable signature"
            }
            Self::ProvisionRetryExhausted => {
                "terraform apply failed after exhausting the retry budget"
            }
            Self::ProvisionPlanFailed => "terraform plan failed",
            Self::ProvisionPlanParseError => "Plan artifact JSON could not be parsed",
            Self::ProvisionOutputMissing => "Declared output missing after successful apply",
            Self::ProvisionTimeout => "Provisioning operation exceeded its deadline",
            Self::ProvisionStateError => "Lifecycle operation invoked from an invalid state",

            // Poll
            Self::PollTimeout => "Poll budget exhausted before reaching a terminal state",
            Self::PollTerminalFailure => "External system converged to a failed terminal state",

            // Validation
            Self::ValidationCheckFailed => "A declared invariant check failed",
            Self::ValidationFieldAbsent => {
                "Required field absent from an external representation"
            }

            // Teardown
            Self::TeardownDestroyFailed => "terraform destroy failed",
            Self::TeardownTimeout => "terraform destroy exceeded its deadline",
        }
    }

    /// Returns remediation steps for this error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigNotFound => &[
                "Pass --config with the path to an ivh.toml",
                "Run from a directory containing ivh.toml",
            ],
            Self::ConfigParseError => &["Validate the file with `taplo check` or a TOML linter"],
            Self::ConfigValidationError => &[
                "Check location/secondary_location are distinct Azure regions",
                "Check retry and poll budgets are at least 1",
            ],
            Self::ConfigEnvError => &["Inspect the IVH_* variables reported in the error"],
            Self::ConfigModuleDirMissing => &[
                "Set module_dir to the Terraform module root",
                "Ensure the directory contains *.tf files",
            ],
            Self::ConfigBadTemplate => &[
                "Name templates may only reference the {suffix} placeholder",
            ],
            Self::CredentialMissingEnv => &[
                "Export ARM_SUBSCRIPTION_ID, ARM_TENANT_ID, ARM_CLIENT_ID, ARM_CLIENT_SECRET",
                "Service principal needs Reader on the target subscription",
            ],
            Self::CredentialTokenRejected => &[
                "Verify the client secret has not expired",
                "Verify the tenant ID matches the service principal's tenant",
            ],
            Self::CredentialMalformedResponse => &[
                "Check for proxies rewriting login.microsoftonline.com responses",
            ],
            Self::ProvisionInitFailed => &[
                "Check provider registry reachability from this host",
                "Delete .terraform and retry",
            ],
            Self::ProvisionNonRetryable => &[
                "Read the provider error text in the report",
                "If the error is transient in your environment, add a retry signature",
            ],
            Self::ProvisionRetryExhausted => &[
                "Raise max_attempts or the retry delay for slow-propagating regions",
                "Check subscription quotas for Recovery Services vaults",
            ],
            Self::ProvisionPlanFailed => &["Run `terraform validate` in the module directory"],
            Self::ProvisionPlanParseError => &[
                "Ensure the terraform binary supports `show -json` (>= 0.12)",
            ],
            Self::ProvisionOutputMissing => &[
                "Confirm the module declares the output listed in the error",
            ],
            Self::ProvisionTimeout => &["Raise apply_timeout for large topologies"],
            Self::ProvisionStateError => &[
                "Provision and plan_only require a prepared, not-yet-torn-down fixture",
            ],
            Self::PollTimeout => &[
                "Raise the poll budget for slow-converging resources",
                "Check the resource's activity log for stuck operations",
            ],
            Self::PollTerminalFailure => &[
                "The resource converged to a failed state; polling longer cannot help",
                "Inspect the provisioning error on the resource itself",
            ],
            Self::ValidationCheckFailed => &[
                "Compare expected vs observed in the report",
                "Confirm the module version under test matches the declared invariants",
            ],
            Self::ValidationFieldAbsent => &[
                "The API returned a representation without the required field",
                "Check the api-version still exposes this property",
            ],
            Self::TeardownDestroyFailed => &[
                "Run `terraform destroy` manually in the fixture working directory",
                "Soft-deleted vaults require purge before the resource group deletes",
            ],
            Self::TeardownTimeout => &["Raise destroy_timeout; vault deletion can be slow"],
        }
    }

    /// Returns a documentation URL when one exists for this error.
    #[must_use]
    pub const fn doc_url(&self) -> Option<&'static str> {
        match self {
            Self::ProvisionRetryExhausted | Self::ProvisionNonRetryable => Some(
                "https://developer.hashicorp.com/terraform/cli/commands/apply",
            ),
            Self::TeardownDestroyFailed => Some(
                "https://learn.microsoft.com/azure/backup/backup-azure-delete-vault",
            ),
            Self::CredentialMissingEnv | Self::CredentialTokenRejected => Some(
                "https://learn.microsoft.com/entra/identity-platform/v2-oauth2-client-creds-grant-flow",
            ),
            _ => None,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            doc_url: self.doc_url().map(String::from),
        }
    }

    /// All catalog entries, in code order.
    #[must_use]
    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::ConfigNotFound,
            Self::ConfigParseError,
            Self::ConfigValidationError,
            Self::ConfigEnvError,
            Self::ConfigModuleDirMissing,
            Self::ConfigBadTemplate,
            Self::CredentialMissingEnv,
            Self::CredentialTokenRejected,
            Self::CredentialMalformedResponse,
            Self::ProvisionInitFailed,
            Self::ProvisionNonRetryable,
            Self::ProvisionRetryExhausted,
            Self::ProvisionPlanFailed,
            Self::ProvisionPlanParseError,
            Self::ProvisionOutputMissing,
            Self::ProvisionTimeout,
            Self::ProvisionStateError,
            Self::PollTimeout,
            Self::PollTerminalFailure,
            Self::ValidationCheckFailed,
            Self::ValidationFieldAbsent,
            Self::TeardownDestroyFailed,
            Self::TeardownTimeout,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code_string())
    }
}

/// Error category for grouping in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Config,
    Credential,
    Provision,
    Poll,
    Validation,
    Teardown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Config => "config",
            Self::Credential => "credential",
            Self::Provision => "provision",
            Self::Poll => "poll",
            Self::Validation => "validation",
            Self::Teardown => "teardown",
        };
        write!(f, "{label}")
    }
}

/// Full error metadata for one catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub remediation: Vec<String>,
    pub doc_url: Option<String>,
}
