//! Error taxonomy and catalog for the harness.
//!
//! [`HarnessError`] is the top-level error consumed by the CLI and by suite
//! code; subsystem modules ([`crate::retry`], [`crate::poll`],
//! [`crate::engine`]) define narrower error types that convert into it.
//! The [`catalog`] module maps failures to stable IVH-Exxx codes with
//! remediation steps.

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

use crate::engine::EngineError;

/// Result type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Top-level error taxonomy.
///
/// Propagation policy: `Configuration` and `Credential` are fatal and never
/// retried; transient provisioning errors are absorbed by the retry engine
/// until they escalate to `ProvisioningFailed`; `Teardown` is reported as a
/// secondary diagnostic and never masks the primary failure.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("credential provider error: {0}")]
    Credential(String),

    #[error("provisioning failed after {attempts} attempt(s): {last_error}")]
    ProvisioningFailed { attempts: u32, last_error: String },

    #[error("non-retryable provisioning error: {0}")]
    NonRetryable(String),

    #[error("poll budget exhausted after {attempts} attempt(s) while waiting for {operation}")]
    PollTimeout { operation: String, attempts: u32 },

    #[error("terminal failure while waiting for {operation}: {reason}")]
    TerminalFailure { operation: String, reason: String },

    #[error("{failed} of {total} validation check(s) failed")]
    Validation { failed: usize, total: usize },

    #[error("teardown failed: {0}")]
    Teardown(String),

    #[error("invalid lifecycle transition: {0}")]
    State(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Catalog code for this error, used in reports.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration(_) => ErrorCode::ConfigValidationError,
            Self::Credential(_) => ErrorCode::CredentialTokenRejected,
            Self::ProvisioningFailed { .. } => ErrorCode::ProvisionRetryExhausted,
            Self::NonRetryable(_) => ErrorCode::ProvisionNonRetryable,
            Self::PollTimeout { .. } => ErrorCode::PollTimeout,
            Self::TerminalFailure { .. } => ErrorCode::PollTerminalFailure,
            Self::Validation { .. } => ErrorCode::ValidationCheckFailed,
            Self::Teardown(_) => ErrorCode::TeardownDestroyFailed,
            Self::State(_) => ErrorCode::ProvisionStateError,
            Self::Engine(err) => err.code(),
            Self::Io(_) => ErrorCode::ConfigValidationError,
        }
    }

    /// True when the error must abort the fixture without retry.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Credential(_) | Self::State(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = HarnessError::ProvisioningFailed {
            attempts: 5,
            last_error: "AuthorizationFailed: not yet propagated".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("5 attempt(s)"));
        assert!(text.contains("AuthorizationFailed"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(HarnessError::Configuration("bad".into()).is_fatal());
        assert!(HarnessError::Credential("no secret".into()).is_fatal());
        assert!(
            !HarnessError::ProvisioningFailed {
                attempts: 1,
                last_error: "x".into()
            }
            .is_fatal()
        );
        assert!(
            !HarnessError::Teardown("destroy failed".into()).is_fatal(),
            "teardown errors are secondary diagnostics, not aborts"
        );
    }

    #[test]
    fn test_poll_errors_map_to_distinct_codes() {
        let timeout = HarnessError::PollTimeout {
            operation: "vault state".into(),
            attempts: 10,
        };
        let terminal = HarnessError::TerminalFailure {
            operation: "vault state".into(),
            reason: "ProvisioningState=Failed".into(),
        };
        assert_ne!(timeout.code(), terminal.code());
    }
}
