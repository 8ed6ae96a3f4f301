//! Core engine for the Infrastructure Validation Harness.
//!
//! Provides everything needed to provision an ephemeral instance of a
//! declared Terraform topology, verify the provisioned state, and tear it
//! down deterministically:
//!
//! - Collision-resistant naming for concurrent fixtures ([`naming`])
//! - Fixture lifecycle with guaranteed teardown ([`fixture`])
//! - Bounded retry with error-signature classification ([`retry`])
//! - Consistency polling with fail-fast terminal states ([`poll`])
//! - Validation outcome accumulation ([`validate`])
//! - Parallel fixture orchestration ([`orchestrator`])
//!
//! The provisioning tool itself is an external collaborator reached through
//! the [`engine::ProvisioningEngine`] trait; [`engine::TerraformCli`] shells
//! out to the real binary and [`engine::ScriptedEngine`] serves tests.

pub mod config;
pub mod engine;
pub mod errors;
pub mod fixture;
pub mod naming;
pub mod orchestrator;
pub mod poll;
pub mod retry;
pub mod validate;

pub use config::BaseConfig;
pub use engine::{CommandResult, DeclaredOutputs, PlanSummary, ProvisioningEngine};
pub use errors::{HarnessError, HarnessResult};
pub use fixture::{DeploymentContext, Fixture, FixtureState};
pub use naming::NamingToken;
pub use poll::{PollDecision, PollPolicy};
pub use retry::{RetryPolicy, RetrySignature};
pub use validate::{CheckResult, ValidationOutcome};
