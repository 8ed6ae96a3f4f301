//! Read-only Azure Resource Manager access for the validation harness.
//!
//! The harness consumes Azure strictly through narrow per-resource-kind
//! `get` operations: fetch one representation, hand it to the validation
//! layer. Representations are nested, optionally-absent-field structures;
//! callers must treat every field as possibly unset and fail descriptively
//! rather than crash.
//!
//! Credentials are a process-wide, lazily-initialized singleton
//! ([`credentials::shared`]): constructed once from the `ARM_*`
//! environment, reused by every concurrent fixture, fatal when absent.

pub mod clients;
pub mod credentials;
pub mod models;

pub use clients::{ArmClient, ArmError};
pub use credentials::{AzureCredentials, CredentialError, TokenProvider};
