//! Validation outcome accumulation.
//!
//! Each suite evaluates a fixed table of declared invariants against
//! externally-owned resource representations. Checks are independent and
//! never short-circuit: one run reports every violation, not just the
//! first. A [`ValidationOutcome`] is assembled once per fixture and never
//! mutated after reporting.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::HarnessError;

/// One evaluated check: what was declared, what was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub expected: String,
    pub observed: String,
    pub passed: bool,
}

/// Ordered sequence of check results for one fixture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationOutcome {
    suite: String,
    checks: Vec<CheckResult>,
}

impl ValidationOutcome {
    pub fn new(suite: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
            checks: Vec::new(),
        }
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }

    pub fn checks(&self) -> &[CheckResult] {
        &self.checks
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    /// True when at least one check ran and none failed. An empty outcome
    /// verified nothing and counts as a failure.
    pub fn passed(&self) -> bool {
        !self.checks.is_empty() && self.checks.iter().all(|c| c.passed)
    }

    /// The aggregated error for a failing outcome, if any.
    pub fn error(&self) -> Option<HarnessError> {
        let failed = self.failed_count();
        if failed == 0 && !self.checks.is_empty() {
            None
        } else {
            Some(HarnessError::Validation {
                failed,
                total: self.checks.len(),
            })
        }
    }

    fn record(&mut self, name: &str, expected: String, observed: String, passed: bool) -> bool {
        self.checks.push(CheckResult {
            name: name.to_string(),
            expected,
            observed,
            passed,
        });
        passed
    }

    /// Observed value must equal the declared one.
    pub fn check_eq<T>(&mut self, name: &str, expected: T, observed: T) -> bool
    where
        T: PartialEq + std::fmt::Display,
    {
        let passed = expected == observed;
        self.record(name, expected.to_string(), observed.to_string(), passed)
    }

    /// Observed value must contain the declared substring.
    pub fn check_contains(&mut self, name: &str, observed: &str, needle: &str) -> bool {
        let passed = observed.contains(needle);
        self.record(
            name,
            format!("contains {needle:?}"),
            observed.to_string(),
            passed,
        )
    }

    /// Observed value must be non-empty.
    pub fn check_not_empty(&mut self, name: &str, observed: &str) -> bool {
        let passed = !observed.is_empty();
        self.record(
            name,
            "non-empty".to_string(),
            if passed { observed.to_string() } else { "<empty>".to_string() },
            passed,
        )
    }

    /// Observed value must match the pattern. An invalid pattern records a
    /// failed check rather than panicking.
    pub fn check_matches(&mut self, name: &str, observed: &str, pattern: &str) -> bool {
        match Regex::new(pattern) {
            Ok(re) => {
                let passed = re.is_match(observed);
                self.record(name, format!("matches /{pattern}/"), observed.to_string(), passed)
            }
            Err(err) => self.record(
                name,
                format!("matches /{pattern}/"),
                format!("<invalid pattern: {err}>"),
                false,
            ),
        }
    }

    /// Arbitrary predicate with explicit expected/observed descriptions.
    pub fn check_true(&mut self, name: &str, passed: bool, expected: &str, observed: &str) -> bool {
        self.record(name, expected.to_string(), observed.to_string(), passed)
    }

    /// Unwrap an optionally-absent field of an external representation.
    ///
    /// Representations treat every nested field as possibly unset; an
    /// absent required field records a descriptive failure and returns
    /// `None` so the caller can skip dependent checks without crashing.
    pub fn field<'a, T: ?Sized>(&mut self, path: &str, value: Option<&'a T>) -> Option<&'a T> {
        match value {
            Some(inner) => Some(inner),
            None => {
                self.record(
                    &format!("{path} present"),
                    "present".to_string(),
                    "absent".to_string(),
                    false,
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checks_accumulate_without_short_circuit() {
        let mut outcome = ValidationOutcome::new("vault");
        outcome.check_eq("sku", "Standard", "Basic");
        outcome.check_eq("soft_delete", "Enabled", "Enabled");
        outcome.check_contains(
            "vault id type",
            "/subscriptions/x/providers/Microsoft.RecoveryServices/vaults/rsv-1",
            "Microsoft.RecoveryServices/vaults",
        );

        assert_eq!(outcome.len(), 3, "failing check must not stop later checks");
        assert_eq!(outcome.failed_count(), 1);
        assert!(!outcome.passed());
        let failure = outcome.failures().next().expect("one failure");
        assert_eq!(failure.name, "sku");
        assert_eq!(failure.expected, "Standard");
        assert_eq!(failure.observed, "Basic");
    }

    #[test]
    fn test_empty_outcome_is_not_a_pass() {
        let outcome = ValidationOutcome::new("vault");
        assert!(!outcome.passed());
        assert!(outcome.error().is_some());
    }

    #[test]
    fn test_all_passing_outcome_has_no_error() {
        let mut outcome = ValidationOutcome::new("vault");
        outcome.check_not_empty("vault name", "rsv-minitrue-ab12cd");
        outcome.check_matches("retention", "P7D", r"^P\d+D$");
        assert!(outcome.passed());
        assert!(outcome.error().is_none());
    }

    #[test]
    fn test_error_carries_counts() {
        let mut outcome = ValidationOutcome::new("policies");
        outcome.check_eq("daily retention", 30, 30);
        outcome.check_eq("weekly retention", 12, 4);
        outcome.check_eq("monthly retention", 12, 4);

        match outcome.error() {
            Some(HarnessError::Validation { failed, total }) => {
                assert_eq!(failed, 2);
                assert_eq!(total, 3);
            }
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_field_absent_records_failure_and_returns_none() {
        let mut outcome = ValidationOutcome::new("vault");
        let missing: Option<&str> = None;
        assert!(outcome.field("properties.securitySettings", missing).is_none());
        assert_eq!(outcome.failed_count(), 1);
        let failure = outcome.failures().next().expect("failure recorded");
        assert!(failure.name.contains("securitySettings"));
        assert_eq!(failure.observed, "absent");
    }

    #[test]
    fn test_field_present_passes_through_silently() {
        let mut outcome = ValidationOutcome::new("vault");
        let state = "Enabled".to_string();
        let got = outcome.field("softDeleteState", Some(&state));
        assert_eq!(got, Some(&state));
        assert!(outcome.is_empty(), "presence alone records no check");
    }

    #[test]
    fn test_invalid_regex_fails_descriptively() {
        let mut outcome = ValidationOutcome::new("policies");
        assert!(!outcome.check_matches("broken", "value", "("));
        let failure = outcome.failures().next().expect("failure");
        assert!(failure.observed.contains("invalid pattern"));
    }
}
