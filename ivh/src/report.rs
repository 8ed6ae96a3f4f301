//! Human-readable run reporting.
//!
//! The harness exposes exactly what the spec promises per fixture: a
//! pass/fail verdict, the list of check descriptions (name, expected,
//! observed), and elapsed time. Teardown diagnostics ride along as
//! secondary information.

use std::fmt::Write;

use ivh_common::orchestrator::RunSummary;

/// Render the summary as the terminal report.
pub fn render(summary: &RunSummary) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "run {} started {}", summary.run_id, summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out);

    let mut reports: Vec<_> = summary.reports.iter().collect();
    reports.sort_by(|a, b| a.suite.cmp(&b.suite));

    for report in reports {
        let verdict = if report.passed() { "PASS" } else { "FAIL" };
        let suffix = report.suffix.as_deref().unwrap_or("-");
        let _ = writeln!(
            out,
            "{verdict} {:<12} suffix={suffix:<8} {:>8.1}s",
            report.suite,
            report.elapsed.as_secs_f64()
        );

        if let Some(outcome) = &report.outcome {
            for check in outcome.checks() {
                let mark = if check.passed { "ok" } else { "FAILED" };
                let _ = writeln!(out, "  [{mark}] {}", check.name);
                if !check.passed {
                    let _ = writeln!(out, "         expected: {}", check.expected);
                    let _ = writeln!(out, "         observed: {}", check.observed);
                }
            }
        }
        if let Some(error) = &report.error {
            let _ = writeln!(out, "  error: {error}");
        }
        if let Some(teardown) = &report.teardown_error {
            let _ = writeln!(out, "  teardown diagnostic: {teardown}");
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} passed, {} failed in {:.1}s",
        summary.passed_count(),
        summary.failed_count(),
        summary.elapsed.as_secs_f64()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use ivh_common::orchestrator::FixtureReport;
    use ivh_common::validate::ValidationOutcome;

    fn summary() -> RunSummary {
        let mut passing = ValidationOutcome::new("vault");
        passing.check_eq("soft delete state", "Enabled", "Enabled");

        let mut failing = ValidationOutcome::new("policies");
        failing.check_eq("daily retention", 30, 7);

        RunSummary {
            run_id: uuid::Uuid::new_v4(),
            started_at: Utc::now(),
            elapsed: Duration::from_secs(63),
            reports: vec![
                FixtureReport {
                    suite: "vault".into(),
                    suffix: Some("ab12cd".into()),
                    outcome: Some(passing),
                    error: None,
                    teardown_error: None,
                    elapsed: Duration::from_secs(40),
                },
                FixtureReport {
                    suite: "policies".into(),
                    suffix: Some("ef34gh".into()),
                    outcome: Some(failing),
                    error: Some("1 of 1 validation check(s) failed".into()),
                    teardown_error: Some("destroy exit 1: purge pending".into()),
                    elapsed: Duration::from_secs(23),
                },
            ],
        }
    }

    #[test]
    fn test_render_shows_verdicts_and_counts() {
        let text = render(&summary());
        assert!(text.contains("PASS vault"));
        assert!(text.contains("FAIL policies"));
        assert!(text.contains("1 passed, 1 failed"));
    }

    #[test]
    fn test_render_expands_only_failed_checks() {
        let text = render(&summary());
        assert!(text.contains("expected: 30"));
        assert!(text.contains("observed: 7"));
        assert!(!text.contains("expected: Enabled"), "passing checks stay one-line");
    }

    #[test]
    fn test_render_carries_teardown_diagnostics() {
        let text = render(&summary());
        assert!(text.contains("teardown diagnostic: destroy exit 1: purge pending"));
    }
}
