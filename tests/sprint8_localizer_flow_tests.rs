//! Sprint 8: Localizer Flow Tests
//!
//! Coverage pass through the orchestrator into a ranking, the probe-driven
//! score override, and the wasted-effort measurement over the final order.

use anyhow::Result;
use culpa::config::Config;
use culpa::coverage::{CoverageRecord, InstrumentedExecutor, TestCoverage};
use culpa::element::{CodeElementName, CoverageStatus, Granularity};
use culpa::orchestrator::Orchestrator;
use culpa::ranker::{mean_wasted_effort, FormulaChoice};
use culpa::source_model::TextSourceModel;
use culpa::test_runner::TestOutcome;
use std::collections::BTreeSet;
use tempfile::TempDir;

struct FixtureExecutor {
    runs: Vec<TestCoverage>,
}

impl InstrumentedExecutor for FixtureExecutor {
    fn test_methods(&self, _test_class: &str) -> Result<Vec<String>> {
        Ok(self.runs.iter().map(|r| r.test.clone()).collect())
    }

    fn run_instrumented(&self, test: &str) -> Result<TestCoverage> {
        self.runs
            .iter()
            .find(|r| r.test == test)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown test {}", test))
    }
}

fn run(test: &str, passed: bool, covered: &[&str]) -> TestCoverage {
    TestCoverage {
        test: test.to_string(),
        outcome: if passed {
            TestOutcome::Passed
        } else {
            TestOutcome::Failed(None)
        },
        records: covered
            .iter()
            .map(|canonical| CoverageRecord {
                element: CodeElementName::from_canonical(canonical),
                status: CoverageStatus::Covered,
            })
            .collect(),
    }
}

fn geo_fixture() -> FixtureExecutor {
    FixtureExecutor {
        runs: vec![
            run(
                "geo.GeoTest#testArea",
                false,
                &["geo.rectangle#area", "geo.rectangle#apply"],
            ),
            run(
                "geo.GeoTest#testApply",
                false,
                &["geo.rectangle#area", "geo.rectangle#apply"],
            ),
            run("geo.GeoTest#testPerimeter", true, &["geo.rectangle#apply"]),
        ],
    }
}

#[test]
fn test_initial_ranking_orders_by_suspiciousness() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        report_dir: dir.path().join("reports"),
        ..Config::default()
    };
    let source = TextSourceModel::new();
    let executor = geo_fixture();
    let orchestrator = Orchestrator::new(&config, &source, &executor);

    let ranker = orchestrator
        .initial_ranking("geo.GeoTest", Granularity::Method, FormulaChoice::Ochiai)
        .unwrap();
    assert_eq!(ranker.totals(), (2, 1));

    let ranked: Vec<&str> = ranker
        .rank()
        .iter()
        .map(|e| e.element().canonical())
        .collect();
    // area fails in every exercising test; apply also passed once
    assert_eq!(ranked, vec!["geo.rectangle#area", "geo.rectangle#apply"]);
    let area = CodeElementName::from_canonical("geo.rectangle#area");
    assert_eq!(ranker.score(&area), Some(1.0));
}

#[test]
fn test_probe_override_promotes_the_implicated_element() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        report_dir: dir.path().join("reports"),
        ..Config::default()
    };
    let source = TextSourceModel::new();
    let executor = geo_fixture();
    let orchestrator = Orchestrator::new(&config, &source, &executor);

    let mut ranker = orchestrator
        .initial_ranking("geo.GeoTest", Granularity::Method, FormulaChoice::Tarantula)
        .unwrap();
    let apply = CodeElementName::from_canonical("geo.rectangle#apply");
    let before = ranker.score(&apply).unwrap();
    assert!(before < 1.0);

    assert!(ranker.update_score(&apply, 1.0, "probe of x implicated geo.rectangle#apply:4"));
    let ranked = ranker.rank();
    assert_eq!(ranked[0].element(), &apply);
    assert!(ranked[0].probe_note().unwrap().contains("apply:4"));
}

#[test]
fn test_wasted_effort_over_probed_ranking() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        report_dir: dir.path().join("reports"),
        ..Config::default()
    };
    let source = TextSourceModel::new();
    let executor = geo_fixture();
    let orchestrator = Orchestrator::new(&config, &source, &executor);

    let mut ranker = orchestrator
        .initial_ranking("geo.GeoTest", Granularity::Method, FormulaChoice::Ochiai)
        .unwrap();
    let known = BTreeSet::from([CodeElementName::from_canonical("geo.rectangle#apply")]);
    ranker.highlight_methods(&known);
    let before = ranker.wasted_effort().unwrap();
    assert_eq!(before, 1);

    // After the probe the buggy method tops the ranking
    let apply = CodeElementName::from_canonical("geo.rectangle#apply");
    ranker.update_score(&apply, 1.0, "probe implicated geo.rectangle#apply:4");
    assert_eq!(ranker.wasted_effort(), Some(0));
    assert!((mean_wasted_effort(&[before, 0]) - 0.5).abs() < 1e-12);
}
