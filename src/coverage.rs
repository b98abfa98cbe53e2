//! Coverage engine and report artifacts
//!
//! Sprint 2: per-element pass/fail coverage vectors
//!
//! Runs every test method of a class under instrumentation and aggregates,
//! per code element and per granularity, how many passing and failing tests
//! exercised it. Tests execute sequentially in isolated processes; no
//! ranking state is touched until the full pass completes. The aggregated
//! statuses are persisted as three plain-text reports (class/method/line)
//! treated as an on-disk cache.

use anyhow::{Context, Result};
use fnv::FnvHashMap;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

use crate::config::Config;
use crate::element::{CodeElementName, CoverageStatus, Granularity};
use crate::test_runner::{parse_assertion_line, ProcessTestExecutor, TestExecutor, TestOutcome};

/// Coverage of one element in one test execution
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageRecord {
    pub element: CodeElementName,
    pub status: CoverageStatus,
}

/// One test's outcome plus its per-element coverage vector
#[derive(Debug, Clone)]
pub struct TestCoverage {
    pub test: String,
    pub outcome: TestOutcome,
    pub records: Vec<CoverageRecord>,
}

/// Pass/fail exercise counts of one element over the whole suite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElementCounts {
    pub passed: u32,
    pub failed: u32,
}

fn status_rank(status: CoverageStatus) -> u8 {
    match status {
        CoverageStatus::NotCovered => 0,
        CoverageStatus::PartiallyCovered => 1,
        CoverageStatus::Covered => 2,
    }
}

/// Aggregated coverage over one analysis target
///
/// Element identities are stable across the run: the same element can be
/// looked up at any granularity it was recorded under without re-parsing.
#[derive(Debug, Default)]
pub struct CoverageCollection {
    counts: FnvHashMap<CodeElementName, ElementCounts>,
    statuses: BTreeMap<CodeElementName, CoverageStatus>,
    total_passed: u32,
    total_failed: u32,
}

impl CoverageCollection {
    pub fn new() -> CoverageCollection {
        CoverageCollection::default()
    }

    /// Fold one test execution into the aggregate.
    pub fn record_test(&mut self, coverage: &TestCoverage) {
        let passed = coverage.outcome.passed();
        if passed {
            self.total_passed += 1;
        } else {
            self.total_failed += 1;
        }
        for record in &coverage.records {
            let status = self
                .statuses
                .entry(record.element.clone())
                .or_insert(record.status);
            if status_rank(record.status) > status_rank(*status) {
                *status = record.status;
            }
            if record.status.is_exercised() {
                let counts = self.counts.entry(record.element.clone()).or_default();
                if passed {
                    counts.passed += 1;
                } else {
                    counts.failed += 1;
                }
            }
        }
    }

    pub fn counts(&self, element: &CodeElementName) -> ElementCounts {
        self.counts.get(element).copied().unwrap_or_default()
    }

    /// Elements recorded at one granularity, canonical order.
    pub fn elements_at(&self, granularity: Granularity) -> Vec<&CodeElementName> {
        self.statuses
            .keys()
            .filter(|e| e.granularity() == granularity)
            .collect()
    }

    pub fn status(&self, element: &CodeElementName) -> Option<CoverageStatus> {
        self.statuses.get(element).copied()
    }

    pub fn statuses(&self) -> &BTreeMap<CodeElementName, CoverageStatus> {
        &self.statuses
    }

    /// Suite totals: (failing tests, passing tests).
    pub fn totals(&self) -> (u32, u32) {
        (self.total_failed, self.total_passed)
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Artifact paths for one analysis target, one per granularity.
    pub fn report_paths(report_dir: &Path, target: &str) -> [PathBuf; 3] {
        Granularity::all()
            .map(|g| report_dir.join(format!("{}.{}.cov", target, g.report_suffix())))
    }

    pub fn reports_exist(report_dir: &Path, target: &str) -> bool {
        Self::report_paths(report_dir, target)
            .iter()
            .all(|p| p.exists())
    }

    /// Write the three per-granularity reports, `<element><TAB><status>` per
    /// line in canonical element order.
    pub fn write_reports(&self, report_dir: &Path, target: &str) -> Result<()> {
        std::fs::create_dir_all(report_dir).with_context(|| {
            format!("Failed to create report directory {}", report_dir.display())
        })?;
        let paths = Self::report_paths(report_dir, target);
        for (granularity, path) in Granularity::all().iter().zip(paths.iter()) {
            let mut file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create report {}", path.display()))?;
            for (element, status) in &self.statuses {
                if element.granularity() == *granularity {
                    writeln!(file, "{}\t{}", element.canonical(), status.as_token())
                        .with_context(|| format!("Failed to write report {}", path.display()))?;
                }
            }
        }
        Ok(())
    }

    /// Re-parse the three reports into the element→status mapping.
    pub fn parse_reports(
        report_dir: &Path,
        target: &str,
    ) -> Result<BTreeMap<CodeElementName, CoverageStatus>> {
        let mut merged = BTreeMap::new();
        for path in Self::report_paths(report_dir, target) {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read report {}", path.display()))?;
            for (element, status) in parse_report_text(&text)
                .with_context(|| format!("Malformed report {}", path.display()))?
            {
                merged.insert(element, status);
            }
        }
        Ok(merged)
    }
}

/// Parse one report body: `<element><TAB><status>` lines.
pub fn parse_report_text(text: &str) -> Result<Vec<(CodeElementName, CoverageStatus)>> {
    let mut entries = Vec::new();
    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (canonical, token) = line
            .split_once('\t')
            .with_context(|| format!("line {}: missing field separator", number + 1))?;
        let status = CoverageStatus::from_token(token.trim())
            .with_context(|| format!("line {}: unknown status {:?}", number + 1, token))?;
        entries.push((CodeElementName::from_canonical(canonical.trim()), status));
    }
    Ok(entries)
}

/// Executes one test under coverage instrumentation
pub trait InstrumentedExecutor {
    fn test_methods(&self, test_class: &str) -> Result<Vec<String>>;

    fn run_instrumented(&self, test: &str) -> Result<TestCoverage>;
}

/// Process-backed instrumentation driven by the configured command; element
/// records are read from the child's stdout, one `<element><TAB><status>`
/// per line, with pass/fail taken from the exit status.
pub struct ProcessInstrumentedExecutor<'a> {
    config: &'a Config,
}

impl<'a> ProcessInstrumentedExecutor<'a> {
    pub fn new(config: &'a Config) -> Self {
        ProcessInstrumentedExecutor { config }
    }
}

impl InstrumentedExecutor for ProcessInstrumentedExecutor<'_> {
    fn test_methods(&self, test_class: &str) -> Result<Vec<String>> {
        ProcessTestExecutor::new(self.config).test_methods(test_class)
    }

    fn run_instrumented(&self, test: &str) -> Result<TestCoverage> {
        let template = &self.config.coverage_command;
        let first = template
            .first()
            .context("coverage command template is empty; check the configuration")?;
        let mut command = Command::new(first.replace("{test}", test));
        for arg in &template[1..] {
            command.arg(arg.replace("{test}", test));
        }
        let output = command
            .output()
            .with_context(|| format!("Failed to launch instrumented run for {}", test))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut records = Vec::new();
        for line in stdout.lines() {
            if let Some((canonical, token)) = line.split_once('\t') {
                if let Some(status) = CoverageStatus::from_token(token.trim()) {
                    records.push(CoverageRecord {
                        element: CodeElementName::from_canonical(canonical.trim()),
                        status,
                    });
                }
            }
        }
        let outcome = if output.status.success() {
            TestOutcome::Passed
        } else {
            TestOutcome::Failed(parse_assertion_line(&stdout))
        };
        Ok(TestCoverage {
            test: test.to_string(),
            outcome,
            records,
        })
    }
}

/// Batch coverage analysis over one test class
pub struct CoverageEngine<'a> {
    config: &'a Config,
    executor: &'a dyn InstrumentedExecutor,
}

impl<'a> CoverageEngine<'a> {
    pub fn new(config: &'a Config, executor: &'a dyn InstrumentedExecutor) -> Self {
        CoverageEngine { config, executor }
    }

    /// Execute every test method of the class under instrumentation and
    /// aggregate the per-element vectors. The report artifacts are written
    /// once per target; existing artifacts skip generation.
    pub fn analyze_all(&self, test_class: &str) -> Result<CoverageCollection> {
        let tests = self.executor.test_methods(test_class)?;
        debug!(test_class, count = tests.len(), "coverage pass starting");

        // Full pass first; aggregation only after every isolated run ended
        let mut runs = Vec::with_capacity(tests.len());
        for test in &tests {
            runs.push(self.executor.run_instrumented(test)?);
        }

        let mut collection = CoverageCollection::new();
        for run in &runs {
            collection.record_test(run);
        }

        if CoverageCollection::reports_exist(&self.config.report_dir, test_class) {
            // The cache never feeds the aggregate, but a stale one misleads
            // anyone reading the artifacts
            match CoverageCollection::parse_reports(&self.config.report_dir, test_class) {
                Ok(cached) if &cached == collection.statuses() => {
                    debug!(test_class, "report artifacts exist, generation skipped");
                }
                Ok(cached) => {
                    warn!(
                        test_class,
                        cached = cached.len(),
                        current = collection.statuses().len(),
                        "cached report artifacts diverge from this run"
                    );
                }
                Err(e) => {
                    warn!(test_class, error = %e, "cached report artifacts are unreadable");
                }
            }
        } else {
            collection.write_reports(&self.config.report_dir, test_class)?;
        }
        Ok(collection)
    }
}
