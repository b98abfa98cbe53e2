//! Test-execution collaborator
//!
//! Sprint 2: isolated single-test execution interface
//!
//! The localizer never runs tests in-process. A [`TestExecutor`] compiles if
//! necessary and executes one fully-qualified test method in an isolated
//! process, reporting pass/fail and, on failure, the failing assertion's
//! location and expected/actual textual values.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::process::Command;

use crate::config::Config;
use crate::element::CodeElementName;
use crate::wire::AssertionDetail;

/// Location and expectation of a failing assertion
#[derive(Debug, Clone, PartialEq)]
pub struct AssertionFailure {
    pub location: CodeElementName,
    pub expected: String,
    pub actual: String,
}

impl From<AssertionDetail> for AssertionFailure {
    fn from(detail: AssertionDetail) -> Self {
        AssertionFailure {
            location: CodeElementName::line(&detail.class, &detail.method, detail.line),
            expected: detail.expected,
            actual: detail.actual,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestOutcome {
    Passed,
    Failed(Option<AssertionFailure>),
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }
}

/// Runs one test method in isolation
pub trait TestExecutor {
    fn run_test(&self, test: &str) -> Result<TestOutcome>;

    /// Enumerate the test methods of a test class, fully qualified.
    fn test_methods(&self, test_class: &str) -> Result<Vec<String>>;
}

/// Assertion detail as printed by the test harness on stdout
#[derive(Debug, Deserialize)]
struct HarnessAssertion {
    class: String,
    method: String,
    line: u32,
    expected: String,
    actual: String,
}

/// Find the failing-assertion JSON line a harness prints on stdout.
pub(crate) fn parse_assertion_line(stdout: &str) -> Option<AssertionFailure> {
    stdout
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str::<HarnessAssertion>(line.trim()).ok())
        .map(|a| AssertionFailure {
            location: CodeElementName::line(&a.class, &a.method, a.line),
            expected: a.expected,
            actual: a.actual,
        })
}

/// Process-backed executor driven by the configured command templates
pub struct ProcessTestExecutor<'a> {
    config: &'a Config,
}

impl<'a> ProcessTestExecutor<'a> {
    pub fn new(config: &'a Config) -> Self {
        ProcessTestExecutor { config }
    }

    fn command_for(template: &[String], placeholder: &str, value: &str) -> Result<Command> {
        let first = template
            .first()
            .context("command template is empty; check the configuration")?;
        let mut command = Command::new(first.replace(placeholder, value));
        for arg in &template[1..] {
            command.arg(arg.replace(placeholder, value));
        }
        Ok(command)
    }
}

impl TestExecutor for ProcessTestExecutor<'_> {
    fn run_test(&self, test: &str) -> Result<TestOutcome> {
        let mut command = Self::command_for(&self.config.test_command, "{test}", test)?;
        let output = command
            .output()
            .with_context(|| format!("Failed to launch test process for {}", test))?;
        if output.status.success() {
            return Ok(TestOutcome::Passed);
        }
        // The harness prints the failing assertion as one JSON line; a crash
        // without that line is still a plain failure.
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(TestOutcome::Failed(parse_assertion_line(&stdout)))
    }

    fn test_methods(&self, test_class: &str) -> Result<Vec<String>> {
        let mut command = Self::command_for(&self.config.list_command, "{class}", test_class)?;
        let output = command
            .output()
            .with_context(|| format!("Failed to list tests of {}", test_class))?;
        anyhow::ensure!(
            output.status.success(),
            "test listing for {} exited with {:?}",
            test_class,
            output.status.code()
        );
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}
