//! Run configuration
//!
//! Sprint 8: one immutable `Config`, constructed once in `main` and passed by
//! reference to every component that needs it. There is no global state; a
//! component that needs a path or a bound says so in its signature.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ranker::FormulaChoice;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Analysis target name; prefixes the coverage report artifacts
    pub project: String,

    /// Roots scanned by the textual source model
    pub source_roots: Vec<PathBuf>,

    /// Directory holding the three per-granularity coverage reports
    pub report_dir: PathBuf,

    /// Command launching a debug target; the session port is passed via the
    /// CULPA_DEBUG_PORT environment variable
    pub target_command: Vec<String>,

    /// Command running one test in isolation; `{test}` is substituted
    pub test_command: Vec<String>,

    /// Command listing the test methods of a class; `{class}` is substituted
    pub list_command: Vec<String>,

    /// Command running one test under coverage instrumentation; `{test}` is
    /// substituted, element/status pairs are read from stdout
    pub coverage_command: Vec<String>,

    /// Attach deadline for `DebugSession::start`
    pub attach_timeout_ms: u64,

    /// Depth bound for the backward causal search
    pub max_backtrack_depth: usize,

    /// Suspiciousness formula
    pub formula: FormulaChoice,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            project: "target".to_string(),
            source_roots: vec![PathBuf::from("src")],
            report_dir: PathBuf::from("coverage-reports"),
            target_command: Vec::new(),
            test_command: Vec::new(),
            list_command: Vec::new(),
            coverage_command: Vec::new(),
            attach_timeout_ms: 10_000,
            max_backtrack_depth: 32,
            formula: FormulaChoice::Ochiai,
        }
    }
}

impl Config {
    /// Load a TOML configuration file; missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.attach_timeout_ms, 10_000);
        assert_eq!(config.max_backtrack_depth, 32);
        assert_eq!(config.formula, FormulaChoice::Ochiai);
        assert_eq!(config.attach_timeout(), Duration::from_millis(10_000));
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: Config =
            toml::from_str("project = \"geo\"\nmax_backtrack_depth = 5\n").unwrap();
        assert_eq!(config.project, "geo");
        assert_eq!(config.max_backtrack_depth, 5);
        assert_eq!(config.attach_timeout_ms, 10_000);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let parsed: Result<Config, _> = toml::from_str("no_such_key = 1\n");
        assert!(parsed.is_err());
    }
}
