//! CLI argument parsing for Culpa

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::element::Granularity;
use crate::ranker::FormulaChoice;

/// Output format for ranking and probe results
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

/// Coverage granularity selection
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RankGranularity {
    Class,
    Method,
    Line,
}

impl From<RankGranularity> for Granularity {
    fn from(value: RankGranularity) -> Granularity {
        match value {
            RankGranularity::Class => Granularity::Class,
            RankGranularity::Method => Granularity::Method,
            RankGranularity::Line => Granularity::Line,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "culpa")]
#[command(version)]
#[command(about = "Spectrum-based fault localizer with remote debug probing", long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Enable debug logging to stderr
    #[arg(short, long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the coverage pass and print the suspiciousness ranking
    Rank {
        /// Fully qualified test class to analyze
        test_class: String,

        /// Coverage granularity of the ranking
        #[arg(long, value_enum, default_value = "method")]
        granularity: RankGranularity,

        /// Spectrum formula, overriding the configured one
        #[arg(long, value_enum)]
        formula: Option<FormulaChoice>,
    },

    /// Trace one variable and fold the causal result back into the ranking
    Probe {
        /// Fully qualified test class to analyze
        test_class: String,

        /// Owning test method, canonical form class#method
        #[arg(long)]
        test: String,

        /// Method containing the observation, canonical form class#method
        #[arg(long)]
        method: String,

        /// Line of the observed use point
        #[arg(long)]
        line: u32,

        /// Variable designated as suspicious
        #[arg(long)]
        variable: String,

        /// Coverage granularity of the ranking
        #[arg(long, value_enum, default_value = "line")]
        granularity: RankGranularity,

        /// Spectrum formula, overriding the configured one
        #[arg(long, value_enum)]
        formula: Option<FormulaChoice>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_rank() {
        let cli = Cli::parse_from(["culpa", "rank", "geo.GeoTest"]);
        match cli.command {
            CliCommand::Rank { test_class, .. } => assert_eq!(test_class, "geo.GeoTest"),
            other => panic!("expected rank, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_probe_flags() {
        let cli = Cli::parse_from([
            "culpa",
            "probe",
            "geo.GeoTest",
            "--test",
            "geo.GeoTest#testArea",
            "--method",
            "geo.rectangle#area",
            "--line",
            "13",
            "--variable",
            "x",
        ]);
        match cli.command {
            CliCommand::Probe {
                test,
                method,
                line,
                variable,
                ..
            } => {
                assert_eq!(test, "geo.GeoTest#testArea");
                assert_eq!(method, "geo.rectangle#area");
                assert_eq!(line, 13);
                assert_eq!(variable, "x");
            }
            other => panic!("expected probe, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_debug_default_false() {
        let cli = Cli::parse_from(["culpa", "rank", "geo.GeoTest"]);
        assert!(!cli.debug);
    }

    #[test]
    fn test_cli_formula_override() {
        let cli = Cli::parse_from(["culpa", "rank", "geo.GeoTest", "--formula", "tarantula"]);
        match cli.command {
            CliCommand::Rank { formula, .. } => {
                assert_eq!(formula, Some(FormulaChoice::Tarantula));
            }
            other => panic!("expected rank, got {other:?}"),
        }
    }
}
