use anyhow::Result;
use clap::Parser;
use culpa::cli::{Cli, CliCommand, OutputFormat};
use culpa::config::Config;
use culpa::coverage::ProcessInstrumentedExecutor;
use culpa::element::CodeElementName;
use culpa::orchestrator::{Orchestrator, ProbeOutcome};
use culpa::ranker::SuspiciousnessRanker;
use culpa::source_model::TextSourceModel;
use culpa::suspicious::SuspiciousVariable;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn print_ranking(ranker: &SuspiciousnessRanker, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&ranker.rank())?);
        }
        OutputFormat::Text => {
            let (total_failed, total_passed) = ranker.totals();
            println!(
                "Suspiciousness ranking ({}, {} failing / {} passing tests)",
                ranker.formula_name(),
                total_failed,
                total_passed
            );
            println!("─────────────────────────────────────────");
            for element in ranker.rank() {
                let note = match element.probe_note() {
                    Some(note) => format!("  [{}]", note),
                    None => String::new(),
                };
                println!(
                    "{:.4}  {:>3}/{:<3}  {}{}",
                    element.score(),
                    element.failed(),
                    element.passed(),
                    element.element(),
                    note
                );
            }
        }
    }
    Ok(())
}

fn print_probe(outcome: &ProbeOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let trace: Vec<_> = outcome
                .trace
                .iter()
                .map(|entry| {
                    serde_json::json!({
                        "line": entry.line,
                        "variable": entry.variable,
                        "value": entry.value,
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "trace": trace,
                    "implicated": outcome.implicated.as_ref().map(|e| e.canonical()),
                }))?
            );
        }
        OutputFormat::Text => {
            println!("Value history ({} snapshots):", outcome.trace.len());
            for entry in &outcome.trace {
                println!("  line {:>4}  {} = {}", entry.line, entry.variable, entry.value);
            }
            if let Some(chain) = &outcome.chain {
                println!("Causal chain:");
                println!("{}", chain);
            }
            match &outcome.implicated {
                Some(element) => println!("Implicated: {}", element),
                None => println!("Implicated: (none)"),
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let source = TextSourceModel::from_roots(&config)?;
    let executor = ProcessInstrumentedExecutor::new(&config);
    let orchestrator = Orchestrator::new(&config, &source, &executor);

    match cli.command {
        CliCommand::Rank {
            test_class,
            granularity,
            formula,
        } => {
            let ranker = orchestrator.initial_ranking(
                &test_class,
                granularity.into(),
                formula.unwrap_or(config.formula),
            )?;
            print_ranking(&ranker, cli.format)?;
        }
        CliCommand::Probe {
            test_class,
            test,
            method,
            line,
            variable,
            granularity,
            formula,
        } => {
            let mut ranker = orchestrator.initial_ranking(
                &test_class,
                granularity.into(),
                formula.unwrap_or(config.formula),
            )?;
            let target = SuspiciousVariable::new(
                &test,
                CodeElementName::from_canonical(&method),
                line,
                &variable,
            );
            let outcome = orchestrator.probe(&mut ranker, &target)?;
            print_probe(&outcome, cli.format)?;
            print_ranking(&ranker, cli.format)?;
        }
    }
    Ok(())
}
