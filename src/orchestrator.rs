//! Composition root
//!
//! Sprint 8: coverage pass, probe, ranking update
//!
//! Thin sequencing layer: coverage engine → initial ranking →
//! operator-selected probe → tracer/backtracker → score update. All policy
//! lives in the components; this module only wires them together.

use std::collections::BTreeSet;

use anyhow::Result;
use tracing::debug;

use crate::backtracker::{CausalBacktracker, CausalChain};
use crate::config::Config;
use crate::coverage::{CoverageEngine, InstrumentedExecutor};
use crate::element::{CodeElementName, Granularity};
use crate::ranker::{FormulaChoice, SuspiciousnessRanker};
use crate::source_model::SourceModel;
use crate::suspicious::{SuspiciousVariable, SuspiciousVariableFinder};
use crate::variable_tracer::{TracedValueCollection, VariableTracer};

/// Everything one probe produced
#[derive(Debug)]
pub struct ProbeOutcome {
    pub trace: TracedValueCollection,
    pub chain: Option<CausalChain>,
    pub implicated: Option<CodeElementName>,
}

pub struct Orchestrator<'a> {
    config: &'a Config,
    source: &'a dyn SourceModel,
    executor: &'a dyn InstrumentedExecutor,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        source: &'a dyn SourceModel,
        executor: &'a dyn InstrumentedExecutor,
    ) -> Self {
        Orchestrator {
            config,
            source,
            executor,
        }
    }

    /// Coverage pass plus initial ranking at one granularity.
    pub fn initial_ranking(
        &self,
        test_class: &str,
        granularity: Granularity,
        formula: FormulaChoice,
    ) -> Result<SuspiciousnessRanker> {
        let engine = CoverageEngine::new(self.config, self.executor);
        let collection = engine.analyze_all(test_class)?;
        Ok(SuspiciousnessRanker::from_coverage(
            &collection,
            granularity,
            formula,
        ))
    }

    /// Trace the designated variable, resolve its causal chain, and fold the
    /// implicated location back into the ranking. Recoverable conditions
    /// (empty trace, no candidates, truncated chain) degrade gracefully and
    /// still return an outcome.
    pub fn probe(
        &self,
        ranker: &mut SuspiciousnessRanker,
        target: &SuspiciousVariable,
    ) -> Result<ProbeOutcome> {
        let tracer = VariableTracer::new(self.config, self.source);
        let trace = tracer.trace_values_of_target(target)?;

        // Only elements the failing tests reached may anchor argument
        // resolution in the backward search
        let executed: BTreeSet<CodeElementName> = ranker
            .rank()
            .iter()
            .filter(|entry| entry.failed() > 0)
            .map(|entry| entry.element().clone())
            .collect();
        let finder = SuspiciousVariableFinder::new(self.source);
        let chain = finder.find(target).into_iter().next().map(|start| {
            CausalBacktracker::new(self.source, self.config.max_backtrack_depth)
                .with_executed_elements(executed)
                .resolve(start)
        });
        let implicated = chain.as_ref().and_then(CausalChain::implicated_location);

        if let Some(element) = &implicated {
            let note = format!(
                "probe of {} in {} implicated this statement",
                target.variable(),
                target.owning_test()
            );
            let updated = ranker.update_score(element, 1.0, &note)
                || element
                    .widen(Granularity::Method)
                    .is_some_and(|method| ranker.update_score(&method, 1.0, &note));
            debug!(element = %element, updated, "probe result folded into ranking");
        }
        Ok(ProbeOutcome {
            trace,
            chain,
            implicated,
        })
    }
}
