//! Suspiciousness ranking
//!
//! Sprint 1: spectrum formulas and deterministic ordering
//!
//! Consumes the aggregated coverage counts and scores every element with a
//! pluggable spectrum formula. The ranking is a reproducible total order:
//! descending score, ties broken by canonical element identity. A probe can
//! overwrite one element's score in place; the counts that justified the
//! original score stay untouched and the override is recorded as a note.

use fnv::FnvHashMap;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::coverage::CoverageCollection;
use crate::element::{CodeElementName, Granularity};

/// Pluggable suspiciousness formula over pass/fail coverage counts
pub trait SpectrumFormula: Sync {
    fn name(&self) -> &'static str;

    /// Score in [0, 1]; `0` whenever the denominator degenerates.
    fn score(&self, failed: u32, passed: u32, total_failed: u32, total_passed: u32) -> f64;
}

pub struct Ochiai;

impl SpectrumFormula for Ochiai {
    fn name(&self) -> &'static str {
        "ochiai"
    }

    fn score(&self, failed: u32, passed: u32, total_failed: u32, _total_passed: u32) -> f64 {
        let denominator = (f64::from(total_failed) * f64::from(failed + passed)).sqrt();
        if denominator == 0.0 {
            0.0
        } else {
            f64::from(failed) / denominator
        }
    }
}

pub struct Tarantula;

impl SpectrumFormula for Tarantula {
    fn name(&self) -> &'static str {
        "tarantula"
    }

    fn score(&self, failed: u32, passed: u32, total_failed: u32, total_passed: u32) -> f64 {
        if total_failed == 0 {
            return 0.0;
        }
        let fail_ratio = f64::from(failed) / f64::from(total_failed);
        let pass_ratio = if total_passed == 0 {
            0.0
        } else {
            f64::from(passed) / f64::from(total_passed)
        };
        let denominator = fail_ratio + pass_ratio;
        if denominator == 0.0 {
            0.0
        } else {
            fail_ratio / denominator
        }
    }
}

pub struct Jaccard;

impl SpectrumFormula for Jaccard {
    fn name(&self) -> &'static str {
        "jaccard"
    }

    fn score(&self, failed: u32, passed: u32, total_failed: u32, _total_passed: u32) -> f64 {
        let denominator = f64::from(total_failed + passed);
        if denominator == 0.0 {
            0.0
        } else {
            f64::from(failed) / denominator
        }
    }
}

static OCHIAI: Ochiai = Ochiai;
static TARANTULA: Tarantula = Tarantula;
static JACCARD: Jaccard = Jaccard;

/// Formula selection, from CLI or config
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FormulaChoice {
    Ochiai,
    Tarantula,
    Jaccard,
}

impl FormulaChoice {
    pub fn formula(&self) -> &'static dyn SpectrumFormula {
        match self {
            FormulaChoice::Ochiai => &OCHIAI,
            FormulaChoice::Tarantula => &TARANTULA,
            FormulaChoice::Jaccard => &JACCARD,
        }
    }
}

/// One ranked element: identity, counts, and mutable score
#[derive(Debug, Clone, Serialize)]
pub struct FlRankingElement {
    element: CodeElementName,
    failed: u32,
    passed: u32,
    score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    probe_note: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    highlighted: bool,
}

impl FlRankingElement {
    pub fn element(&self) -> &CodeElementName {
        &self.element
    }

    pub fn failed(&self) -> u32 {
        self.failed
    }

    pub fn passed(&self) -> u32 {
        self.passed
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn probe_note(&self) -> Option<&str> {
        self.probe_note.as_deref()
    }

    pub fn is_highlighted(&self) -> bool {
        self.highlighted
    }
}

/// Owner of the fault-localization ranking
pub struct SuspiciousnessRanker {
    elements: Vec<FlRankingElement>,
    index: FnvHashMap<CodeElementName, usize>,
    total_failed: u32,
    total_passed: u32,
    formula: &'static dyn SpectrumFormula,
}

impl SuspiciousnessRanker {
    /// Build the ranking for one granularity of an aggregated coverage pass.
    pub fn from_coverage(
        collection: &CoverageCollection,
        granularity: Granularity,
        choice: FormulaChoice,
    ) -> SuspiciousnessRanker {
        let formula = choice.formula();
        let (total_failed, total_passed) = collection.totals();
        let mut elements = Vec::new();
        let mut index = FnvHashMap::default();
        for element in collection.elements_at(granularity) {
            let counts = collection.counts(element);
            let score = formula.score(counts.failed, counts.passed, total_failed, total_passed);
            index.insert(element.clone(), elements.len());
            elements.push(FlRankingElement {
                element: element.clone(),
                failed: counts.failed,
                passed: counts.passed,
                score,
                probe_note: None,
                highlighted: false,
            });
        }
        SuspiciousnessRanker {
            elements,
            index,
            total_failed,
            total_passed,
            formula,
        }
    }

    pub fn formula_name(&self) -> &'static str {
        self.formula.name()
    }

    pub fn totals(&self) -> (u32, u32) {
        (self.total_failed, self.total_passed)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn score(&self, element: &CodeElementName) -> Option<f64> {
        self.index.get(element).map(|&i| self.elements[i].score)
    }

    /// Total order: score descending, canonical identity ascending on ties.
    pub fn rank(&self) -> Vec<&FlRankingElement> {
        let mut ranked: Vec<&FlRankingElement> = self.elements.iter().collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.element.cmp(&b.element))
        });
        ranked
    }

    /// Overwrite one element's score after a probe implicated it. Counts are
    /// left untouched; the note records why the score no longer derives from
    /// them. Returns false when the element is not in the ranking.
    pub fn update_score(
        &mut self,
        element: &CodeElementName,
        new_score: f64,
        note: &str,
    ) -> bool {
        match self.index.get(element) {
            Some(&i) => {
                self.elements[i].score = new_score;
                self.elements[i].probe_note = Some(note.to_string());
                true
            }
            None => false,
        }
    }

    /// Mark known-buggy elements for offline quality measurement.
    pub fn highlight_methods(&mut self, known: &BTreeSet<CodeElementName>) {
        for element in &mut self.elements {
            element.highlighted = known.contains(&element.element);
        }
    }

    /// Rank distance from the top to the first highlighted element.
    pub fn wasted_effort(&self) -> Option<usize> {
        self.rank().iter().position(|e| e.highlighted)
    }
}

/// Mean wasted effort over a set of localization runs.
pub fn mean_wasted_effort(efforts: &[usize]) -> f64 {
    if efforts.is_empty() {
        return 0.0;
    }
    efforts.iter().sum::<usize>() as f64 / efforts.len() as f64
}
