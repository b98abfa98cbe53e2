//! Code element identities for coverage and ranking
//!
//! Sprint 1: class/method/line element model
//!
//! Every subsystem keys its maps by [`CodeElementName`]. The canonical string
//! is the single source of identity: equality, ordering and hashing all go
//! through it, so an element observed by the coverage engine, the ranker and
//! a probe always means the same location within one analysis run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit of coverage aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Granularity {
    Class,
    Method,
    Line,
}

impl Granularity {
    /// File-name suffix for the per-granularity report artifact
    pub fn report_suffix(&self) -> &'static str {
        match self {
            Granularity::Class => "class",
            Granularity::Method => "method",
            Granularity::Line => "line",
        }
    }

    pub fn all() -> [Granularity; 3] {
        [Granularity::Class, Granularity::Method, Granularity::Line]
    }
}

/// Coverage status of one element in one test execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoverageStatus {
    Covered,
    PartiallyCovered,
    NotCovered,
}

impl CoverageStatus {
    /// Token form used in the on-disk report artifacts
    pub fn as_token(&self) -> &'static str {
        match self {
            CoverageStatus::Covered => "COVERED",
            CoverageStatus::PartiallyCovered => "PARTIAL",
            CoverageStatus::NotCovered => "MISSED",
        }
    }

    pub fn from_token(token: &str) -> Option<CoverageStatus> {
        match token {
            "COVERED" => Some(CoverageStatus::Covered),
            "PARTIAL" => Some(CoverageStatus::PartiallyCovered),
            "MISSED" => Some(CoverageStatus::NotCovered),
            _ => None,
        }
    }

    /// An element counts as exercised when it was reached at all
    pub fn is_exercised(&self) -> bool {
        !matches!(self, CoverageStatus::NotCovered)
    }
}

/// Immutable identity of a code location
///
/// Canonical forms:
/// - class:  `geo.Rectangle`
/// - method: `geo.Rectangle#area`
/// - line:   `geo.Rectangle#area:17`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeElementName {
    canonical: String,
    granularity: Granularity,
}

impl CodeElementName {
    pub fn class(qualified: &str) -> Self {
        CodeElementName {
            canonical: qualified.to_string(),
            granularity: Granularity::Class,
        }
    }

    pub fn method(class: &str, method: &str) -> Self {
        CodeElementName {
            canonical: format!("{}#{}", class, method),
            granularity: Granularity::Method,
        }
    }

    pub fn line(class: &str, method: &str, line: u32) -> Self {
        CodeElementName {
            canonical: format!("{}#{}:{}", class, method, line),
            granularity: Granularity::Line,
        }
    }

    /// Reconstruct an identity from its canonical string, inferring the
    /// granularity from the `#` / `:` separators. Used by the report parser.
    pub fn from_canonical(canonical: &str) -> Self {
        let granularity = match canonical.split_once('#') {
            None => Granularity::Class,
            Some((_, member)) => {
                if member.contains(':') {
                    Granularity::Line
                } else {
                    Granularity::Method
                }
            }
        };
        CodeElementName {
            canonical: canonical.to_string(),
            granularity,
        }
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Fully qualified class portion of the identity
    pub fn class_name(&self) -> &str {
        match self.canonical.split_once('#') {
            Some((class, _)) => class,
            None => &self.canonical,
        }
    }

    /// Method portion, if this identity is method- or line-grained
    pub fn method_name(&self) -> Option<&str> {
        let (_, member) = self.canonical.split_once('#')?;
        match member.split_once(':') {
            Some((method, _)) => Some(method),
            None => Some(member),
        }
    }

    /// Source line, if this identity is line-grained
    pub fn line_number(&self) -> Option<u32> {
        let (_, member) = self.canonical.split_once('#')?;
        let (_, line) = member.split_once(':')?;
        line.parse().ok()
    }

    /// Widen a finer identity to a coarser granularity without re-parsing
    /// any source. Widening to the same or a finer granularity yields `None`.
    pub fn widen(&self, to: Granularity) -> Option<CodeElementName> {
        if to >= self.granularity {
            return None;
        }
        match to {
            Granularity::Class => Some(CodeElementName::class(self.class_name())),
            Granularity::Method => {
                let method = self.method_name()?;
                Some(CodeElementName::method(self.class_name(), method))
            }
            Granularity::Line => None,
        }
    }
}

impl fmt::Display for CodeElementName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl PartialOrd for CodeElementName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CodeElementName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical.cmp(&other.canonical)
    }
}
