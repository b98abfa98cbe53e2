//! Dynamic variable tracing
//!
//! Sprint 5: ordered value history over one test execution
//!
//! Drives one debug session through one execution of the owning test and
//! records the target variable's textual value at every breakpoint hit
//! where it is in scope. The collection order is the defining invariant: it
//! equals true runtime execution order, including repeated visits to the
//! same line inside loops. Out-of-scope hits are skipped silently; a
//! declared-but-unassigned slot is recorded with the uninitialized
//! sentinel, not treated as an error.

use tracing::{debug, warn};

use crate::config::Config;
use crate::debug_client::DebugSession;
use crate::element::CodeElementName;
use crate::error::LocalizerError;
use crate::source_model::SourceModel;
use crate::suspicious::SuspiciousVariable;

/// Wire-level sentinel for a declared but not yet initialized variable
pub const UNINITIALIZED: &str = "<uninitialized>";

/// One observed (line, variable, value) snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct TracedValue {
    pub line: u32,
    pub variable: String,
    pub value: String,
}

/// Snapshots in the order they were captured during one execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TracedValueCollection {
    entries: Vec<TracedValue>,
}

impl TracedValueCollection {
    pub fn new() -> TracedValueCollection {
        TracedValueCollection::default()
    }

    pub fn push(&mut self, line: u32, variable: &str, value: &str) {
        self.entries.push(TracedValue {
            line,
            variable: variable.to_string(),
            value: value.to_string(),
        });
    }

    pub fn entries(&self) -> &[TracedValue] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last observed value, if any snapshot was captured
    pub fn final_value(&self) -> Option<&str> {
        self.entries.last().map(|e| e.value.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TracedValue> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a TracedValueCollection {
    type Item = &'a TracedValue;
    type IntoIter = std::slice::Iter<'a, TracedValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Traces one variable's runtime value history
pub struct VariableTracer<'a> {
    config: &'a Config,
    source: &'a dyn SourceModel,
}

impl<'a> VariableTracer<'a> {
    pub fn new(config: &'a Config, source: &'a dyn SourceModel) -> Self {
        VariableTracer { config, source }
    }

    /// Launch a fresh target, run the owning test once, and return the
    /// ordered value history of the target variable. Nothing carries over
    /// between invocations; every call is a fresh process and execution.
    pub fn trace_values_of_target(
        &self,
        target: &SuspiciousVariable,
    ) -> Result<TracedValueCollection, LocalizerError> {
        let mut session = DebugSession::start(self.config)?;
        let result = self.trace_in_session(&mut session, target);
        session.close();
        result
    }

    /// Same as [`trace_values_of_target`] against an already-open session.
    /// The caller keeps ownership of the session's lifetime.
    ///
    /// [`trace_values_of_target`]: VariableTracer::trace_values_of_target
    pub fn trace_in_session(
        &self,
        session: &mut DebugSession,
        target: &SuspiciousVariable,
    ) -> Result<TracedValueCollection, LocalizerError> {
        let lines = self.source.executable_lines(target.method());
        if lines.is_empty() {
            warn!(method = %target.method(), "no executable lines known, empty trace");
            return Ok(TracedValueCollection::new());
        }
        let class = target.method().class_name().to_string();
        let method = target.method().method_name().unwrap_or_default().to_string();
        for line in &lines {
            session.set_breakpoint(&CodeElementName::line(&class, &method, *line))?;
        }
        debug!(
            test = target.owning_test(),
            variable = target.variable(),
            breakpoints = lines.len(),
            "tracing variable"
        );

        let mut collection = TracedValueCollection::new();
        let outcome = session.run_test(target.owning_test(), |frame| {
            if let Some(value) = frame.variable(target.variable()) {
                collection.push(frame.line(), target.variable(), value);
            }
        })?;
        debug!(
            snapshots = collection.len(),
            passed = outcome.passed(),
            "trace finished"
        );
        session.cleanup_event_requests()?;
        Ok(collection)
    }
}
