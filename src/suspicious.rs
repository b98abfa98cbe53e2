//! Suspicious observations and static candidate discovery
//!
//! Sprint 6: variable occurrences, candidate expressions, finder
//!
//! A [`SuspiciousVariable`] is created when an operator or a failing
//! assertion designates a value of interest; it is immutable from then on.
//! [`SuspiciousVariableFinder`] inspects the declaring method's source and
//! enumerates the statements capable of assigning that name before the
//! observed use point, nearest-preceding first. Purely structural; nothing
//! is executed.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::element::CodeElementName;
use crate::source_model::{argument_texts, SourceModel};

/// How a candidate expression produces the observed value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CauseKind {
    Assignment,
    Argument,
    Return,
}

impl fmt::Display for CauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CauseKind::Assignment => "assignment",
            CauseKind::Argument => "argument",
            CauseKind::Return => "return",
        };
        f.write_str(s)
    }
}

/// An observed variable occurrence worth probing
#[derive(Debug, Clone, PartialEq)]
pub struct SuspiciousVariable {
    owning_test: String,
    method: CodeElementName,
    line: u32,
    variable: String,
    expected: Option<String>,
    actual: Option<String>,
    assignment_target: bool,
    return_related: bool,
}

impl SuspiciousVariable {
    pub fn new(owning_test: &str, method: CodeElementName, line: u32, variable: &str) -> Self {
        SuspiciousVariable {
            owning_test: owning_test.to_string(),
            method,
            line,
            variable: variable.to_string(),
            expected: None,
            actual: None,
            assignment_target: false,
            return_related: false,
        }
    }

    pub fn with_expectation(mut self, expected: &str, actual: &str) -> Self {
        self.expected = Some(expected.to_string());
        self.actual = Some(actual.to_string());
        self
    }

    pub fn as_assignment_target(mut self) -> Self {
        self.assignment_target = true;
        self
    }

    pub fn as_return_related(mut self) -> Self {
        self.return_related = true;
        self
    }

    pub fn owning_test(&self) -> &str {
        &self.owning_test
    }

    pub fn method(&self) -> &CodeElementName {
        &self.method
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn expected(&self) -> Option<&str> {
        self.expected.as_deref()
    }

    pub fn actual(&self) -> Option<&str> {
        self.actual.as_deref()
    }

    pub fn is_assignment_target(&self) -> bool {
        self.assignment_target
    }

    pub fn is_return_related(&self) -> bool {
        self.return_related
    }
}

/// A candidate cause: one statement at one location
#[derive(Debug, Clone, PartialEq)]
pub struct SuspiciousExpression {
    method: CodeElementName,
    line: u32,
    text: String,
    kind: CauseKind,
}

impl SuspiciousExpression {
    pub fn new(method: CodeElementName, line: u32, text: &str, kind: CauseKind) -> Self {
        SuspiciousExpression {
            method,
            line,
            text: text.to_string(),
            kind,
        }
    }

    pub fn method(&self) -> &CodeElementName {
        &self.method
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> CauseKind {
        self.kind
    }

    /// Line-grained element identity of this expression's location
    pub fn location(&self) -> CodeElementName {
        CodeElementName::line(
            self.method.class_name(),
            self.method.method_name().unwrap_or_default(),
            self.line,
        )
    }
}

impl fmt::Display for SuspiciousExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} [{}] {}",
            self.method, self.line, self.kind, self.text
        )
    }
}

fn assignment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:let\s+)?(?:mut\s+)?(\w+)\s*(=|\+=|-=|\*=|/=)\s*([^=].*)$")
            .expect("static regex")
    })
}

fn return_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^return\s+(.+)$").expect("static regex"))
}

fn call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\w+)\s*\((.*)\)$").expect("static regex"))
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_]\w*$").expect("static regex"))
}

/// Parse `name = rhs` (and compound operators), rejecting comparisons.
pub(crate) fn parse_assignment(text: &str) -> Option<(&str, &str, &str)> {
    let caps = assignment_regex().captures(text.trim())?;
    let name = caps.get(1)?;
    let op = caps.get(2)?;
    let rhs = caps.get(3)?;
    Some((
        &text.trim()[name.range()],
        &text.trim()[op.range()],
        text.trim()[rhs.range()].trim(),
    ))
}

/// Parse `return expr`.
pub(crate) fn parse_return(text: &str) -> Option<&str> {
    let caps = return_regex().captures(text.trim())?;
    Some(text.trim()[caps.get(1)?.range()].trim())
}

/// Parse `callee(args)`, splitting arguments at top-level commas.
pub(crate) fn parse_call(expr: &str) -> Option<(String, Vec<String>)> {
    let trimmed = expr.trim();
    let caps = call_regex().captures(trimmed)?;
    let callee = caps.get(1)?.as_str().to_string();
    let after_paren = &trimmed[caps.get(1)?.end()..];
    let after_paren = after_paren.trim_start().strip_prefix('(')?;
    // Re-append the closing paren context for the splitter
    Some((callee, argument_texts(after_paren)))
}

pub(crate) fn is_literal(expr: &str) -> bool {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return false;
    }
    if matches!(trimmed, "true" | "false" | "null" | "None" | "nil") {
        return true;
    }
    if (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
        || (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
    {
        return true;
    }
    let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
    !unsigned.is_empty() && unsigned.chars().all(|c| c.is_ascii_digit() || c == '.')
}

pub(crate) fn is_bare_variable(expr: &str) -> bool {
    let trimmed = expr.trim();
    identifier_regex().is_match(trimmed) && !is_literal(trimmed)
}

/// Static discovery of candidate causes for an observed variable
pub struct SuspiciousVariableFinder<'a> {
    source: &'a dyn SourceModel,
}

impl<'a> SuspiciousVariableFinder<'a> {
    pub fn new(source: &'a dyn SourceModel) -> Self {
        SuspiciousVariableFinder { source }
    }

    /// Candidate causes for the observed occurrence, nearest-preceding
    /// first. A declaration lookup miss yields an empty list.
    pub fn find(&self, target: &SuspiciousVariable) -> Vec<SuspiciousExpression> {
        self.candidates(
            target.method(),
            target.variable(),
            target.line(),
            target.is_assignment_target(),
        )
    }

    /// Statements of `method` capable of assigning `variable` before
    /// `use_line` (inclusive when the observation is itself the assignment),
    /// nearest-preceding first, then the parameter itself if `variable`
    /// names one.
    pub fn candidates(
        &self,
        method: &CodeElementName,
        variable: &str,
        use_line: u32,
        inclusive: bool,
    ) -> Vec<SuspiciousExpression> {
        let statements = self.source.statements(method);
        let mut out = Vec::new();
        for statement in statements.iter().rev() {
            let before = if inclusive {
                statement.line <= use_line
            } else {
                statement.line < use_line
            };
            if !before {
                continue;
            }
            if let Some((name, _, rhs)) = parse_assignment(&statement.text) {
                if name == variable {
                    let kind = if parse_call(rhs).is_some() {
                        CauseKind::Return
                    } else {
                        CauseKind::Assignment
                    };
                    out.push(SuspiciousExpression::new(
                        method.clone(),
                        statement.line,
                        &statement.text,
                        kind,
                    ));
                }
            }
        }
        if self
            .source
            .parameters(method)
            .iter()
            .any(|p| p.name == variable)
        {
            let declaration_line = self
                .source
                .declaration(method)
                .map(|d| d.start_line)
                .unwrap_or(0);
            out.push(SuspiciousExpression::new(
                method.clone(),
                declaration_line,
                variable,
                CauseKind::Argument,
            ));
        }
        out
    }
}
