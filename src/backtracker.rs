//! Backward causal search
//!
//! Sprint 7: iterative resolution of assignment/argument/return chains
//!
//! Resolves a candidate expression to its ultimate cause. The traversal is
//! iterative — an explicit work stack plus a visited set — so a long causal
//! chain consumes heap, not native call stack, and the depth bound is a
//! plain configuration parameter. Exhausting the bound terminates the chain
//! with an explicit marker instead of failing; crossing out of the analyzed
//! source set records an opaque boundary with the call site as the reported
//! cause.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::element::CodeElementName;
use crate::source_model::{CallSite, SourceModel, Statement};
use crate::suspicious::{
    is_bare_variable, is_literal, parse_assignment, parse_call, parse_return, CauseKind,
    SuspiciousExpression, SuspiciousVariableFinder,
};

/// Why the backward search stopped
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    /// A literal originated the value
    Literal(String),
    /// A composite or externally-sourced expression; not decomposed further
    Expression(String),
    /// The chain crossed into code outside the analyzed source set
    OpaqueBoundary {
        call: String,
        method: CodeElementName,
        line: u32,
    },
    /// The configured depth bound was exhausted
    DepthExceeded,
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Literal(text) => write!(f, "literal {}", text),
            Terminal::Expression(text) => write!(f, "expression {}", text),
            Terminal::OpaqueBoundary { call, method, line } => {
                write!(f, "opaque call {} at {}:{}", call, method, line)
            }
            Terminal::DepthExceeded => f.write_str("depth exceeded"),
        }
    }
}

/// Ordered causal sequence from the observation back to the terminal cause
#[derive(Debug, Clone, PartialEq)]
pub struct CausalChain {
    links: Vec<SuspiciousExpression>,
    terminal: Terminal,
}

impl CausalChain {
    pub fn links(&self) -> &[SuspiciousExpression] {
        &self.links
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self.terminal, Terminal::DepthExceeded)
    }

    /// Location implicated by the deepest resolved link, if any
    pub fn implicated_location(&self) -> Option<CodeElementName> {
        self.links.last().map(SuspiciousExpression::location)
    }
}

impl fmt::Display for CausalChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for link in &self.links {
            writeln!(f, "  <- {}", link)?;
        }
        write!(f, "  == {}", self.terminal)
    }
}

enum Goal {
    /// Resolve a statement already identified as a candidate cause
    Statement(SuspiciousExpression),
    /// Resolve the expression producing a value at a point in a method
    Value {
        method: CodeElementName,
        line: u32,
        expr: String,
    },
}

struct Task {
    goal: Goal,
    depth: usize,
}

pub struct CausalBacktracker<'a> {
    source: &'a dyn SourceModel,
    max_depth: usize,
    executed: Option<BTreeSet<CodeElementName>>,
}

impl<'a> CausalBacktracker<'a> {
    pub fn new(source: &'a dyn SourceModel, max_depth: usize) -> Self {
        CausalBacktracker {
            source,
            max_depth,
            executed: None,
        }
    }

    /// Restrict argument resolution to call sites the failing execution
    /// reached. The elements may be class-, method- or line-grained, as
    /// produced by the coverage pass at any ranking granularity.
    pub fn with_executed_elements(mut self, executed: BTreeSet<CodeElementName>) -> Self {
        self.executed = Some(executed);
        self
    }

    /// Walk backward from `start` until a terminal cause is reached.
    pub fn resolve(&self, start: SuspiciousExpression) -> CausalChain {
        let finder = SuspiciousVariableFinder::new(self.source);
        let mut stack = vec![Task {
            goal: Goal::Statement(start),
            depth: 0,
        }];
        let mut visited: HashSet<String> = HashSet::new();
        let mut links: Vec<SuspiciousExpression> = Vec::new();
        let mut terminal: Option<Terminal> = None;

        while let Some(task) = stack.pop() {
            if task.depth >= self.max_depth {
                terminal = Some(Terminal::DepthExceeded);
                break;
            }
            let depth = task.depth + 1;
            match task.goal {
                Goal::Statement(expr) => {
                    let key = format!("s:{}:{}:{}", expr.method(), expr.line(), expr.text());
                    if !visited.insert(key) {
                        continue;
                    }
                    links.push(expr.clone());
                    match expr.kind() {
                        CauseKind::Assignment | CauseKind::Return => {
                            if let Some((_, _, rhs)) = parse_assignment(expr.text()) {
                                stack.push(value_task(expr.method(), expr.line(), rhs, depth));
                            } else if let Some(returned) = parse_return(expr.text()) {
                                stack.push(value_task(expr.method(), expr.line(), returned, depth));
                            } else if expr.kind() == CauseKind::Return {
                                // Tail expression return
                                stack.push(value_task(expr.method(), expr.line(), expr.text(), depth));
                            } else {
                                terminal = Some(Terminal::Expression(expr.text().to_string()));
                                break;
                            }
                        }
                        CauseKind::Argument => {
                            match self.argument_task(&expr, depth) {
                                Some(task) => stack.push(task),
                                None => {
                                    terminal =
                                        Some(Terminal::Expression(expr.text().to_string()));
                                    break;
                                }
                            }
                        }
                    }
                }
                Goal::Value { method, line, expr } => {
                    let key = format!("v:{}:{}:{}", method, line, expr);
                    if !visited.insert(key) {
                        continue;
                    }
                    if is_literal(&expr) {
                        terminal = Some(Terminal::Literal(expr.trim().to_string()));
                        break;
                    }
                    if is_bare_variable(&expr) {
                        let candidates = finder.candidates(&method, expr.trim(), line, false);
                        if candidates.is_empty() {
                            terminal = Some(Terminal::Expression(expr.trim().to_string()));
                            break;
                        }
                        // Nearest-preceding candidate on top of the stack
                        for candidate in candidates.into_iter().rev() {
                            stack.push(Task {
                                goal: Goal::Statement(candidate),
                                depth,
                            });
                        }
                        continue;
                    }
                    if let Some((callee, _)) = parse_call(&expr) {
                        match self.callee_return_tasks(&method, line, &expr, &callee, depth) {
                            Ok(tasks) => stack.extend(tasks),
                            Err(boundary) => {
                                terminal = Some(boundary);
                                break;
                            }
                        }
                        continue;
                    }
                    terminal = Some(Terminal::Expression(expr.trim().to_string()));
                    break;
                }
            }
        }

        let terminal = terminal.unwrap_or_else(|| {
            Terminal::Expression(
                links
                    .last()
                    .map(|l| l.text().to_string())
                    .unwrap_or_default(),
            )
        });
        CausalChain { links, terminal }
    }

    /// Map a parameter target to the actual-argument expression at the call
    /// site active during the failing execution. Sites outside the recorded
    /// execution are excluded; among the reached ones, the first in program
    /// order stands in for the active frame since no call stack is recorded.
    fn argument_task(&self, expr: &SuspiciousExpression, depth: usize) -> Option<Task> {
        let parameter = expr.text();
        let ordinal = self
            .source
            .parameters(expr.method())
            .into_iter()
            .find(|p| p.name == parameter)?
            .ordinal;
        let site = self
            .source
            .call_sites(expr.method())
            .into_iter()
            .find(|site| self.site_was_executed(site))?;
        let argument = site.arguments.get(ordinal)?.clone();
        Some(value_task(&site.caller, site.line, &argument, depth))
    }

    /// Whether the failing execution is known to have reached a call site.
    /// Without execution data every site qualifies.
    fn site_was_executed(&self, site: &CallSite) -> bool {
        let Some(executed) = &self.executed else {
            return true;
        };
        let Some(method) = site.caller.method_name() else {
            return false;
        };
        executed.contains(&CodeElementName::line(
            site.caller.class_name(),
            method,
            site.line,
        )) || executed.contains(&site.caller)
            || executed.contains(&CodeElementName::class(site.caller.class_name()))
    }

    /// Return statements of a resolved callee become new candidates; an
    /// unresolvable or out-of-set callee is an opaque boundary.
    fn callee_return_tasks(
        &self,
        method: &CodeElementName,
        line: u32,
        call_expr: &str,
        callee: &str,
        depth: usize,
    ) -> Result<Vec<Task>, Terminal> {
        let boundary = || Terminal::OpaqueBoundary {
            call: call_expr.trim().to_string(),
            method: method.clone(),
            line,
        };
        let resolved = self
            .source
            .resolve_callee(method.class_name(), callee)
            .ok_or_else(boundary)?;
        if !self.source.contains_class(resolved.class_name()) {
            return Err(boundary());
        }
        let returns = return_statements(&self.source.statements(&resolved));
        if returns.is_empty() {
            return Err(boundary());
        }
        // Reverse push: the first return in program order resolves first
        Ok(returns
            .into_iter()
            .rev()
            .map(|statement| Task {
                goal: Goal::Statement(SuspiciousExpression::new(
                    resolved.clone(),
                    statement.line,
                    &statement.text,
                    CauseKind::Return,
                )),
                depth,
            })
            .collect())
    }
}

fn value_task(method: &CodeElementName, line: u32, expr: &str, depth: usize) -> Task {
    Task {
        goal: Goal::Value {
            method: method.clone(),
            line,
            expr: expr.to_string(),
        },
        depth,
    }
}

/// Explicit `return` statements, falling back to a trailing tail expression.
fn return_statements(statements: &[Statement]) -> Vec<Statement> {
    let explicit: Vec<Statement> = statements
        .iter()
        .filter(|s| parse_return(&s.text).is_some())
        .cloned()
        .collect();
    if !explicit.is_empty() {
        return explicit;
    }
    statements
        .last()
        .filter(|s| parse_assignment(&s.text).is_none())
        .cloned()
        .into_iter()
        .collect()
}
