//! Source-model collaborator
//!
//! Sprint 5: declaration lookup and statement enumeration
//!
//! The static analyses never parse source themselves; they go through the
//! [`SourceModel`] capability. A lookup miss is an empty result, never an
//! error — the backward search degrades gracefully at the edge of the
//! analyzed source set. [`TextSourceModel`] is the regex-backed default,
//! deliberately decoupled from any real parser: it understands `fn`-style
//! method declarations and brace-delimited bodies, which is enough for the
//! line-oriented reasoning the localizer performs.

use anyhow::{Context, Result};
use fnv::FnvHashMap;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::element::CodeElementName;

/// Declaration and source text of one code element
#[derive(Debug, Clone)]
pub struct Declaration {
    pub element: CodeElementName,
    pub start_line: u32,
    pub source: String,
}

/// One statement of a method body, in program order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub line: u32,
    pub text: String,
}

/// Formal parameter of a method
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub ordinal: usize,
    pub name: String,
}

/// One call of a method, seen from the caller
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    pub caller: CodeElementName,
    pub line: u32,
    pub arguments: Vec<String>,
}

pub trait SourceModel {
    /// Declaration of an element; `None` on a lookup miss.
    fn declaration(&self, element: &CodeElementName) -> Option<Declaration>;

    /// Statements of a method body in program order; empty on a miss.
    fn statements(&self, method: &CodeElementName) -> Vec<Statement>;

    /// Lines of a method that can be executed (and hence instrumented).
    fn executable_lines(&self, method: &CodeElementName) -> Vec<u32>;

    /// Formal parameters of a method, ordinal order.
    fn parameters(&self, method: &CodeElementName) -> Vec<Parameter>;

    /// Call sites of a method across the analyzed source set, program order.
    fn call_sites(&self, callee: &CodeElementName) -> Vec<CallSite>;

    /// Whether a class belongs to the analyzed source set.
    fn contains_class(&self, class: &str) -> bool;

    /// Resolve a bare callee name used inside `caller_class` to a method of
    /// the analyzed set. Same-class methods win; otherwise the match must be
    /// deterministic (lexicographically first).
    fn resolve_callee(&self, caller_class: &str, callee: &str) -> Option<CodeElementName>;
}

#[derive(Debug, Clone)]
struct MethodSource {
    element: CodeElementName,
    parameters: Vec<String>,
    declaration_line: u32,
    /// Body lines after the declaration, absolute line numbers
    body: Vec<(u32, String)>,
}

/// Regex-backed source model over plain text
#[derive(Debug, Default)]
pub struct TextSourceModel {
    methods: FnvHashMap<String, MethodSource>,
    classes: BTreeSet<String>,
    by_bare_name: FnvHashMap<String, BTreeSet<String>>,
}

impl TextSourceModel {
    pub fn new() -> TextSourceModel {
        TextSourceModel::default()
    }

    /// Scan the configured source roots. The class name of a file is its
    /// root-relative path with separators replaced by dots.
    pub fn from_roots(config: &Config) -> Result<TextSourceModel> {
        let mut model = TextSourceModel::new();
        for root in &config.source_roots {
            let mut files = Vec::new();
            collect_source_files(root, &mut files)
                .with_context(|| format!("Failed to scan source root {}", root.display()))?;
            files.sort();
            for file in files {
                let text = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let class = class_name_for(root, &file);
                model.add_class_text(&class, &text);
            }
        }
        Ok(model)
    }

    /// Register all method declarations found in one class body.
    pub fn add_class_text(&mut self, class: &str, text: &str) {
        let decl_re = method_declaration_regex();
        let lines: Vec<&str> = text.lines().collect();
        let mut i = 0;
        while i < lines.len() {
            if let Some(caps) = decl_re.captures(lines[i]) {
                let method = caps.get(1).map(|m| m.as_str().to_string());
                let params = caps.get(2).map(|m| m.as_str().to_string());
                if let (Some(method), Some(params)) = (method, params) {
                    let declaration_line = (i + 1) as u32;
                    let body_end = body_end_index(&lines, i);
                    let body: Vec<(u32, String)> = ((i + 1)..body_end)
                        .map(|j| ((j + 1) as u32, lines[j].to_string()))
                        .collect();
                    let names: Vec<String> = parameter_names(&params)
                        .into_iter()
                        .map(str::to_string)
                        .collect();
                    self.insert_method(class, &method, names, declaration_line, body);
                    i = body_end;
                    continue;
                }
            }
            i += 1;
        }
    }

    /// Register a single method directly. Body lines are numbered from the
    /// line after the declaration.
    pub fn add_method(
        &mut self,
        class: &str,
        method: &str,
        parameters: &[&str],
        declaration_line: u32,
        body: &str,
    ) {
        let body: Vec<(u32, String)> = body
            .lines()
            .enumerate()
            .map(|(offset, text)| (declaration_line + 1 + offset as u32, text.to_string()))
            .collect();
        let parameters: Vec<String> = parameters.iter().map(|p| p.to_string()).collect();
        self.insert_method(class, method, parameters, declaration_line, body);
    }

    fn insert_method(
        &mut self,
        class: &str,
        method: &str,
        parameters: Vec<String>,
        declaration_line: u32,
        body: Vec<(u32, String)>,
    ) {
        let element = CodeElementName::method(class, method);
        let canonical = element.canonical().to_string();
        self.by_bare_name
            .entry(method.to_string())
            .or_default()
            .insert(canonical.clone());
        self.classes.insert(class.to_string());
        self.methods.insert(
            canonical,
            MethodSource {
                element,
                parameters,
                declaration_line,
                body,
            },
        );
    }

    fn method(&self, element: &CodeElementName) -> Option<&MethodSource> {
        let method = element.method_name()?;
        let canonical = format!("{}#{}", element.class_name(), method);
        self.methods.get(&canonical)
    }
}

impl SourceModel for TextSourceModel {
    fn declaration(&self, element: &CodeElementName) -> Option<Declaration> {
        let method = self.method(element)?;
        let mut source = String::new();
        for (_, text) in &method.body {
            source.push_str(text);
            source.push('\n');
        }
        Some(Declaration {
            element: method.element.clone(),
            start_line: method.declaration_line,
            source,
        })
    }

    fn statements(&self, method: &CodeElementName) -> Vec<Statement> {
        let Some(method) = self.method(method) else {
            return Vec::new();
        };
        method
            .body
            .iter()
            .filter(|(_, text)| is_executable(text))
            .map(|(line, text)| Statement {
                line: *line,
                text: text.trim().trim_end_matches(';').to_string(),
            })
            .collect()
    }

    fn executable_lines(&self, method: &CodeElementName) -> Vec<u32> {
        self.statements(method).iter().map(|s| s.line).collect()
    }

    fn parameters(&self, method: &CodeElementName) -> Vec<Parameter> {
        let Some(method) = self.method(method) else {
            return Vec::new();
        };
        method
            .parameters
            .iter()
            .enumerate()
            .map(|(ordinal, name)| Parameter {
                ordinal,
                name: name.clone(),
            })
            .collect()
    }

    fn call_sites(&self, callee: &CodeElementName) -> Vec<CallSite> {
        let Some(bare) = callee.method_name() else {
            return Vec::new();
        };
        let call_re = match Regex::new(&format!(r"\b{}\s*\(", regex::escape(bare))) {
            Ok(re) => re,
            Err(_) => return Vec::new(),
        };
        let mut sites = Vec::new();
        let mut canonicals: Vec<&String> = self.methods.keys().collect();
        canonicals.sort();
        for canonical in canonicals {
            let method = &self.methods[canonical];
            if method.element == *callee {
                continue;
            }
            for (line, text) in &method.body {
                if let Some(found) = call_re.find(text) {
                    let arguments = argument_texts(&text[found.end()..]);
                    sites.push(CallSite {
                        caller: method.element.clone(),
                        line: *line,
                        arguments,
                    });
                }
            }
        }
        sites
    }

    fn contains_class(&self, class: &str) -> bool {
        self.classes.contains(class)
    }

    fn resolve_callee(&self, caller_class: &str, callee: &str) -> Option<CodeElementName> {
        let candidates = self.by_bare_name.get(callee)?;
        let same_class = format!("{}#{}", caller_class, callee);
        if candidates.contains(&same_class) {
            return Some(CodeElementName::from_canonical(&same_class));
        }
        candidates
            .iter()
            .next()
            .map(|canonical| CodeElementName::from_canonical(canonical))
    }
}

fn method_declaration_regex() -> Regex {
    // Matches `fn name(params)` declarations; body is brace-delimited
    Regex::new(r"^\s*(?:pub\s+)?fn\s+(\w+)\s*\(([^)]*)\)").expect("static regex")
}

fn class_name_for(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let mut parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if let Some(last) = parts.last_mut() {
        if let Some(stem) = Path::new(last.as_str()).file_stem() {
            *last = stem.to_string_lossy().into_owned();
        }
    }
    parts.join(".")
}

fn collect_source_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_source_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
    Ok(())
}

/// Index one past the line closing the brace block opened at `start`
fn body_end_index(lines: &[&str], start: usize) -> usize {
    let mut depth = 0i32;
    let mut opened = false;
    for (i, line) in lines.iter().enumerate().skip(start) {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return i + 1;
        }
    }
    lines.len()
}

fn is_executable(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty()
        && !trimmed.starts_with("//")
        && trimmed.chars().any(|c| c != '{' && c != '}' && c != ';')
}

fn parameter_names(params: &str) -> Vec<&str> {
    params
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty() && *p != "&self" && *p != "self" && *p != "&mut self")
        .filter_map(|p| {
            let name = p.split(':').next()?.trim();
            Some(name.trim_start_matches("mut ").trim())
        })
        .filter(|n| !n.is_empty())
        .collect()
}

/// Split the argument text of a call, starting just after the opening paren,
/// at top-level commas.
pub(crate) fn argument_texts(after_paren: &str) -> Vec<String> {
    let mut depth = 1i32;
    let mut current = String::new();
    let mut arguments = Vec::new();
    for ch in after_paren.chars() {
        match ch {
            '(' | '[' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                current.push(ch);
            }
            ',' if depth == 1 => {
                arguments.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        arguments.push(current.trim().to_string());
    }
    arguments
}
