//! Scope tracking: turns brace transitions into a tree of declaration,
//! function-body and other scopes.

use crate::config::CleanerConfig;
use crate::scanner::Document;
use crate::types::{BraceKind, LineKind, Scope, ScopeId, ScopeKind};

/// Headers starting with these never open a function body
const CONTROL_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "switch", "do", "catch", "try", "case", "default",
];

/// How far back a header split over several lines is followed
const MAX_HEADER_LINES: usize = 8;

/// Arena of scopes derived from one document
#[derive(Debug, Clone, Default)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    /// Innermost scope each line starts in (index = line number - 1)
    scope_at: Vec<Option<ScopeId>>,
}

impl ScopeTree {
    /// Build the tree from scanner output
    pub fn build(doc: &Document, config: &CleanerConfig) -> Self {
        let mut tree = Self {
            scopes: Vec::new(),
            scope_at: Vec::with_capacity(doc.len()),
        };
        let mut stack: Vec<ScopeId> = Vec::new();

        for (idx, line) in doc.lines.iter().enumerate() {
            tree.scope_at.push(stack.last().copied());

            for event in &line.braces {
                match event.kind {
                    BraceKind::Open => {
                        let (header, header_line) = header_for(doc, idx, event.column);
                        let open_depth = stack.len();
                        let kind = classify(&header, open_depth, config);
                        let id = tree.scopes.len();
                        let parent = stack.last().copied();
                        tree.scopes.push(Scope {
                            id,
                            kind,
                            header,
                            header_line,
                            start_line: line.number,
                            end_line: None,
                            open_depth,
                            parent,
                        });
                        stack.push(id);
                    }
                    BraceKind::Close if event.stray => {}
                    BraceKind::Close => {
                        if let Some(id) = stack.pop() {
                            tree.scopes[id].end_line = Some(line.number);
                        }
                    }
                }
            }
        }

        log::debug!(
            "scope tracker found {} scope(s), {} left open",
            tree.scopes.len(),
            stack.len()
        );
        tree
    }

    #[must_use]
    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id]
    }

    #[must_use]
    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// Innermost scope the given line (1-indexed) starts in
    #[must_use]
    pub fn scope_at(&self, line: usize) -> Option<ScopeId> {
        self.scope_at.get(line.wrapping_sub(1)).copied().flatten()
    }

    /// Outermost ancestor of a scope (the scope itself at depth zero)
    #[must_use]
    pub fn top_level(&self, mut id: ScopeId) -> ScopeId {
        while let Some(parent) = self.scopes[id].parent {
            id = parent;
        }
        id
    }
}

/// Text that introduced the brace at `column` of line `idx`, and the line
/// that text starts on
fn header_for(doc: &Document, idx: usize, column: usize) -> (String, usize) {
    let code: String = doc.lines[idx].code.chars().take(column).collect();
    let mut header = after_last_terminator(&code).to_string();
    let mut header_line = doc.lines[idx].number;
    let terminated = code.contains([';', '{', '}']);
    if !header.is_empty() && (terminated || !unclosed_parens(&header)) {
        return (header, header_line);
    }

    // Walk back over a parameter list split across lines.
    let previous = doc.lines[..idx]
        .iter()
        .rev()
        .filter(|line| line.kind == LineKind::Code)
        .take(MAX_HEADER_LINES);
    for line in previous {
        let prev = line.code.trim();
        if prev.ends_with([';', '{', '}']) {
            break;
        }
        let part = after_last_terminator(prev);
        header = if header.is_empty() {
            part.to_string()
        } else {
            format!("{part} {header}")
        };
        header_line = line.number;
        if prev.contains([';', '{', '}']) || !unclosed_parens(&header) {
            break;
        }
    }
    (header, header_line)
}

fn unclosed_parens(header: &str) -> bool {
    header.matches(')').count() > header.matches('(').count()
}

fn after_last_terminator(code: &str) -> &str {
    let start = code.rfind([';', '{', '}']).map_or(0, |pos| pos + 1);
    code[start..].trim()
}

fn classify(header: &str, open_depth: usize, config: &CleanerConfig) -> ScopeKind {
    if open_depth != 0 || header.is_empty() {
        return ScopeKind::Other;
    }
    if header == config.declaration_scope_keyword.trim() {
        return ScopeKind::GlobalDeclarations;
    }
    if is_signature(header, &config.handler_keywords) {
        return ScopeKind::FunctionBody;
    }
    ScopeKind::Other
}

fn is_signature(header: &str, handler_keywords: &[String]) -> bool {
    let first = header
        .split(|ch: char| ch.is_whitespace() || ch == '(')
        .next()
        .unwrap_or_default();
    if CONTROL_KEYWORDS.contains(&first) {
        return false;
    }
    if handler_keywords.iter().any(|kw| kw.trim() == first) {
        return true;
    }
    header.contains('(') && header.ends_with(')') && !header.contains('=')
}
