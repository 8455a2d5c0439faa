//! Declaration deduplication, scope by scope, earliest declaration wins.

use crate::scanner::Document;
use crate::scope::ScopeTree;
use crate::types::{
    ChangeKind, ChangeLogEntry, Declaration, LineKind, LineRange, ScopeId, ScopeKind,
};
use std::collections::{BTreeSet, HashMap};

/// First tokens that make a statement, not a declaration
const STATEMENT_KEYWORDS: &[&str] = &[
    "return", "if", "else", "while", "for", "switch", "case", "goto", "break", "continue", "do",
    "default", "delete", "throw", "sizeof", "typedef",
];

/// Result of the deduplication stage
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// Removed line numbers
    pub removed: BTreeSet<usize>,
    /// Retained declarations in input order
    pub retained: Vec<Declaration>,
    /// Dropped redeclarations in input order
    pub duplicates: Vec<Declaration>,
    pub entries: Vec<ChangeLogEntry>,
}

/// Parsed pieces of a single declaration statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDeclaration {
    pub name: String,
    pub type_text: String,
    pub initializer: Option<String>,
}

/// Symbol table a scope declares into. Every global declaration block
/// feeds the same table (`None`); function bodies each own one.
#[must_use]
pub fn table_key(tree: &ScopeTree, scope: ScopeId) -> Option<ScopeId> {
    match tree.get(scope).kind {
        ScopeKind::GlobalDeclarations => None,
        _ => Some(scope),
    }
}

impl DedupOutcome {
    /// Whether a kept declaration falls in `dropped` while a later copy of it
    /// survives outside, so the copy has to become the kept one
    #[must_use]
    pub fn needs_reelection(&self, tree: &ScopeTree, dropped: &BTreeSet<usize>) -> bool {
        self.retained
            .iter()
            .filter(|kept| dropped.contains(&kept.line))
            .any(|kept| {
                self.duplicates.iter().any(|dup| {
                    !dropped.contains(&dup.line)
                        && dup.name == kept.name
                        && table_key(tree, dup.scope) == table_key(tree, kept.scope)
                })
            })
    }
}

/// Collapse repeated declarations inside each declaration scope, ignoring
/// the lines in `skip`
pub fn deduplicate(
    doc: &Document,
    tree: &ScopeTree,
    delimiters: &[char],
    skip: &BTreeSet<usize>,
) -> DedupOutcome {
    let mut outcome = DedupOutcome::default();
    let mut tables: HashMap<Option<ScopeId>, HashMap<String, usize>> = HashMap::new();

    for (idx, line) in doc.lines.iter().enumerate() {
        if skip.contains(&line.number) {
            continue;
        }
        // Removing a line that opens or closes a block comment would expose its contents.
        let starts_in_comment = idx > 0 && doc.lines[idx - 1].ends_in_comment;
        if line.kind != LineKind::Code
            || !line.braces_balanced()
            || line.ends_in_comment
            || starts_in_comment
        {
            continue;
        }
        let Some(scope_id) = tree.scope_at(line.number) else {
            continue;
        };
        let scope = tree.get(scope_id);
        if !scope.kind.holds_declarations() {
            continue;
        }
        let Some(parsed) = parse_declaration(&line.code, delimiters) else {
            continue;
        };

        let decl = Declaration {
            name: parsed.name,
            type_text: parsed.type_text,
            initializer: parsed.initializer,
            scope: scope_id,
            line: line.number,
            text: line.text.clone(),
        };

        let table = tables.entry(table_key(tree, scope_id)).or_default();
        let Some(&kept_idx) = table.get(&decl.name) else {
            table.insert(decl.name.clone(), outcome.retained.len());
            outcome.retained.push(decl);
            continue;
        };

        let kept = &outcome.retained[kept_idx];
        let entry = if kept.same_definition(&decl) {
            ChangeLogEntry::new(
                ChangeKind::DuplicateDeclarationRemoved,
                LineRange::single(decl.line),
                format!(
                    "`{}` already declared on line {} ({} scope)",
                    decl.name,
                    kept.line,
                    scope.kind.as_str()
                ),
            )
        } else {
            log::debug!(
                "conflicting declaration of `{}` on line {} (first on line {})",
                decl.name,
                decl.line,
                kept.line
            );
            ChangeLogEntry::new(
                ChangeKind::ConflictingDeclarationKept,
                LineRange::single(decl.line),
                format!(
                    "`{}` redeclared as `{}`; kept line {}: `{}`",
                    decl.name,
                    decl.describe(),
                    kept.line,
                    kept.describe()
                ),
            )
        };
        outcome.entries.push(entry.related(LineRange::single(kept.line)));
        outcome.removed.insert(decl.line);
        outcome.duplicates.push(decl);
    }

    log::debug!(
        "deduplicator kept {} declaration(s), removed {}",
        outcome.retained.len(),
        outcome.removed.len()
    );
    outcome
}

/// Parse `type tokens name[dims] = initializer;` from the code part of a line
pub fn parse_declaration(code: &str, delimiters: &[char]) -> Option<ParsedDeclaration> {
    let stmt = code.trim();
    let body = stmt.strip_suffix(';')?.trim_end();
    let split = top_level_split(body, delimiters)?;

    let (left, initializer) = match split {
        Some(eq) => {
            let init = normalize_ws(&body[eq + 1..]);
            if init.is_empty() {
                return None;
            }
            (body[..eq].trim(), Some(init))
        }
        None => (body, None),
    };

    if left.contains(['(', ')', ',', '=', '+', '-', '*', '/', '%', '&', '|', '!', '<', '>', '?', '"', '\''])
    {
        return None;
    }

    let (name_part, dims) = match left.find('[') {
        Some(pos) => {
            let dims: String = left[pos..].chars().filter(|c| !c.is_whitespace()).collect();
            if !dims.ends_with(']') {
                return None;
            }
            (&left[..pos], dims)
        }
        None => (left, String::new()),
    };

    let tokens: Vec<&str> = name_part.split_whitespace().collect();
    let (name, type_tokens) = tokens.split_last()?;
    if type_tokens.is_empty() || !is_identifier(name) {
        return None;
    }

    let first = type_tokens[0];
    if STATEMENT_KEYWORDS.contains(&first)
        || !first.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
    {
        return None;
    }
    if !type_tokens.iter().all(|tok| {
        tok.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':'))
    }) {
        return None;
    }

    Some(ParsedDeclaration {
        name: (*name).to_string(),
        type_text: format!("{}{}", type_tokens.join(" "), dims),
        initializer,
    })
}

/// Byte offset of the first top-level assignment `=`. `None` when the text
/// holds a second statement, `Some(None)` when there is no assignment.
fn top_level_split(body: &str, delimiters: &[char]) -> Option<Option<usize>> {
    let mut nesting = 0usize;
    let mut in_string: Option<char> = None;
    let mut escaped = false;
    let mut prev = '\0';
    let mut assignment = None;
    let mut chars = body.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        if let Some(delim) = in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == delim {
                in_string = None;
            }
            prev = ch;
            continue;
        }

        match ch {
            c if delimiters.contains(&c) => in_string = Some(c),
            '(' | '[' | '{' => nesting += 1,
            ')' | ']' | '}' => nesting = nesting.saturating_sub(1),
            ';' if nesting == 0 => return None,
            '=' if nesting == 0 && assignment.is_none() => {
                let next = chars.peek().map(|&(_, c)| c);
                if !matches!(prev, '=' | '!' | '<' | '>') && next != Some('=') {
                    assignment = Some(pos);
                }
            }
            _ => {}
        }
        prev = ch;
    }

    Some(assignment)
}

fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
