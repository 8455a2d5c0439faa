use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a scope inside a [`ScopeTree`](crate::scope::ScopeTree) arena
pub type ScopeId = usize;

/// Classification of one physical line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineKind {
    /// Carries code outside comments (string literals count as code)
    Code,
    /// Only comments (line comment, or a block comment opened on this line)
    CommentLine,
    /// Starts inside a block comment and carries no code
    CommentBlockInterior,
    /// Starts inside a string continued from the previous line
    StringLiteralInterior,
    /// Whitespace only
    Blank,
}

/// Opening or closing brace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BraceKind {
    Open,
    Close,
}

/// A structural brace seen in code (never inside a comment or string)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BraceEvent {
    pub kind: BraceKind,
    /// Character column within [`SourceLine::code`] (0-based)
    pub column: usize,
    /// A `}` that would have taken depth below zero
    pub stray: bool,
}

/// One physical line of input with scanner annotations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// Line number (1-indexed)
    pub number: usize,

    /// Raw text without the line terminator
    pub text: String,

    /// Classification
    pub kind: LineKind,

    /// Brace depth when the line starts
    pub depth_before: usize,

    /// Brace depth when the line ends (clamped at zero)
    pub depth_after: usize,

    /// Code portion of the line: comments removed, string literals kept
    pub code: String,

    /// Structural braces in order of appearance
    pub braces: Vec<BraceEvent>,

    /// The line ends inside an open block comment
    pub ends_in_comment: bool,

    /// Delimiter of a string literal continued past the end of this line
    pub ends_in_string: Option<char>,

    /// Label of a step marker on this line
    pub step_label: Option<u64>,
}

impl SourceLine {
    /// Leading whitespace of the raw text
    #[must_use]
    pub fn indent(&self) -> &str {
        let trimmed = self.text.trim_start();
        &self.text[..self.text.len() - trimmed.len()]
    }

    #[must_use]
    pub const fn is_blank(&self) -> bool {
        matches!(self.kind, LineKind::Blank)
    }

    /// Every `{` on the line is closed on the same line
    #[must_use]
    pub fn braces_balanced(&self) -> bool {
        let mut open = 0usize;
        for event in &self.braces {
            match event.kind {
                BraceKind::Open => open += 1,
                BraceKind::Close if event.stray => return false,
                BraceKind::Close => {
                    if open == 0 {
                        return false;
                    }
                    open -= 1;
                }
            }
        }
        open == 0
    }

    /// Code consists of nothing but braces and semicolons
    #[must_use]
    pub fn is_brace_only(&self) -> bool {
        let code = self.code.trim();
        !code.is_empty()
            && code
                .chars()
                .all(|ch| matches!(ch, '{' | '}' | ';') || ch.is_whitespace())
    }
}

/// Inclusive 1-indexed line span
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub const fn single(line: usize) -> Self {
        Self {
            start: line,
            end: line,
        }
    }

    /// Number of lines in the range
    #[must_use]
    pub const fn line_count(&self) -> usize {
        self.end.saturating_sub(self.start) + 1
    }

    #[must_use]
    pub const fn contains(&self, line: usize) -> bool {
        line >= self.start && line <= self.end
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Kind of a brace-delimited scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKind {
    /// `variables { ... }` at depth zero
    GlobalDeclarations,
    /// Body following a signature-like header
    FunctionBody,
    /// Any other block (conditionals, loops, initializer lists)
    Other,
}

impl ScopeKind {
    /// Declarations inside this scope are deduplicated
    #[must_use]
    pub const fn holds_declarations(self) -> bool {
        matches!(self, Self::GlobalDeclarations | Self::FunctionBody)
    }

    /// Statement blocks inside this scope are subject to repetition collapse
    #[must_use]
    pub const fn holds_statements(self) -> bool {
        matches!(self, Self::FunctionBody | Self::Other)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GlobalDeclarations => "global_declarations",
            Self::FunctionBody => "function_body",
            Self::Other => "other",
        }
    }
}

/// A brace-delimited span of lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    /// Header text that preceded the opening brace
    pub header: String,
    /// Line the header starts on (the brace line when there is no header)
    pub header_line: usize,
    /// Line holding the opening brace
    pub start_line: usize,
    /// Line holding the matching closing brace; `None` when never closed
    pub end_line: Option<usize>,
    /// Brace depth right before the opening brace
    pub open_depth: usize,
    pub parent: Option<ScopeId>,
}

/// A symbol declaration found directly inside a declaration scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    /// Symbol name
    pub name: String,
    /// Type tokens plus array dimensions, whitespace normalized
    pub type_text: String,
    /// Initializer, whitespace normalized
    pub initializer: Option<String>,
    /// Owning scope (non-owning reference into the arena)
    pub scope: ScopeId,
    /// First-seen line (1-indexed)
    pub line: usize,
    /// Full declaration line as written
    pub text: String,
}

impl Declaration {
    /// Same type text and same initializer
    #[must_use]
    pub fn same_definition(&self, other: &Self) -> bool {
        self.type_text == other.type_text && self.initializer == other.initializer
    }

    /// Compact `type name = init` rendering for log details
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.initializer {
            Some(init) => format!("{} {} = {}", self.type_text, self.name, init),
            None => format!("{} {}", self.type_text, self.name),
        }
    }
}

/// A detected repeating unit: a numbered step or a structurally repeated block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepBlock {
    /// Step label when the block starts with a step marker
    pub label: Option<u64>,
    pub start_line: usize,
    pub end_line: usize,
    /// Whitespace-insensitive content hash
    pub fingerprint: String,
}

impl StepBlock {
    #[must_use]
    pub const fn range(&self) -> LineRange {
        LineRange::new(self.start_line, self.end_line)
    }
}

/// Kind of a recorded cleanup action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    DuplicateDeclarationRemoved,
    ConflictingDeclarationKept,
    RepeatedBlockTruncated,
    StepCeilingReached,
    StepOrderViolation,
    UnbalancedBraceWarning,
    UnterminatedComment,
    UnterminatedString,
}

impl ChangeKind {
    /// Warning about the shape of the input rather than a removal
    #[must_use]
    pub const fn is_malformed_input(self) -> bool {
        matches!(
            self,
            Self::UnbalancedBraceWarning | Self::UnterminatedComment | Self::UnterminatedString
        )
    }

    /// Pipeline stage that emits this kind; orders entries sharing a line
    #[must_use]
    pub const fn stage(self) -> u8 {
        match self {
            Self::UnbalancedBraceWarning | Self::UnterminatedComment | Self::UnterminatedString => 0,
            Self::DuplicateDeclarationRemoved | Self::ConflictingDeclarationKept => 1,
            Self::StepCeilingReached | Self::StepOrderViolation | Self::RepeatedBlockTruncated => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateDeclarationRemoved => "duplicate_declaration_removed",
            Self::ConflictingDeclarationKept => "conflicting_declaration_kept",
            Self::RepeatedBlockTruncated => "repeated_block_truncated",
            Self::StepCeilingReached => "step_ceiling_reached",
            Self::StepOrderViolation => "step_order_violation",
            Self::UnbalancedBraceWarning => "unbalanced_brace_warning",
            Self::UnterminatedComment => "unterminated_comment",
            Self::UnterminatedString => "unterminated_string",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded cleanup action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub kind: ChangeKind,
    /// Affected lines of the input
    pub lines: LineRange,
    /// Retained counterpart (the first-seen declaration)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<LineRange>,
    pub detail: String,
}

impl ChangeLogEntry {
    pub fn new(kind: ChangeKind, lines: LineRange, detail: impl Into<String>) -> Self {
        Self {
            kind,
            lines,
            related: None,
            detail: detail.into(),
        }
    }

    /// Builder: set the related range
    #[must_use]
    pub const fn related(mut self, range: LineRange) -> Self {
        self.related = Some(range);
        self
    }
}

impl fmt::Display for ChangeLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] line {}: {}", self.kind, self.lines, self.detail)
    }
}

/// Statistics about one cleanup run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanStats {
    pub input_lines: usize,
    pub output_lines: usize,
    pub removed_lines: usize,
    pub synthesized_lines: usize,
    pub retained_declarations: usize,
    pub retained_step_blocks: usize,
}

impl fmt::Display for CleanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lines: {} -> {} | Removed: {} | Synthesized: {} | Declarations: {} | Steps: {}",
            self.input_lines,
            self.output_lines,
            self.removed_lines,
            self.synthesized_lines,
            self.retained_declarations,
            self.retained_step_blocks
        )
    }
}

/// Result of one cleanup invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanOutput {
    pub cleaned_text: String,
    pub change_log: Vec<ChangeLogEntry>,
    pub stats: CleanStats,
    /// Retained numbered steps, in input line numbers
    #[serde(default)]
    pub step_blocks: Vec<StepBlock>,
}

impl CleanOutput {
    /// Number of log entries of the given kind
    #[must_use]
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.change_log.iter().filter(|e| e.kind == kind).count()
    }

    /// Log entries of the given kind
    pub fn entries(&self, kind: ChangeKind) -> impl Iterator<Item = &ChangeLogEntry> {
        self.change_log.iter().filter(move |e| e.kind == kind)
    }

    /// The text was changed by the run
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.stats.removed_lines > 0 || self.stats.synthesized_lines > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str, code: &str, braces: Vec<BraceEvent>) -> SourceLine {
        SourceLine {
            number: 1,
            text: text.to_string(),
            kind: LineKind::Code,
            depth_before: 0,
            depth_after: 0,
            code: code.to_string(),
            braces,
            ends_in_comment: false,
            ends_in_string: None,
            step_label: None,
        }
    }

    fn brace(kind: BraceKind) -> BraceEvent {
        BraceEvent {
            kind,
            column: 0,
            stray: false,
        }
    }

    #[test]
    fn test_line_range_display_and_count() {
        assert_eq!(LineRange::single(4).to_string(), "4");
        assert_eq!(LineRange::new(4, 9).to_string(), "4-9");
        assert_eq!(LineRange::new(4, 9).line_count(), 6);
        assert!(LineRange::new(4, 9).contains(9));
        assert!(!LineRange::new(4, 9).contains(10));
    }

    #[test]
    fn test_indent_and_brace_only() {
        let l = line("    }", "    }", vec![brace(BraceKind::Close)]);
        assert_eq!(l.indent(), "    ");
        assert!(l.is_brace_only());

        let l = line("  x = 1;", "  x = 1;", vec![]);
        assert!(!l.is_brace_only());
    }

    #[test]
    fn test_braces_balanced() {
        let l = line(
            "byte d[2] = {1, 2};",
            "byte d[2] = {1, 2};",
            vec![brace(BraceKind::Open), brace(BraceKind::Close)],
        );
        assert!(l.braces_balanced());

        let l = line("if (x) {", "if (x) {", vec![brace(BraceKind::Open)]);
        assert!(!l.braces_balanced());

        let l = line("} else {", "} else {", vec![brace(BraceKind::Close), brace(BraceKind::Open)]);
        assert!(!l.braces_balanced());
    }

    #[test]
    fn test_scope_kind_roles() {
        assert!(ScopeKind::GlobalDeclarations.holds_declarations());
        assert!(ScopeKind::FunctionBody.holds_declarations());
        assert!(!ScopeKind::Other.holds_declarations());
        assert!(ScopeKind::Other.holds_statements());
        assert!(!ScopeKind::GlobalDeclarations.holds_statements());
    }

    #[test]
    fn test_change_kind_grouping() {
        assert!(ChangeKind::UnbalancedBraceWarning.is_malformed_input());
        assert!(ChangeKind::UnterminatedComment.is_malformed_input());
        assert!(!ChangeKind::StepCeilingReached.is_malformed_input());
        assert!(ChangeKind::UnterminatedString.stage() < ChangeKind::DuplicateDeclarationRemoved.stage());
        assert_eq!(
            serde_json::to_string(&ChangeKind::StepCeilingReached).unwrap(),
            "\"step_ceiling_reached\""
        );
    }

    #[test]
    fn test_declaration_same_definition() {
        let a = Declaration {
            name: "x".to_string(),
            type_text: "int".to_string(),
            initializer: Some("0".to_string()),
            scope: 0,
            line: 2,
            text: "int x = 0;".to_string(),
        };
        let mut b = a.clone();
        b.line = 5;
        assert!(a.same_definition(&b));
        b.initializer = Some("1".to_string());
        assert!(!a.same_definition(&b));
        assert_eq!(a.describe(), "int x = 0");
    }
}
