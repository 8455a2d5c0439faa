//! # Testgen Code Cleaner
//!
//! Deterministic post-generation cleanup for LLM-generated procedural test code.
//!
//! ## Philosophy
//!
//! Generation occasionally runs away and re-emits declarations, loop bodies and
//! numbered test steps until the token budget is exhausted. The cleaner turns
//! such output back into something a syntax checker can accept:
//! - Declarations are unique per scope (earliest wins)
//! - Step numbering is bounded and never restarts inside one test case
//! - Structurally repeated blocks are capped per enclosing scope
//! - Braces removed by truncation are restored
//!
//! It never parses the full grammar and never fails on malformed input;
//! everything it does is recorded in a structured change log.
//!
//! ## Architecture
//!
//! ```text
//! Raw text
//!     │
//!     ├──> Scanner
//!     │    └─> SourceLine[] (kind, code part, brace events, step labels)
//!     │
//!     ├──> Scope Tracker
//!     │    └─> ScopeTree (GlobalDeclarations / FunctionBody / Other)
//!     │
//!     ├──> Declaration Deduplicator
//!     │    └─> removed lines + retained declarations per scope
//!     │
//!     ├──> Bound Enforcer
//!     │    ├─> step ceiling, step order
//!     │    ├─> repetition collapse (innermost scopes first)
//!     │    └─> synthesized closers
//!     │
//!     └──> Emitter
//!          └─> CleanOutput { cleaned_text, change_log, stats }
//! ```
//!
//! ## Example
//!
//! ```rust
//! use testgen_code_cleaner::{ChangeKind, Cleaner, CleanerConfig};
//!
//! let cleaner = Cleaner::new(CleanerConfig::default()).unwrap();
//!
//! let code = "variables\n{\n  int x = 0;\n  int x = 0;\n}\n";
//! let output = cleaner.clean(code);
//!
//! assert_eq!(output.cleaned_text, "variables\n{\n  int x = 0;\n}\n");
//! assert_eq!(output.count(ChangeKind::DuplicateDeclarationRemoved), 1);
//! for entry in &output.change_log {
//!     println!("{entry}");
//! }
//! ```

mod analysis;
mod bounds;
mod cleaner;
mod config;
mod dedup;
mod emitter;
mod error;
mod fence;
mod scanner;
mod scope;
mod types;

pub use analysis::{
    AnalysisReport, DuplicateSymbol, LoopVerdict, RepeatedStep, ScopeDeclarations, StepMarker,
};
pub use cleaner::Cleaner;
pub use config::{CleanerConfig, CommentMarkers, DEFAULT_STEP_MARKER_PATTERN};
pub use error::{CleanerError, Result};
pub use fence::{clean_markdown, extract_code, extract_fenced_blocks, FencedBlock, MarkdownClean};
pub use types::{
    ChangeKind, ChangeLogEntry, CleanOutput, CleanStats, Declaration, LineKind, LineRange,
    ScopeKind, StepBlock,
};
