//! Output assembly: retained lines plus synthesized closers, the ordered
//! change log and run statistics.

use crate::scanner::Document;
use crate::types::{ChangeLogEntry, CleanOutput, CleanStats, StepBlock};
use std::collections::BTreeSet;

/// Everything the emitter needs from the earlier stages
pub struct EmitInput<'a> {
    pub doc: &'a Document,
    /// Union of all removal sets
    pub removed: &'a BTreeSet<usize>,
    pub synthesized: &'a [String],
    pub entries: Vec<ChangeLogEntry>,
    pub retained_declarations: usize,
    pub step_blocks: Vec<StepBlock>,
}

/// Build the final [`CleanOutput`]
pub fn emit(input: EmitInput<'_>) -> CleanOutput {
    let EmitInput {
        doc,
        removed,
        synthesized,
        mut entries,
        retained_declarations,
        step_blocks,
    } = input;

    let mut out_lines: Vec<&str> = doc
        .lines
        .iter()
        .filter(|line| !removed.contains(&line.number))
        .map(|line| line.text.as_str())
        .collect();
    out_lines.extend(synthesized.iter().map(String::as_str));

    let mut cleaned_text = out_lines.join("\n");
    if doc.trailing_newline && !out_lines.is_empty() {
        cleaned_text.push('\n');
    }

    entries.sort_by_key(|entry| (entry.lines.start, entry.kind.stage()));

    let removed_lines = doc
        .lines
        .iter()
        .filter(|line| removed.contains(&line.number))
        .count();

    let stats = CleanStats {
        input_lines: doc.len(),
        output_lines: out_lines.len(),
        removed_lines,
        synthesized_lines: synthesized.len(),
        retained_declarations,
        retained_step_blocks: step_blocks.len(),
    };

    CleanOutput {
        cleaned_text,
        change_log: entries,
        stats,
        step_blocks,
    }
}
