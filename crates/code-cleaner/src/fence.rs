//! Markdown fenced-block helpers.
//!
//! Generated output usually arrives as a markdown document wrapping the
//! code in ```` ```capl ```` fences. These helpers pull the code out, or
//! clean it in place while leaving the surrounding prose untouched.

use crate::cleaner::Cleaner;
use crate::error::{CleanerError, Result};
use crate::types::CleanOutput;

const FENCE: &str = "```";

/// One fenced code block of a markdown document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    /// Line of the opening fence (1-indexed)
    pub open_line: usize,
    /// Line of the closing fence; `None` when the block runs to end of document
    pub close_line: Option<usize>,
    /// Block content, one `\n` after every line
    pub code: String,
}

impl FencedBlock {
    /// Number of content lines
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.code.lines().count()
    }
}

/// Result of cleaning every block of a markdown document
#[derive(Debug, Clone)]
pub struct MarkdownClean {
    pub document: String,
    /// One output per block, in document order
    pub blocks: Vec<CleanOutput>,
}

impl MarkdownClean {
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.blocks.iter().any(CleanOutput::is_modified)
    }
}

/// Every block fenced with the given language tag (case-insensitive)
pub fn extract_fenced_blocks(doc: &str, lang: &str) -> Vec<FencedBlock> {
    let lines: Vec<&str> = doc.lines().collect();
    spans(&lines, lang)
        .into_iter()
        .map(|(open, close)| {
            let end = close.unwrap_or(lines.len());
            let mut code = String::new();
            for line in &lines[open + 1..end] {
                code.push_str(line);
                code.push('\n');
            }
            FencedBlock {
                open_line: open + 1,
                close_line: close.map(|c| c + 1),
                code,
            }
        })
        .collect()
}

/// Concatenated code of every block, each trimmed and newline-terminated
pub fn extract_code(doc: &str, lang: &str) -> Result<String> {
    let blocks = extract_fenced_blocks(doc, lang);
    if blocks.is_empty() {
        return Err(CleanerError::no_fenced_block(lang));
    }

    let mut code = String::new();
    for block in blocks {
        code.push_str(block.code.trim());
        code.push('\n');
    }
    Ok(code)
}

/// Clean every block in place, keeping the rest of the document verbatim
pub fn clean_markdown(cleaner: &Cleaner, doc: &str, lang: &str) -> Result<MarkdownClean> {
    let lines: Vec<&str> = doc.lines().collect();
    let spans = spans(&lines, lang);
    if spans.is_empty() {
        return Err(CleanerError::no_fenced_block(lang));
    }

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut blocks = Vec::with_capacity(spans.len());
    let mut cursor = 0usize;

    for (open, close) in spans {
        out.extend(lines[cursor..=open].iter().map(|l| (*l).to_string()));

        let end = close.unwrap_or(lines.len());
        let mut code = lines[open + 1..end].join("\n");
        if end > open + 1 {
            code.push('\n');
        }
        let cleaned = cleaner.clean(&code);
        out.extend(cleaned.cleaned_text.lines().map(str::to_string));
        blocks.push(cleaned);

        cursor = end;
    }
    out.extend(lines[cursor..].iter().map(|l| (*l).to_string()));

    let mut document = out.join("\n");
    if doc.ends_with('\n') && !out.is_empty() {
        document.push('\n');
    }

    log::debug!("cleaned {} fenced `{lang}` block(s)", blocks.len());
    Ok(MarkdownClean { document, blocks })
}

/// `(open, close)` line indexes of every matching block
fn spans(lines: &[&str], lang: &str) -> Vec<(usize, Option<usize>)> {
    let mut spans = Vec::new();
    let mut idx = 0usize;

    while idx < lines.len() {
        let Some(info) = lines[idx].trim().strip_prefix(FENCE) else {
            idx += 1;
            continue;
        };
        let close = lines[idx + 1..]
            .iter()
            .position(|line| line.trim() == FENCE)
            .map(|offset| idx + 1 + offset);

        let tag = info.split_whitespace().next().unwrap_or_default();
        if tag.eq_ignore_ascii_case(lang) {
            spans.push((idx, close));
        }
        // Skip over the block whatever its language.
        idx = close.map_or(lines.len(), |c| c + 1);
    }
    spans
}
