//! Line scanner: classifies lines and tracks brace depth while ignoring
//! braces that sit inside comments and string literals.

use crate::config::{CleanerConfig, CommentMarkers};
use crate::types::{BraceEvent, BraceKind, ChangeKind, ChangeLogEntry, LineKind, LineRange, SourceLine};
use regex::Regex;
use std::num::IntErrorKind;

/// Scanned input: the root owner of everything later stages derive
#[derive(Debug, Clone)]
pub struct Document {
    pub lines: Vec<SourceLine>,
    /// Malformed-input warnings found while scanning
    pub warnings: Vec<ChangeLogEntry>,
    /// Input ended with a line terminator
    pub trailing_newline: bool,
}

impl Document {
    /// Line by 1-indexed number
    #[must_use]
    pub fn line(&self, number: usize) -> &SourceLine {
        &self.lines[number - 1]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Number of the last line (0 for an empty document)
    #[must_use]
    pub fn last_line(&self) -> usize {
        self.lines.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    BlockComment,
    Str(char),
}

/// Character-level scanner configured with the language's delimiters
pub struct Scanner<'a> {
    markers: &'a CommentMarkers,
    delimiters: &'a [char],
    step_marker: &'a Regex,
}

impl<'a> Scanner<'a> {
    pub fn new(config: &'a CleanerConfig, step_marker: &'a Regex) -> Self {
        Self {
            markers: &config.comment_markers,
            delimiters: &config.string_delimiters,
            step_marker,
        }
    }

    /// Scan raw text. Never fails; malformed input becomes warnings.
    pub fn scan(&self, text: &str) -> Document {
        let line_marker: Vec<char> = self.markers.line.chars().collect();
        let block_open: Vec<char> = self.markers.block_open.chars().collect();
        let block_close: Vec<char> = self.markers.block_close.chars().collect();
        // A marker that is a prefix of the other must be tried second.
        let line_first = line_marker.len() >= block_open.len();

        let mut lines = Vec::new();
        let mut warnings = Vec::new();
        let mut mode = Mode::Code;
        let mut depth = 0usize;
        let mut open_lines: Vec<usize> = Vec::new();
        let mut comment_start = 0usize;
        let mut string_start = 0usize;

        for (idx, raw) in text.lines().enumerate() {
            let number = idx + 1;
            let chars: Vec<char> = raw.chars().collect();
            let starts_in_comment = mode == Mode::BlockComment;
            let starts_in_string = matches!(mode, Mode::Str(_));
            let depth_before = depth;

            let mut code = String::with_capacity(raw.len());
            let mut braces = Vec::new();
            let mut has_code = false;
            let mut continued = false;
            let mut i = 0usize;

            while i < chars.len() {
                match mode {
                    Mode::BlockComment => {
                        if matches_at(&chars, i, &block_close) {
                            i += block_close.len();
                            mode = Mode::Code;
                        } else {
                            i += 1;
                        }
                    }
                    Mode::Str(delim) => {
                        let ch = chars[i];
                        code.push(ch);
                        if ch == '\\' {
                            if let Some(&next) = chars.get(i + 1) {
                                code.push(next);
                                i += 2;
                            } else {
                                continued = true;
                                i += 1;
                            }
                        } else {
                            if ch == delim {
                                mode = Mode::Code;
                            }
                            i += 1;
                        }
                    }
                    Mode::Code => {
                        let is_line = matches_at(&chars, i, &line_marker);
                        let is_block = matches_at(&chars, i, &block_open);
                        if is_line && (line_first || !is_block) {
                            break;
                        }
                        if is_block {
                            mode = Mode::BlockComment;
                            comment_start = number;
                            code.push(' ');
                            i += block_open.len();
                            continue;
                        }

                        let ch = chars[i];
                        if self.delimiters.contains(&ch) {
                            mode = Mode::Str(ch);
                            string_start = number;
                            has_code = true;
                            code.push(ch);
                            i += 1;
                            continue;
                        }

                        let column = code.chars().count();
                        match ch {
                            '{' => {
                                depth += 1;
                                open_lines.push(number);
                                braces.push(BraceEvent {
                                    kind: BraceKind::Open,
                                    column,
                                    stray: false,
                                });
                            }
                            '}' => {
                                let stray = depth == 0;
                                if stray {
                                    warnings.push(ChangeLogEntry::new(
                                        ChangeKind::UnbalancedBraceWarning,
                                        LineRange::single(number),
                                        format!(
                                            "closing brace at column {} has no matching opening brace",
                                            i + 1
                                        ),
                                    ));
                                } else {
                                    depth -= 1;
                                    open_lines.pop();
                                }
                                braces.push(BraceEvent {
                                    kind: BraceKind::Close,
                                    column,
                                    stray,
                                });
                            }
                            _ => {}
                        }
                        if !ch.is_whitespace() {
                            has_code = true;
                        }
                        code.push(ch);
                        i += 1;
                    }
                }
            }

            if matches!(mode, Mode::Str(_)) && !continued {
                warnings.push(ChangeLogEntry::new(
                    ChangeKind::UnterminatedString,
                    LineRange::new(string_start, number),
                    "string literal not closed before end of line",
                ));
                mode = Mode::Code;
            }

            let kind = if starts_in_string {
                LineKind::StringLiteralInterior
            } else if has_code {
                LineKind::Code
            } else if starts_in_comment {
                LineKind::CommentBlockInterior
            } else if raw.trim().is_empty() {
                LineKind::Blank
            } else {
                LineKind::CommentLine
            };

            let step_label = match kind {
                LineKind::Code | LineKind::CommentLine => self
                    .step_marker
                    .captures(raw)
                    .and_then(|caps| caps.get(1))
                    .and_then(|m| parse_label(m.as_str())),
                _ => None,
            };

            lines.push(SourceLine {
                number,
                text: raw.to_string(),
                kind,
                depth_before,
                depth_after: depth,
                code,
                braces,
                ends_in_comment: mode == Mode::BlockComment,
                ends_in_string: match mode {
                    Mode::Str(delim) => Some(delim),
                    _ => None,
                },
                step_label,
            });
        }

        let last = lines.len();
        match mode {
            Mode::BlockComment => warnings.push(ChangeLogEntry::new(
                ChangeKind::UnterminatedComment,
                LineRange::new(comment_start, last),
                "block comment not closed at end of input",
            )),
            Mode::Str(_) => warnings.push(ChangeLogEntry::new(
                ChangeKind::UnterminatedString,
                LineRange::new(string_start, last),
                "string literal not closed at end of input",
            )),
            Mode::Code => {}
        }

        if let Some(&first_open) = open_lines.first() {
            warnings.push(ChangeLogEntry::new(
                ChangeKind::UnbalancedBraceWarning,
                LineRange::new(first_open, last),
                format!("{} unclosed brace(s) at end of input", open_lines.len()),
            ));
        }

        if !warnings.is_empty() {
            log::debug!("scanner recorded {} malformed-input warning(s)", warnings.len());
        }

        Document {
            lines,
            warnings,
            trailing_newline: text.ends_with('\n'),
        }
    }
}

/// Step label digits; labels past `u64::MAX` saturate so they still trip the ceiling
fn parse_label(digits: &str) -> Option<u64> {
    match digits.parse::<u64>() {
        Ok(label) => Some(label),
        Err(err) if *err.kind() == IntErrorKind::PosOverflow => Some(u64::MAX),
        Err(_) => None,
    }
}

fn matches_at(chars: &[char], at: usize, marker: &[char]) -> bool {
    !marker.is_empty() && chars.len() >= at + marker.len() && chars[at..at + marker.len()] == *marker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_STEP_MARKER_PATTERN;

    fn scan(text: &str) -> Document {
        let config = CleanerConfig::default();
        let re = Regex::new(DEFAULT_STEP_MARKER_PATTERN).unwrap();
        Scanner::new(&config, &re).scan(text)
    }

    #[test]
    fn test_classifies_lines() {
        let doc = scan("int x;\n// note\n\n/* a\n b\n*/ y = 1;\n");
        let kinds: Vec<LineKind> = doc.lines.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![
                LineKind::Code,
                LineKind::CommentLine,
                LineKind::Blank,
                LineKind::CommentLine,
                LineKind::CommentBlockInterior,
                LineKind::Code,
            ]
        );
        assert!(doc.line(4).ends_in_comment);
        assert!(!doc.line(6).ends_in_comment);
        assert!(doc.trailing_newline);
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn test_braces_in_strings_and_comments_ignored() {
        let doc = scan("f() {\n  write(\"}\"); // }\n  /* { */ c = '{';\n}\n");
        assert_eq!(doc.line(1).depth_after, 1);
        assert_eq!(doc.line(2).depth_after, 1);
        assert_eq!(doc.line(3).depth_after, 1);
        assert_eq!(doc.line(4).depth_after, 0);
        assert!(doc.line(2).braces.is_empty());
        assert_eq!(doc.line(2).code.trim(), "write(\"}\");");
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn test_escaped_quote_stays_in_string() {
        let doc = scan("write(\"say \\\"}\\\" now\");\n");
        assert!(doc.line(1).braces.is_empty());
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn test_stray_close_clamped_and_warned() {
        let doc = scan("}\nx = 1;\n");
        assert_eq!(doc.line(1).depth_after, 0);
        assert!(doc.line(1).braces[0].stray);
        assert_eq!(doc.warnings.len(), 1);
        assert_eq!(doc.warnings[0].kind, ChangeKind::UnbalancedBraceWarning);
    }

    #[test]
    fn test_unclosed_braces_warned_once() {
        let doc = scan("a() {\n  if (x) {\n");
        assert_eq!(doc.line(2).depth_after, 2);
        assert_eq!(doc.warnings.len(), 1);
        assert_eq!(doc.warnings[0].lines, LineRange::new(1, 2));
        assert!(doc.warnings[0].detail.starts_with("2 unclosed"));
    }

    #[test]
    fn test_unterminated_block_comment() {
        let doc = scan("x = 1;\n/* never { closed\nstill }\n");
        assert_eq!(doc.line(3).kind, LineKind::CommentBlockInterior);
        assert_eq!(doc.line(3).depth_after, 0);
        assert_eq!(doc.warnings.len(), 1);
        assert_eq!(doc.warnings[0].kind, ChangeKind::UnterminatedComment);
        assert_eq!(doc.warnings[0].lines, LineRange::new(2, 3));
    }

    #[test]
    fn test_unterminated_string_closes_at_line_end() {
        let doc = scan("write(\"oops {);\ny = 2;\n");
        assert!(doc.line(1).braces.is_empty());
        assert_eq!(doc.line(2).kind, LineKind::Code);
        assert_eq!(doc.warnings.len(), 1);
        assert_eq!(doc.warnings[0].kind, ChangeKind::UnterminatedString);
    }

    #[test]
    fn test_string_continuation() {
        let doc = scan("s = \"first \\\n second\";\n");
        assert_eq!(doc.line(2).kind, LineKind::StringLiteralInterior);
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn test_step_labels() {
        let doc = scan("  // Step 12: send request\n// step 3\nx = 1; // Step 4\n/* Step 5 */\n");
        assert_eq!(doc.line(1).step_label, Some(12));
        assert_eq!(doc.line(2).step_label, Some(3));
        assert_eq!(doc.line(3).step_label, None);
        assert_eq!(doc.line(4).step_label, None);
    }

    #[test]
    fn test_oversized_step_label_saturates() {
        let doc = scan("// Step 99999999999999999999999: runaway
// Step 18446744073709551615
");
        assert_eq!(doc.line(1).step_label, Some(u64::MAX));
        assert_eq!(doc.line(2).step_label, Some(u64::MAX));
    }

    #[test]
    fn test_continued_string_at_end_of_input() {
        let doc = scan("write(\"abc\\\n");
        assert_eq!(doc.line(1).ends_in_string, Some('"'));
        assert_eq!(doc.warnings.len(), 1);
        assert_eq!(doc.warnings[0].kind, ChangeKind::UnterminatedString);

        let doc = scan("s = \"first \\\n second\";\n");
        assert_eq!(doc.line(1).ends_in_string, Some('"'));
        assert_eq!(doc.line(2).ends_in_string, None);
    }

    #[test]
    fn test_empty_input() {
        let doc = scan("");
        assert!(doc.lines.is_empty());
        assert!(!doc.trailing_newline);
    }
}
