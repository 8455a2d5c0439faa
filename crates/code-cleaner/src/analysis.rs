//! Report-only view of a cleanup run: declarations, duplicate symbols,
//! step markers and a loop verdict.

use crate::cleaner::Pipeline;
use crate::config::CleanerConfig;
use crate::dedup;
use crate::types::{ChangeLogEntry, CleanOutput, CleanStats, ScopeId, ScopeKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Shortest and longest step sequence checked for back-to-back repetition
const PATTERN_LENGTHS: std::ops::RangeInclusive<usize> = 2..=5;

/// Why generation is suspected to have looped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopVerdict {
    /// No loop suspected
    None,
    /// A step label exceeds the configured ceiling
    StepCeilingExceeded { max_step: u64 },
    /// Step descriptions occurring more often than the repetition threshold
    RepeatedSteps { descriptions: Vec<RepeatedStep> },
    /// A sequence of step descriptions repeating back to back
    ConsecutivePattern {
        pattern: Vec<String>,
        repeat_count: usize,
        /// Index into the step list where the first occurrence starts
        start_index: usize,
    },
}

impl LoopVerdict {
    #[must_use]
    pub const fn is_loop(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for LoopVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("no loop detected"),
            Self::StepCeilingExceeded { max_step } => {
                write!(f, "step number too large ({max_step})")
            }
            Self::RepeatedSteps { descriptions } => {
                let shown: Vec<String> = descriptions
                    .iter()
                    .take(3)
                    .map(|d| format!("{:?} x{}", d.description, d.count))
                    .collect();
                write!(f, "repeated steps: {}", shown.join(", "))
            }
            Self::ConsecutivePattern {
                pattern,
                repeat_count,
                start_index,
            } => write!(
                f,
                "{}-step pattern repeated {repeat_count} times from step #{}",
                pattern.len(),
                start_index + 1
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatedStep {
    pub description: String,
    pub count: usize,
}

/// A step marker found in the input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMarker {
    pub label: u64,
    pub line: usize,
    /// Text after the marker, e.g. `send request` for `// Step 3: send request`
    pub description: String,
}

/// Retained declarations of one scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDeclarations {
    pub scope_kind: ScopeKind,
    pub header: String,
    pub start_line: usize,
    pub names: Vec<String>,
}

/// A symbol declared more than once in one scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSymbol {
    pub name: String,
    pub first_line: usize,
    pub duplicate_lines: Vec<usize>,
    /// At least one redeclaration differs from the first
    pub conflicting: bool,
}

/// What a cleanup would find and do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub total_lines: usize,
    pub declarations: Vec<ScopeDeclarations>,
    pub duplicates: Vec<DuplicateSymbol>,
    pub steps: Vec<StepMarker>,
    pub max_step: Option<u64>,
    pub verdict: LoopVerdict,
    pub change_log: Vec<ChangeLogEntry>,
    /// Statistics the cleanup would produce
    pub stats: CleanStats,
}

impl AnalysisReport {
    #[must_use]
    pub const fn has_loop(&self) -> bool {
        self.verdict.is_loop()
    }

    /// A cleanup would change the text
    #[must_use]
    pub const fn needs_cleaning(&self) -> bool {
        self.stats.removed_lines > 0 || self.stats.synthesized_lines > 0
    }
}

pub(crate) fn build_report(
    pipeline: &Pipeline,
    cleaned: &CleanOutput,
    config: &CleanerConfig,
    step_marker: &Regex,
) -> AnalysisReport {
    let steps = collect_steps(pipeline, step_marker);
    let max_step = steps.iter().map(|s| s.label).max();
    let verdict = judge(&steps, max_step, config);
    if verdict.is_loop() {
        log::info!("loop suspected: {verdict}");
    }

    AnalysisReport {
        total_lines: pipeline.doc.len(),
        declarations: declarations_by_scope(pipeline),
        duplicates: duplicate_symbols(pipeline),
        steps,
        max_step,
        verdict,
        change_log: cleaned.change_log.clone(),
        stats: cleaned.stats.clone(),
    }
}

fn collect_steps(pipeline: &Pipeline, step_marker: &Regex) -> Vec<StepMarker> {
    pipeline
        .doc
        .lines
        .iter()
        .filter_map(|line| {
            let label = line.step_label?;
            let end = step_marker.find(&line.text).map_or(0, |m| m.end());
            let description = line.text[end..]
                .trim_start_matches(|c: char| matches!(c, ':' | '-' | '.') || c.is_whitespace())
                .trim_end()
                .to_string();
            Some(StepMarker {
                label,
                line: line.number,
                description,
            })
        })
        .collect()
}

fn judge(steps: &[StepMarker], max_step: Option<u64>, config: &CleanerConfig) -> LoopVerdict {
    if let Some(max_step) = max_step.filter(|&m| m > config.step_ceiling) {
        return LoopVerdict::StepCeilingExceeded { max_step };
    }

    let descriptions: Vec<&str> = steps
        .iter()
        .map(|s| s.description.as_str())
        .filter(|d| !d.is_empty())
        .collect();
    let threshold = config.repetition_threshold;

    let mut counted: Vec<RepeatedStep> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for &desc in &descriptions {
        match index.get(desc) {
            Some(&i) => counted[i].count += 1,
            None => {
                index.insert(desc, counted.len());
                counted.push(RepeatedStep {
                    description: desc.to_string(),
                    count: 1,
                });
            }
        }
    }
    let repeated: Vec<RepeatedStep> = counted.into_iter().filter(|r| r.count > threshold).collect();
    if !repeated.is_empty() {
        return LoopVerdict::RepeatedSteps {
            descriptions: repeated,
        };
    }

    find_consecutive_pattern(&descriptions, threshold).unwrap_or(LoopVerdict::None)
}

fn find_consecutive_pattern(descriptions: &[&str], threshold: usize) -> Option<LoopVerdict> {
    let min_repeats = threshold.max(2);

    for len in PATTERN_LENGTHS {
        let mut start = 0;
        while start + 2 * len <= descriptions.len() {
            let pattern = &descriptions[start..start + len];
            let mut repeat_count = 1;
            let mut pos = start + len;
            while pos + len <= descriptions.len() && descriptions[pos..pos + len] == *pattern {
                repeat_count += 1;
                pos += len;
            }

            if repeat_count >= min_repeats {
                return Some(LoopVerdict::ConsecutivePattern {
                    pattern: pattern.iter().map(|d| (*d).to_string()).collect(),
                    repeat_count,
                    start_index: start,
                });
            }
            start += 1;
        }
    }
    None
}

fn declarations_by_scope(pipeline: &Pipeline) -> Vec<ScopeDeclarations> {
    let mut by_scope: Vec<(ScopeId, Vec<String>)> = Vec::new();
    for decl in &pipeline.dedup.retained {
        match by_scope.iter_mut().find(|(id, _)| *id == decl.scope) {
            Some((_, names)) => names.push(decl.name.clone()),
            None => by_scope.push((decl.scope, vec![decl.name.clone()])),
        }
    }

    by_scope
        .into_iter()
        .map(|(id, names)| {
            let scope = pipeline.tree.get(id);
            ScopeDeclarations {
                scope_kind: scope.kind,
                header: scope.header.clone(),
                start_line: scope.start_line,
                names,
            }
        })
        .collect()
}

fn duplicate_symbols(pipeline: &Pipeline) -> Vec<DuplicateSymbol> {
    let mut result: Vec<DuplicateSymbol> = Vec::new();
    let mut index: HashMap<(Option<ScopeId>, &str), usize> = HashMap::new();
    let table = |scope| dedup::table_key(&pipeline.tree, scope);

    for dup in &pipeline.dedup.duplicates {
        let key = table(dup.scope);
        let Some(first) = pipeline
            .dedup
            .retained
            .iter()
            .find(|d| table(d.scope) == key && d.name == dup.name)
        else {
            continue;
        };
        let conflicting = !first.same_definition(dup);

        match index.get(&(key, dup.name.as_str())) {
            Some(&i) => {
                result[i].duplicate_lines.push(dup.line);
                result[i].conflicting |= conflicting;
            }
            None => {
                index.insert((key, dup.name.as_str()), result.len());
                result.push(DuplicateSymbol {
                    name: dup.name.clone(),
                    first_line: first.line,
                    duplicate_lines: vec![dup.line],
                    conflicting,
                });
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cleaner;

    fn analyze(text: &str) -> AnalysisReport {
        Cleaner::new(CleanerConfig::default()).unwrap().analyze(text)
    }

    fn descs(items: &[&'static str]) -> Vec<&'static str> {
        items.to_vec()
    }

    #[test]
    fn test_clean_input_has_no_loop() {
        let report = analyze(
            "variables {\n  int a;\n  int b = 1;\n}\ntestcase T() {\n  // Step 1: init\n  a = 0;\n  // Step 2: send\n  b = 2;\n}\n",
        );
        assert_eq!(report.verdict, LoopVerdict::None);
        assert!(!report.has_loop());
        assert!(!report.needs_cleaning());
        assert_eq!(report.max_step, Some(2));
        assert_eq!(report.steps[1].description, "send");
        assert_eq!(report.declarations.len(), 1);
        assert_eq!(report.declarations[0].scope_kind, ScopeKind::GlobalDeclarations);
        assert_eq!(report.declarations[0].names, vec!["a", "b"]);
    }

    #[test]
    fn test_step_ceiling_verdict() {
        let report = analyze("testcase T() {\n  // Step 1: a\n  // Step 250: b\n}\n");
        assert_eq!(report.verdict, LoopVerdict::StepCeilingExceeded { max_step: 250 });
        assert!(report.needs_cleaning());
    }

    #[test]
    fn test_repeated_steps_verdict() {
        let mut text = String::from("testcase T() {\n");
        for n in 1..=4 {
            text.push_str(&format!("  // Step {n}: Verify response\n"));
        }
        text.push_str("}\n");
        let report = analyze(&text);
        match report.verdict {
            LoopVerdict::RepeatedSteps { descriptions } => {
                assert_eq!(descriptions.len(), 1);
                assert_eq!(descriptions[0].description, "Verify response");
                assert_eq!(descriptions[0].count, 4);
            }
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[test]
    fn test_consecutive_pattern_detection() {
        let steps = descs(&["init", "send", "check", "send", "check", "send", "check"]);
        let verdict = find_consecutive_pattern(&steps, 3).unwrap();
        assert_eq!(
            verdict,
            LoopVerdict::ConsecutivePattern {
                pattern: vec!["send".to_string(), "check".to_string()],
                repeat_count: 3,
                start_index: 1,
            }
        );

        let steps = descs(&["a", "b", "a", "b", "c"]);
        assert!(find_consecutive_pattern(&steps, 3).is_none());
        assert!(find_consecutive_pattern(&steps, 2).is_some());
    }

    #[test]
    fn test_duplicate_symbols_grouped() {
        let report = analyze("variables {\n  int x = 0;\n  int x = 0;\n  int x = 1;\n  int y;\n}\n");
        assert_eq!(report.duplicates.len(), 1);
        let dup = &report.duplicates[0];
        assert_eq!(dup.name, "x");
        assert_eq!(dup.first_line, 2);
        assert_eq!(dup.duplicate_lines, vec![3, 4]);
        assert!(dup.conflicting);
        assert_eq!(report.change_log.len(), 2);
    }

    #[test]
    fn test_duplicates_across_global_blocks() {
        let report = analyze("variables {\n  int x = 0;\n}\nvariables {\n  int x = 0;\n}\n");
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].first_line, 2);
        assert_eq!(report.duplicates[0].duplicate_lines, vec![5]);
        assert!(!report.duplicates[0].conflicting);
    }

    #[test]
    fn test_verdict_serializes_tagged() {
        let json = serde_json::to_string(&LoopVerdict::StepCeilingExceeded { max_step: 300 }).unwrap();
        assert_eq!(json, r#"{"kind":"step_ceiling_exceeded","max_step":300}"#);
    }
}
