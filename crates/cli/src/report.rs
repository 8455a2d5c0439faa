use serde::Serialize;
use std::fmt::Write as _;
use testgen_code_cleaner::{AnalysisReport, ChangeLogEntry, CleanStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Cleaned,
    Unchanged,
    Skipped,
    Failed,
}

/// Per-file entry of the `clean` report
#[derive(Debug, Clone, Serialize)]
pub struct CleanFileReport {
    pub path: String,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub written_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<CleanStats>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub change_log: Vec<ChangeLogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleaned_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CleanFileReport {
    pub fn failed(path: String, error: &anyhow::Error) -> Self {
        Self {
            path,
            status: FileStatus::Failed,
            written_to: None,
            stats: None,
            change_log: Vec::new(),
            cleaned_text: None,
            message: Some(format!("{error:#}")),
        }
    }
}

/// Per-file entry of the `analyze` report
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeFileReport {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<AnalysisReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub files: usize,
    pub cleaned: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn from_reports(reports: &[CleanFileReport]) -> Self {
        let mut summary = Self {
            files: reports.len(),
            ..Self::default()
        };
        for report in reports {
            match report.status {
                FileStatus::Cleaned => summary.cleaned += 1,
                FileStatus::Unchanged => summary.unchanged += 1,
                FileStatus::Skipped => summary.skipped += 1,
                FileStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanRunReport {
    pub summary: RunSummary,
    pub files: Vec<CleanFileReport>,
}

/// Sum statistics of several cleanup runs (one per fenced block)
pub fn merge_stats<'a>(stats: impl IntoIterator<Item = &'a CleanStats>) -> CleanStats {
    stats.into_iter().fold(CleanStats::default(), |mut acc, s| {
        acc.input_lines += s.input_lines;
        acc.output_lines += s.output_lines;
        acc.removed_lines += s.removed_lines;
        acc.synthesized_lines += s.synthesized_lines;
        acc.retained_declarations += s.retained_declarations;
        acc.retained_step_blocks += s.retained_step_blocks;
        acc
    })
}

/// Human-readable analysis of one file
pub fn render_analysis(path: &str, report: &AnalysisReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{path}");
    let _ = writeln!(
        out,
        "  lines: {}, steps: {} (max {})",
        report.total_lines,
        report.steps.len(),
        report
            .max_step
            .map_or_else(|| "n/a".to_string(), |m| m.to_string())
    );

    let names: usize = report.declarations.iter().map(|d| d.names.len()).sum();
    let _ = writeln!(
        out,
        "  declarations: {names} in {} scope(s)",
        report.declarations.len()
    );

    for dup in &report.duplicates {
        let lines: Vec<String> = dup.duplicate_lines.iter().map(ToString::to_string).collect();
        let _ = writeln!(
            out,
            "  duplicate `{}`: first on line {}, again on {}{}",
            dup.name,
            dup.first_line,
            lines.join(", "),
            if dup.conflicting { " (conflicting)" } else { "" }
        );
    }

    let _ = writeln!(out, "  verdict: {}", report.verdict);
    if report.needs_cleaning() {
        let _ = writeln!(
            out,
            "  cleanup would remove {} line(s) and synthesize {}",
            report.stats.removed_lines, report.stats.synthesized_lines
        );
        for entry in &report.change_log {
            let _ = writeln!(out, "    {entry}");
        }
    } else {
        let _ = writeln!(out, "  clean");
    }
    out
}
