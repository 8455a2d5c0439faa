use crate::analysis::{self, AnalysisReport};
use crate::bounds::{BoundEnforcer, BoundsOutcome};
use crate::config::CleanerConfig;
use crate::dedup::{self, DedupOutcome};
use crate::emitter::{self, EmitInput};
use crate::error::{CleanerError, Result};
use crate::scanner::{Document, Scanner};
use crate::scope::ScopeTree;
use crate::types::CleanOutput;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;

/// Main cleaner interface
///
/// Holds only immutable configuration, so one instance can be shared across
/// threads and reused for any number of documents.
#[derive(Debug, Clone)]
pub struct Cleaner {
    config: CleanerConfig,
    step_marker: Regex,
}

/// Intermediate results of one pipeline run
pub(crate) struct Pipeline {
    pub doc: Document,
    pub tree: ScopeTree,
    pub dedup: DedupOutcome,
    pub bounds: BoundsOutcome,
}

impl Cleaner {
    /// Create a cleaner, rejecting invalid configuration before any input is seen
    pub fn new(config: CleanerConfig) -> Result<Self> {
        config.validate().map_err(CleanerError::invalid_config)?;

        let step_marker = Regex::new(&config.step_marker_pattern)?;
        if step_marker.captures_len() < 2 {
            return Err(CleanerError::invalid_config(format!(
                "step_marker_pattern ({:?}) needs a capture group for the step label",
                config.step_marker_pattern
            )));
        }

        Ok(Self {
            config,
            step_marker,
        })
    }

    /// Clean generated source text
    pub fn clean(&self, text: &str) -> CleanOutput {
        let pipeline = self.run(text);
        let output = Self::finish(&pipeline);

        if output.is_modified() {
            log::info!("cleaned {} change(s): {}", output.change_log.len(), output.stats);
        } else {
            log::debug!("input already clean: {}", output.stats);
        }
        output
    }

    /// Clean the contents of a file
    pub fn clean_file(&self, path: impl AsRef<Path>) -> Result<CleanOutput> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(self.clean(&content))
    }

    /// Report what a cleanup would find and do, without producing text
    pub fn analyze(&self, text: &str) -> AnalysisReport {
        let pipeline = self.run(text);
        let cleaned = Self::finish(&pipeline);
        analysis::build_report(&pipeline, &cleaned, &self.config, &self.step_marker)
    }

    /// Get configuration
    #[must_use]
    pub const fn config(&self) -> &CleanerConfig {
        &self.config
    }

    fn finish(pipeline: &Pipeline) -> CleanOutput {
        let Pipeline {
            doc, dedup, bounds, ..
        } = pipeline;

        let removed: BTreeSet<usize> = dedup.removed.union(&bounds.dropped).copied().collect();
        let mut entries = doc.warnings.clone();
        entries.extend(dedup.entries.iter().cloned());
        entries.extend(bounds.entries.iter().cloned());

        emitter::emit(EmitInput {
            doc,
            removed: &removed,
            synthesized: &bounds.synthesized,
            entries,
            retained_declarations: dedup
                .retained
                .iter()
                .filter(|decl| !bounds.dropped.contains(&decl.line))
                .count(),
            step_blocks: bounds.step_blocks.clone(),
        })
    }

    fn run(&self, text: &str) -> Pipeline {
        let doc = Scanner::new(&self.config, &self.step_marker).scan(text);
        let malformed = doc.warnings.len();
        if malformed > 0 {
            log::warn!("input is malformed: {malformed} warning(s) recorded");
        }

        let tree = ScopeTree::build(&doc, &self.config);
        let delimiters = &self.config.string_delimiters;
        let mut dedup = dedup::deduplicate(&doc, &tree, delimiters, &BTreeSet::new());
        let bounds = BoundEnforcer::new(&self.config, &doc, &tree, &dedup.removed).enforce();
        if dedup.needs_reelection(&tree, &bounds.dropped) {
            log::debug!("kept declaration fell in a dropped block; re-electing from surviving lines");
            dedup = dedup::deduplicate(&doc, &tree, delimiters, &bounds.dropped);
        }

        Pipeline {
            doc,
            tree,
            dedup,
            bounds,
        }
    }
}
