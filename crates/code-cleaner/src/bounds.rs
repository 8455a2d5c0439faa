//! Repetition and bound enforcement.
//!
//! Runs over the lines the deduplicator kept and applies, in order:
//! the step-label ceiling (truncates the document), step ordering per
//! top-level scope, repetition collapse until nothing more changes, and
//! finally re-balancing of braces, comments and strings left open by the
//! removals.
//!
//! Repetition is bounded two ways inside every statement-holding scope.
//! Identical blocks (blank-line separated groups and nested scopes) are
//! counted per scope and fingerprint. Back-to-back rounds of a short
//! statement pattern are cut after the threshold, so a runaway that never
//! emits a blank line is caught too.

use crate::config::CleanerConfig;
use crate::scanner::Document;
use crate::scope::ScopeTree;
use crate::types::{BraceKind, ChangeKind, ChangeLogEntry, LineRange, Scope, ScopeId, StepBlock};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Hex characters kept from the SHA-256 digest
const FINGERPRINT_LEN: usize = 16;

/// Longest statement pattern checked for back-to-back rounds
const MAX_PATTERN_LEN: usize = 4;

/// Result of the enforcement stage
#[derive(Debug, Clone, Default)]
pub struct BoundsOutcome {
    /// Line numbers dropped by this stage
    pub dropped: BTreeSet<usize>,
    /// First line of the step-ceiling truncation
    pub cut: Option<usize>,
    /// Lines to append after the retained text, in order
    pub synthesized: Vec<String>,
    /// Retained numbered steps
    pub step_blocks: Vec<StepBlock>,
    pub entries: Vec<ChangeLogEntry>,
}

/// A contiguous run of retained lines directly inside one scope
#[derive(Debug, Clone)]
struct Block {
    scope: ScopeId,
    /// Every retained line of the block, nested items included
    lines: Vec<usize>,
    /// Blank lines between this block and the next one
    separators: Vec<usize>,
    label: Option<u64>,
    /// A nested scope with its header rather than a blank-line group
    nested: bool,
}

impl Block {
    fn first(&self) -> usize {
        self.lines[0]
    }

    fn last(&self) -> usize {
        self.lines[self.lines.len() - 1]
    }
}

/// Blocks of every statement-holding scope
#[derive(Debug, Default)]
struct Segments {
    /// Blank-line separated groups, split again at step markers
    groups: Vec<Block>,
    /// Nested scopes, each with its header and `else`/`catch` continuations
    units: Vec<Block>,
}

/// One statement or nested scope directly inside a scope
#[derive(Debug, Clone)]
struct Item {
    lines: Vec<usize>,
    /// Normalized content; `None` never takes part in a run
    key: Option<String>,
}

impl Item {
    fn last(&self) -> usize {
        self.lines[self.lines.len() - 1]
    }
}

/// Step ordering state of one top-level scope
#[derive(Debug, Clone, Copy, Default)]
struct StepOrder {
    highest: u64,
    /// Scope of the restarted sequence currently being dropped
    restarted_in: Option<ScopeId>,
    /// Log entry of the last dropped step, extended by its unnumbered followers
    entry: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Suppressed {
    first: usize,
    last: usize,
    count: usize,
}

type SuppressedMap = HashMap<(ScopeId, String, usize), Suppressed>;

impl Suppressed {
    fn record(map: &mut SuppressedMap, key: (ScopeId, String, usize), lines: LineRange, count: usize) {
        let (first, last) = (lines.start, lines.end);
        map.entry(key)
            .and_modify(|s| {
                s.first = s.first.min(first);
                s.last = s.last.max(last);
                s.count += count;
            })
            .or_insert(Self { first, last, count });
    }
}

/// Collapsed repetition, accumulated over every pass
#[derive(Debug, Default)]
struct Collapsed {
    /// Keyed by scope and block fingerprint (length unused)
    blocks: SuppressedMap,
    /// Keyed by scope, pattern fingerprint and pattern length
    runs: SuppressedMap,
}

/// Enforces the step ceiling and repetition threshold
pub struct BoundEnforcer<'a> {
    config: &'a CleanerConfig,
    doc: &'a Document,
    tree: &'a ScopeTree,
    removed: &'a BTreeSet<usize>,
    /// Child scopes of each scope, in opening order
    children: Vec<Vec<ScopeId>>,
}

impl<'a> BoundEnforcer<'a> {
    pub fn new(
        config: &'a CleanerConfig,
        doc: &'a Document,
        tree: &'a ScopeTree,
        removed: &'a BTreeSet<usize>,
    ) -> Self {
        let mut children = vec![Vec::new(); tree.scopes().len()];
        for scope in tree.scopes() {
            if let Some(parent) = scope.parent {
                children[parent].push(scope.id);
            }
        }
        Self {
            config,
            doc,
            tree,
            removed,
            children,
        }
    }

    /// Run all policies
    pub fn enforce(&self) -> BoundsOutcome {
        let mut outcome = BoundsOutcome::default();

        self.apply_ceiling(&mut outcome);

        let mut groups = self.segment(&outcome).groups;
        groups.sort_by_key(Block::first);
        self.apply_step_order(&groups, &mut outcome);

        // Dropping a repeat can make its neighbours or its parent repeat.
        let mut collapsed = Collapsed::default();
        let mut passes = 0;
        loop {
            passes += 1;
            let blocks = self.collapse_blocks(&mut collapsed.blocks, &mut outcome);
            let runs = self.collapse_runs(&mut collapsed.runs, &mut outcome);
            if !blocks && !runs {
                break;
            }
        }
        log::trace!("repetition settled after {passes} pass(es)");
        self.log_collapsed(collapsed, &mut outcome);

        let groups = self.segment(&outcome).groups;
        self.collect_step_blocks(&groups, &mut outcome);
        self.rebalance(&mut outcome);

        log::debug!(
            "bound enforcer dropped {} line(s), synthesized {}",
            outcome.dropped.len(),
            outcome.synthesized.len()
        );
        outcome
    }

    fn is_retained(&self, line: usize, outcome: &BoundsOutcome) -> bool {
        !self.removed.contains(&line) && !outcome.dropped.contains(&line)
    }

    fn apply_ceiling(&self, outcome: &mut BoundsOutcome) {
        let ceiling = self.config.step_ceiling;
        let hit = self.doc.lines.iter().find(|line| {
            !self.removed.contains(&line.number) && line.step_label.is_some_and(|l| l > ceiling)
        });
        let Some(line) = hit else {
            return;
        };

        let last = self.doc.last_line();
        let label = line.step_label.unwrap_or_default();
        outcome.cut = Some(line.number);
        outcome.dropped.extend(line.number..=last);
        outcome.entries.push(ChangeLogEntry::new(
            ChangeKind::StepCeilingReached,
            LineRange::new(line.number, last),
            format!(
                "step {label} exceeds ceiling {ceiling}; dropped {} line(s) from here to end of input",
                last - line.number + 1
            ),
        ));
        log::warn!("step {label} on line {} exceeds ceiling {ceiling}", line.number);
    }

    fn body_end(&self, scope: &Scope) -> usize {
        scope.end_line.map_or(self.doc.last_line(), |end| end - 1)
    }

    /// Last line of the statement starting at `number`, following block
    /// comments and string literals that run on past the line end
    fn continuation_end(&self, mut number: usize) -> usize {
        let last_line = self.doc.last_line();
        while number < last_line {
            let line = self.doc.line(number);
            if !line.ends_in_comment && line.ends_in_string.is_none() {
                break;
            }
            number += 1;
        }
        number
    }

    /// Split every statement-holding scope into blocks over the lines still retained
    fn segment(&self, outcome: &BoundsOutcome) -> Segments {
        let mut segments = Segments::default();

        for scope in self.tree.scopes() {
            if !scope.kind.holds_statements() {
                continue;
            }
            let blocks = &mut segments.groups;
            let mut current: Option<Block> = None;

            for number in (scope.start_line + 1)..=self.body_end(scope) {
                if !self.is_retained(number, outcome) {
                    continue;
                }
                let line = self.doc.line(number);
                let direct = self.tree.scope_at(number) == Some(scope.id);

                if !direct {
                    if let Some(block) = current.as_mut() {
                        block.lines.push(number);
                    }
                    continue;
                }

                if line.is_blank() {
                    if let Some(block) = current.take() {
                        blocks.push(block);
                    }
                    if let Some(prev) = blocks.last_mut().filter(|b| b.scope == scope.id) {
                        if prev.last() < number {
                            prev.separators.push(number);
                        }
                    }
                    continue;
                }

                if line.step_label.is_some() {
                    if let Some(block) = current.take() {
                        blocks.push(block);
                    }
                }

                match current.as_mut() {
                    Some(block) => block.lines.push(number),
                    None => {
                        current = Some(Block {
                            scope: scope.id,
                            lines: vec![number],
                            separators: Vec::new(),
                            label: line.step_label,
                            nested: false,
                        });
                    }
                }
            }

            if let Some(block) = current.take() {
                blocks.push(block);
            }
            self.nested_units(scope, outcome, &mut segments.units);
        }

        segments
    }

    /// Nested scopes directly inside `scope`, from header to closing line
    fn nested_units(&self, scope: &Scope, outcome: &BoundsOutcome, units: &mut Vec<Block>) {
        let children = &self.children[scope.id];
        let mut idx = 0;

        while idx < children.len() {
            let child = self.tree.get(children[idx]);
            idx += 1;
            if self.tree.scope_at(child.header_line) != Some(scope.id)
                || self.tree.scope_at(child.start_line) != Some(scope.id)
            {
                continue;
            }

            // `} else {` continues the same statement.
            let mut end = child.end_line;
            while let Some(close) = end {
                match children.get(idx).map(|&next| self.tree.get(next)) {
                    Some(next) if next.start_line == close => {
                        end = next.end_line;
                        idx += 1;
                    }
                    _ => break,
                }
            }

            let last = end.map_or(self.doc.last_line(), |close| self.continuation_end(close));
            let lines: Vec<usize> = (child.header_line..=last)
                .filter(|&n| self.is_retained(n, outcome))
                .collect();
            if !lines.is_empty() {
                units.push(Block {
                    scope: scope.id,
                    lines,
                    separators: Vec::new(),
                    label: None,
                    nested: true,
                });
            }
        }
    }

    fn apply_step_order(&self, blocks: &[Block], outcome: &mut BoundsOutcome) {
        let mut states: HashMap<ScopeId, StepOrder> = HashMap::new();

        for block in blocks {
            if !self.is_retained(block.first(), outcome) {
                continue;
            }
            let state = states.entry(self.tree.top_level(block.scope)).or_default();

            let Some(label) = block.label else {
                // Unnumbered blocks that belong to a restarted step go with it.
                if state.restarted_in == Some(block.scope) {
                    let last = self.retained_lines(block, outcome).last().copied();
                    self.drop_block(block, outcome);
                    if let (Some(idx), Some(last)) = (state.entry, last) {
                        outcome.entries[idx].lines.end = last;
                    }
                }
                continue;
            };

            let restarted = label < state.highest
                || (label == state.highest && state.restarted_in.is_some());
            if !restarted {
                if label > state.highest {
                    state.restarted_in = None;
                }
                state.highest = label;
                continue;
            }

            let retained = self.retained_lines(block, outcome);
            let range = LineRange::new(block.first(), retained.last().copied().unwrap_or(block.first()));
            self.drop_block(block, outcome);
            state.restarted_in = Some(block.scope);
            state.entry = Some(outcome.entries.len());
            outcome.entries.push(ChangeLogEntry::new(
                ChangeKind::StepOrderViolation,
                range,
                format!(
                    "step {label} after step {}; restarted step sequence dropped",
                    state.highest
                ),
            ));
        }
    }

    /// Count identical blocks per scope and drop the ones past the threshold
    fn collapse_blocks(
        &self,
        suppressed: &mut SuppressedMap,
        outcome: &mut BoundsOutcome,
    ) -> bool {
        let threshold = self.config.repetition_threshold;
        let segments = self.segment(outcome);
        let spans: HashSet<(ScopeId, usize, usize)> = segments
            .groups
            .iter()
            .map(|g| (g.scope, g.first(), g.last()))
            .collect();
        let mut blocks: Vec<&Block> = segments
            .groups
            .iter()
            .chain(
                segments
                    .units
                    .iter()
                    .filter(|u| !spans.contains(&(u.scope, u.first(), u.last()))),
            )
            .collect();

        // Innermost blocks first so parents fingerprint collapsed children.
        blocks.sort_by(|a, b| {
            a.last()
                .cmp(&b.last())
                .then_with(|| {
                    self.tree
                        .get(b.scope)
                        .open_depth
                        .cmp(&self.tree.get(a.scope).open_depth)
                })
                .then_with(|| b.nested.cmp(&a.nested))
        });

        let mut counts: HashMap<(ScopeId, String), usize> = HashMap::new();
        let mut changed = false;
        for block in blocks {
            let retained = self.retained_lines(block, outcome);
            if retained.is_empty() {
                // Emptied by a collapse inside it; the blank lines after it go too.
                for &n in &block.separators {
                    changed |= outcome.dropped.insert(n);
                }
                continue;
            }
            let Some(fingerprint) = self.block_fingerprint(&retained) else {
                continue;
            };

            let count = counts.entry((block.scope, fingerprint.clone())).or_insert(0);
            *count += 1;
            if *count <= threshold {
                continue;
            }

            let last = retained[retained.len() - 1];
            self.drop_block(block, outcome);
            changed = true;
            Suppressed::record(
                suppressed,
                (block.scope, fingerprint, 0),
                LineRange::new(retained[0], last),
                1,
            );
        }
        changed
    }

    /// Cut back-to-back rounds of a statement pattern down to the threshold
    fn collapse_runs(
        &self,
        suppressed: &mut SuppressedMap,
        outcome: &mut BoundsOutcome,
    ) -> bool {
        let threshold = self.config.repetition_threshold;
        let segments = self.segment(outcome);
        let mut changed = false;

        for scope in self.tree.scopes() {
            if !scope.kind.holds_statements() {
                continue;
            }
            let units: Vec<&Block> = segments.units.iter().filter(|u| u.scope == scope.id).collect();
            let items = self.items(scope, &units, outcome);

            let mut start = 0;
            while start < items.len() {
                let found = (1..=MAX_PATTERN_LEN).find_map(|len| {
                    let rounds = rounds_at(&items, start, len);
                    (rounds > threshold).then_some((len, rounds))
                });
                let Some((len, rounds)) = found else {
                    start += 1;
                    continue;
                };

                let kept_end = start + threshold * len;
                let end = start + rounds * len;
                let kept_last = items[kept_end - 1].last();
                let dropped_last = items[end - 1].last();
                for item in &items[kept_end..end] {
                    outcome.dropped.extend(item.lines.iter().copied());
                }
                for n in kept_last + 1..=dropped_last {
                    if self.doc.line(n).is_blank() {
                        outcome.dropped.insert(n);
                    }
                }

                let pattern: Vec<String> = items[start..start + len]
                    .iter()
                    .filter_map(|item| item.key.clone())
                    .collect();
                Suppressed::record(
                    suppressed,
                    (scope.id, fingerprint(&pattern), len),
                    LineRange::new(items[kept_end].lines[0], dropped_last),
                    rounds - threshold,
                );
                changed = true;
                start = end;
            }
        }
        changed
    }

    /// Statements and nested scopes of one scope in order, blank lines skipped
    fn items(&self, scope: &Scope, units: &[&Block], outcome: &BoundsOutcome) -> Vec<Item> {
        let body_end = self.body_end(scope);
        let mut units = units.iter().peekable();
        let mut items = Vec::new();
        let mut number = scope.start_line + 1;

        while number <= body_end {
            while units.peek().is_some_and(|u| u.last() < number) {
                units.next();
            }
            if let Some(unit) = units.next_if(|u| u.first() == number) {
                items.push(Item {
                    lines: unit.lines.clone(),
                    key: self.content_key(&unit.lines),
                });
                number = unit.last() + 1;
                continue;
            }

            if !self.is_retained(number, outcome) || self.doc.line(number).is_blank() {
                number += 1;
                continue;
            }
            let end = self.continuation_end(number).min(body_end);
            let lines: Vec<usize> = (number..=end)
                .filter(|&n| self.is_retained(n, outcome))
                .collect();
            // Unmatched braces outside a nested scope must stay where they are.
            let movable = self.tree.scope_at(number) == Some(scope.id)
                && lines.iter().all(|&n| self.doc.line(n).braces_balanced());
            let key = if movable { self.content_key(&lines) } else { None };
            items.push(Item { lines, key });
            number = end + 1;
        }
        items
    }

    fn log_collapsed(&self, collapsed: Collapsed, outcome: &mut BoundsOutcome) {
        let threshold = self.config.repetition_threshold;
        let mut groups: Vec<(bool, (ScopeId, String, usize), Suppressed)> = collapsed
            .blocks
            .into_iter()
            .map(|(key, s)| (false, key, s))
            .chain(collapsed.runs.into_iter().map(|(key, s)| (true, key, s)))
            .collect();
        groups.sort_by_key(|(_, _, s)| (s.first, s.last));

        for (run, (scope_id, fingerprint, len), s) in groups {
            let scope = self.tree.get(scope_id);
            let detail = if run {
                format!(
                    "{} repeated round(s) of {len} statement(s) suppressed in {} scope opened on line {} \
                     (fingerprint {fingerprint}, kept first {threshold})",
                    s.count,
                    scope.kind.as_str(),
                    scope.start_line
                )
            } else {
                format!(
                    "{} repeated block(s) suppressed in {} scope opened on line {} \
                     (fingerprint {fingerprint}, kept first {threshold})",
                    s.count,
                    scope.kind.as_str(),
                    scope.start_line
                )
            };
            outcome.entries.push(ChangeLogEntry::new(
                ChangeKind::RepeatedBlockTruncated,
                LineRange::new(s.first, s.last),
                detail,
            ));
        }
    }

    /// Normalized text of the given lines, brace-only lines left out
    fn content(&self, lines: &[usize]) -> Vec<String> {
        lines
            .iter()
            .map(|&n| self.doc.line(n))
            .filter(|line| !line.is_brace_only())
            .map(|line| line.text.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|text| !text.is_empty())
            .collect()
    }

    fn content_key(&self, lines: &[usize]) -> Option<String> {
        let content = self.content(lines);
        (!content.is_empty()).then(|| content.join("\n"))
    }

    /// Fingerprint of a block's retained content, `None` when too short
    fn block_fingerprint(&self, retained: &[usize]) -> Option<String> {
        let content = self.content(retained);
        if content.len() < self.config.min_block_lines {
            return None;
        }
        Some(fingerprint(&content))
    }

    fn retained_lines(&self, block: &Block, outcome: &BoundsOutcome) -> Vec<usize> {
        block
            .lines
            .iter()
            .copied()
            .filter(|&n| self.is_retained(n, outcome))
            .collect()
    }

    fn drop_block(&self, block: &Block, outcome: &mut BoundsOutcome) {
        outcome.dropped.extend(block.lines.iter().copied());
        outcome.dropped.extend(block.separators.iter().copied());
    }

    fn collect_step_blocks(&self, blocks: &[Block], outcome: &mut BoundsOutcome) {
        let mut steps: Vec<StepBlock> = blocks
            .iter()
            .filter(|b| b.label.is_some() && self.is_retained(b.first(), outcome))
            .map(|b| {
                let retained = self.retained_lines(b, outcome);
                let texts: Vec<String> = retained
                    .iter()
                    .map(|&n| self.doc.line(n).text.split_whitespace().collect::<Vec<_>>().join(" "))
                    .collect();
                StepBlock {
                    label: b.label,
                    start_line: b.first(),
                    end_line: retained.last().copied().unwrap_or(b.first()),
                    fingerprint: fingerprint(&texts),
                }
            })
            .collect();
        steps.sort_by_key(|s| s.start_line);
        outcome.step_blocks = steps;
    }

    /// Close whatever the retained lines leave open
    fn rebalance(&self, outcome: &mut BoundsOutcome) {
        let mut open: Vec<usize> = Vec::new();
        let mut last_retained = None;

        for line in &self.doc.lines {
            if !self.is_retained(line.number, outcome) {
                continue;
            }
            last_retained = Some(line.number);
            for event in &line.braces {
                match event.kind {
                    BraceKind::Open => open.push(line.number),
                    BraceKind::Close if event.stray => {}
                    BraceKind::Close => {
                        open.pop();
                    }
                }
            }
        }

        let last_retained = last_retained.map(|n| self.doc.line(n));
        if last_retained.is_some_and(|line| line.ends_in_comment) {
            outcome
                .synthesized
                .push(self.config.comment_markers.block_close.clone());
        }
        if let Some(delim) = last_retained.and_then(|line| line.ends_in_string) {
            outcome.synthesized.push(delim.to_string());
        }

        for &opened in open.iter().rev() {
            let indent = self.doc.line(opened).indent();
            outcome.synthesized.push(format!("{indent}}}"));
        }
    }
}

/// How many times the `len` items at `start` repeat back to back
fn rounds_at(items: &[Item], start: usize, len: usize) -> usize {
    let Some(pattern) = items.get(start..start + len) else {
        return 0;
    };
    if pattern.iter().any(|item| item.key.is_none()) {
        return 0;
    }
    let mut rounds = 1;
    while let Some(next) = items.get(start + rounds * len..start + (rounds + 1) * len) {
        if !next.iter().zip(pattern).all(|(a, b)| a.key == b.key) {
            break;
        }
        rounds += 1;
    }
    rounds
}

/// Hex SHA-256 prefix over normalized lines
fn fingerprint(lines: &[String]) -> String {
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(FINGERPRINT_LEN);
    for byte in digest.iter().take(FINGERPRINT_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}
