//! Input collection and bounded parallel fan-out over files.

use anyhow::{anyhow, Context as AnyhowContext, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of one file, in input order
#[derive(Debug)]
pub struct FileOutcome<T> {
    pub path: PathBuf,
    pub result: Result<T>,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).with_context(|| format!("Invalid include glob {pattern:?}"))?;
        builder.add(glob);
    }
    builder.build().context("Failed to build include globs")
}

/// Expand files and directories into the list of files to process.
///
/// Files named explicitly are always taken; directories are walked
/// (.gitignore aware, hidden entries skipped) and filtered by `include`,
/// matched against the file name.
pub fn collect_inputs(paths: &[PathBuf], include: &[String]) -> Result<Vec<PathBuf>> {
    let globs = build_globset(include)?;
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            return Err(anyhow!("Input not found: {}", path.display()));
        }

        let mut walked = Vec::new();
        let mut builder = WalkBuilder::new(path);
        builder.hidden(true).git_ignore(true).git_exclude(true);
        for result in builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("Skipping unreadable entry under {}: {err}", path.display());
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let matched = entry
                .path()
                .file_name()
                .is_some_and(|name| globs.is_match(name));
            if matched {
                walked.push(entry.into_path());
            }
        }
        walked.sort();
        log::debug!("{} matched {} file(s)", path.display(), walked.len());
        files.extend(walked);
    }

    let mut seen = std::collections::HashSet::new();
    files.retain(|p| seen.insert(p.clone()));
    Ok(files)
}

/// Read and process files with at most `jobs` tasks in flight
pub async fn run_parallel<T, F>(files: &[PathBuf], jobs: usize, job: F) -> Vec<FileOutcome<T>>
where
    T: Send + 'static,
    F: Fn(&Path, String) -> Result<T> + Send + Sync + 'static,
{
    let job = Arc::new(job);
    let mut aggregated = Vec::with_capacity(files.len());

    for file_chunk in files.chunks(jobs.max(1)) {
        let mut tasks = Vec::with_capacity(file_chunk.len());
        for file_path in file_chunk {
            let task_path = file_path.clone();
            let job = Arc::clone(&job);
            let task = tokio::spawn(async move {
                let content = tokio::fs::read_to_string(&task_path)
                    .await
                    .with_context(|| format!("Failed to read {}", task_path.display()))?;
                job(&task_path, content)
            });
            tasks.push((file_path.clone(), task));
        }

        for (path, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(err) => Err(anyhow!("Task for {} failed: {err}", path.display())),
            };
            if let Err(err) = &result {
                log::warn!("{}: {err:#}", path.display());
            }
            aggregated.push(FileOutcome { path, result });
        }
    }

    aggregated
}
