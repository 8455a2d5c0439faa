use anyhow::{bail, Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use report::{
    merge_stats, render_analysis, AnalyzeFileReport, CleanFileReport, CleanRunReport, FileStatus,
    RunSummary,
};
use settings::Overrides;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use testgen_code_cleaner::{clean_markdown, extract_code, AnalysisReport, Cleaner, CleanerError};

mod batch;
mod report;
mod settings;

fn print_stdout(text: &str) -> Result<()> {
    write_stdout(text, true)
}

fn write_stdout(text: &str, newline: bool) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| if newline { stdout.write_all(b"\n") } else { Ok(()) })
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "testgen-clean")]
#[command(about = "Clean up generated CAPL test code", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Cleaner config file, JSON or TOML (overrides TESTGEN_CLEAN_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Highest step number kept
    #[arg(long, global = true)]
    step_ceiling: Option<u64>,

    /// Identical blocks kept per scope before the rest are suppressed
    #[arg(long, global = true)]
    repetition_threshold: Option<usize>,

    /// Language tag of fenced blocks in markdown inputs
    #[arg(long, global = true, default_value = "capl")]
    fence_lang: String,

    /// Files processed concurrently (overrides TESTGEN_CLEAN_JOBS)
    #[arg(short, long, global = true)]
    jobs: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean generated files (markdown inputs are cleaned block by block)
    Clean(CleanArgs),

    /// Report duplicates, steps and loop verdict without writing anything
    Analyze(AnalyzeArgs),

    /// Write the fenced code of markdown files to `<stem>.can`
    Extract(ExtractArgs),
}

#[derive(Args)]
struct CleanArgs {
    /// Files or directories
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Overwrite modified files
    #[arg(long, conflicts_with = "output")]
    in_place: bool,

    /// Copy each file to `<file>.backup` before overwriting it
    #[arg(long, requires = "in_place")]
    backup: bool,

    /// Write cleaned files into this directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print a JSON report to stdout
    #[arg(long)]
    json: bool,

    /// File-name globs used when walking directories
    #[arg(long, default_values = ["*.can", "*.md"])]
    include: Vec<String>,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Files or directories
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    /// File-name globs used when walking directories
    #[arg(long, default_values = ["*.can", "*.md"])]
    include: Vec<String>,
}

#[derive(Args)]
struct ExtractArgs {
    /// Markdown files or directories
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Write `<stem>.can` files into this directory instead of next to the input
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// File-name globs used when walking directories
    #[arg(long, default_values = ["*.md"])]
    include: Vec<String>,
}

/// Where cleaned text goes
#[derive(Debug, Clone)]
enum WriteMode {
    Stdout,
    InPlace { backup: bool },
    OutputDir(PathBuf),
}

struct Context {
    cleaner: Arc<Cleaner>,
    fence_lang: String,
    jobs: usize,
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let json = match &cli.command {
        Commands::Clean(args) => args.json,
        Commands::Analyze(args) => args.json,
        Commands::Extract(_) => false,
    };

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet || json {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config_path = settings::config_path(cli.config.clone());
    let config = settings::load_config(
        config_path.as_deref(),
        Overrides {
            step_ceiling: cli.step_ceiling,
            repetition_threshold: cli.repetition_threshold,
        },
    )?;
    let cleaner = Cleaner::new(config).context("Invalid cleaner configuration")?;

    let ctx = Context {
        cleaner: Arc::new(cleaner),
        fence_lang: cli.fence_lang,
        jobs: settings::resolve_jobs(cli.jobs),
    };
    log::debug!("using {} job(s)", ctx.jobs);

    match cli.command {
        Commands::Clean(args) => run_clean(&ctx, args).await,
        Commands::Analyze(args) => run_analyze(&ctx, args).await,
        Commands::Extract(args) => run_extract(&ctx, args).await,
    }
}

async fn run_clean(ctx: &Context, args: CleanArgs) -> Result<()> {
    let files = batch::collect_inputs(&args.paths, &args.include)?;
    if files.is_empty() {
        log::warn!("No input files matched");
    }

    let mode = if args.in_place {
        WriteMode::InPlace {
            backup: args.backup,
        }
    } else if let Some(dir) = args.output {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        WriteMode::OutputDir(dir)
    } else {
        if files.len() > 1 {
            bail!(
                "{} input files; use --in-place or --output to write the results",
                files.len()
            );
        }
        WriteMode::Stdout
    };

    let cleaner = Arc::clone(&ctx.cleaner);
    let lang = ctx.fence_lang.clone();
    let job_mode = mode.clone();
    let outcomes = batch::run_parallel(&files, ctx.jobs, move |path, content| {
        clean_one(&cleaner, &lang, &job_mode, path, &content)
    })
    .await;

    let reports: Vec<CleanFileReport> = outcomes
        .into_iter()
        .map(|outcome| match outcome.result {
            Ok(report) => report,
            Err(err) => CleanFileReport::failed(outcome.path.display().to_string(), &err),
        })
        .collect();
    let summary = RunSummary::from_reports(&reports);

    if args.json {
        let report = CleanRunReport {
            summary: summary.clone(),
            files: reports,
        };
        print_stdout(&serde_json::to_string_pretty(&report)?)?;
    } else if matches!(mode, WriteMode::Stdout) {
        for report in &reports {
            if let Some(text) = &report.cleaned_text {
                write_stdout(text, false)?;
            }
        }
    } else {
        for report in &reports {
            print_stdout(&clean_line(report))?;
        }
    }

    log::info!(
        "{} file(s): {} cleaned, {} unchanged, {} skipped, {} failed",
        summary.files,
        summary.cleaned,
        summary.unchanged,
        summary.skipped,
        summary.failed
    );
    if summary.failed > 0 {
        bail!("{} file(s) failed", summary.failed);
    }
    Ok(())
}

fn clean_line(report: &CleanFileReport) -> String {
    let status = match report.status {
        FileStatus::Cleaned => "cleaned",
        FileStatus::Unchanged => "unchanged",
        FileStatus::Skipped => "skipped",
        FileStatus::Failed => "failed",
    };
    let mut line = format!("{status:9} {}", report.path);
    if let Some(target) = report.written_to.as_ref().filter(|t| **t != report.path) {
        line.push_str(&format!(" -> {target}"));
    }
    if let Some(stats) = &report.stats {
        line.push_str(&format!(" ({stats})"));
    }
    if let Some(message) = &report.message {
        line.push_str(&format!(": {message}"));
    }
    line
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown"))
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".backup");
    PathBuf::from(name)
}

fn clean_one(
    cleaner: &Cleaner,
    lang: &str,
    mode: &WriteMode,
    path: &Path,
    content: &str,
) -> Result<CleanFileReport> {
    let display = path.display().to_string();

    let (text, stats, change_log, modified) = if is_markdown(path) {
        match clean_markdown(cleaner, content, lang) {
            Ok(md) => {
                let modified = md.is_modified();
                let stats = merge_stats(md.blocks.iter().map(|b| &b.stats));
                let change_log = md.blocks.into_iter().flat_map(|b| b.change_log).collect();
                (md.document, stats, change_log, modified)
            }
            Err(err @ CleanerError::NoFencedBlock { .. }) => {
                log::warn!("{display}: {err}; skipped");
                return Ok(CleanFileReport {
                    path: display,
                    status: FileStatus::Skipped,
                    written_to: None,
                    stats: None,
                    change_log: Vec::new(),
                    cleaned_text: None,
                    message: Some(err.to_string()),
                });
            }
            Err(err) => return Err(err.into()),
        }
    } else {
        let out = cleaner.clean(content);
        let modified = out.is_modified();
        (out.cleaned_text, out.stats, out.change_log, modified)
    };

    for entry in &change_log {
        log::debug!("{display}: {entry}");
    }

    let mut written_to = None;
    let mut cleaned_text = None;
    match mode {
        WriteMode::Stdout => cleaned_text = Some(text),
        WriteMode::InPlace { backup } => {
            if modified {
                if *backup {
                    let target = backup_path(path);
                    fs::copy(path, &target)
                        .with_context(|| format!("Failed to write backup {}", target.display()))?;
                }
                fs::write(path, &text).with_context(|| format!("Failed to write {display}"))?;
                written_to = Some(display.clone());
            }
        }
        WriteMode::OutputDir(dir) => {
            let name = path
                .file_name()
                .with_context(|| format!("{display} has no file name"))?;
            let target = dir.join(name);
            fs::write(&target, &text)
                .with_context(|| format!("Failed to write {}", target.display()))?;
            written_to = Some(target.display().to_string());
        }
    }

    Ok(CleanFileReport {
        path: display,
        status: if modified {
            FileStatus::Cleaned
        } else {
            FileStatus::Unchanged
        },
        written_to,
        stats: Some(stats),
        change_log,
        cleaned_text,
        message: None,
    })
}

async fn run_analyze(ctx: &Context, args: AnalyzeArgs) -> Result<()> {
    let files = batch::collect_inputs(&args.paths, &args.include)?;
    if files.is_empty() {
        log::warn!("No input files matched");
    }

    let cleaner = Arc::clone(&ctx.cleaner);
    let lang = ctx.fence_lang.clone();
    let outcomes = batch::run_parallel(&files, ctx.jobs, move |path, content| {
        analyze_one(&cleaner, &lang, path, &content)
    })
    .await;

    let mut failed = 0usize;
    let mut loops = 0usize;
    let reports: Vec<AnalyzeFileReport> = outcomes
        .into_iter()
        .map(|outcome| {
            let path = outcome.path.display().to_string();
            match outcome.result {
                Ok(report) => {
                    if report.has_loop() {
                        loops += 1;
                    }
                    AnalyzeFileReport {
                        path,
                        report: Some(report),
                        error: None,
                    }
                }
                Err(err) => {
                    failed += 1;
                    AnalyzeFileReport {
                        path,
                        report: None,
                        error: Some(format!("{err:#}")),
                    }
                }
            }
        })
        .collect();

    if args.json {
        print_stdout(&serde_json::to_string_pretty(&reports)?)?;
    } else {
        for file in &reports {
            match (&file.report, &file.error) {
                (Some(report), _) => print_stdout(render_analysis(&file.path, report).trim_end())?,
                (None, Some(error)) => print_stdout(&format!("{}\n  error: {error}", file.path))?,
                (None, None) => {}
            }
        }
    }

    log::info!(
        "analyzed {} file(s), {} with a generation loop",
        reports.len(),
        loops
    );
    if failed > 0 {
        bail!("{failed} file(s) failed");
    }
    Ok(())
}

fn analyze_one(cleaner: &Cleaner, lang: &str, path: &Path, content: &str) -> Result<AnalysisReport> {
    if is_markdown(path) {
        let code = extract_code(content, lang)?;
        Ok(cleaner.analyze(&code))
    } else {
        Ok(cleaner.analyze(content))
    }
}

async fn run_extract(ctx: &Context, args: ExtractArgs) -> Result<()> {
    let files = batch::collect_inputs(&args.paths, &args.include)?;
    if files.is_empty() {
        log::warn!("No input files matched");
    }
    if let Some(dir) = &args.output {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    }

    let lang = ctx.fence_lang.clone();
    let output = args.output.clone();
    let outcomes = batch::run_parallel(&files, ctx.jobs, move |path, content| {
        extract_one(&lang, output.as_deref(), path, &content)
    })
    .await;

    let mut written = 0usize;
    let mut failed = 0usize;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(Some(target)) => {
                written += 1;
                print_stdout(&format!(
                    "{} -> {}",
                    outcome.path.display(),
                    target.display()
                ))?;
            }
            Ok(None) => {}
            Err(err) => {
                failed += 1;
                log::error!("{}: {err:#}", outcome.path.display());
                print_stdout(&extract_failure_line(&outcome.path, err))?;
            }
        }
    }

    log::info!("extracted {written} of {} file(s)", outcomes.len());
    if failed > 0 {
        bail!("{failed} file(s) failed");
    }
    Ok(())
}

fn extract_failure_line(path: &Path, err: &anyhow::Error) -> String {
    format!("failed    {}: {err:#}", path.display())
}

fn extract_one(
    lang: &str,
    output: Option<&Path>,
    path: &Path,
    content: &str,
) -> Result<Option<PathBuf>> {
    let code = match extract_code(content, lang) {
        Ok(code) => code,
        Err(err @ CleanerError::NoFencedBlock { .. }) => {
            log::warn!("{}: {err}; skipped", path.display());
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };

    let stem = path
        .file_stem()
        .with_context(|| format!("{} has no file name", path.display()))?;
    let mut name = stem.to_os_string();
    name.push(".can");
    let target = match output {
        Some(dir) => dir.join(name),
        None => path.with_file_name(name),
    };
    fs::write(&target, code).with_context(|| format!("Failed to write {}", target.display()))?;
    Ok(Some(target))
}
