//! Cleaner configuration sources: config file, environment and flags.

use anyhow::{anyhow, Context as AnyhowContext, Result};
use std::path::{Path, PathBuf};
use testgen_code_cleaner::CleanerConfig;

/// Config file used when `--config` is not given
pub const CONFIG_ENV: &str = "TESTGEN_CLEAN_CONFIG";
/// Number of files cleaned concurrently
pub const JOBS_ENV: &str = "TESTGEN_CLEAN_JOBS";

const MAX_JOBS: usize = 32;

/// Command-line overrides applied on top of the config file
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub step_ceiling: Option<u64>,
    pub repetition_threshold: Option<usize>,
}

/// `--config` flag, falling back to the environment
pub fn config_path(flag: Option<PathBuf>) -> Option<PathBuf> {
    flag.or_else(|| {
        std::env::var_os(CONFIG_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    })
}

/// Load the config file (if any) and apply overrides. Validation is left to
/// `Cleaner::new`.
pub fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<CleanerConfig> {
    let mut config = match path {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config = parse_config(&bytes)
                .with_context(|| format!("Failed to parse config {}", path.display()))?;
            log::debug!("loaded cleaner config from {}", path.display());
            config
        }
        None => CleanerConfig::default(),
    };

    if let Some(ceiling) = overrides.step_ceiling {
        config.step_ceiling = ceiling;
    }
    if let Some(threshold) = overrides.repetition_threshold {
        config.repetition_threshold = threshold;
    }
    Ok(config)
}

/// Parse a config document: JSON first, TOML as fallback
pub fn parse_config(bytes: &[u8]) -> Result<CleanerConfig> {
    match serde_json::from_slice(bytes) {
        Ok(config) => Ok(config),
        Err(json_err) => {
            let utf8 = std::str::from_utf8(bytes).map_err(|err| anyhow!("{json_err}; {err}"))?;
            toml::from_str(utf8).map_err(|toml_err| {
                anyhow!("Config is not valid JSON ({json_err}) or TOML ({toml_err})")
            })
        }
    }
}

pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(2, 8)
}

fn parse_jobs(raw: Option<&str>, default_value: usize) -> usize {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default_value)
        .clamp(1, MAX_JOBS)
}

/// `--jobs` flag, then the environment, then the adaptive default
pub fn resolve_jobs(flag: Option<usize>) -> usize {
    match flag {
        Some(jobs) => jobs.clamp(1, MAX_JOBS),
        None => {
            let raw = std::env::var(JOBS_ENV).ok();
            parse_jobs(raw.as_deref(), default_jobs())
        }
    }
}
