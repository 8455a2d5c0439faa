use thiserror::Error;

/// Result type for cleaner operations
pub type Result<T> = std::result::Result<T, CleanerError>;

/// Errors that can occur while cleaning generated code.
///
/// Nothing in the input text itself produces an error; malformed input is
/// reported through the change log instead.
#[derive(Error, Debug)]
pub enum CleanerError {
    /// Invalid configuration (caller contract violation)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Step marker pattern failed to compile
    #[error("Invalid step marker pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Markdown document carries no fenced block for the requested language
    #[error("No ```{lang} fenced block found")]
    NoFencedBlock { lang: String },

    /// IO error occurred
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CleanerError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a missing fenced block error
    pub fn no_fenced_block(lang: impl Into<String>) -> Self {
        Self::NoFencedBlock { lang: lang.into() }
    }

    /// Whether the error was caused by the caller's configuration
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::InvalidPattern(_))
    }
}
