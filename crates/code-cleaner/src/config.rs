use serde::{Deserialize, Serialize};

/// Default step marker: `// Step 12: ...`
pub const DEFAULT_STEP_MARKER_PATTERN: &str = r"^\s*//\s*[Ss]tep\s+(\d+)";

/// Configuration for the cleanup pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleanerConfig {
    /// Highest step label kept; the first marker above it truncates the document
    pub step_ceiling: u64,

    /// Maximum occurrences of one block fingerprint per enclosing scope
    pub repetition_threshold: usize,

    /// Keyword opening the global declaration block (`variables { ... }`)
    pub declaration_scope_keyword: String,

    /// Line and block comment delimiters
    pub comment_markers: CommentMarkers,

    /// Characters that open and close string literals
    pub string_delimiters: Vec<char>,

    /// Regex matching a step marker line; capture group 1 is the label
    pub step_marker_pattern: String,

    /// Header keywords that open a function body without a parameter list
    /// (event handlers such as `on start`)
    pub handler_keywords: Vec<String>,

    /// Blocks with fewer lines are never fingerprinted
    pub min_block_lines: usize,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            step_ceiling: 200,
            repetition_threshold: 3,
            declaration_scope_keyword: "variables".to_string(),
            comment_markers: CommentMarkers::default(),
            string_delimiters: vec!['"', '\''],
            step_marker_pattern: DEFAULT_STEP_MARKER_PATTERN.to_string(),
            handler_keywords: vec!["on".to_string()],
            min_block_lines: 2,
        }
    }
}

impl CleanerConfig {
    /// Config for CAPL test code (the defaults)
    pub fn capl() -> Self {
        Self::default()
    }

    /// Tighter bounds for models that loop early
    pub fn strict() -> Self {
        Self {
            step_ceiling: 100,
            repetition_threshold: 2,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.step_ceiling == 0 {
            return Err("step_ceiling must be > 0".to_string());
        }

        if self.repetition_threshold == 0 {
            return Err("repetition_threshold must be > 0".to_string());
        }

        if self.min_block_lines == 0 {
            return Err("min_block_lines must be > 0".to_string());
        }

        let keyword = self.declaration_scope_keyword.trim();
        if keyword.is_empty() {
            return Err("declaration_scope_keyword cannot be empty".to_string());
        }
        if keyword.chars().any(|ch| ch.is_whitespace() || ch == '{' || ch == '}') {
            return Err(format!(
                "declaration_scope_keyword ({keyword:?}) must be a single word"
            ));
        }

        self.comment_markers.validate()?;

        for delim in &self.string_delimiters {
            if delim.is_whitespace() || matches!(delim, '{' | '}' | '\\') {
                return Err(format!("string delimiter {delim:?} is not allowed"));
            }
            if self.comment_markers.starts_with_char(*delim) {
                return Err(format!(
                    "string delimiter {delim:?} collides with a comment marker"
                ));
            }
        }

        if self.step_marker_pattern.trim().is_empty() {
            return Err("step_marker_pattern cannot be empty".to_string());
        }

        if self.handler_keywords.iter().any(|kw| kw.trim().is_empty()) {
            return Err("handler_keywords cannot contain empty entries".to_string());
        }

        Ok(())
    }
}

/// Comment delimiters of the target language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommentMarkers {
    /// Starts a comment running to end of line
    pub line: String,
    /// Opens a block comment
    pub block_open: String,
    /// Closes a block comment
    pub block_close: String,
}

impl Default for CommentMarkers {
    fn default() -> Self {
        Self {
            line: "//".to_string(),
            block_open: "/*".to_string(),
            block_close: "*/".to_string(),
        }
    }
}

impl CommentMarkers {
    fn validate(&self) -> Result<(), String> {
        for (name, marker) in [
            ("line", &self.line),
            ("block_open", &self.block_open),
            ("block_close", &self.block_close),
        ] {
            if marker.is_empty() {
                return Err(format!("comment marker `{name}` cannot be empty"));
            }
            if marker.chars().any(|ch| ch.is_whitespace() || ch == '{' || ch == '}') {
                return Err(format!(
                    "comment marker `{name}` ({marker:?}) cannot contain whitespace or braces"
                ));
            }
        }

        if self.line == self.block_open {
            return Err("line and block_open comment markers must differ".to_string());
        }

        Ok(())
    }

    fn starts_with_char(&self, ch: char) -> bool {
        self.line.starts_with(ch) || self.block_open.starts_with(ch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = CleanerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.step_ceiling, 200);
        assert_eq!(config.repetition_threshold, 3);
    }

    #[test]
    fn test_preset_configs_valid() {
        assert!(CleanerConfig::capl().validate().is_ok());
        assert!(CleanerConfig::strict().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = CleanerConfig {
            step_ceiling: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.step_ceiling = 10;
        config.repetition_threshold = 0;
        assert!(config.validate().is_err());

        config.repetition_threshold = 1;
        config.declaration_scope_keyword = "  ".to_string();
        assert!(config.validate().is_err());

        config.declaration_scope_keyword = "two words".to_string();
        assert!(config.validate().is_err());

        config.declaration_scope_keyword = "variables".to_string();
        config.comment_markers.block_open = "//".to_string();
        assert!(config.validate().is_err());

        config.comment_markers = CommentMarkers::default();
        config.string_delimiters = vec!['/'];
        assert!(config.validate().is_err());

        config.string_delimiters = vec!['"'];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: CleanerConfig =
            serde_json::from_str(r#"{"step_ceiling": 50}"#).expect("valid json");
        assert_eq!(config.step_ceiling, 50);
        assert_eq!(config.repetition_threshold, 3);
        assert_eq!(config.comment_markers.line, "//");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(serde_json::from_str::<CleanerConfig>(r#"{"step_cieling": 50}"#).is_err());
        assert!(
            serde_json::from_str::<CleanerConfig>(r##"{"comment_markers": {"lne": "#"}}"##).is_err()
        );
    }
}
