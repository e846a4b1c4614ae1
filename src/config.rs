//! Engine configuration
//!
//! Configuration is a JSON object; every field is optional and falls back
//! to its default. The configuration is handed to `Database::open` and is
//! read-only afterwards.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{AggError, AggResult};
use crate::query::TextLanguage;

/// How per-document evaluation errors are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// The first per-document error aborts the pipeline
    #[default]
    Abort,
    /// The offending document is dropped and a diagnostic is recorded
    Skip,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Memory ceiling for each blocking stage, in bytes (default 100 MiB)
    #[serde(default = "default_max_blocking_stage_bytes")]
    pub max_blocking_stage_bytes: u64,

    /// Per-document error handling (default "abort")
    #[serde(default)]
    pub error_mode: ErrorMode,

    /// Language used by text indexes that do not name one (default "english")
    #[serde(default = "default_text_language")]
    pub default_text_language: String,
}

fn default_max_blocking_stage_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_text_language() -> String {
    "english".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_blocking_stage_bytes: default_max_blocking_stage_bytes(),
            error_mode: ErrorMode::default(),
            default_text_language: default_text_language(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> AggResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AggError::invalid_config(format!("failed to read {}: {}", path.display(), e))
        })?;

        Self::from_json_str(&content)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json_str(content: &str) -> AggResult<Self> {
        let config: EngineConfig = serde_json::from_str(content)
            .map_err(|e| AggError::invalid_config(format!("invalid config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate field values
    pub fn validate(&self) -> AggResult<()> {
        if self.max_blocking_stage_bytes == 0 {
            return Err(AggError::invalid_config(
                "max_blocking_stage_bytes must be > 0",
            ));
        }

        if TextLanguage::parse(&self.default_text_language).is_none() {
            return Err(AggError::invalid_config(format!(
                "unsupported default_text_language '{}'",
                self.default_text_language
            )));
        }

        Ok(())
    }

    /// Parsed default text language; English when the name is unknown
    pub fn text_language(&self) -> TextLanguage {
        TextLanguage::parse(&self.default_text_language).unwrap_or(TextLanguage::English)
    }

    /// Builder-style override of the blocking stage ceiling
    pub fn with_max_blocking_stage_bytes(mut self, bytes: u64) -> Self {
        self.max_blocking_stage_bytes = bytes;
        self
    }

    /// Builder-style override of the error mode
    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config.max_blocking_stage_bytes, 100 * 1024 * 1024);
        assert_eq!(config.error_mode, ErrorMode::Abort);
        assert_eq!(config.default_text_language, "english");
    }

    #[test]
    fn test_error_mode_parses_lowercase() {
        let config = EngineConfig::from_json_str(r#"{"error_mode": "skip"}"#).unwrap();
        assert_eq!(config.error_mode, ErrorMode::Skip);
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let err = EngineConfig::from_json_str(r#"{"max_blocking_stage_bytes": 0}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfig);
    }

    #[test]
    fn test_unknown_language_rejected() {
        let err =
            EngineConfig::from_json_str(r#"{"default_text_language": "klingon"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfig);
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(EngineConfig::from_json_str("{not json").is_err());
    }
}
