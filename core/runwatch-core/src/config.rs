//! Engine configuration loading.
//!
//! The config file is optional. Missing or corrupt files fall back to defaults
//! so a bad settings file never stops progress from rendering.

use crate::error::{Result, RunwatchError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding [`EngineConfig::comment_limit`].
pub const COMMENT_LIMIT_ENV: &str = "RUNWATCH_COMMENT_LIMIT";

const DEFAULT_COMMENT_LIMIT: u32 = 20;
const DEFAULT_ACTION_MAX_CHARS: u32 = 140;
const DEFAULT_ANOMALY_MAX_CHARS: u32 = 160;
const DEFAULT_PHASE_DISPLAY_LIMIT: u32 = 3;

/// Tunables for extraction and rendering.
///
/// All fields use `#[serde(default)]` so partial files are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
pub struct EngineConfig {
    /// Comments to collect per post; seeds `comments_target` when a new post starts.
    /// Zero means unlimited (target stays 0).
    #[serde(default = "default_comment_limit")]
    pub comment_limit: u32,
    /// Upper bound for the human-readable `action` text.
    #[serde(default = "default_action_max_chars")]
    pub action_max_chars: u32,
    /// Upper bound for anomaly text copied from structured patches.
    #[serde(default = "default_anomaly_max_chars")]
    pub anomaly_max_chars: u32,
    /// How many distinct phases the global aggregate reports.
    #[serde(default = "default_phase_display_limit")]
    pub phase_display_limit: u32,
}

fn default_comment_limit() -> u32 {
    DEFAULT_COMMENT_LIMIT
}

fn default_action_max_chars() -> u32 {
    DEFAULT_ACTION_MAX_CHARS
}

fn default_anomaly_max_chars() -> u32 {
    DEFAULT_ANOMALY_MAX_CHARS
}

fn default_phase_display_limit() -> u32 {
    DEFAULT_PHASE_DISPLAY_LIMIT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            comment_limit: DEFAULT_COMMENT_LIMIT,
            action_max_chars: DEFAULT_ACTION_MAX_CHARS,
            anomaly_max_chars: DEFAULT_ANOMALY_MAX_CHARS,
            phase_display_limit: DEFAULT_PHASE_DISPLAY_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Rejects values that would make every action or anomaly empty.
    pub fn validate(&self) -> Result<()> {
        if self.action_max_chars == 0 {
            return Err(RunwatchError::InvalidConfig {
                field: "action_max_chars".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.anomaly_max_chars == 0 {
            return Err(RunwatchError::InvalidConfig {
                field: "anomaly_max_chars".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Applies `RUNWATCH_COMMENT_LIMIT` if it is set to a valid number.
    pub fn with_env_overrides(self) -> Self {
        self.with_comment_limit_override(std::env::var(COMMENT_LIMIT_ENV).ok().as_deref())
    }

    fn with_comment_limit_override(mut self, value: Option<&str>) -> Self {
        if let Some(raw) = value {
            match raw.trim().parse::<u32>() {
                Ok(limit) => self.comment_limit = limit,
                Err(_) => {
                    tracing::warn!(value = %raw, "Ignoring invalid {}", COMMENT_LIMIT_ENV);
                }
            }
        }
        self
    }
}

/// Returns the runwatch data directory (~/.runwatch).
pub fn get_runwatch_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".runwatch"))
}

/// Returns the default config file path (~/.runwatch/config.json).
pub fn default_config_path() -> Option<PathBuf> {
    get_runwatch_dir().map(|d| d.join("config.json"))
}

/// Loads the config, returning defaults if the file is missing or invalid.
pub fn load_engine_config(path: &Path) -> EngineConfig {
    match load_engine_config_strict(path) {
        Ok(config) => config,
        Err(RunwatchError::ConfigNotFound(_)) => EngineConfig::default(),
        Err(err) => {
            tracing::warn!(error = %err, "Falling back to default engine config");
            EngineConfig::default()
        }
    }
}

/// Loads and validates the config, surfacing every failure.
pub fn load_engine_config_strict(path: &Path) -> Result<EngineConfig> {
    let content = match fs_err::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(RunwatchError::ConfigNotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(RunwatchError::Io {
                context: "reading engine config".to_string(),
                source,
            });
        }
    };

    let config: EngineConfig =
        serde_json::from_str(&content).map_err(|e| RunwatchError::ConfigMalformed {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = load_engine_config(&dir.path().join("nope.json"));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn strict_load_reports_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = load_engine_config_strict(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, RunwatchError::ConfigNotFound(_)));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"comment_limit": 50}"#).expect("write");

        let config = load_engine_config_strict(&path).expect("config");
        assert_eq!(config.comment_limit, 50);
        assert_eq!(config.action_max_chars, 140);
        assert_eq!(config.anomaly_max_chars, 160);
    }

    #[test]
    fn corrupt_file_is_malformed_but_lenient_load_degrades() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").expect("write");

        assert!(matches!(
            load_engine_config_strict(&path),
            Err(RunwatchError::ConfigMalformed { .. })
        ));
        assert_eq!(load_engine_config(&path), EngineConfig::default());
    }

    #[test]
    fn zero_action_length_is_rejected() {
        let config = EngineConfig {
            action_max_chars: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RunwatchError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn comment_limit_override_parses_numbers_only() {
        let config = EngineConfig::default().with_comment_limit_override(Some(" 35 "));
        assert_eq!(config.comment_limit, 35);

        let config = EngineConfig::default().with_comment_limit_override(Some("lots"));
        assert_eq!(config.comment_limit, 20);
    }
}
