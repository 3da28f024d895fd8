//! Tunable game configuration loaded from JSON.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::catalog::CatalogConfig;
use crate::constants::{
    DEFAULT_BOOT_LOADING_SECS, DEFAULT_CONNECTIVITY_CHECK_SECS, DEFAULT_INTRO_FALLBACK_SECS,
    DEFAULT_STAGE_LOADING_SECS, MAX_DELAY_SECS,
};
use crate::economy::EconomyConfig;
use crate::presentation::{delay_duration, is_valid_delay};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config JSON is malformed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("`{field}` must be between 0 and {max} seconds (got {value})", max = MAX_DELAY_SECS)]
    InvalidDuration { field: &'static str, value: f32 },
    #[error("`connectivity.check_interval_secs` must be greater than zero (got {0})")]
    ZeroInterval(f32),
    #[error("`{field}` must not be negative (got {value})")]
    NegativeAmount { field: &'static str, value: i64 },
}

/// Stage-flow timing and ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Loading panel time before the first stage after boot or a level load.
    pub boot_loading_secs: f32,
    /// Loading panel time between stages of one level.
    pub stage_loading_secs: f32,
    /// Idle time for stages without an intro cue.
    pub intro_fallback_secs: f32,
    pub shuffle_choices: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            boot_loading_secs: DEFAULT_BOOT_LOADING_SECS,
            stage_loading_secs: DEFAULT_STAGE_LOADING_SECS,
            intro_fallback_secs: DEFAULT_INTRO_FALLBACK_SECS,
            shuffle_choices: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub check_interval_secs: f32,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: DEFAULT_CONNECTIVITY_CHECK_SECS,
        }
    }
}

impl ConnectivityConfig {
    /// Polling period for the connectivity watcher.
    ///
    /// Values that fail validation fall back to the default period.
    #[must_use]
    pub fn interval(&self) -> Duration {
        delay_duration(self.check_interval_secs).unwrap_or_else(|| {
            log::warn!(
                "connectivity interval {}s is unusable; polling every {DEFAULT_CONNECTIVITY_CHECK_SECS}s",
                self.check_interval_secs
            );
            Duration::from_secs_f32(DEFAULT_CONNECTIVITY_CHECK_SECS)
        })
    }
}

/// Aggregate configuration. Every field falls back to its default.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub economy: EconomyConfig,
    pub catalog: CatalogConfig,
    pub flow: FlowConfig,
    pub connectivity: ConnectivityConfig,
}

impl GameConfig {
    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a value is out of range.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails [`Self::from_json`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// # Errors
    ///
    /// Returns the first out-of-range value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("flow.boot_loading_secs", self.flow.boot_loading_secs),
            ("flow.stage_loading_secs", self.flow.stage_loading_secs),
            ("flow.intro_fallback_secs", self.flow.intro_fallback_secs),
            (
                "connectivity.check_interval_secs",
                self.connectivity.check_interval_secs,
            ),
        ];
        if let Some((field, value)) = durations
            .into_iter()
            .find(|(_, value)| !is_valid_delay(*value))
        {
            return Err(ConfigError::InvalidDuration { field, value });
        }
        if self.connectivity.check_interval_secs <= 0.0 {
            return Err(ConfigError::ZeroInterval(
                self.connectivity.check_interval_secs,
            ));
        }

        let amounts = [
            ("economy.start_balance", self.economy.start_balance),
            ("economy.cost_per_choice", self.economy.cost_per_choice),
            ("economy.reward_per_level", self.economy.reward_per_level),
        ];
        if let Some((field, value)) = amounts.into_iter().find(|(_, value)| *value < 0) {
            return Err(ConfigError::NegativeAmount { field, value });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DEFAULT_REWARD_PER_LEVEL, DEFAULT_START_BALANCE};

    #[test]
    fn empty_document_uses_defaults() {
        let config = GameConfig::from_json("{}").unwrap();
        assert_eq!(config, GameConfig::default());
        assert_eq!(config.economy.start_balance, DEFAULT_START_BALANCE);
        assert_eq!(config.economy.reward_per_level, DEFAULT_REWARD_PER_LEVEL);
        assert!(config.flow.shuffle_choices);
        assert!(config.catalog.use_saved_level_on_boot);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = GameConfig::from_json(
            r#"{ "flow": { "shuffle_choices": false }, "catalog": { "start_level_index": 2 } }"#,
        )
        .unwrap();
        assert!(!config.flow.shuffle_choices);
        assert!((config.flow.intro_fallback_secs - 1.0).abs() < f32::EPSILON);
        assert_eq!(config.catalog.start_level_index, 2);
    }

    #[test]
    fn negative_values_are_rejected() {
        let err = GameConfig::from_json(r#"{ "flow": { "stage_loading_secs": -0.5 } }"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration { field: "flow.stage_loading_secs", .. }
        ));

        let err = GameConfig::from_json(r#"{ "economy": { "reward_per_level": -1 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::NegativeAmount { value: -1, .. }));
    }

    #[test]
    fn oversized_and_infinite_delays_are_rejected() {
        let err = GameConfig::from_json(r#"{ "flow": { "boot_loading_secs": 1e20 } }"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration { field: "flow.boot_loading_secs", .. }
        ));

        let err = GameConfig::from_json(r#"{ "flow": { "intro_fallback_secs": 1e39 } }"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration { field: "flow.intro_fallback_secs", .. }
        ));

        let config = GameConfig::from_json(r#"{ "flow": { "stage_loading_secs": 3600 } }"#)
            .unwrap();
        assert!((config.flow.stage_loading_secs - MAX_DELAY_SECS).abs() < f32::EPSILON);
    }

    #[test]
    fn connectivity_interval_must_be_positive() {
        let err = GameConfig::from_json(r#"{ "connectivity": { "check_interval_secs": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroInterval(_)));

        let config =
            GameConfig::from_json(r#"{ "connectivity": { "check_interval_secs": 0.5 } }"#)
                .unwrap();
        assert_eq!(config.connectivity.interval(), Duration::from_millis(500));
        assert_eq!(
            ConnectivityConfig::default().interval(),
            Duration::from_secs(2)
        );
        let unvalidated = ConnectivityConfig {
            check_interval_secs: 0.0,
        };
        assert_eq!(unvalidated.interval(), Duration::from_secs(2));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = GameConfig::load("/definitely/not/here/forkpath.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
