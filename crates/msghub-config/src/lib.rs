// SPDX-License-Identifier: MIT OR Apache-2.0
//! msghub-config
//!
//! Typed configuration for the message hub. [`MsghubConfig`] aggregates
//! one section per subsystem, each with explicit defaults (zero values
//! document their meaning — e.g. `write_interval_ms = 0` forces immediate
//! writes). Configs load from TOML, validate with advisory
//! [`ConfigWarning`]s, and merge overlays section-wise.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use msghub_archive::{ArchiveConfig, ArchiveMode};
use msghub_policy::QuietHours;
use msghub_storage::DocumentStorageConfig;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors & warnings
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found or unreadable.
    #[error("config file not readable: {path}: {reason}")]
    FileNotReadable {
        /// Path that was requested.
        path: String,
        /// Underlying cause.
        reason: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory-level issues that do not prevent operation but deserve
/// attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// An interval is unusually large and will delay durability.
    LargeInterval {
        /// Name of the field.
        field: String,
        /// Configured value in ms.
        ms: u64,
    },
    /// Retention is disabled or very short; history will be lost.
    ShortRetention {
        /// Name of the field.
        field: String,
        /// Configured value.
        value: u64,
    },
    /// Quiet hours are enabled but cover the whole day.
    QuietHoursAlwaysOn,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::LargeInterval { field, ms } => {
                write!(f, "'{field}' is unusually large ({ms} ms)")
            }
            ConfigWarning::ShortRetention { field, value } => {
                write!(f, "'{field}' keeps very little history ({value})")
            }
            ConfigWarning::QuietHoursAlwaysOn => {
                write!(f, "quiet hours are enabled around the clock")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Message-list persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", default)]
pub struct StorageSection {
    /// Directory (under the controller's data root) holding all artifacts.
    pub base_dir: String,
    /// File name of the message-list document.
    pub doc_file_name: String,
    /// Write coalescing window in ms; `0` writes immediately.
    pub write_interval_ms: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            base_dir: "msghub-data".to_string(),
            doc_file_name: "messages.json".to_string(),
            write_interval_ms: 2_000,
        }
    }
}

impl StorageSection {
    /// Runtime config for the message-list document storage.
    #[must_use]
    pub fn document_config(&self) -> DocumentStorageConfig {
        DocumentStorageConfig::new(self.doc_file_name.clone(), self.write_interval_ms)
    }
}

/// Archive settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", default)]
pub struct ArchiveSection {
    /// Subdirectory of `base_dir` holding the archive tree.
    pub sub_dir: String,
    /// Batching window in ms; `0` flushes on every append.
    pub flush_interval_ms: u64,
    /// Flush as soon as one ref has this many pending events.
    pub max_batch_size: usize,
    /// Weekly segments to keep besides the current week.
    pub keep_previous_weeks: u32,
    /// Byte bound for one path segment.
    pub max_path_segment_length: usize,
    /// Segment file extension.
    pub file_extension: String,
    /// Surface flush failures to append callers instead of logging.
    pub throw_on_error: bool,
    /// Skip the native probe and always use host-file storage.
    pub host_mode: bool,
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self {
            sub_dir: "archive".to_string(),
            flush_interval_ms: 2_000,
            max_batch_size: 50,
            keep_previous_weeks: 2,
            max_path_segment_length: 120,
            file_extension: "jsonl".to_string(),
            throw_on_error: false,
            host_mode: false,
        }
    }
}

impl ArchiveSection {
    /// Runtime config for the archive.
    #[must_use]
    pub fn archive_config(&self) -> ArchiveConfig {
        ArchiveConfig {
            flush_interval_ms: self.flush_interval_ms,
            max_batch_size: self.max_batch_size,
            keep_previous_weeks: self.keep_previous_weeks,
            max_path_segment_length: self.max_path_segment_length,
            file_extension: self.file_extension.clone(),
            throw_on_error: self.throw_on_error,
            mode: if self.host_mode {
                ArchiveMode::HostFile
            } else {
                ArchiveMode::Auto
            },
        }
    }
}

/// Quiet-hours settings, in local wall-clock minutes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", default)]
pub struct QuietHoursSection {
    /// Master switch.
    pub enabled: bool,
    /// Window start, minutes after local midnight.
    pub start_min: u32,
    /// Window end, minutes after local midnight.
    pub end_min: u32,
    /// Highest severity code still suppressed.
    pub max_level: i64,
    /// Jitter range for reschedules, ms.
    pub spread_ms: i64,
}

impl Default for QuietHoursSection {
    fn default() -> Self {
        let qh = QuietHours::default();
        Self {
            enabled: qh.enabled,
            start_min: qh.start_min,
            end_min: qh.end_min,
            max_level: qh.max_level,
            spread_ms: qh.spread_ms,
        }
    }
}

impl QuietHoursSection {
    /// Runtime policy value.
    #[must_use]
    pub fn quiet_hours(&self) -> QuietHours {
        QuietHours {
            enabled: self.enabled,
            start_min: self.start_min,
            end_min: self.end_min,
            max_level: self.max_level,
            spread_ms: self.spread_ms,
        }
    }
}

/// Stats rollup settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", default)]
pub struct StatsSection {
    /// File name of the rollup document.
    pub rollup_file_name: String,
    /// Day buckets to retain.
    pub rollup_keep_days: u32,
    /// Rollup write coalescing window in ms; `0` writes immediately.
    pub rollup_write_interval_ms: u64,
}

impl Default for StatsSection {
    fn default() -> Self {
        Self {
            rollup_file_name: "stats-rollup.json".to_string(),
            rollup_keep_days: 400,
            rollup_write_interval_ms: 5_000,
        }
    }
}

impl StatsSection {
    /// Runtime config for the rollup document storage.
    #[must_use]
    pub fn rollup_document_config(&self) -> DocumentStorageConfig {
        DocumentStorageConfig::new(self.rollup_file_name.clone(), self.rollup_write_interval_ms)
    }
}

/// Plugin host settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", default)]
pub struct HostSection {
    /// Deadline for `send_to` round trips, ms.
    pub send_to_timeout_ms: u64,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            send_to_timeout_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Aggregated configuration for the whole message hub.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", default)]
pub struct MsghubConfig {
    /// Message-list persistence.
    pub storage: StorageSection,
    /// Archive.
    pub archive: ArchiveSection,
    /// Quiet hours.
    pub quiet_hours: QuietHoursSection,
    /// Stats rollup.
    pub stats: StatsSection,
    /// Plugin hosts.
    pub host: HostSection,
}

/// Overlay with optional sections; present sections replace the base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", default)]
pub struct MsghubConfigOverlay {
    /// Message-list persistence override.
    pub storage: Option<StorageSection>,
    /// Archive override.
    pub archive: Option<ArchiveSection>,
    /// Quiet hours override.
    pub quiet_hours: Option<QuietHoursSection>,
    /// Stats override.
    pub stats: Option<StatsSection>,
    /// Host override.
    pub host: Option<HostSection>,
}

impl MsghubConfig {
    /// Parse a config from a TOML string. Missing sections and fields take
    /// their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] for invalid TOML.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(|err| ConfigError::ParseError {
            reason: err.to_string(),
        })
    }

    /// Load a config from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileNotReadable`] or
    /// [`ConfigError::ParseError`].
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let input =
            std::fs::read_to_string(path).map_err(|err| ConfigError::FileNotReadable {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
        Self::from_toml_str(&input)
    }

    /// Apply an overlay; present overlay sections replace this config's.
    #[must_use]
    pub fn merged_with(mut self, overlay: MsghubConfigOverlay) -> Self {
        if let Some(storage) = overlay.storage {
            self.storage = storage;
        }
        if let Some(archive) = overlay.archive {
            self.archive = archive;
        }
        if let Some(quiet_hours) = overlay.quiet_hours {
            self.quiet_hours = quiet_hours;
        }
        if let Some(stats) = overlay.stats {
            self.stats = stats;
        }
        if let Some(host) = overlay.host {
            self.host = host;
        }
        self
    }

    /// Semantic validation.
    ///
    /// Hard problems become a [`ConfigError::ValidationError`]; advisory
    /// problems come back as warnings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] listing every hard
    /// problem.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        if self.storage.base_dir.trim().is_empty() {
            reasons.push("storage.base_dir must not be empty".to_string());
        }
        if self.storage.doc_file_name.trim().is_empty() {
            reasons.push("storage.doc_file_name must not be empty".to_string());
        }
        if self.storage.write_interval_ms > 60_000 {
            warnings.push(ConfigWarning::LargeInterval {
                field: "storage.write_interval_ms".to_string(),
                ms: self.storage.write_interval_ms,
            });
        }

        if self.archive.max_batch_size == 0 {
            reasons.push("archive.max_batch_size must be at least 1".to_string());
        }
        if self.archive.max_path_segment_length < 32 {
            reasons.push("archive.max_path_segment_length must be at least 32".to_string());
        }
        if self.archive.file_extension.trim().is_empty() {
            reasons.push("archive.file_extension must not be empty".to_string());
        }
        if self.archive.flush_interval_ms > 60_000 {
            warnings.push(ConfigWarning::LargeInterval {
                field: "archive.flush_interval_ms".to_string(),
                ms: self.archive.flush_interval_ms,
            });
        }
        if self.archive.keep_previous_weeks == 0 {
            warnings.push(ConfigWarning::ShortRetention {
                field: "archive.keep_previous_weeks".to_string(),
                value: 0,
            });
        }

        if self.quiet_hours.start_min >= 1_440 || self.quiet_hours.end_min >= 1_440 {
            reasons.push("quiet_hours window minutes must be below 1440".to_string());
        }
        if self.quiet_hours.spread_ms < 0 {
            reasons.push("quiet_hours.spread_ms must not be negative".to_string());
        }
        if self.quiet_hours.enabled && self.quiet_hours.start_min == self.quiet_hours.end_min {
            warnings.push(ConfigWarning::QuietHoursAlwaysOn);
        }

        if self.stats.rollup_file_name.trim().is_empty() {
            reasons.push("stats.rollup_file_name must not be empty".to_string());
        }
        if self.stats.rollup_keep_days < 30 {
            warnings.push(ConfigWarning::ShortRetention {
                field: "stats.rollup_keep_days".to_string(),
                value: u64::from(self.stats.rollup_keep_days),
            });
        }

        if self.host.send_to_timeout_ms == 0 {
            reasons.push("host.send_to_timeout_ms must be positive".to_string());
        }

        if reasons.is_empty() {
            Ok(warnings)
        } else {
            Err(ConfigError::ValidationError { reasons })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        let config = MsghubConfig::default();
        let warnings = config.validate().unwrap();
        assert!(warnings.is_empty());
        assert_eq!(config.storage.doc_file_name, "messages.json");
        assert_eq!(config.stats.rollup_file_name, "stats-rollup.json");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = MsghubConfig::from_toml_str(
            r#"
            [storage]
            write_interval_ms = 0

            [quiet_hours]
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.write_interval_ms, 0);
        assert_eq!(config.storage.doc_file_name, "messages.json");
        assert!(config.quiet_hours.enabled);
        assert_eq!(config.quiet_hours.start_min, 22 * 60);
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let err = MsghubConfig::from_toml_str("storage = 7").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn hard_problems_fail_validation() {
        let mut config = MsghubConfig::default();
        config.archive.max_batch_size = 0;
        config.host.send_to_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => assert_eq!(reasons.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn advisory_problems_become_warnings() {
        let mut config = MsghubConfig::default();
        config.archive.keep_previous_weeks = 0;
        config.quiet_hours.enabled = true;
        config.quiet_hours.start_min = 300;
        config.quiet_hours.end_min = 300;
        let warnings = config.validate().unwrap();
        assert!(warnings.contains(&ConfigWarning::QuietHoursAlwaysOn));
        assert!(warnings.iter().any(|w| matches!(
            w,
            ConfigWarning::ShortRetention { field, .. } if field == "archive.keep_previous_weeks"
        )));
    }

    #[test]
    fn overlay_replaces_present_sections_only() {
        let base = MsghubConfig::default();
        let overlay = MsghubConfigOverlay {
            storage: Some(StorageSection {
                write_interval_ms: 0,
                ..StorageSection::default()
            }),
            ..MsghubConfigOverlay::default()
        };
        let merged = base.merged_with(overlay);
        assert_eq!(merged.storage.write_interval_ms, 0);
        assert_eq!(merged.archive, ArchiveSection::default());
    }

    #[test]
    fn sections_convert_to_runtime_configs() {
        let config = MsghubConfig::default();
        assert_eq!(config.storage.document_config().file_name, "messages.json");
        assert_eq!(config.archive.archive_config().max_batch_size, 50);
        assert_eq!(config.quiet_hours.quiet_hours().max_level, 20);
        assert_eq!(
            config.stats.rollup_document_config().file_name,
            "stats-rollup.json"
        );
    }

    #[test]
    fn load_from_path_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("msghub.toml");
        std::fs::write(&path, "[archive]\nkeep_previous_weeks = 5\n").unwrap();
        let config = MsghubConfig::load_from_path(&path).unwrap();
        assert_eq!(config.archive.keep_previous_weeks, 5);

        let missing = MsghubConfig::load_from_path(&dir.path().join("nope.toml"));
        assert!(matches!(
            missing,
            Err(ConfigError::FileNotReadable { .. })
        ));
    }
}
