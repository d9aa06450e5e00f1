//! Configuration loading for the reindex workspace.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The config file lives at ~/.config/reindex/config.toml.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::TypesError;

/// How accumulated dirty work is processed at flush time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorPolicy {
    /// Process inline, falling back to the queue above `inline_threshold`
    #[default]
    Immediate,
    /// Segment into batches and process them inline
    Batched,
    /// Segment into batches and hand them to the job queue
    Queued,
    /// Drop all dirty work (bulk imports)
    Discard,
}

/// Dirty-work processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorSettings {
    #[serde(default)]
    pub policy: ProcessorPolicy,

    /// Target number of ids per batch (0 = one unbounded batch)
    #[serde(default = "default_processor_batch_size")]
    pub batch_size: usize,

    /// How far a batch may overrun to absorb a small remainder
    #[serde(default = "default_batch_soft_cap")]
    pub batch_soft_cap: usize,

    /// Dirty-id count above which immediate processing is queued instead
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold: usize,
}

fn default_processor_batch_size() -> usize {
    100
}

fn default_batch_soft_cap() -> usize {
    10
}

fn default_inline_threshold() -> usize {
    100
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            policy: ProcessorPolicy::default(),
            batch_size: default_processor_batch_size(),
            batch_soft_cap: default_batch_soft_cap(),
            inline_threshold: default_inline_threshold(),
        }
    }
}

impl ProcessorSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size > 0 && self.batch_soft_cap >= self.batch_size {
            return Err(format!(
                "batch_soft_cap ({}) must be smaller than batch_size ({})",
                self.batch_soft_cap, self.batch_size
            ));
        }
        Ok(())
    }
}

/// Commit coordination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitSettings {
    /// Delay before a commit is retried once a commit already ran this pass
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Random extra delay (0 disables)
    #[serde(default)]
    pub cooldown_jitter_secs: u64,
}

fn default_cooldown_secs() -> u64 {
    300
}

impl Default for CommitSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            cooldown_jitter_secs: 0,
        }
    }
}

impl CommitSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.cooldown_secs == 0 && self.cooldown_jitter_secs > 0 {
            return Err("cooldown_jitter_secs requires cooldown_secs > 0".to_string());
        }
        Ok(())
    }
}

/// Which handler drives full reindexing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReindexHandlerKind {
    /// Every group runs inline
    #[default]
    Immediate,
    /// One queue job per group
    Queued,
}

/// Full reindex settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexSettings {
    /// Target entities per group
    #[serde(default = "default_reindex_batch_size")]
    pub batch_size: u64,

    #[serde(default)]
    pub handler: ReindexHandlerKind,
}

fn default_reindex_batch_size() -> u64 {
    500
}

impl Default for ReindexSettings {
    fn default() -> Self {
        Self {
            batch_size: default_reindex_batch_size(),
            handler: ReindexHandlerKind::default(),
        }
    }
}

impl ReindexSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("reindex batch_size must be > 0".to_string());
        }
        Ok(())
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub processor: ProcessorSettings,

    #[serde(default)]
    pub commit: CommitSettings,

    #[serde(default)]
    pub reindex: ReindexSettings,

    /// Path to the tantivy index directory
    #[serde(default = "default_search_index_path")]
    pub search_index_path: String,

    /// Tantivy writer heap budget
    #[serde(default = "default_writer_memory_mb")]
    pub writer_memory_mb: usize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_search_index_path() -> String {
    ProjectDirs::from("", "", "reindex")
        .map(|p| p.data_local_dir().join("search-index"))
        .unwrap_or_else(|| PathBuf::from("./search-index"))
        .to_string_lossy()
        .to_string()
}

fn default_writer_memory_mb() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            processor: ProcessorSettings::default(),
            commit: CommitSettings::default(),
            reindex: ReindexSettings::default(),
            search_index_path: default_search_index_path(),
            writer_memory_mb: default_writer_memory_mb(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/reindex/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (REINDEX_*, nested keys joined with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, TypesError> {
        let config_dir = ProjectDirs::from("", "", "reindex")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("search_index_path", default_search_index_path())
            .map_err(config_err)?
            .set_default("writer_memory_mb", default_writer_memory_mb() as i64)
            .map_err(config_err)?
            .set_default("log_level", default_log_level())
            .map_err(config_err)?
            .set_default("processor.batch_size", default_processor_batch_size() as i64)
            .map_err(config_err)?
            .set_default("processor.batch_soft_cap", default_batch_soft_cap() as i64)
            .map_err(config_err)?
            .set_default("commit.cooldown_secs", default_cooldown_secs() as i64)
            .map_err(config_err)?
            .set_default("reindex.batch_size", default_reindex_batch_size() as i64)
            .map_err(config_err)?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // e.g. REINDEX_LOG_LEVEL, REINDEX_PROCESSOR__BATCH_SIZE
        builder = builder.add_source(
            Environment::with_prefix("REINDEX")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(config_err)?
            .try_deserialize()
            .map_err(config_err)?;

        settings.validate().map_err(TypesError::Config)?;
        Ok(settings)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.processor.validate()?;
        self.commit.validate()?;
        self.reindex.validate()?;
        if self.writer_memory_mb < 15 {
            return Err(format!(
                "writer_memory_mb must be >= 15, got {}",
                self.writer_memory_mb
            ));
        }
        Ok(())
    }
}

fn config_err(e: config::ConfigError) -> TypesError {
    TypesError::Config(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.processor.policy, ProcessorPolicy::Immediate);
        assert_eq!(settings.processor.batch_size, 100);
        assert_eq!(settings.processor.batch_soft_cap, 10);
        assert_eq!(settings.commit.cooldown_secs, 300);
        assert_eq!(settings.reindex.batch_size, 500);
        assert_eq!(settings.reindex.handler, ReindexHandlerKind::Immediate);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "log_level = \"debug\"\n[processor]\npolicy = \"queued\"\nbatch_size = 5\nbatch_soft_cap = 2\n[reindex]\nhandler = \"queued\""
        )
        .unwrap();

        let settings = Settings::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.processor.policy, ProcessorPolicy::Queued);
        assert_eq!(settings.processor.batch_size, 5);
        assert_eq!(settings.processor.batch_soft_cap, 2);
        assert_eq!(settings.reindex.handler, ReindexHandlerKind::Queued);
        assert_eq!(settings.reindex.batch_size, 500);
    }

    #[test]
    fn test_processor_validation() {
        let mut processor = ProcessorSettings::default();
        assert!(processor.validate().is_ok());

        processor.batch_soft_cap = processor.batch_size;
        assert!(processor.validate().is_err());

        processor.batch_size = 0;
        assert!(processor.validate().is_ok());
    }

    #[test]
    fn test_reindex_validation() {
        let reindex = ReindexSettings {
            batch_size: 0,
            ..Default::default()
        };
        assert!(reindex.validate().is_err());
    }

    #[test]
    fn test_policy_serialization() {
        let json = serde_json::to_string(&ProcessorPolicy::Discard).unwrap();
        assert_eq!(json, "\"discard\"");
        let decoded: ReindexHandlerKind = serde_json::from_str("\"queued\"").unwrap();
        assert_eq!(decoded, ReindexHandlerKind::Queued);
    }
}
