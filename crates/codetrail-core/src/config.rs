//! Layered configuration for indexing runs.
//!
//! Precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (`CODETRAIL_DB`, `CODETRAIL_THREADS`, `CODETRAIL_MAX_PENDING`)
//! 3. Project config (`codetrail.toml`, `[index]` table)
//! 4. Defaults
//!
//! ```toml
//! [index]
//! database = "build/codetrail.sqlite"
//! threads = 8
//! max_pending_storages = 10
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Name of the project config file looked up in the project root.
pub const PROJECT_CONFIG_FILE: &str = "codetrail.toml";

/// Database file name used when nothing else is configured.
pub const DEFAULT_DATABASE_FILE: &str = "codetrail.sqlite";

/// Producers wait while this many storages are pending.
pub const DEFAULT_MAX_PENDING_STORAGES: usize = 10;

pub const ENV_DATABASE: &str = "CODETRAIL_DB";
pub const ENV_THREADS: &str = "CODETRAIL_THREADS";
pub const ENV_MAX_PENDING: &str = "CODETRAIL_MAX_PENDING";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid project config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
}

// ============================================================================
// Configuration Sources
// ============================================================================

/// Configuration value source (for precedence tracking).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigSource {
    /// Built-in default value.
    Default = 0,
    /// From codetrail.toml.
    ProjectConfig = 1,
    /// From environment variable.
    EnvVar = 2,
    /// From CLI flag (highest precedence).
    CliFlag = 3,
}

/// A configuration value with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        ConfigValue { value, source }
    }

    /// Merge with another value, preferring higher precedence.
    pub fn merge(self, other: Self) -> Self {
        if other.source >= self.source {
            other
        } else {
            self
        }
    }
}

// ============================================================================
// Project File
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectFile {
    #[serde(default)]
    index: IndexSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct IndexSection {
    database: Option<PathBuf>,
    threads: Option<usize>,
    max_pending_storages: Option<usize>,
}

// ============================================================================
// Configuration Resolution
// ============================================================================

/// CLI configuration overrides.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// --db flag.
    pub database: Option<PathBuf>,
    /// --threads flag.
    pub threads: Option<usize>,
    /// --max-pending flag.
    pub max_pending_storages: Option<usize>,
}

/// Resolved configuration with precedence information.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Index database path.
    pub database: ConfigValue<PathBuf>,
    /// Number of producer threads.
    pub threads: ConfigValue<usize>,
    /// Backpressure limit for pending storages.
    pub max_pending_storages: ConfigValue<usize>,
    /// Raw text of codetrail.toml, stored as the database's project settings.
    pub project_settings: Option<String>,
}

impl ResolvedConfig {
    /// Defaults for a project rooted at `project_root`.
    pub fn defaults(project_root: &Path) -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        ResolvedConfig {
            database: ConfigValue::new(
                project_root.join(DEFAULT_DATABASE_FILE),
                ConfigSource::Default,
            ),
            threads: ConfigValue::new(threads, ConfigSource::Default),
            max_pending_storages: ConfigValue::new(
                DEFAULT_MAX_PENDING_STORAGES,
                ConfigSource::Default,
            ),
            project_settings: None,
        }
    }

    /// Resolve configuration from all sources, reading the process environment.
    pub fn resolve(project_root: &Path, overrides: &CliOverrides) -> Result<Self, ConfigError> {
        ResolvedConfig::resolve_with_env(project_root, overrides, |name| std::env::var(name).ok())
    }

    /// Resolve configuration with an explicit environment lookup.
    pub fn resolve_with_env(
        project_root: &Path,
        overrides: &CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = ResolvedConfig::defaults(project_root);

        let project_path = project_root.join(PROJECT_CONFIG_FILE);
        if project_path.exists() {
            config.apply_project_config(project_root, &project_path)?;
        }

        config.apply_env_vars(env)?;
        config.apply_cli_overrides(overrides);
        config.validate()?;

        tracing::debug!(
            database = %config.database.value.display(),
            database_source = ?config.database.source,
            threads = config.threads.value,
            max_pending = config.max_pending_storages.value,
            "resolved config"
        );
        Ok(config)
    }

    fn apply_project_config(&mut self, project_root: &Path, path: &Path) -> Result<(), ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ProjectFile = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if let Some(database) = file.index.database {
            // Relative paths are relative to the project root.
            self.set_database(project_root.join(database), ConfigSource::ProjectConfig);
        }
        if let Some(threads) = file.index.threads {
            self.set_threads(threads, ConfigSource::ProjectConfig);
        }
        if let Some(max_pending) = file.index.max_pending_storages {
            self.set_max_pending(max_pending, ConfigSource::ProjectConfig);
        }
        self.project_settings = Some(text);
        Ok(())
    }

    fn apply_env_vars(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(database) = env(ENV_DATABASE) {
            self.set_database(PathBuf::from(database), ConfigSource::EnvVar);
        }
        if let Some(threads) = env(ENV_THREADS) {
            self.set_threads(parse_count(ENV_THREADS, &threads)?, ConfigSource::EnvVar);
        }
        if let Some(max_pending) = env(ENV_MAX_PENDING) {
            self.set_max_pending(parse_count(ENV_MAX_PENDING, &max_pending)?, ConfigSource::EnvVar);
        }
        Ok(())
    }

    fn apply_cli_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(ref database) = overrides.database {
            self.set_database(database.clone(), ConfigSource::CliFlag);
        }
        if let Some(threads) = overrides.threads {
            self.set_threads(threads, ConfigSource::CliFlag);
        }
        if let Some(max_pending) = overrides.max_pending_storages {
            self.set_max_pending(max_pending, ConfigSource::CliFlag);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.threads.value == 0 {
            return Err(zero_value("threads"));
        }
        if self.max_pending_storages.value == 0 {
            return Err(zero_value("max_pending_storages"));
        }
        Ok(())
    }

    fn set_database(&mut self, value: PathBuf, source: ConfigSource) {
        self.database = self.database.clone().merge(ConfigValue::new(value, source));
    }

    fn set_threads(&mut self, value: usize, source: ConfigSource) {
        self.threads = self.threads.clone().merge(ConfigValue::new(value, source));
    }

    fn set_max_pending(&mut self, value: usize, source: ConfigSource) {
        self.max_pending_storages = self
            .max_pending_storages
            .clone()
            .merge(ConfigValue::new(value, source));
    }
}

fn parse_count(name: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
        reason: "expected a positive integer".to_string(),
    })
}

fn zero_value(name: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: "0".to_string(),
        reason: "must be at least 1".to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    mod precedence_tests {
        use super::*;

        #[test]
        fn merge_prefers_higher_source() {
            let default = ConfigValue::new(1, ConfigSource::Default);
            let cli = ConfigValue::new(2, ConfigSource::CliFlag);
            assert_eq!(default.clone().merge(cli.clone()).value, 2);
            assert_eq!(cli.merge(default).value, 2);
        }

        #[test]
        fn defaults_without_project_file() {
            let temp = TempDir::new().unwrap();
            let config =
                ResolvedConfig::resolve_with_env(temp.path(), &CliOverrides::default(), no_env)
                    .unwrap();
            assert_eq!(config.database.value, temp.path().join(DEFAULT_DATABASE_FILE));
            assert_eq!(config.database.source, ConfigSource::Default);
            assert_eq!(config.max_pending_storages.value, DEFAULT_MAX_PENDING_STORAGES);
            assert!(config.threads.value >= 1);
            assert!(config.project_settings.is_none());
        }

        #[test]
        fn project_file_then_env_then_cli() {
            let temp = TempDir::new().unwrap();
            let text = "[index]\ndatabase = \"out/index.sqlite\"\nthreads = 3\nmax_pending_storages = 4\n";
            fs::write(temp.path().join(PROJECT_CONFIG_FILE), text).unwrap();

            let env: HashMap<&str, &str> = [(ENV_THREADS, "5")].into_iter().collect();
            let overrides = CliOverrides {
                max_pending_storages: Some(2),
                ..CliOverrides::default()
            };
            let config = ResolvedConfig::resolve_with_env(temp.path(), &overrides, |name| {
                env.get(name).map(|value| value.to_string())
            })
            .unwrap();

            assert_eq!(config.database.value, temp.path().join("out/index.sqlite"));
            assert_eq!(config.database.source, ConfigSource::ProjectConfig);
            assert_eq!(config.threads.value, 5);
            assert_eq!(config.threads.source, ConfigSource::EnvVar);
            assert_eq!(config.max_pending_storages.value, 2);
            assert_eq!(config.max_pending_storages.source, ConfigSource::CliFlag);
            assert_eq!(config.project_settings.as_deref(), Some(text));
        }
    }

    mod validation_tests {
        use super::*;

        #[test]
        fn rejects_unknown_keys() {
            let temp = TempDir::new().unwrap();
            fs::write(
                temp.path().join(PROJECT_CONFIG_FILE),
                "[index]\nthread = 3\n",
            )
            .unwrap();
            let err =
                ResolvedConfig::resolve_with_env(temp.path(), &CliOverrides::default(), no_env)
                    .unwrap_err();
            assert!(matches!(err, ConfigError::Parse { .. }));
        }

        #[test]
        fn rejects_bad_env_values() {
            let temp = TempDir::new().unwrap();
            let err = ResolvedConfig::resolve_with_env(
                temp.path(),
                &CliOverrides::default(),
                |name| (name == ENV_MAX_PENDING).then(|| "many".to_string()),
            )
            .unwrap_err();
            assert!(err.to_string().contains(ENV_MAX_PENDING));
        }

        #[test]
        fn rejects_zero_threads() {
            let temp = TempDir::new().unwrap();
            let overrides = CliOverrides {
                threads: Some(0),
                ..CliOverrides::default()
            };
            let err = ResolvedConfig::resolve_with_env(temp.path(), &overrides, no_env).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }));
        }
    }
}
