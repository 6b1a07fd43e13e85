//! CLI configuration loading from file and environment variables.

use std::path::PathBuf;

use serde::Deserialize;
use sqlwrap_db::{parse_sqlite_url, DbSettings, SqliteTarget, UrlParts, DEFAULT_MIGRATIONS_PATH};
use sqlwrap_types::PaginationDefaults;
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Revision script settings.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Defaults for paginated listings.
    #[serde(default)]
    pub pagination: PaginationDefaults,
}

/// Database configuration.
///
/// Either a full `url` or the separate URL `parts`; the URL wins when both
/// are set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL, e.g. `sqlite:///app.db`.
    #[serde(default)]
    pub url: Option<String>,

    /// URL components, used when `url` is absent.
    #[serde(default)]
    pub parts: UrlParts,

    /// Pool and connection settings.
    #[serde(flatten)]
    pub settings: DbSettings,
}

impl DatabaseConfig {
    /// The URL to connect to.
    pub fn url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => self.parts.to_url(),
        }
    }

    /// The URL migrations run against.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InMemoryDatabase` when the URL names an
    /// in-memory database, since nothing applied to it outlives the process.
    pub fn persistent_url(&self) -> Result<String, ConfigError> {
        let url = self.url();
        match parse_sqlite_url(&url) {
            Ok(SqliteTarget::Memory) => Err(ConfigError::InMemoryDatabase(url)),
            _ => Ok(url),
        }
    }
}

/// Revision script configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationsConfig {
    /// Folder holding the revision scripts.
    #[serde(default = "default_migrations_path")]
    pub path: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "sqlwrap_db=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_migrations_path() -> PathBuf {
    PathBuf::from(DEFAULT_MIGRATIONS_PATH)
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            path: default_migrations_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The database URL names an in-memory database.
    #[error("database url {0:?} is in-memory; set database.url or SQLWRAP_DATABASE_URL to a file")]
    InMemoryDatabase(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `SQLWRAP_DATABASE_URL` overrides `database.url`
/// - `SQLWRAP_MIGRATIONS_PATH` overrides `migrations.path`
/// - `SQLWRAP_LOG_LEVEL` overrides `logging.level`
/// - `SQLWRAP_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(url) = var("SQLWRAP_DATABASE_URL").filter(|v| !v.trim().is_empty()) {
        config.database.url = Some(url);
    }
    if let Some(path) = var("SQLWRAP_MIGRATIONS_PATH").filter(|v| !v.trim().is_empty()) {
        config.migrations.path = PathBuf::from(path);
    }
    if let Some(level) = var("SQLWRAP_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("SQLWRAP_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let config = Config::default();
        assert_eq!(config.database.url(), "sqlite://");
        assert!(matches!(
            config.database.persistent_url(),
            Err(ConfigError::InMemoryDatabase(_))
        ));
        assert_eq!(config.migrations.path, PathBuf::from("db/migrations"));
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.pagination.per_page, 20);
        assert_eq!(config.database.settings.pool_max_size, 8);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("absent.toml");
        let config = load_config(Some(path.to_str().expect("should be utf-8 path"))).expect("should load config");
        assert_eq!(config.migrations.path, PathBuf::from("db/migrations"));
    }

    #[test]
    fn parses_every_section() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("sqlwrap.toml");
        std::fs::write(
            &path,
            r#"
[database]
busy_timeout_ms = 250

[database.parts]
name = "data/app.db"

[migrations]
path = "schema"

[logging]
level = "debug"
json = true

[pagination]
per_page = 5
"#,
        )
        .expect("should write file");

        let config = load_config(Some(path.to_str().expect("should be utf-8 path"))).expect("should load config");
        assert_eq!(config.database.url(), "sqlite:///data/app.db");
        assert_eq!(
            config.database.persistent_url().expect("should accept a file url"),
            "sqlite:///data/app.db"
        );
        assert_eq!(config.database.settings.busy_timeout_ms, 250);
        assert_eq!(config.database.settings.pool_max_size, 8);
        assert_eq!(config.migrations.path, PathBuf::from("schema"));
        assert!(config.logging.json);
        assert_eq!(config.pagination.per_page, 5);
        assert_eq!(config.pagination.showmax, 12);
    }

    #[test]
    fn rejects_malformed_files() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[database\nurl = ").expect("should write file");
        let err = load_config(Some(path.to_str().expect("should be utf-8 path"))).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("SQLWRAP_DATABASE_URL", "sqlite:///override.db"),
            ("SQLWRAP_MIGRATIONS_PATH", "elsewhere"),
            ("SQLWRAP_LOG_LEVEL", "trace"),
            ("SQLWRAP_LOG_JSON", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.database.url = Some("sqlite:///file.db".into());
        apply_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.url(), "sqlite:///override.db");
        assert_eq!(config.migrations.path, PathBuf::from("elsewhere"));
        assert_eq!(config.logging.level, "trace");
        assert!(config.logging.json);
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let mut config = Config::default();
        apply_overrides(&mut config, |key| {
            (key == "SQLWRAP_DATABASE_URL").then(|| "  ".to_string())
        });
        assert_eq!(config.database.url, None);
    }

    #[test]
    fn in_memory_urls_are_refused_for_migrations() {
        let mut config = Config::default();
        for url in ["sqlite://", "sqlite:///:memory:", ":memory:"] {
            config.database.url = Some(url.into());
            let err = config
                .database
                .persistent_url()
                .expect_err("should refuse in-memory url");
            assert!(err.to_string().contains("in-memory"));
        }

        config.database.url = Some("sqlite:///var/app.db".into());
        assert!(config.database.persistent_url().is_ok());
    }
}
