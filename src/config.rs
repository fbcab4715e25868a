use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Which execution engines are enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    #[default]
    Realtime,
    Backtest,
    Both,
}

impl EngineMode {
    /// Bundled example strategies are only visible when both engines run
    pub fn shows_examples(&self) -> bool {
        matches!(self, EngineMode::Both)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Root directory holding strategy source files
    pub path: PathBuf,
    #[serde(default)]
    pub engine_mode: EngineMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Program used to execute a strategy script (e.g. `node`)
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Extra arguments placed before the script path
    #[serde(default)]
    pub interpreter_args: Vec<String>,
    /// Directory holding installed catalog bundles, one subdirectory per bundle id
    #[serde(default)]
    pub bundles_path: Option<PathBuf>,
    /// Grace period before a stopping process is killed
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
    /// Longest a control message may wait on a process's stdin
    #[serde(default = "default_control_timeout")]
    pub control_timeout_ms: u64,
}

fn default_interpreter() -> String {
    "node".to_string()
}

fn default_stop_timeout() -> u64 {
    5000
}

fn default_control_timeout() -> u64 {
    2000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            interpreter_args: Vec::new(),
            bundles_path: None,
            stop_timeout_ms: default_stop_timeout(),
            control_timeout_ms: default_control_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Base URL of the remote bundle catalog
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_catalog_timeout")]
    pub timeout_ms: u64,
}

fn default_catalog_timeout() -> u64 {
    10_000
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_catalog_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for the rolling log file; console only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            .set_default("source.engine_mode", "realtime")?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("BOTKEEPER_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // BOTKEEPER_DATABASE__URL, BOTKEEPER_SOURCE__PATH, ...
            .add_source(
                Environment::with_prefix("BOTKEEPER")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.url.is_empty() {
            errors.push("database.url must be set".to_string());
        }

        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be positive".to_string());
        }

        if self.source.path.as_os_str().is_empty() {
            errors.push("source.path must be set".to_string());
        }

        if self.supervisor.interpreter.trim().is_empty() {
            errors.push("supervisor.interpreter must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        AppConfig {
            database: DatabaseConfig {
                url: "postgres://localhost/botkeeper".to_string(),
                max_connections: 5,
            },
            source: SourceConfig {
                path: PathBuf::from("/tmp/strategies"),
                engine_mode: EngineMode::Both,
            },
            supervisor: SupervisorConfig::default(),
            catalog: CatalogConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_engine_mode_examples_visibility() {
        assert!(EngineMode::Both.shows_examples());
        assert!(!EngineMode::Realtime.shows_examples());
        assert!(!EngineMode::Backtest.shows_examples());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut config = sample();
        assert!(config.validate().is_ok());

        config.database.url.clear();
        config.supervisor.interpreter = " ".to_string();
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
            [database]
            url = "postgres://db/keeper"

            [source]
            path = "/srv/strategies"
            engine_mode = "both"

            [supervisor]
            interpreter = "deno"
            interpreter_args = ["run", "-A"]
            "#,
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.database.url, "postgres://db/keeper");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.source.engine_mode, EngineMode::Both);
        assert_eq!(config.supervisor.interpreter, "deno");
        assert_eq!(config.supervisor.interpreter_args, vec!["run", "-A"]);
        assert_eq!(config.logging.level, "info");
    }
}
