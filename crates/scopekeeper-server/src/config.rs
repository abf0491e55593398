use scopekeeper_core::LogLevel;
use scopekeeper_sqlx::DataSourceConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default = "default_database")]
    pub database: DataSourceConfig,

    #[serde(default)]
    pub workload: WorkloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Let sqlx's own statement logs through the filter
    #[serde(default = "default_false")]
    pub log_sql_queries: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Units of work to dispatch
    #[serde(default = "default_units")]
    pub units: usize,

    /// Units of work in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            database: default_database(),
            workload: WorkloadConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            log_sql_queries: false,
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            units: default_units(),
            concurrency: default_concurrency(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = shellexpand::tilde(&path.as_ref().to_string_lossy()).to_string();
        let path = Path::new(&path);
        let contents = std::fs::read_to_string(path)?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("SCOPEKEEPER_DATABASE_URL") {
            self.database.url = val;
        }

        if let Ok(val) = std::env::var("SCOPEKEEPER_LOG_LEVEL") {
            match val.parse::<LogLevel>() {
                Ok(level) => self.logging.level = level,
                Err(_) => eprintln!("Warning: Invalid SCOPEKEEPER_LOG_LEVEL '{}', ignoring", val),
            }
        }

        if let Ok(val) = std::env::var("SCOPEKEEPER_LOG_SQL_QUERIES") {
            if let Ok(enabled) = val.parse::<bool>() {
                self.logging.log_sql_queries = enabled;
            }
        }

        if let Ok(val) = std::env::var("SCOPEKEEPER_UNITS") {
            if let Ok(units) = val.parse::<usize>() {
                self.workload.units = units;
            }
        }

        if let Ok(val) = std::env::var("SCOPEKEEPER_CONCURRENCY") {
            if let Ok(concurrency) = val.parse::<usize>() {
                self.workload.concurrency = concurrency;
            }
        }
    }
}

fn default_database() -> DataSourceConfig {
    DataSourceConfig::new("sqlite://scopekeeper.db?mode=rwc")
}

fn default_units() -> usize {
    16
}

fn default_concurrency() -> usize {
    4
}

fn default_false() -> bool {
    false
}
