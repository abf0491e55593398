//! Configuration for the engine and its connection pool

use scopekeeper_core::LogLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine options as supplied by the caller.
///
/// `echo` and `future` left unset fall back to defaults derived from the
/// host: statement echo follows the host's log verbosity, future-style
/// sessions are always on.
///
/// # Example
/// ```
/// use scopekeeper_sqlx::EngineOptions;
///
/// let options = EngineOptions::default()
///     .with_max_connections(20)
///     .with_echo(true);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Log every executed statement
    #[serde(default)]
    pub echo: Option<bool>,

    /// Run sessions inside explicit transactions that must be committed
    #[serde(default)]
    pub future: Option<bool>,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    #[serde(default)]
    pub min_connections: u32,

    /// Timeout for acquiring a connection from the pool
    #[serde(default = "default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,

    /// How long a connection can remain idle before being closed
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,

    /// Maximum lifetime of a connection
    #[serde(default = "default_max_lifetime_seconds")]
    pub max_lifetime_seconds: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_seconds() -> u64 {
    30
}

fn default_idle_timeout_seconds() -> u64 {
    600 // 10 minutes
}

fn default_max_lifetime_seconds() -> u64 {
    1800 // 30 minutes
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            echo: None,
            future: None,
            max_connections: default_max_connections(),
            min_connections: 0,
            acquire_timeout_seconds: default_acquire_timeout_seconds(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            max_lifetime_seconds: default_max_lifetime_seconds(),
        }
    }
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = Some(echo);
        self
    }

    pub fn with_future(mut self, future: bool) -> Self {
        self.future = Some(future);
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_min_connections(mut self, min_connections: u32) -> Self {
        self.min_connections = min_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_seconds = timeout.as_secs();
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_seconds = timeout.as_secs();
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime_seconds = lifetime.as_secs();
        self
    }

    /// Fill unset options from the host's log level
    pub fn resolve(&self, log_level: LogLevel) -> ResolvedEngineOptions {
        ResolvedEngineOptions {
            echo: self.echo.unwrap_or(log_level.is_verbose()),
            future: self.future.unwrap_or(true),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_seconds),
            idle_timeout: Duration::from_secs(self.idle_timeout_seconds),
            max_lifetime: Duration::from_secs(self.max_lifetime_seconds),
        }
    }
}

/// Engine options with every default applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEngineOptions {
    pub echo: bool,
    pub future: bool,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for ResolvedEngineOptions {
    fn default() -> Self {
        EngineOptions::default().resolve(LogLevel::default())
    }
}

/// Where and how a data source connects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Connection URL, e.g. `sqlite://app.db?mode=rwc` or `postgresql+asyncpg://host/db`
    pub url: String,

    #[serde(default)]
    pub engine: EngineOptions,
}

impl DataSourceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            engine: EngineOptions::default(),
        }
    }

    pub fn with_engine(mut self, engine: EngineOptions) -> Self {
        self.engine = engine;
        self
    }
}
