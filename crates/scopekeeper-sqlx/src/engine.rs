//! Connection pool ("engine") over sqlx's driver-agnostic `Any` backend

use scopekeeper_core::{Error, Result};
use sqlx::any::{AnyConnectOptions, AnyPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool, ConnectOptions, Transaction};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ResolvedEngineOptions;
use crate::dialect::{self, Dialect};

/// A live connection pool to one database URL.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    pool: AnyPool,
    url: String,
    dialect: Dialect,
    options: ResolvedEngineOptions,
}

impl Engine {
    /// Connect a pool to `url`.
    ///
    /// The pool verifies it can open a connection before returning.
    ///
    /// # Errors
    /// - `Error::InvalidUrl` if the URL cannot be parsed
    /// - `Error::Database` if the database is unreachable
    pub async fn connect(url: &str, options: &ResolvedEngineOptions) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let dialect = Dialect::parse(url)?;
        let target = dialect::connect_url(url)?;

        let mut connect_options = AnyConnectOptions::from_str(&target)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;
        connect_options = if options.echo {
            connect_options.log_statements(log::LevelFilter::Info)
        } else {
            connect_options.disable_statement_logging()
        };

        debug!(
            dialect = %dialect,
            max_connections = options.max_connections,
            echo = options.echo,
            "Connecting engine"
        );

        let pool = AnyPoolOptions::new()
            .max_connections(options.max_connections)
            .min_connections(options.min_connections)
            .acquire_timeout(options.acquire_timeout)
            .idle_timeout(options.idle_timeout)
            .max_lifetime(options.max_lifetime)
            .connect_with(connect_options)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect to {}: {}", dialect, e)))?;

        info!(dialect = %dialect, "Engine connected");

        Ok(Self {
            inner: Arc::new(EngineInner {
                pool,
                url: url.to_string(),
                dialect,
                options: options.clone(),
            }),
        })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.inner.pool
    }

    /// URL as configured, including any driver qualifier
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn dialect(&self) -> &Dialect {
        &self.inner.dialect
    }

    pub fn options(&self) -> &ResolvedEngineOptions {
        &self.inner.options
    }

    pub fn echo(&self) -> bool {
        self.inner.options.echo
    }

    pub fn future(&self) -> bool {
        self.inner.options.future
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }

    /// Connections currently open, idle or in use
    pub fn size(&self) -> u32 {
        self.inner.pool.size()
    }

    pub fn num_idle(&self) -> usize {
        self.inner.pool.num_idle()
    }

    pub async fn acquire(&self) -> Result<PoolConnection<Any>> {
        self.inner
            .pool
            .acquire()
            .await
            .map_err(|e| Error::Database(format!("Failed to acquire connection: {}", e)))
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Any>> {
        self.inner
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))
    }

    /// Close the pool, waiting for checked-out connections to come back
    pub async fn dispose(&self) {
        if self.is_closed() {
            return;
        }
        self.inner.pool.close().await;
        info!(dialect = %self.inner.dialect, "Engine disposed");
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("dialect", &self.inner.dialect)
            .field("options", &self.inner.options)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sqlite_url(dir: &TempDir) -> String {
        format!("sqlite://{}?mode=rwc", dir.path().join("engine.db").display())
    }

    #[tokio::test]
    async fn test_connect_and_dispose() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::connect(&sqlite_url(&dir), &ResolvedEngineOptions::default())
            .await
            .unwrap();

        assert!(engine.dialect().is_sqlite());
        assert!(!engine.is_closed());
        assert!(!engine.echo());
        assert!(engine.future());

        let value: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(engine.pool())
            .await
            .unwrap();
        assert_eq!(value, 1);

        engine.dispose().await;
        assert!(engine.is_closed());
        assert!(engine.acquire().await.is_err());

        // Second dispose is a no-op
        engine.dispose().await;
    }

    #[tokio::test]
    async fn test_connect_strips_driver_qualifier() {
        let dir = TempDir::new().unwrap();
        let url = format!(
            "sqlite+aiosqlite://{}?mode=rwc",
            dir.path().join("driver.db").display()
        );
        let engine = Engine::connect(&url, &ResolvedEngineOptions::default())
            .await
            .unwrap();

        assert_eq!(engine.url(), url);
        assert_eq!(engine.dialect().driver(), Some("aiosqlite"));
        engine.dispose().await;
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let result = Engine::connect("not a url", &ResolvedEngineOptions::default()).await;
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_connect_fails_for_missing_database() {
        let dir = TempDir::new().unwrap();
        // Without mode=rwc SQLite refuses to create the file
        let url = format!("sqlite://{}", dir.path().join("missing.db").display());
        let result = Engine::connect(&url, &ResolvedEngineOptions::default()).await;
        assert!(matches!(result, Err(Error::Database(_))));
    }
}
