//! Unit-of-work scoped database sessions on top of sqlx
//!
//! A [`DataSource`] owns a connection pool ([`Engine`]) and a registry of
//! scoped [`Session`]s, and ties both to a host's lifecycle:
//! - host startup connects the pool, creates registered tables and fires
//!   `engine_created` / `ready` callbacks
//! - each unit of work gets one session, closed when the host reports the
//!   unit complete (even though the host has already left the unit's context)
//! - host shutdown closes leftover sessions and disposes the pool
//!
//! Any database sqlx's `Any` driver supports can be used. URLs may carry a
//! driver qualifier (`postgresql+asyncpg://...`), which is only used for
//! dialect detection.
//!
//! # Example
//! ```no_run
//! # use scopekeeper_core::InProcessHost;
//! # use scopekeeper_sqlx::{DataSource, DataSourceConfig, TableDefinition};
//! # async fn example() -> scopekeeper_core::Result<()> {
//! let host = InProcessHost::default();
//! let db = DataSource::attach(&host, DataSourceConfig::new("sqlite://app.db?mode=rwc"))?;
//! db.schema().register(TableDefinition::new(
//!     "visits",
//!     "CREATE TABLE visits (id INTEGER PRIMARY KEY, unit TEXT NOT NULL)",
//! ))?;
//!
//! host.start().await?;
//! host.dispatch(async {
//!     let session = db.get_session()?;
//!     session.execute("INSERT INTO visits (unit) VALUES ('hello')").await?;
//!     session.commit().await
//! })
//! .await?;
//! host.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod datasource;
pub mod dialect;
pub mod engine;
pub mod schema;
pub mod scoped;
pub mod session;

pub use config::{DataSourceConfig, EngineOptions, ResolvedEngineOptions};
pub use datasource::{DataSource, DataSourceBuilder, DataSourceState};
pub use dialect::Dialect;
pub use engine::Engine;
pub use schema::{SchemaRegistry, TableDefinition};
pub use scoped::ScopedSessionFactory;
pub use session::Session;
