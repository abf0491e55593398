//! Table registry and startup schema creation
//!
//! Collaborators register the tables they need before startup. Startup
//! creates every missing table in one transaction and seals the registry;
//! tables that already exist are left untouched.

use scopekeeper_core::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use crate::engine::Engine;

/// A table known to the data source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    /// Table name, as the database reports it
    pub name: String,
    /// DDL that creates the table
    pub create_sql: String,
    /// Extra statements run after the table is created (indexes etc.)
    pub indexes: Vec<String>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>, create_sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            create_sql: create_sql.into(),
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, sql: impl Into<String>) -> Self {
        self.indexes.push(sql.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: RwLock<Vec<TableDefinition>>,
    sealed: AtomicBool,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table to be created at startup.
    ///
    /// # Errors
    /// - `Error::Schema` if schema creation already ran or the name is taken
    pub fn register(&self, table: TableDefinition) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::Schema(format!(
                "Cannot register table '{}' after schema creation",
                table.name
            )));
        }

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables.iter().any(|t| t.name == table.name) {
            return Err(Error::Schema(format!(
                "Table '{}' is already registered",
                table.name
            )));
        }

        debug!(table = %table.name, "Registered table");
        tables.push(table);
        Ok(())
    }

    pub fn tables(&self) -> Vec<TableDefinition> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Create every registered table missing from the database.
    ///
    /// Runs in a single transaction and seals the registry once it commits.
    /// On failure the registry stays open so a retry can register more tables.
    /// Returns the number of tables created.
    pub async fn create_all(&self, engine: &Engine) -> Result<usize> {
        let tables = self.tables();

        if tables.is_empty() {
            debug!("No tables registered, skipping schema creation");
            self.sealed.store(true, Ordering::Release);
            return Ok(0);
        }

        let exists_sql = engine.dialect().table_exists_sql()?;
        let mut tx = engine.begin().await?;
        let mut created = 0;

        for table in &tables {
            let count: i64 = sqlx::query_scalar(exists_sql)
                .bind(table.name.clone())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    Error::Database(format!("Failed to inspect table {}: {}", table.name, e))
                })?;

            if count > 0 {
                debug!("Skipping table {} (already exists)", table.name);
                continue;
            }

            info!("Creating table {}", table.name);

            sqlx::query(&table.create_sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    Error::Database(format!("Failed to create table {}: {}", table.name, e))
                })?;

            for index in &table.indexes {
                sqlx::query(index).execute(&mut *tx).await.map_err(|e| {
                    Error::Database(format!(
                        "Failed to create index for table {}: {}",
                        table.name, e
                    ))
                })?;
            }

            created += 1;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit schema: {}", e)))?;
        self.sealed.store(true, Ordering::Release);

        debug!(
            "Schema ready: {} created, {} already present",
            created,
            tables.len() - created
        );
        Ok(created)
    }
}
