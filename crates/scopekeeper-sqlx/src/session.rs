//! Unit-of-work sessions
//!
//! A session borrows one pooled connection, lazily, on first use. In future
//! mode (the default) that connection is wrapped in a transaction and nothing
//! is persisted until [`Session::commit`]; otherwise statements autocommit.

use chrono::{DateTime, Utc};
use scopekeeper_core::{Error, Result, ScopeKey};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyConnection, AnyPool, Transaction};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::trace;
use uuid::Uuid;

use crate::engine::Engine;

enum Conn {
    Idle,
    Connection(PoolConnection<Any>),
    Transaction(Transaction<'static, Any>),
}

pub struct Session {
    id: Uuid,
    key: ScopeKey,
    created_at: DateTime<Utc>,
    pool: AnyPool,
    future: bool,
    state: Mutex<Conn>,
    closed: AtomicBool,
}

impl Session {
    pub fn new(key: ScopeKey, engine: &Engine) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            created_at: Utc::now(),
            pool: engine.pool().clone(),
            future: engine.future(),
            state: Mutex::new(Conn::Idle),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The scope this session was created for
    pub fn key(&self) -> ScopeKey {
        self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_future(&self) -> bool {
        self.future
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether a connection is currently checked out for this session
    pub async fn is_active(&self) -> bool {
        !matches!(*self.state.lock().await, Conn::Idle)
    }

    /// Exclusive access to the session's connection, checking one out first
    /// if needed. Hold the guard only as long as the statement runs.
    ///
    /// # Errors
    /// - `Error::SessionClosed` once the session was closed
    /// - `Error::Database` if no connection can be acquired
    pub async fn connection(&self) -> Result<MappedMutexGuard<'_, AnyConnection>> {
        let mut state = self.state.lock().await;
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }

        if matches!(*state, Conn::Idle) {
            *state = if self.future {
                let tx = self
                    .pool
                    .begin()
                    .await
                    .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))?;
                Conn::Transaction(tx)
            } else {
                let conn = self
                    .pool
                    .acquire()
                    .await
                    .map_err(|e| Error::Database(format!("Failed to acquire connection: {}", e)))?;
                Conn::Connection(conn)
            };
            trace!(session = %self.id, scope = %self.key, "Session checked out a connection");
        }

        MutexGuard::try_map(state, |conn| match conn {
            Conn::Connection(conn) => Some(&mut **conn),
            Conn::Transaction(tx) => Some(&mut **tx),
            Conn::Idle => None,
        })
        .map_err(|_| Error::Internal("Session has no connection".to_string()))
    }

    /// Run a statement without parameters, returning rows affected
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        let mut conn = self.connection().await?;
        let result = sqlx::query(sql)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::Database(format!("Failed to execute statement: {}", e)))?;
        Ok(result.rows_affected())
    }

    /// Commit pending work and give the connection back to the pool.
    /// A no-op without a transaction.
    pub async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }

        match std::mem::replace(&mut *state, Conn::Idle) {
            Conn::Transaction(tx) => {
                tx.commit()
                    .await
                    .map_err(|e| Error::Database(format!("Failed to commit: {}", e)))?;
                trace!(session = %self.id, "Session committed");
            }
            other => *state = other,
        }
        Ok(())
    }

    /// Discard pending work and give the connection back to the pool
    pub async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }

        match std::mem::replace(&mut *state, Conn::Idle) {
            Conn::Transaction(tx) => {
                tx.rollback()
                    .await
                    .map_err(|e| Error::Database(format!("Failed to roll back: {}", e)))?;
                trace!(session = %self.id, "Session rolled back");
            }
            other => *state = other,
        }
        Ok(())
    }

    /// Roll back anything uncommitted and release the connection.
    ///
    /// Idempotent. Any later use fails with `Error::SessionClosed`.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, Conn::Idle) {
            Conn::Transaction(tx) => tx
                .rollback()
                .await
                .map_err(|e| Error::Database(format!("Failed to roll back on close: {}", e)))?,
            // Dropping returns it to the pool
            Conn::Connection(conn) => drop(conn),
            Conn::Idle => {}
        }

        trace!(session = %self.id, scope = %self.key, "Session closed");
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("created_at", &self.created_at)
            .field("future", &self.future)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
