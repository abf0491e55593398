//! Scoped session registry: at most one live session per scope key

use dashmap::DashMap;
use scopekeeper_core::{Error, Result, ScopeKey, ScopeKeyResolver};
use std::sync::Arc;
use tracing::{error, trace};

use crate::engine::Engine;
use crate::session::Session;

pub struct ScopedSessionFactory {
    engine: Engine,
    resolver: ScopeKeyResolver,
    sessions: DashMap<ScopeKey, Arc<Session>>,
}

impl ScopedSessionFactory {
    pub fn new(engine: Engine, resolver: ScopeKeyResolver) -> Self {
        Self {
            engine,
            resolver,
            sessions: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn resolver(&self) -> &ScopeKeyResolver {
        &self.resolver
    }

    /// Session for the resolver's current key
    pub fn current(&self) -> Arc<Session> {
        self.get(self.resolver.resolve())
    }

    /// Session for `key`, created on first access
    pub fn get(&self, key: ScopeKey) -> Arc<Session> {
        self.sessions
            .entry(key)
            .or_insert_with(|| {
                trace!(scope = %key, "Creating scoped session");
                Arc::new(Session::new(key, &self.engine))
            })
            .clone()
    }

    pub fn contains(&self, key: ScopeKey) -> bool {
        self.sessions.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Evict and close the session for `key`. Returns whether one existed.
    ///
    /// # Errors
    /// - `Error::Teardown` if closing failed; the session is evicted regardless
    pub async fn remove(&self, key: ScopeKey) -> Result<bool> {
        let Some((_, session)) = self.sessions.remove(&key) else {
            return Ok(false);
        };

        session
            .close()
            .await
            .map_err(|e| Error::Teardown(format!("Failed to close session for {}: {}", key, e)))?;

        trace!(scope = %key, session = %session.id(), "Scoped session removed");
        Ok(true)
    }

    /// Evict and close the session for the resolver's current key
    pub async fn remove_current(&self) -> Result<bool> {
        self.remove(self.resolver.resolve()).await
    }

    /// Close every outstanding session, returning the first failure
    pub async fn close_all(&self) -> Result<usize> {
        let keys: Vec<ScopeKey> = self.sessions.iter().map(|entry| *entry.key()).collect();

        let mut closed = 0;
        let mut first_error = None;
        for key in keys {
            match self.remove(key).await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(scope = %key, error = %e, "Failed to close session");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(closed),
        }
    }
}

impl std::fmt::Debug for ScopedSessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedSessionFactory")
            .field("engine", &self.engine)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
