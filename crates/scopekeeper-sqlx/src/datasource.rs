//! Data source: binds engine and scoped sessions to a host's lifecycle
//!
//! ```text
//! Uninitialized --startup--> Ready --shutdown--> Disposed
//! ```
//!
//! Startup connects the engine, creates missing tables and starts handing out
//! scoped sessions. Each unit of work gets its own session, closed when the
//! host reports the unit complete. Shutdown closes whatever is left and
//! disposes the engine. A disposed data source cannot be restarted.

use futures::FutureExt;
use scopekeeper_core::callbacks::{async_handler, sync_handler};
use scopekeeper_core::scope::{ScopeSource, inherit_overrides};
use scopekeeper_core::{
    Callback, CallbackRegistry, Error, Host, LogLevel, Result, ScopeKey, ScopeKeyResolver,
};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, trace};

use crate::config::{DataSourceConfig, ResolvedEngineOptions};
use crate::dialect::Dialect;
use crate::engine::Engine;
use crate::schema::SchemaRegistry;
use crate::scoped::ScopedSessionFactory;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceState {
    Uninitialized,
    Ready,
    Disposed,
}

impl fmt::Display for DataSourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataSourceState::Uninitialized => "uninitialized",
            DataSourceState::Ready => "ready",
            DataSourceState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

#[derive(Clone)]
struct Live {
    engine: Engine,
    sessions: Arc<ScopedSessionFactory>,
}

enum Lifecycle {
    Uninitialized,
    Ready(Live),
    Disposed,
}

pub struct DataSource {
    url: String,
    dialect: Dialect,
    options: ResolvedEngineOptions,
    schema: Arc<SchemaRegistry>,
    resolver: ScopeKeyResolver,
    callbacks: CallbackRegistry<Engine>,
    state: RwLock<Lifecycle>,
    // Serializes startup and shutdown
    transition: tokio::sync::Mutex<()>,
}

pub struct DataSourceBuilder {
    config: DataSourceConfig,
    log_level: Option<LogLevel>,
    scope_source: Option<ScopeSource>,
    schema: Option<Arc<SchemaRegistry>>,
}

impl DataSourceBuilder {
    /// Log level used to default `echo`; the host's when attaching
    pub fn log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = Some(log_level);
        self
    }

    /// Where the current unit of work comes from; the host's when attaching
    pub fn scope_source<F>(mut self, source: F) -> Self
    where
        F: Fn() -> ScopeKey + Send + Sync + 'static,
    {
        self.scope_source = Some(Arc::new(source));
        self
    }

    /// Share a table registry, e.g. between data sources on one database
    pub fn schema(mut self, schema: Arc<SchemaRegistry>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Build a data source that is started and stopped by hand
    ///
    /// # Errors
    /// - `Error::InvalidUrl` if the configured URL has no valid scheme
    pub fn build(self) -> Result<DataSource> {
        let dialect = Dialect::parse(&self.config.url)?;
        let log_level = self.log_level.unwrap_or_default();
        let options = self.config.engine.resolve(log_level);
        let resolver = match self.scope_source {
            Some(source) => ScopeKeyResolver::from_source(source),
            None => ScopeKeyResolver::detached(),
        };

        debug!(
            dialect = %dialect,
            echo = options.echo,
            future = options.future,
            "Configured data source"
        );

        Ok(DataSource {
            url: self.config.url,
            dialect,
            options,
            schema: self.schema.unwrap_or_default(),
            resolver,
            callbacks: CallbackRegistry::new(),
            state: RwLock::new(Lifecycle::Uninitialized),
            transition: tokio::sync::Mutex::new(()),
        })
    }

    /// Build a data source driven by `host`'s lifecycle
    pub fn attach<H: Host + ?Sized>(mut self, host: &H) -> Result<Arc<DataSource>> {
        self.log_level.get_or_insert_with(|| host.log_level());
        if self.scope_source.is_none() {
            self.scope_source = Some(host.scope_source());
        }

        let source = Arc::new(self.build()?);
        source.install(host);
        Ok(source)
    }
}

impl DataSource {
    pub fn builder(config: DataSourceConfig) -> DataSourceBuilder {
        DataSourceBuilder {
            config,
            log_level: None,
            scope_source: None,
            schema: None,
        }
    }

    /// Create a data source and register its startup, shutdown and
    /// unit-complete hooks with `host`
    pub fn attach<H: Host + ?Sized>(host: &H, config: DataSourceConfig) -> Result<Arc<Self>> {
        Self::builder(config).attach(host)
    }

    fn install<H: Host + ?Sized>(self: &Arc<Self>, host: &H) {
        let this = self.clone();
        host.on_startup(Arc::new(move || {
            let this = this.clone();
            async move { this.startup().await }.boxed()
        }));

        let this = self.clone();
        host.on_shutdown(Arc::new(move || {
            let this = this.clone();
            async move { this.shutdown().await }.boxed()
        }));

        let this = self.clone();
        host.on_unit_complete(Arc::new(move |key: ScopeKey| {
            let this = this.clone();
            async move { this.teardown_unit_of_work(key).await }.boxed()
        }));
    }

    /// Connect the engine, create missing tables and start serving sessions.
    ///
    /// # Errors
    /// - `Error::Startup` if the engine, an `engine_created` handler or schema
    ///   creation failed; the data source stays uninitialized
    /// - `Error::Callback` if a `ready` handler failed; the data source is ready
    /// - `Error::AlreadyStarted` / `Error::Disposed` when not uninitialized
    pub async fn startup(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        match self.state() {
            DataSourceState::Uninitialized => {}
            DataSourceState::Ready => return Err(Error::AlreadyStarted),
            DataSourceState::Disposed => return Err(Error::Disposed),
        }

        info!(dialect = %self.dialect, "Starting data source");

        let engine = Engine::connect(&self.url, &self.options)
            .await
            .map_err(|e| Error::Startup(format!("Failed to create engine: {}", e)))?;

        if let Err(e) = self.prepare(&engine).await {
            error!(error = %e, "Data source startup failed");
            engine.dispose().await;
            return Err(Error::Startup(e.to_string()));
        }

        let sessions = Arc::new(ScopedSessionFactory::new(
            engine.clone(),
            self.resolver.clone(),
        ));
        *self.write_state() = Lifecycle::Ready(Live { engine, sessions });
        info!(dialect = %self.dialect, "Data source initialized");

        self.callbacks.fire_ready().await
    }

    async fn prepare(&self, engine: &Engine) -> Result<()> {
        self.callbacks.fire_engine_created(engine.clone()).await?;
        let created = self.schema.create_all(engine).await?;
        debug!(tables = self.schema.len(), created, "Schema ensured");
        Ok(())
    }

    /// Close the session of the unit of work identified by `key`.
    ///
    /// `key` is pinned as the resolver's override while the session is looked
    /// up, so this works from any task. Does nothing if the unit never used a
    /// session, if it was already torn down or if the data source is not ready.
    /// Each call pins its key on a private copy of the caller's overrides, so
    /// teardowns joined on one task never see each other's keys.
    pub async fn teardown_unit_of_work(&self, key: ScopeKey) -> Result<()> {
        let Some(live) = self.live() else {
            trace!(scope = %key, "Data source not ready, skipping teardown");
            return Ok(());
        };

        inherit_overrides(self.remove_scoped(&live, key)).await
    }

    async fn remove_scoped(&self, live: &Live, key: ScopeKey) -> Result<()> {
        let _pinned = self.resolver.overrides().push_scoped(key)?;
        let scope = self.resolver.resolve();

        if !live.sessions.contains(scope) {
            trace!(scope = %scope, "No session to remove");
            return Ok(());
        }

        let before = self.callbacks.fire_before_session_removed().await;
        let removed = live.sessions.remove(scope).await;
        let after = match removed {
            Ok(true) => self.callbacks.fire_after_session_removed().await,
            _ => Ok(()),
        };

        trace!(scope = %scope, "Session removed");
        before.and(removed.map(|_| ())).and(after)
    }

    /// Close outstanding sessions and dispose the engine. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        let previous = std::mem::replace(&mut *self.write_state(), Lifecycle::Disposed);

        match previous {
            Lifecycle::Ready(live) => {
                let closed = live.sessions.close_all().await;
                live.engine.dispose().await;
                info!(dialect = %self.dialect, "Data source disposed");
                closed.map(|count| debug!(sessions = count, "Closed outstanding sessions"))
            }
            Lifecycle::Uninitialized => {
                debug!("Data source disposed before startup");
                Ok(())
            }
            Lifecycle::Disposed => Ok(()),
        }
    }

    /// The session for the current unit of work, created on first access
    ///
    /// # Errors
    /// - `Error::NotReady` unless the data source is ready
    pub fn get_session(&self) -> Result<Arc<Session>> {
        Ok(self.sessions()?.current())
    }

    /// # Errors
    /// - `Error::NotReady` unless the data source is ready
    pub fn get_engine(&self) -> Result<Engine> {
        self.live().map(|live| live.engine).ok_or(Error::NotReady)
    }

    /// # Errors
    /// - `Error::NotReady` unless the data source is ready
    pub fn sessions(&self) -> Result<Arc<ScopedSessionFactory>> {
        self.live().map(|live| live.sessions).ok_or(Error::NotReady)
    }

    pub fn register_callback(&self, callback: Callback<Engine>) {
        self.callbacks.register(callback);
    }

    pub fn on_engine_created<F>(&self, f: F)
    where
        F: Fn(Engine) -> Result<()> + Send + Sync + 'static,
    {
        self.register_callback(Callback::EngineCreated(sync_handler(f)));
    }

    pub fn on_engine_created_async<F, Fut>(&self, f: F)
    where
        F: Fn(Engine) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register_callback(Callback::EngineCreated(async_handler(f)));
    }

    pub fn on_ready<F>(&self, f: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.register_callback(Callback::Ready(sync_handler(move |()| f())));
    }

    pub fn on_ready_async<F, Fut>(&self, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register_callback(Callback::Ready(async_handler(move |()| f())));
    }

    pub fn on_before_session_removed<F>(&self, f: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.register_callback(Callback::BeforeSessionRemoved(sync_handler(move |()| f())));
    }

    pub fn on_before_session_removed_async<F, Fut>(&self, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register_callback(Callback::BeforeSessionRemoved(async_handler(move |()| f())));
    }

    pub fn on_after_session_removed<F>(&self, f: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.register_callback(Callback::AfterSessionRemoved(sync_handler(move |()| f())));
    }

    pub fn on_after_session_removed_async<F, Fut>(&self, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register_callback(Callback::AfterSessionRemoved(async_handler(move |()| f())));
    }

    pub fn state(&self) -> DataSourceState {
        match &*self.read_state() {
            Lifecycle::Uninitialized => DataSourceState::Uninitialized,
            Lifecycle::Ready(_) => DataSourceState::Ready,
            Lifecycle::Disposed => DataSourceState::Disposed,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == DataSourceState::Ready
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Dialect parsed from the URL, available without a live engine
    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn options(&self) -> &ResolvedEngineOptions {
        &self.options
    }

    /// Tables created at startup; register before starting
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn resolver(&self) -> &ScopeKeyResolver {
        &self.resolver
    }

    fn live(&self) -> Option<Live> {
        match &*self.read_state() {
            Lifecycle::Ready(live) => Some(live.clone()),
            _ => None,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Lifecycle> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Lifecycle> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("dialect", &self.dialect)
            .field("state", &self.state())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
