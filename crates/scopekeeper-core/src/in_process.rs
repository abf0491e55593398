//! In-process reference host
//!
//! Runs startup and shutdown hooks on request and dispatches units of work the
//! way event-driven hosts do: the unit's key is visible through a task-local
//! only while the work itself runs, and unit-complete hooks run afterwards on
//! a separately spawned task where that task-local is no longer set.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, warn};

use crate::host::{Host, LifecycleHook, LogLevel, UnitCompleteHook};
use crate::scope::{ScopeKey, ScopeSource};
use crate::{Error, Result};

tokio::task_local! {
    static CURRENT_UNIT: ScopeKey;
}

/// The unit of work the calling task is dispatched for, or `Detached`
pub fn current_unit() -> ScopeKey {
    CURRENT_UNIT.try_with(|key| *key).unwrap_or_default()
}

#[derive(Default)]
struct Hooks {
    startup: Vec<LifecycleHook>,
    shutdown: Vec<LifecycleHook>,
    unit_complete: Vec<UnitCompleteHook>,
}

pub struct InProcessHost {
    log_level: LogLevel,
    hooks: RwLock<Hooks>,
}

impl InProcessHost {
    pub fn new(log_level: LogLevel) -> Self {
        Self {
            log_level,
            hooks: RwLock::new(Hooks::default()),
        }
    }

    /// Run startup hooks in registration order, stopping at the first failure
    pub async fn start(&self) -> Result<()> {
        let hooks = self.read_hooks(|hooks| hooks.startup.clone());
        debug!(hooks = hooks.len(), "Running startup hooks");

        for hook in hooks {
            hook().await?;
        }
        Ok(())
    }

    /// Run every shutdown hook and return the first failure
    pub async fn stop(&self) -> Result<()> {
        let hooks = self.read_hooks(|hooks| hooks.shutdown.clone());
        debug!(hooks = hooks.len(), "Running shutdown hooks");

        let mut first_error = None;
        for hook in hooks {
            if let Err(e) = hook().await {
                error!(error = %e, "Shutdown hook failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Run `work` as a new unit of work, then its unit-complete hooks
    pub async fn dispatch<F, T>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.dispatch_with_key(ScopeKey::new_unit(), work).await
    }

    /// Like [`dispatch`](Self::dispatch) with a caller-chosen key.
    ///
    /// A failure of the work itself wins over a teardown failure.
    pub async fn dispatch_with_key<F, T>(&self, key: ScopeKey, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = CURRENT_UNIT.scope(key, work).await;
        let teardown = self.complete_unit(key).await;

        match (outcome, teardown) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown_error)) => {
                warn!(unit = %key, error = %teardown_error, "Teardown failed after failed unit of work");
                Err(e)
            }
        }
    }

    /// Run the unit-complete hooks for `key` on their own task
    pub async fn complete_unit(&self, key: ScopeKey) -> Result<()> {
        let hooks = self.read_hooks(|hooks| hooks.unit_complete.clone());
        if hooks.is_empty() {
            return Ok(());
        }

        let handle = tokio::spawn(async move {
            let mut first_error = None;
            for hook in hooks {
                if let Err(e) = hook(key).await {
                    error!(unit = %key, error = %e, "Unit-complete hook failed");
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        });

        handle
            .await
            .map_err(|e| Error::Internal(format!("Teardown task failed: {}", e)))?
    }

    fn read_hooks<R>(&self, f: impl FnOnce(&Hooks) -> R) -> R {
        f(&self.hooks.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write_hooks(&self, f: impl FnOnce(&mut Hooks)) {
        f(&mut self.hooks.write().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Default for InProcessHost {
    fn default() -> Self {
        Self::new(LogLevel::default())
    }
}

impl Host for InProcessHost {
    fn log_level(&self) -> LogLevel {
        self.log_level
    }

    fn scope_source(&self) -> ScopeSource {
        Arc::new(current_unit)
    }

    fn on_startup(&self, hook: LifecycleHook) {
        self.write_hooks(|hooks| hooks.startup.push(hook));
    }

    fn on_shutdown(&self, hook: LifecycleHook) {
        self.write_hooks(|hooks| hooks.shutdown.push(hook));
    }

    fn on_unit_complete(&self, hook: UnitCompleteHook) {
        self.write_hooks(|hooks| hooks.unit_complete.push(hook));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::Mutex;

    fn lifecycle_hook<F>(f: F) -> LifecycleHook
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Arc::new(move || {
            let f = f.clone();
            async move { f() }.boxed()
        })
    }

    fn unit_hook<F>(f: F) -> UnitCompleteHook
    where
        F: Fn(ScopeKey) -> Result<()> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Arc::new(move |key: ScopeKey| {
            let f = f.clone();
            async move { f(key) }.boxed()
        })
    }

    #[test]
    fn test_current_unit_outside_dispatch() {
        assert_eq!(current_unit(), ScopeKey::Detached);
    }

    #[tokio::test]
    async fn test_start_runs_hooks_in_order_and_stops_on_failure() {
        let host = InProcessHost::new(LogLevel::Info);
        let calls = Arc::new(Mutex::new(Vec::new()));

        for (name, fail) in [("first", false), ("second", true), ("third", false)] {
            let calls = calls.clone();
            host.on_startup(lifecycle_hook(move || {
                calls.lock().unwrap().push(name);
                if fail {
                    Err(Error::Startup(name.to_string()))
                } else {
                    Ok(())
                }
            }));
        }

        assert!(matches!(host.start().await, Err(Error::Startup(_))));
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_stop_runs_every_hook() {
        let host = InProcessHost::default();
        let calls = Arc::new(Mutex::new(0));

        for fail in [true, false] {
            let calls = calls.clone();
            host.on_shutdown(lifecycle_hook(move || {
                *calls.lock().unwrap() += 1;
                if fail {
                    Err(Error::Internal("dispose".to_string()))
                } else {
                    Ok(())
                }
            }));
        }

        assert!(host.stop().await.is_err());
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_exposes_key_only_during_work() {
        let host = InProcessHost::default();
        let key = ScopeKey::new_unit();
        let seen_in_hook = Arc::new(Mutex::new(None));

        {
            let seen_in_hook = seen_in_hook.clone();
            host.on_unit_complete(unit_hook(move |completed| {
                *seen_in_hook.lock().unwrap() = Some((completed, current_unit()));
                Ok(())
            }));
        }

        let seen_in_work = host
            .dispatch_with_key(key, async { Ok(current_unit()) })
            .await
            .unwrap();

        assert_eq!(seen_in_work, key);
        assert_eq!(
            *seen_in_hook.lock().unwrap(),
            Some((key, ScopeKey::Detached))
        );
        assert_eq!(current_unit(), ScopeKey::Detached);
    }

    #[tokio::test]
    async fn test_scope_source_reads_current_unit() {
        let host = InProcessHost::default();
        let source = host.scope_source();
        let key = ScopeKey::new_unit();

        let seen = host
            .dispatch_with_key(key, async { Ok(source()) })
            .await
            .unwrap();
        assert_eq!(seen, key);
        assert_eq!(source(), ScopeKey::Detached);
    }

    #[tokio::test]
    async fn test_work_error_wins_over_teardown_error() {
        let host = InProcessHost::default();
        host.on_unit_complete(unit_hook(|_| Err(Error::Teardown("close".to_string()))));

        let work_failed: Result<()> = host
            .dispatch(async { Err(Error::Internal("work".to_string())) })
            .await;
        assert!(matches!(work_failed, Err(Error::Internal(_))));

        let teardown_failed = host.dispatch(async { Ok(()) }).await;
        assert!(matches!(teardown_failed, Err(Error::Teardown(_))));
    }

    #[tokio::test]
    async fn test_teardown_runs_even_when_work_fails() {
        let host = InProcessHost::default();
        let completed = Arc::new(Mutex::new(Vec::new()));
        {
            let completed = completed.clone();
            host.on_unit_complete(unit_hook(move |key| {
                completed.lock().unwrap().push(key);
                Ok(())
            }));
        }

        let key = ScopeKey::new_unit();
        let _ = host
            .dispatch_with_key::<_, ()>(key, async { Err(Error::NotReady) })
            .await;
        assert_eq!(*completed.lock().unwrap(), vec![key]);
    }
}
