//! Scope keys and scope-key resolution
//!
//! Every scoped session is selected by a [`ScopeKey`]. The key normally comes
//! from the host's notion of the current unit of work. Hosts clear that value
//! before running their teardown hooks, and run those hooks on a different
//! task, so teardown pins the key it was handed through a [`ScopeOverride`]
//! before resolving.
//!
//! Overrides live in a tokio task-local stack: concurrently running tasks never
//! observe each other's entries, and each `ScopeOverride` instance only sees
//! the entries it pushed itself.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::{Error, Result};

/// Identity used to decide whether two session accesses share one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScopeKey {
    /// No unit of work is active
    #[default]
    Detached,
    /// A specific unit of work
    Unit(Uuid),
}

impl ScopeKey {
    /// Create a key for a new, random unit of work
    pub fn new_unit() -> Self {
        Self::Unit(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self::Unit(uuid)
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, Self::Detached)
    }

    pub fn as_uuid(&self) -> Option<&Uuid> {
        match self {
            Self::Detached => None,
            Self::Unit(id) => Some(id),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detached => write!(f, "detached"),
            Self::Unit(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OverrideEntry {
    id: u64,
    owner: u64,
    key: ScopeKey,
}

tokio::task_local! {
    static OVERRIDES: RefCell<Vec<OverrideEntry>>;
}

static NEXT_OVERRIDE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Run `f` with an override stack available.
///
/// If the caller already runs inside one, `f` shares it; otherwise a fresh,
/// empty stack is created for the duration of `f`. Futures that run
/// concurrently on one task share that stack too; give each its own with
/// [`inherit_overrides`].
pub async fn with_override_scope<F>(f: F) -> F::Output
where
    F: Future,
{
    let already_scoped = OVERRIDES.try_with(|_| ()).is_ok();
    if already_scoped {
        f.await
    } else {
        OVERRIDES.scope(RefCell::new(Vec::new()), f).await
    }
}

/// Snapshot the caller's overrides into `f`, for futures that will be
/// spawned as child tasks. Later pushes on either side stay independent.
pub fn inherit_overrides<F>(f: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let snapshot = OVERRIDES
        .try_with(|stack| stack.borrow().clone())
        .unwrap_or_default();
    OVERRIDES.scope(RefCell::new(snapshot), f)
}

/// Receipt for a pushed override; hand it back to [`ScopeOverride::pop`].
#[derive(Debug)]
#[must_use = "an override stays installed until its token is popped"]
pub struct OverrideToken {
    id: u64,
    owner: u64,
    key: ScopeKey,
    prior: Option<ScopeKey>,
}

impl OverrideToken {
    /// The key this token installed
    pub fn key(&self) -> ScopeKey {
        self.key
    }

    /// The override visible before this token was pushed
    pub fn prior(&self) -> Option<ScopeKey> {
        self.prior
    }
}

fn release(token: &OverrideToken) {
    // Outside the scope the stack is already gone, nothing to restore.
    // Only the token's own entry goes: siblings pushed later stay installed.
    let _ = OVERRIDES.try_with(|stack| {
        let mut stack = stack.borrow_mut();
        if let Some(index) = stack.iter().rposition(|entry| entry.id == token.id) {
            stack.remove(index);
        }
    });
}

/// Pops its override when dropped, on every exit path.
#[must_use = "the override is popped as soon as the guard is dropped"]
#[derive(Debug)]
pub struct OverrideGuard {
    token: Option<OverrideToken>,
}

impl OverrideGuard {
    pub fn key(&self) -> Option<ScopeKey> {
        self.token.as_ref().map(OverrideToken::key)
    }

    /// Pop now instead of at end of scope
    pub fn release(mut self) {
        if let Some(token) = self.token.take() {
            release(&token);
        }
    }
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            release(&token);
        }
    }
}

/// A task-local override slot.
///
/// Clones share the same slot; separately constructed instances never see
/// each other's values. Popping removes only the popped entry.
#[derive(Debug, Clone)]
pub struct ScopeOverride {
    id: u64,
}

impl ScopeOverride {
    pub fn new() -> Self {
        Self {
            id: NEXT_OVERRIDE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The innermost value this slot holds on the current task, if any
    pub fn current(&self) -> Option<ScopeKey> {
        OVERRIDES
            .try_with(|stack| {
                stack
                    .borrow()
                    .iter()
                    .rev()
                    .find(|entry| entry.owner == self.id)
                    .map(|entry| entry.key)
            })
            .ok()
            .flatten()
    }

    /// Install `key` for the current task.
    ///
    /// # Errors
    /// - `Error::NoOverrideScope` when not running inside [`with_override_scope`]
    pub fn push(&self, key: ScopeKey) -> Result<OverrideToken> {
        OVERRIDES
            .try_with(|stack| {
                let mut stack = stack.borrow_mut();
                let prior = stack
                    .iter()
                    .rev()
                    .find(|entry| entry.owner == self.id)
                    .map(|entry| entry.key);
                let token = OverrideToken {
                    id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
                    owner: self.id,
                    key,
                    prior,
                };
                stack.push(OverrideEntry {
                    id: token.id,
                    owner: self.id,
                    key,
                });
                token
            })
            .map_err(|_| Error::NoOverrideScope)
    }

    /// Restore the value that was visible before `token` was pushed
    pub fn pop(&self, token: OverrideToken) {
        if token.owner != self.id {
            tracing::warn!(
                owner = token.owner,
                slot = self.id,
                "Ignoring override token popped on a foreign slot"
            );
            return;
        }
        release(&token);
    }

    /// Push `key` and return a guard that pops it when dropped
    pub fn push_scoped(&self, key: ScopeKey) -> Result<OverrideGuard> {
        let token = self.push(key)?;
        Ok(OverrideGuard { token: Some(token) })
    }
}

impl Default for ScopeOverride {
    fn default() -> Self {
        Self::new()
    }
}

/// Source of the "current unit of work" when no override is installed
pub type ScopeSource = Arc<dyn Fn() -> ScopeKey + Send + Sync>;

/// Resolves the scope key for session lookups: override first, then source.
#[derive(Clone)]
pub struct ScopeKeyResolver {
    source: ScopeSource,
    overrides: ScopeOverride,
}

impl ScopeKeyResolver {
    pub fn new<F>(source: F) -> Self
    where
        F: Fn() -> ScopeKey + Send + Sync + 'static,
    {
        Self::from_source(Arc::new(source))
    }

    pub fn from_source(source: ScopeSource) -> Self {
        Self {
            source,
            overrides: ScopeOverride::new(),
        }
    }

    /// A resolver whose fallback is always [`ScopeKey::Detached`]
    pub fn detached() -> Self {
        Self::new(|| ScopeKey::Detached)
    }

    /// Replace the fallback source, keeping the same override slot
    pub fn with_source<F>(mut self, source: F) -> Self
    where
        F: Fn() -> ScopeKey + Send + Sync + 'static,
    {
        self.source = Arc::new(source);
        self
    }

    /// Current key. Never suspends and has no side effects.
    pub fn resolve(&self) -> ScopeKey {
        self.overrides.current().unwrap_or_else(|| (self.source)())
    }

    pub fn overrides(&self) -> &ScopeOverride {
        &self.overrides
    }
}

impl fmt::Debug for ScopeKeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeKeyResolver")
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}
