//! Scopekeeper Core Types and Traits
//!
//! This crate provides the pieces shared by every Scopekeeper data source:
//! - Scope keys, scope-key resolution and the task-local override slot
//! - Lifecycle callback lists for engine/ready/session-removal events
//! - The host framework trait and an in-process reference host
//! - Core error types

pub mod callbacks;
pub mod error;
pub mod host;
pub mod in_process;
pub mod scope;

pub use callbacks::{Callback, CallbackRegistry, Handler, Invocation, LifecycleEvent};
pub use error::{Error, Result};
pub use host::{Host, LifecycleHook, LogLevel, UnitCompleteHook};
pub use in_process::InProcessHost;
pub use scope::{ScopeKey, ScopeKeyResolver, ScopeOverride};
