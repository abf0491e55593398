//! Host framework abstraction
//!
//! A host owns the process lifecycle and the notion of "current unit of work".
//! Data sources only need four things from it: its log level, a way to read
//! the current unit, and places to hang startup, shutdown and unit-complete
//! hooks.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::scope::{ScopeKey, ScopeSource};
use crate::{Error, Result};

pub type HookFuture = BoxFuture<'static, Result<()>>;

/// Hook run once at process start or stop
pub type LifecycleHook = Arc<dyn Fn() -> HookFuture + Send + Sync>;

/// Hook run after each unit of work; receives the completed unit's key
pub type UnitCompleteHook = Arc<dyn Fn(ScopeKey) -> HookFuture + Send + Sync>;

/// Host log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// True for the most verbose tier (trace and debug)
    pub fn is_verbose(&self) -> bool {
        matches!(self, LogLevel::Trace | LogLevel::Debug)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(Error::Config(format!("Unknown log level '{}'", other))),
        }
    }
}

/// The host application framework a data source attaches to
pub trait Host: Send + Sync {
    /// Configured log verbosity
    fn log_level(&self) -> LogLevel;

    /// Accessor for the current unit of work, used as the default scope source
    fn scope_source(&self) -> ScopeSource;

    fn on_startup(&self, hook: LifecycleHook);

    fn on_shutdown(&self, hook: LifecycleHook);

    /// Called after every unit of work, successful or not, once the host has
    /// already left the unit's context
    fn on_unit_complete(&self, hook: UnitCompleteHook);
}
