//! Error types for Scopekeeper Core

use crate::callbacks::LifecycleEvent;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// An accessor was used before startup completed or after shutdown
    #[error("Data source is not ready")]
    NotReady,

    #[error("Data source has already been started")]
    AlreadyStarted,

    #[error("Data source has been disposed")]
    Disposed,

    /// Engine construction or schema creation failed during startup
    #[error("Startup failed: {0}")]
    Startup(String),

    /// Closing or evicting a scoped session failed
    #[error("Session teardown failed: {0}")]
    Teardown(String),

    #[error("{event} callback failed: {source}")]
    Callback {
        event: LifecycleEvent,
        #[source]
        source: Box<Error>,
    },

    // Database errors
    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Session is closed")]
    SessionClosed,

    // Scoping errors
    #[error("Scope override used outside of an override scope")]
    NoOverrideScope,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors a caller can recover from by waiting for startup
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Error::NotReady)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_error_display() {
        let err = Error::Callback {
            event: LifecycleEvent::Ready,
            source: Box::new(Error::Internal("boom".to_string())),
        };
        assert_eq!(err.to_string(), "ready callback failed: Internal error: boom");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_is_not_ready() {
        assert!(Error::NotReady.is_not_ready());
        assert!(!Error::Disposed.is_not_ready());
    }
}
