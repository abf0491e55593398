//! Common test utilities for integration tests

use scopekeeper_core::{InProcessHost, LogLevel};
use scopekeeper_sqlx::{DataSource, DataSourceConfig, TableDefinition};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// A SQLite database file that lives as long as this value
#[allow(dead_code)]
pub struct TestDatabase {
    _dir: TempDir,
    pub url: String,
}

#[allow(dead_code)]
impl TestDatabase {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        Self { _dir: dir, url }
    }

    pub fn config(&self) -> DataSourceConfig {
        DataSourceConfig::new(self.url.clone())
    }

    /// Host plus a data source attached to it, with a `notes` table registered
    pub fn attach(&self) -> (InProcessHost, Arc<DataSource>) {
        let host = InProcessHost::new(LogLevel::Info);
        let db = DataSource::attach(&host, self.config()).expect("Failed to attach data source");
        db.schema()
            .register(notes_table())
            .expect("Failed to register table");
        (host, db)
    }
}

#[allow(dead_code)]
pub fn notes_table() -> TableDefinition {
    TableDefinition::new(
        "notes",
        "CREATE TABLE notes (unit TEXT NOT NULL, body TEXT NOT NULL)",
    )
}

/// Shared, ordered log of what callbacks observed
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == event)
            .count()
    }
}

/// Route test logs through the test harness; safe to call repeatedly
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("scopekeeper=debug,sqlx=warn")
        .try_init();
}
