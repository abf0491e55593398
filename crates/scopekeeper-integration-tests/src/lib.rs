//! End-to-end integration tests for Scopekeeper
//!
//! These tests attach a data source to the in-process host and drive full
//! start / unit-of-work / stop cycles against SQLite files.

#[cfg(test)]
mod e2e_tests {
    use scopekeeper_core::{InProcessHost, LogLevel};
    use scopekeeper_sqlx::{DataSource, DataSourceConfig, DataSourceState, TableDefinition};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_e2e_units_commit_through_host() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("e2e.db").display());

        let host = InProcessHost::new(LogLevel::Info);
        let db = DataSource::attach(&host, DataSourceConfig::new(url)).unwrap();
        db.schema()
            .register(TableDefinition::new(
                "events",
                "CREATE TABLE events (name TEXT NOT NULL)",
            ))
            .unwrap();

        host.start().await.unwrap();
        assert_eq!(db.state(), DataSourceState::Ready);

        for name in ["first", "second", "third"] {
            host.dispatch(async {
                let session = db.get_session()?;
                session
                    .execute(&format!("INSERT INTO events (name) VALUES ('{}')", name))
                    .await?;
                session.commit().await
            })
            .await
            .unwrap();
        }

        // Every unit's session was torn down by the host
        assert!(db.sessions().unwrap().is_empty());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(db.get_engine().unwrap().pool())
            .await
            .unwrap();
        assert_eq!(count, 3);

        host.stop().await.unwrap();
        assert_eq!(db.state(), DataSourceState::Disposed);
    }

    #[tokio::test]
    async fn test_e2e_uncommitted_work_is_discarded() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("e2e.db").display());

        let host = InProcessHost::default();
        let db = DataSource::attach(&host, DataSourceConfig::new(url)).unwrap();
        db.schema()
            .register(TableDefinition::new(
                "events",
                "CREATE TABLE events (name TEXT NOT NULL)",
            ))
            .unwrap();
        host.start().await.unwrap();

        host.dispatch(async {
            db.get_session()?
                .execute("INSERT INTO events (name) VALUES ('forgotten')")
                .await
                .map(|_| ())
        })
        .await
        .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(db.get_engine().unwrap().pool())
            .await
            .unwrap();
        assert_eq!(count, 0);

        host.stop().await.unwrap();
    }
}
