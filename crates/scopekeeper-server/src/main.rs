//! Scopekeeper demo server
//!
//! Attaches a data source to an in-process host and drives a small workload
//! through it:
//! - host startup connects the pool and creates the `visits` table
//! - every unit of work records one visit through its own scoped session
//! - the host tears each unit's session down after the unit completes
//! - host shutdown disposes the pool and a summary is printed
//!
//! Usage:
//! ```bash
//! # With config file
//! scopekeeper-server --config config.yaml
//!
//! # Or with environment variables
//! SCOPEKEEPER_DATABASE_URL="sqlite://visits.db?mode=rwc" scopekeeper-server
//!
//! # CLI flags override both
//! scopekeeper-server --config config.yaml --units 100 --concurrency 8 --json
//! ```

mod config;
mod stats;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use config::ServerConfig;
use futures::StreamExt;
use scopekeeper_core::in_process::current_unit;
use scopekeeper_core::{InProcessHost, LogLevel};
use scopekeeper_sqlx::{DataSource, Dialect, TableDefinition};
use serde::Serialize;
use stats::{WorkloadStats, WorkloadStatsTracker};
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Scopekeeper - unit-of-work scoped database sessions
#[derive(Parser)]
#[command(name = "scopekeeper-server")]
#[command(about = "Run a demo workload through a lifecycle-bound data source", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "SCOPEKEEPER_CONFIG")]
    config: Option<String>,

    /// Database URL, e.g. sqlite://visits.db?mode=rwc
    #[arg(long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Number of units of work to run
    #[arg(long)]
    units: Option<usize>,

    /// Units of work in flight at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Summary<'a> {
    dialect: &'a Dialect,
    #[serde(flatten)]
    stats: WorkloadStats,
}

fn visits_table() -> TableDefinition {
    TableDefinition::new(
        "visits",
        "CREATE TABLE visits (
            unit VARCHAR(64) NOT NULL,
            seq BIGINT NOT NULL,
            visited_at VARCHAR(64) NOT NULL
        )",
    )
    .with_index("CREATE INDEX idx_visits_unit ON visits (unit)")
}

fn insert_visit_sql(dialect: &Dialect) -> &'static str {
    if dialect.is_postgres() {
        "INSERT INTO visits (unit, seq, visited_at) VALUES ($1, $2, $3)"
    } else {
        "INSERT INTO visits (unit, seq, visited_at) VALUES (?, ?, ?)"
    }
}

fn init_tracing(config: &ServerConfig) -> anyhow::Result<()> {
    // Build EnvFilter with base level
    let mut filter = EnvFilter::new(config.logging.level.as_str());

    // By default, set sqlx to WARN to suppress query logs
    // Only let sqlx through if log_sql_queries is true
    if !config.logging.log_sql_queries {
        match "sqlx=warn".parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => warn!("Failed to set sqlx log filter: {}", e),
        }
    }

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Dispatch one unit of work that records a visit and commits it
async fn run_unit(
    host: &InProcessHost,
    db: &DataSource,
    seq: usize,
    stats: &WorkloadStatsTracker,
) {
    let started = Instant::now();

    let outcome = host
        .dispatch(async {
            let session = db.get_session()?;
            {
                let mut conn = session.connection().await?;
                sqlx::query(insert_visit_sql(db.dialect()))
                    .bind(current_unit().to_string())
                    .bind(seq as i64)
                    .bind(Utc::now().to_rfc3339())
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        scopekeeper_core::Error::Database(format!("Failed to record visit: {}", e))
                    })?;
            }
            session.commit().await
        })
        .await;

    if let Err(e) = &outcome {
        warn!(seq, error = %e, "Unit of work failed");
    }
    stats.record_unit(started.elapsed(), outcome.is_ok());
}

async fn count_visits(db: &DataSource) -> anyhow::Result<i64> {
    let engine = db.get_engine()?;
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM visits")
        .fetch_one(engine.pool())
        .await?;
    Ok(count)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => ServerConfig::default(),
    };

    // Merge environment variables (they override config file)
    config.merge_env();

    // Apply CLI overrides (highest precedence)
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(units) = cli.units {
        config.workload.units = units;
    }
    if let Some(concurrency) = cli.concurrency {
        config.workload.concurrency = concurrency;
    }

    init_tracing(&config)?;

    match &cli.config {
        Some(path) => info!("📁 Loaded configuration from: {}", path),
        None => info!("📁 Using default configuration"),
    }

    let host = InProcessHost::new(config.logging.level);
    let db = DataSource::attach(&host, config.database.clone())?;
    db.schema().register(visits_table())?;

    let stats = WorkloadStatsTracker::new();
    {
        let stats = stats.clone();
        db.on_after_session_removed(move || {
            stats.record_session_removed();
            Ok(())
        });
    }
    db.on_engine_created(|engine| {
        debug!(connections = engine.size(), "Engine created");
        Ok(())
    });
    {
        let dialect = db.dialect().clone();
        db.on_ready(move || {
            info!("✅ Data source ready ({})", dialect);
            Ok(())
        });
    }

    info!("🚀 Starting host");
    host.start().await.context("Host startup failed")?;

    let run_started = Instant::now();
    let concurrency = config.workload.concurrency.max(1);
    info!(
        "Running {} units of work, {} at a time",
        config.workload.units, concurrency
    );

    {
        let host = &host;
        let db: &DataSource = &db;
        let stats = &stats;
        futures::stream::iter(0..config.workload.units)
            .map(|seq| run_unit(host, db, seq, stats))
            .buffer_unordered(concurrency)
            .collect::<Vec<()>>()
            .await;
    }

    let rows = count_visits(&db).await?;
    stats.finish(rows, run_started.elapsed());

    info!("🛑 Stopping host");
    host.stop().await.context("Host shutdown failed")?;

    if cli.json {
        let summary = Summary {
            dialect: db.dialect(),
            stats: stats.snapshot(),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        stats.print_summary();
    }

    Ok(())
}
