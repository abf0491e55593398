//! Workload statistics for the demo run

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Counters for one run of the workload
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkloadStats {
    /// Units of work that finished, successfully or not
    pub units_completed: u64,
    /// Units whose work and teardown both succeeded
    pub units_succeeded: u64,
    pub units_failed: u64,
    /// Scoped sessions closed at the end of a unit of work
    pub sessions_removed: u64,
    /// Rows the data source reported after the run
    pub rows_persisted: i64,
    /// Total time spent inside units of work, teardown included
    #[serde(serialize_with = "serialize_millis")]
    pub unit_time: Duration,
    /// Wall-clock time of the whole run
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl WorkloadStats {
    /// Average time per completed unit of work
    pub fn avg_unit_time(&self) -> Duration {
        if self.units_completed == 0 {
            return Duration::ZERO;
        }
        let nanos = self.unit_time.as_nanos() / u128::from(self.units_completed);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

/// Thread-safe workload statistics tracker
#[derive(Clone, Default)]
pub struct WorkloadStatsTracker {
    stats: Arc<RwLock<WorkloadStats>>,
}

impl WorkloadStatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_unit(&self, duration: Duration, succeeded: bool) {
        self.update(|stats| {
            stats.units_completed += 1;
            if succeeded {
                stats.units_succeeded += 1;
            } else {
                stats.units_failed += 1;
            }
            stats.unit_time += duration;
        });
    }

    pub fn record_session_removed(&self) {
        self.update(|stats| stats.sessions_removed += 1);
    }

    pub fn finish(&self, rows_persisted: i64, elapsed: Duration) {
        self.update(|stats| {
            stats.rows_persisted = rows_persisted;
            stats.elapsed = elapsed;
        });
    }

    pub fn snapshot(&self) -> WorkloadStats {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut WorkloadStats)) {
        f(&mut self.stats.write().unwrap_or_else(PoisonError::into_inner));
    }

    /// Print statistics summary
    pub fn print_summary(&self) {
        let stats = self.snapshot();

        tracing::info!("═══════════════════════════════════════════════════════════");
        tracing::info!("              Workload Summary");
        tracing::info!("═══════════════════════════════════════════════════════════");
        tracing::info!("Units completed: {}", stats.units_completed);
        tracing::info!("  Succeeded: {}", stats.units_succeeded);
        tracing::info!("  Failed: {}", stats.units_failed);
        tracing::info!("Sessions removed: {}", stats.sessions_removed);
        tracing::info!("Rows persisted: {}", stats.rows_persisted);
        tracing::info!(
            "Avg time/unit: {:.2}ms",
            stats.avg_unit_time().as_secs_f64() * 1000.0
        );
        tracing::info!("Elapsed: {:.2}ms", stats.elapsed.as_secs_f64() * 1000.0);
        tracing::info!("═══════════════════════════════════════════════════════════");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_stats_default() {
        let stats = WorkloadStats::default();
        assert_eq!(stats.units_completed, 0);
        assert_eq!(stats.sessions_removed, 0);
        assert_eq!(stats.avg_unit_time(), Duration::ZERO);
    }

    #[test]
    fn test_record_units() {
        let tracker = WorkloadStatsTracker::new();
        tracker.record_unit(Duration::from_millis(10), true);
        tracker.record_unit(Duration::from_millis(30), false);
        tracker.record_session_removed();

        let stats = tracker.snapshot();
        assert_eq!(stats.units_completed, 2);
        assert_eq!(stats.units_succeeded, 1);
        assert_eq!(stats.units_failed, 1);
        assert_eq!(stats.sessions_removed, 1);
        assert_eq!(stats.avg_unit_time(), Duration::from_millis(20));
    }

    #[test]
    fn test_avg_unit_time_beyond_u32_units() {
        let units = u64::from(u32::MAX) + 1;
        let stats = WorkloadStats {
            units_completed: units,
            unit_time: Duration::from_secs(units * 2),
            ..Default::default()
        };
        assert_eq!(stats.avg_unit_time(), Duration::from_secs(2));
    }

    #[test]
    fn test_clones_share_counters() {
        let tracker = WorkloadStatsTracker::new();
        let clone = tracker.clone();
        clone.record_session_removed();
        assert_eq!(tracker.snapshot().sessions_removed, 1);
    }

    #[test]
    fn test_serialize_in_millis() {
        let tracker = WorkloadStatsTracker::new();
        tracker.record_unit(Duration::from_millis(5), true);
        tracker.finish(1, Duration::from_millis(250));

        let json = serde_json::to_value(tracker.snapshot()).unwrap();
        assert_eq!(json["rows_persisted"], 1);
        assert_eq!(json["elapsed"], 250.0);
        assert_eq!(json["unit_time"], 5.0);
    }
}
