//! Execution metrics
//!
//! Aggregate counters plus a bounded rolling history of recent executions,
//! persisted per workspace. The history keeps the last 100 records; the
//! counters and running average cover everything ever recorded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ExecutionMode, Severity};
use crate::storage::{self, StorageError};

/// Maximum entries retained in the rolling history.
const HISTORY_LIMIT: usize = 100;

const METRICS_FILE: &str = "metrics.json";

/// Metrics errors. A failed persist rolls the in-memory counters back.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One finished execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub mode: ExecutionMode,
    /// Backend name when the command ran sandboxed.
    pub runtime: Option<String>,
    pub risk_level: Severity,
    pub cached: bool,
    pub duration_ms: u64,
    pub exit_code: i32,
}

/// Aggregate execution counters and rolling history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total: u64,
    pub host_count: u64,
    pub sandbox_count: u64,
    pub cached_count: u64,
    pub average_duration_ms: f64,
    pub by_risk_level: HashMap<String, u64>,
    pub by_runtime: HashMap<String, u64>,
    pub history: Vec<ExecutionRecord>,
    pub last_updated: DateTime<Utc>,
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self {
            total: 0,
            host_count: 0,
            sandbox_count: 0,
            cached_count: 0,
            average_duration_ms: 0.0,
            by_risk_level: HashMap::new(),
            by_runtime: HashMap::new(),
            history: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

impl ExecutionMetrics {
    fn apply(&mut self, record: ExecutionRecord) {
        // Running average over all executions, not just the history window.
        let previous_total = self.total as f64;
        self.average_duration_ms = (self.average_duration_ms * previous_total
            + record.duration_ms as f64)
            / (previous_total + 1.0);

        self.total += 1;
        match record.mode {
            ExecutionMode::Host => self.host_count += 1,
            ExecutionMode::Sandbox => self.sandbox_count += 1,
        }
        if record.cached {
            self.cached_count += 1;
        }

        *self
            .by_risk_level
            .entry(record.risk_level.to_string())
            .or_insert(0) += 1;
        if let Some(runtime) = &record.runtime {
            *self.by_runtime.entry(runtime.clone()).or_insert(0) += 1;
        }

        self.history.push(record);
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
        self.last_updated = Utc::now();
    }
}

/// Persists metrics for one workspace.
pub struct MetricsCollector {
    path: PathBuf,
    metrics: ExecutionMetrics,
}

impl MetricsCollector {
    /// Open (or initialize) the workspace's metrics file.
    pub fn open(workspace: &Path) -> Result<Self, MetricsError> {
        let path = storage::state_dir(workspace)?.join(METRICS_FILE);
        let metrics = storage::load_json(&path)?.unwrap_or_default();
        Ok(Self { path, metrics })
    }

    pub fn metrics(&self) -> &ExecutionMetrics {
        &self.metrics
    }

    /// Fold one record into the counters and persist.
    pub fn record(&mut self, record: ExecutionRecord) -> Result<(), MetricsError> {
        let previous = self.metrics.clone();
        self.metrics.apply(record);

        if let Err(err) = storage::save_json(&self.path, &self.metrics) {
            self.metrics = previous;
            return Err(err.into());
        }
        Ok(())
    }

    /// Drop all recorded metrics.
    pub fn reset(&mut self) -> Result<(), MetricsError> {
        let previous = std::mem::take(&mut self.metrics);
        if let Err(err) = storage::save_json(&self.path, &self.metrics) {
            self.metrics = previous;
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(mode: ExecutionMode, duration_ms: u64) -> ExecutionRecord {
        ExecutionRecord {
            timestamp: Utc::now(),
            command: "make".to_string(),
            mode,
            runtime: (mode == ExecutionMode::Sandbox).then(|| "bubblewrap".to_string()),
            risk_level: Severity::Low,
            cached: false,
            duration_ms,
            exit_code: 0,
        }
    }

    #[test]
    fn counters_split_host_and_sandbox() {
        let dir = TempDir::new().unwrap();
        let mut collector = MetricsCollector::open(dir.path()).unwrap();

        collector.record(record(ExecutionMode::Host, 10)).unwrap();
        collector.record(record(ExecutionMode::Sandbox, 20)).unwrap();
        collector.record(record(ExecutionMode::Sandbox, 30)).unwrap();

        let metrics = collector.metrics();
        assert_eq!(metrics.total, 3);
        assert_eq!(metrics.host_count, 1);
        assert_eq!(metrics.sandbox_count, 2);
        assert_eq!(metrics.by_runtime.get("bubblewrap"), Some(&2));
    }

    #[test]
    fn average_duration_is_running_mean() {
        let dir = TempDir::new().unwrap();
        let mut collector = MetricsCollector::open(dir.path()).unwrap();

        collector.record(record(ExecutionMode::Host, 100)).unwrap();
        collector.record(record(ExecutionMode::Host, 200)).unwrap();

        assert!((collector.metrics().average_duration_ms - 150.0).abs() < f64::EPSILON);
    }

    #[test]
    fn history_is_bounded() {
        let dir = TempDir::new().unwrap();
        let mut collector = MetricsCollector::open(dir.path()).unwrap();

        for i in 0..150 {
            collector.record(record(ExecutionMode::Host, i)).unwrap();
        }

        let metrics = collector.metrics();
        assert_eq!(metrics.history.len(), 100);
        assert_eq!(metrics.total, 150);
        // Oldest entries were trimmed.
        assert_eq!(metrics.history.first().map(|r| r.duration_ms), Some(50));
    }

    #[test]
    fn metrics_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut collector = MetricsCollector::open(dir.path()).unwrap();
            collector.record(record(ExecutionMode::Sandbox, 5)).unwrap();
        }
        let collector = MetricsCollector::open(dir.path()).unwrap();
        assert_eq!(collector.metrics().total, 1);
    }

    #[test]
    fn reset_clears_everything() {
        let dir = TempDir::new().unwrap();
        let mut collector = MetricsCollector::open(dir.path()).unwrap();
        collector.record(record(ExecutionMode::Host, 10)).unwrap();
        collector.reset().unwrap();

        assert_eq!(collector.metrics().total, 0);
        assert!(collector.metrics().history.is_empty());
    }
}
