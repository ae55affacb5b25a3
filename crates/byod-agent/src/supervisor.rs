//! Supervision of background tasks.
//!
//! Loops and one-shot jobs are spawned through [`TaskSupervisor`], which
//! tracks them for shutdown and keeps a per-name record of runs, failures,
//! retries and the last error.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use log::{debug, error, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Bookkeeping for every task spawned under one name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub name: String,
    pub runs: u64,
    pub failures: u64,
    pub retries: u64,
    pub last_error: Option<String>,
    pub last_started_at: Option<DateTime<Utc>>,
    /// Instances currently executing.
    pub running: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TaskSupervisor {
    token: CancellationToken,
    tracker: TaskTracker,
    records: Arc<DashMap<String, TaskRecord>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a long-lived loop. It is dropped at its next await once
    /// shutdown starts.
    pub fn spawn_loop<F>(&self, name: &str, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        debug!("Starting loop {}", name);
        self.spawn_tracked(name, fut);
    }

    /// Spawn fire-and-forget work. The caller never waits on it.
    pub fn spawn_once<F>(&self, name: &str, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.spawn_tracked(name, fut);
    }

    fn spawn_tracked<F>(&self, name: &str, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.started(name);

        let name = name.to_string();
        let token = self.token.clone();
        let records = Arc::clone(&self.records);
        self.tracker.spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => None,
                res = AssertUnwindSafe(fut).catch_unwind() => Some(res),
            };

            let mut record = records.entry(name.clone()).or_default();
            record.running = record.running.saturating_sub(1);
            match outcome {
                None => debug!("Task {} cancelled", name),
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    warn!("Task {} failed: {:#}", name, e);
                    record.failures += 1;
                    record.last_error = Some(format!("{e:#}"));
                }
                Some(Err(panic)) => {
                    let message = panic_message(panic.as_ref());
                    error!("Task {} panicked: {}", name, message);
                    record.failures += 1;
                    record.last_error = Some(format!("panicked: {message}"));
                }
            }
        });
    }

    fn started(&self, name: &str) {
        let mut record = self.records.entry(name.to_string()).or_default();
        record.name = name.to_string();
        record.runs += 1;
        record.running += 1;
        record.last_started_at = Some(Utc::now());
    }

    /// Note that the task `name` retried an operation internally.
    pub fn record_retry(&self, name: &str) {
        let mut record = self.records.entry(name.to_string()).or_default();
        record.name = name.to_string();
        record.retries += 1;
    }

    /// Snapshot of all task records, sorted by name.
    pub fn records(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn record(&self, name: &str) -> Option<TaskRecord> {
        self.records.get(name).map(|r| r.value().clone())
    }

    /// Cancel everything and wait up to `bound` for tasks to finish.
    ///
    /// Returns `false` if some task was still running when the bound elapsed.
    pub async fn shutdown(&self, bound: Duration) -> bool {
        self.token.cancel();
        self.tracker.close();
        match tokio::time::timeout(bound, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    "{} background task(s) still running after {:?}",
                    self.tracker.len(),
                    bound
                );
                false
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle(supervisor: &TaskSupervisor, name: &str) -> TaskRecord {
        for _ in 0..100 {
            if let Some(record) = supervisor.record(name)
                && record.running == 0
            {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {name} did not finish");
    }

    #[tokio::test]
    async fn test_records_success_and_failure() {
        let supervisor = TaskSupervisor::new();
        supervisor.spawn_once("sync", async { Ok(()) });
        let record = settle(&supervisor, "sync").await;
        assert_eq!(record.runs, 1);
        assert_eq!(record.failures, 0);
        assert!(record.last_started_at.is_some());

        supervisor.spawn_once("sync", async { Err(anyhow::anyhow!("remote down")) });
        let record = settle(&supervisor, "sync").await;
        assert_eq!(record.runs, 2);
        assert_eq!(record.failures, 1);
        assert_eq!(record.last_error.as_deref(), Some("remote down"));
    }

    #[tokio::test]
    async fn test_panic_is_recorded() {
        let supervisor = TaskSupervisor::new();
        let fail = true;
        supervisor.spawn_once("install", async move {
            if fail {
                panic!("boom");
            }
            Ok(())
        });
        let record = settle(&supervisor, "install").await;
        assert_eq!(record.failures, 1);
        assert_eq!(record.last_error.as_deref(), Some("panicked: boom"));
    }

    #[tokio::test]
    async fn test_retries_counted() {
        let supervisor = TaskSupervisor::new();
        supervisor.record_retry("tunnel-id");
        supervisor.record_retry("tunnel-id");
        assert_eq!(supervisor.record("tunnel-id").unwrap().retries, 2);
        assert_eq!(supervisor.records().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loops() {
        let supervisor = TaskSupervisor::new();
        supervisor.spawn_loop("discovery", async {
            let mut ticks = 0u64;
            while ticks < u64::MAX {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks += 1;
            }
            Ok(())
        });
        assert!(supervisor.shutdown(Duration::from_secs(2)).await);
        assert!(supervisor.is_shutting_down());
        assert_eq!(supervisor.record("discovery").unwrap().running, 0);
    }
}
