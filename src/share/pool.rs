//! Bounded execution pool for per-node tasks
//!
//! One pool brackets one lifecycle operation: create, dispatch N tasks, join
//! N, shut down. Tasks run on the tokio runtime and at most `workers` of them
//! hold a permit at any time. A failing task never cancels its siblings;
//! failures are collected and reported together once every task is done.

use crate::common::{Error, NodeFailure, Result};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, Id, JoinSet};

/// Largest pool a semaphore can back
pub const MAX_WORKERS: usize = Semaphore::MAX_PERMITS;

/// Handle to a dispatched task
#[derive(Debug)]
pub struct JobHandle {
    job_id: String,
    abort: AbortHandle,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    /// Cancel the task; `join` reports it as failed under its job id.
    pub fn abort(&self) {
        self.abort.abort();
    }
}

/// Result of one task
#[derive(Debug)]
pub struct JobOutcome<T> {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: Result<T>,
}

/// Everything `join` collected
#[derive(Debug)]
pub struct JoinReport<T> {
    pub outcomes: Vec<JobOutcome<T>>,
}

impl<T> JoinReport<T> {
    pub fn completed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    /// Successful values by job id, or every failure sorted by job id.
    pub fn into_result(self) -> Result<Vec<(String, T)>> {
        let total = self.outcomes.len();
        let mut values = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for outcome in self.outcomes {
            match outcome.result {
                Ok(value) => values.push((outcome.job_id, value)),
                Err(error) => failures.push(NodeFailure {
                    node: outcome.job_id,
                    error,
                }),
            }
        }

        if !failures.is_empty() {
            failures.sort_by(|a, b| a.node.cmp(&b.node));
            return Err(Error::NodeTasks { total, failures });
        }
        values.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(values)
    }
}

/// Bounded-concurrency task pool
pub struct ExecutionPool<T> {
    workers: usize,
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<JobOutcome<T>>,
    // job ids of tasks not yet joined, for cancelled tasks
    job_ids: HashMap<Id, String>,
    dispatched: usize,
    joined: usize,
}

impl<T: Send + 'static> ExecutionPool<T> {
    pub fn new(workers: usize) -> Self {
        let workers = workers.clamp(1, MAX_WORKERS);
        Self {
            workers,
            semaphore: Arc::new(Semaphore::new(workers)),
            tasks: JoinSet::new(),
            job_ids: HashMap::new(),
            dispatched: 0,
            joined: 0,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Tasks dispatched but not yet joined
    pub fn pending(&self) -> usize {
        self.dispatched - self.joined
    }

    pub fn is_shut_down(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Queue `task`; it starts once a worker permit is free.
    pub fn dispatch<F>(&mut self, job_id: impl Into<String>, task: F) -> Result<JobHandle>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(Error::Pool("pool is shut down".into()));
        }

        let job_id = job_id.into();
        let semaphore = self.semaphore.clone();
        let id = job_id.clone();
        let abort = self.tasks.spawn(async move {
            let permit = semaphore.acquire_owned().await;
            let started_at = Utc::now();
            let result = match permit {
                Ok(_permit) => match AssertUnwindSafe(task).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(Error::Internal(format!(
                        "task panicked: {}",
                        panic_message(panic.as_ref())
                    ))),
                },
                Err(_) => Err(Error::Pool("pool shut down before task started".into())),
            };
            JobOutcome {
                job_id: id,
                started_at,
                finished_at: Utc::now(),
                result,
            }
        });

        self.job_ids.insert(abort.id(), job_id.clone());
        self.dispatched += 1;
        tracing::debug!("Dispatched job {} ({} pending)", job_id, self.pending());
        Ok(JobHandle { job_id, abort })
    }

    /// Wait until exactly `expected` tasks have completed, successfully or not.
    pub async fn join(&mut self, expected: usize) -> Result<JoinReport<T>> {
        if expected > self.pending() {
            return Err(Error::Pool(format!(
                "cannot wait for {} task(s), only {} pending",
                expected,
                self.pending()
            )));
        }

        let mut outcomes = Vec::with_capacity(expected);
        while outcomes.len() < expected {
            let Some(joined) = self.tasks.join_next_with_id().await else {
                return Err(Error::Pool(format!(
                    "pool drained after {} of {} task(s)",
                    outcomes.len(),
                    expected
                )));
            };
            self.joined += 1;
            match joined {
                Ok((id, outcome)) => {
                    self.job_ids.remove(&id);
                    match &outcome.result {
                        Ok(_) => tracing::debug!("Job {} finished", outcome.job_id),
                        Err(e) => tracing::error!("Job {} failed: {}", outcome.job_id, e),
                    }
                    outcomes.push(outcome);
                }
                Err(e) => {
                    // panics are caught inside the task, so this is a cancellation
                    let job_id = self
                        .job_ids
                        .remove(&e.id())
                        .unwrap_or_else(|| format!("task-{}", e.id()));
                    tracing::error!("Job {} cancelled: {}", job_id, e);
                    let now = Utc::now();
                    outcomes.push(JobOutcome {
                        job_id,
                        started_at: now,
                        finished_at: now,
                        result: Err(Error::Pool(format!("task cancelled: {}", e))),
                    });
                }
            }
        }

        Ok(JoinReport { outcomes })
    }

    /// Stop accepting work and abort anything still running. Returns the
    /// number of tasks that had not been joined.
    pub async fn shutdown(&mut self) -> usize {
        self.semaphore.close();
        self.tasks.abort_all();
        let mut abandoned = 0;
        while self.tasks.join_next().await.is_some() {
            abandoned += 1;
        }
        self.job_ids.clear();
        self.joined = self.dispatched;
        tracing::debug!(
            "Execution pool shut down ({} worker(s), {} abandoned task(s))",
            self.workers,
            abandoned
        );
        abandoned
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_join_waits_for_all() {
        let mut pool = ExecutionPool::new(4);
        for i in 0..3 {
            pool.dispatch(format!("node00{}", i), async move {
                tokio::time::sleep(Duration::from_millis(10 * i)).await;
                Ok(i)
            })
            .unwrap();
        }
        let report = pool.join(3).await.unwrap();
        assert_eq!(report.completed(), 3);
        assert_eq!(report.failed(), 0);
        let values = report.into_result().unwrap();
        assert_eq!(values[0], ("node000".to_string(), 0));
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_failures_aggregated_and_sorted() {
        let mut pool: ExecutionPool<()> = ExecutionPool::new(2);
        let boom = Error::Other("boom".into());
        let bang = Error::Other("bang".into());
        pool.dispatch("node003", async move { Err(boom) }).unwrap();
        pool.dispatch("node001", async move { Err(bang) }).unwrap();
        pool.dispatch("node002", async { Ok(()) }).unwrap();

        let report = pool.join(3).await.unwrap();
        assert_eq!(report.completed(), 3);
        let err = report.into_result().unwrap_err();
        assert_eq!(err.failed_nodes(), vec!["node001", "node003"]);
        assert!(err.to_string().starts_with("2 of 3 node task(s) failed"));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pool = ExecutionPool::new(2);

        for i in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            pool.dispatch(format!("node{}", i), async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        pool.join(6).await.unwrap().into_result().unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_task_reported() {
        let mut pool: ExecutionPool<()> = ExecutionPool::new(1);
        pool.dispatch("node001", async {
            if true {
                panic!("disk on fire");
            }
            Ok(())
        })
        .unwrap();
        let err = pool.join(1).await.unwrap().into_result().unwrap_err();
        assert_eq!(err.failed_nodes(), vec!["node001"]);
        assert!(err.to_string().contains("disk on fire"));
    }

    #[tokio::test]
    async fn test_aborted_task_keeps_job_id() {
        let mut pool: ExecutionPool<()> = ExecutionPool::new(2);
        let handle = pool
            .dispatch("node002", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .unwrap();
        pool.dispatch("node001", async { Ok(()) }).unwrap();
        handle.abort();

        let report = pool.join(2).await.unwrap();
        assert_eq!(report.failed(), 1);
        let err = report.into_result().unwrap_err();
        assert_eq!(err.failed_nodes(), vec!["node002"]);
        assert!(err.to_string().contains("task cancelled"));
    }

    #[test]
    fn test_workers_clamped() {
        assert_eq!(ExecutionPool::<()>::new(0).workers(), 1);
        assert_eq!(ExecutionPool::<()>::new(usize::MAX).workers(), MAX_WORKERS);
    }

    #[tokio::test]
    async fn test_join_more_than_dispatched() {
        let mut pool: ExecutionPool<()> = ExecutionPool::new(1);
        pool.dispatch("node001", async { Ok(()) }).unwrap();
        assert!(matches!(pool.join(2).await, Err(Error::Pool(_))));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_and_rejects() {
        let mut pool: ExecutionPool<()> = ExecutionPool::new(1);
        let handle = pool
            .dispatch("node001", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .unwrap();
        assert_eq!(handle.job_id(), "node001");

        assert_eq!(pool.shutdown().await, 1);
        assert!(pool.is_shut_down());
        assert!(handle.is_finished());
        assert_eq!(pool.pending(), 0);
        assert!(pool.dispatch("node002", async { Ok(()) }).is_err());
    }
}
