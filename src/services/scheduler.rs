//! In-process work scheduler with per-kind concurrency caps.
//!
//! Jobs are admitted FIFO within a kind (tokio semaphore queueing order)
//! and never preempted. A bounded pending count per kind provides
//! backpressure: submissions beyond the bound are rejected with
//! `QueueFull` instead of queueing unboundedly.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::domain::errors::{DomainResult, OrchestratorError};
use crate::domain::models::{ConcurrencyConfig, SchedulerConfig};

/// Kind of work being scheduled; each kind has its own cap and queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// One agent task's step loop.
    AgentRuntime,
    /// One tool invocation.
    ToolDispatch,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentRuntime => "agent_runtime",
            Self::ToolDispatch => "tool_dispatch",
        }
    }
}

struct KindState {
    semaphore: Arc<Semaphore>,
    /// Jobs submitted but not yet finished, for backpressure accounting.
    pending: Arc<AtomicUsize>,
}

/// Work queue with per-kind concurrency caps.
pub struct Scheduler {
    kinds: HashMap<JobKind, KindState>,
    queue_bound: usize,
}

impl Scheduler {
    pub fn new(concurrency: &ConcurrencyConfig, scheduler: &SchedulerConfig) -> Self {
        let mut kinds = HashMap::new();
        kinds.insert(
            JobKind::AgentRuntime,
            KindState {
                semaphore: Arc::new(Semaphore::new(concurrency.agent_workers.max(1))),
                pending: Arc::new(AtomicUsize::new(0)),
            },
        );
        kinds.insert(
            JobKind::ToolDispatch,
            KindState {
                semaphore: Arc::new(Semaphore::new(concurrency.tool_workers.max(1))),
                pending: Arc::new(AtomicUsize::new(0)),
            },
        );
        Self {
            kinds,
            queue_bound: scheduler.queue_bound.max(1),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&ConcurrencyConfig::default(), &SchedulerConfig::default())
    }

    /// Submit a job. The future starts only once a permit for its kind is
    /// available; admission within a kind is FIFO.
    pub fn submit<T, F>(&self, kind: JobKind, fut: F) -> DomainResult<JoinHandle<T>>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let state = self
            .kinds
            .get(&kind)
            .ok_or_else(|| OrchestratorError::Internal(format!("unknown job kind {}", kind.as_str())))?;

        let previous = state.pending.fetch_add(1, Ordering::SeqCst);
        if previous >= self.queue_bound {
            state.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(OrchestratorError::QueueFull(kind.as_str().to_string()));
        }

        let semaphore = Arc::clone(&state.semaphore);
        let pending = Arc::clone(&state.pending);
        Ok(tokio::spawn(async move {
            // The scheduler never closes its semaphores.
            let _permit = semaphore.acquire().await.expect("scheduler semaphore closed");
            let result = fut.await;
            pending.fetch_sub(1, Ordering::SeqCst);
            result
        }))
    }

    /// Jobs submitted and not yet finished for a kind.
    pub fn pending(&self, kind: JobKind) -> usize {
        self.kinds.get(&kind).map_or(0, |s| s.pending.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn scheduler(agent_workers: usize, queue_bound: usize) -> Scheduler {
        Scheduler::new(
            &ConcurrencyConfig {
                agent_workers,
                tool_workers: 4,
            },
            &SchedulerConfig { queue_bound },
        )
    }

    #[tokio::test]
    async fn test_jobs_run_to_completion() {
        let s = scheduler(2, 10);
        let handle = s.submit(JobKind::AgentRuntime, async { 7 }).unwrap();
        assert_eq!(handle.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_concurrency_cap_enforced() {
        let s = scheduler(1, 100);
        let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4u32 {
            let order = Arc::clone(&order);
            handles.push(
                s.submit(JobKind::AgentRuntime, async move {
                    order.lock().await.push(i);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                })
                .unwrap(),
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // With a single worker, jobs ran FIFO.
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_queue_bound_backpressure() {
        let s = scheduler(1, 2);

        // Occupy the worker so submissions stack up.
        let _h1 = s
            .submit(JobKind::AgentRuntime, async {
                tokio::time::sleep(Duration::from_millis(200)).await;
            })
            .unwrap();
        let _h2 = s
            .submit(JobKind::AgentRuntime, async {
                tokio::time::sleep(Duration::from_millis(200)).await;
            })
            .unwrap();

        let result = s.submit(JobKind::AgentRuntime, async {});
        assert!(matches!(result, Err(OrchestratorError::QueueFull(_))));
    }

    #[tokio::test]
    async fn test_kinds_are_independent() {
        let s = scheduler(1, 1);
        let _busy = s
            .submit(JobKind::AgentRuntime, async {
                tokio::time::sleep(Duration::from_millis(100)).await;
            })
            .unwrap();

        // Agent queue is full, tool queue is not.
        assert!(s.submit(JobKind::AgentRuntime, async {}).is_err());
        let handle = s.submit(JobKind::ToolDispatch, async { 1 }).unwrap();
        assert_eq!(handle.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pending_drains() {
        let s = scheduler(4, 10);
        let handle = s.submit(JobKind::ToolDispatch, async {}).unwrap();
        handle.await.unwrap();
        assert_eq!(s.pending(JobKind::ToolDispatch), 0);
    }
}
