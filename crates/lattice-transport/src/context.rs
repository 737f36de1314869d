//! Serial execution contexts.
//!
//! An [`ExecutionContext`] is the logical owning thread of a server or
//! connection: a named serial job queue driven by a single tokio task. Jobs
//! submitted to one context run in submission order, one at a time, with the
//! context installed as the task-local current context for their duration.
//!
//! Public transport operations must be invoked while a context is current;
//! they fail with [`TransportError::ContextViolation`] otherwise. Raw I/O
//! tasks carry no context and re-enter the captured one via
//! [`execute`](ExecutionContext::execute) before touching shared state, which
//! is what makes every visible state transition of a given server or
//! connection totally ordered without explicit locking.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::error::{Result, TransportError};

type Job = Box<dyn FnOnce() + Send + 'static>;

tokio::task_local! {
    static CURRENT: ExecutionContext;
}

struct ContextInner {
    name: String,
    jobs: mpsc::UnboundedSender<Job>,
}

/// A named serial job queue. Cheap to clone; all clones share the queue.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    /// Creates a context and spawns its driver task. The driver exits once
    /// every handle has been dropped and the queue has drained.
    pub fn new(name: impl Into<String>) -> Self {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        let inner = Arc::new(ContextInner {
            name: name.into(),
            jobs,
        });
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(job) = queue.recv().await {
                match weak.upgrade() {
                    Some(inner) => CURRENT.sync_scope(ExecutionContext { inner }, job),
                    None => break,
                }
            }
        });
        Self { inner }
    }

    /// Returns the context current on the calling task, if any.
    pub fn current() -> Option<ExecutionContext> {
        CURRENT.try_with(|context| context.clone()).ok()
    }

    /// Returns the current context, or fails with `ContextViolation`.
    ///
    /// This is the guard every state-mutating transport operation calls
    /// before producing any observable effect.
    pub fn require_current(operation: &str) -> Result<ExecutionContext> {
        Self::current().ok_or_else(|| TransportError::ContextViolation {
            operation: operation.to_string(),
        })
    }

    /// Name of this context, used in logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Enqueues a job to run on this context, after all previously enqueued
    /// jobs. Jobs submitted to a terminated context are dropped.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if self.inner.jobs.send(Box::new(job)).is_err() {
            trace!(context = %self.inner.name, "job submitted to terminated context");
        }
    }

    /// Enqueues a job and returns a future resolving to its result.
    pub fn submit<F, T>(&self, job: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (done, result) = oneshot::channel();
        self.execute(move || {
            let _ = done.send(job());
        });
        async move { result.await.map_err(|_| TransportError::ContextTerminated) }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.inner.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn no_context_outside_jobs() {
        assert!(ExecutionContext::current().is_none());
        let err = ExecutionContext::require_current("test op").unwrap_err();
        assert!(matches!(
            err,
            TransportError::ContextViolation { operation } if operation == "test op"
        ));
    }

    #[tokio::test]
    async fn jobs_see_their_context() {
        let context = ExecutionContext::new("ctx-a");
        let name = context
            .submit(|| ExecutionContext::current().map(|c| c.name().to_string()))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("ctx-a"));
    }

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let context = ExecutionContext::new("ordered");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let seen = seen.clone();
            context.execute(move || seen.lock().unwrap().push(i));
        }
        context.submit(|| ()).await.unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn submit_returns_job_result() {
        let context = ExecutionContext::new("submit");
        assert_eq!(context.submit(|| 6 * 7).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn jobs_enqueued_from_jobs_preserve_order() {
        let context = ExecutionContext::new("nested");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner_seen = seen.clone();
        let nested = context.clone();
        context.execute(move || {
            inner_seen.lock().unwrap().push("outer");
            let inner_seen = inner_seen.clone();
            nested.execute(move || inner_seen.lock().unwrap().push("nested"));
        });
        let between = seen.clone();
        context.execute(move || between.lock().unwrap().push("between"));
        // Two barriers: the nested job is enqueued behind the first one.
        context.submit(|| ()).await.unwrap();
        context.submit(|| ()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["outer", "between", "nested"]);
    }
}
