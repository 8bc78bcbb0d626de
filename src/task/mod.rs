//! Background task spawning.
//!
//! Grounded on the same structured-concurrency shape as
//! [`crate::concurrency`]'s nursery/cancel-token pair: every spawn gets
//! a child [`CancelToken`], runs as a tracked `tokio::task::JoinHandle`,
//! and engine shutdown cancels every outstanding token before awaiting
//! all handles.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::concurrency::CancelToken;
use crate::error::{LexFlowError, LexFlowResult};
use crate::value::Value;

/// Monotonic identifier assigned to each spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

enum Outcome {
    Value(Value),
    Error(LexFlowError),
    Cancelled,
}

struct TaskState {
    outcome: AsyncMutex<Option<Outcome>>,
    notify: tokio::sync::Notify,
}

/// A handle to a spawned task, the [`Value::Handle`] surfaced to
/// workflow scripts as the bound `Spawn` variable.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    cancel: CancelToken,
    state: Arc<TaskState>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn done(&self) -> bool {
        self.state.outcome.lock().await.is_some()
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The completed value, if the task finished successfully.
    pub async fn result(&self) -> LexFlowResult<Option<Value>> {
        match &*self.state.outcome.lock().await {
            Some(Outcome::Value(v)) => Ok(Some(v.clone())),
            _ => Ok(None),
        }
    }

    /// The raised error, if the task finished with one.
    pub async fn exception(&self) -> Option<LexFlowError> {
        match &*self.state.outcome.lock().await {
            Some(Outcome::Error(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Suspends until the task settles, or `timeout_secs` elapses.
    pub async fn wait(&self, timeout_secs: Option<f64>) -> LexFlowResult<Value> {
        let fut = async {
            loop {
                {
                    let guard = self.state.outcome.lock().await;
                    match &*guard {
                        Some(Outcome::Value(v)) => return Ok(v.clone()),
                        Some(Outcome::Error(e)) => return Err(e.clone()),
                        Some(Outcome::Cancelled) => return Err(LexFlowError::Cancelled),
                        None => {}
                    }
                }
                self.state.notify.notified().await;
            }
        };
        match timeout_secs {
            None => fut.await,
            Some(secs) => tokio::time::timeout(std::time::Duration::from_secs_f64(secs.max(0.0)), fut)
                .await
                .map_err(|_| LexFlowError::Timeout)?,
        }
    }
}

struct TaskEntry {
    handle: TaskHandle,
    join: AsyncMutex<Option<JoinHandle<()>>>,
}

/// Tracks every spawned background task for the lifetime of an `Engine`
/// run.
pub struct TaskManager {
    next_id: AtomicU64,
    tasks: DashMap<TaskId, Arc<TaskEntry>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tasks: DashMap::new(),
        }
    }

    /// Spawn `coro` as a tracked background task. `coro` is polled to
    /// completion, storing its settled outcome for later `wait`/`get`.
    pub fn spawn<F>(&self, parent_cancel: &CancelToken, coro: F) -> TaskHandle
    where
        F: std::future::Future<Output = LexFlowResult<Value>> + Send + 'static,
    {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let cancel = parent_cancel.child_token();
        let state = Arc::new(TaskState {
            outcome: AsyncMutex::new(None),
            notify: tokio::sync::Notify::new(),
        });
        let handle = TaskHandle {
            id,
            cancel: cancel.clone(),
            state: state.clone(),
        };

        let join = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::Cancelled,
                result = coro => match result {
                    Ok(v) => Outcome::Value(v),
                    Err(e) => Outcome::Error(e),
                },
            };
            *state.outcome.lock().await = Some(outcome);
            state.notify.notify_waiters();
        });

        self.tasks.insert(
            id,
            Arc::new(TaskEntry {
                handle: handle.clone(),
                join: AsyncMutex::new(Some(join)),
            }),
        );
        handle
    }

    pub fn get(&self, id: TaskId) -> Option<TaskHandle> {
        self.tasks.get(&id).map(|e| e.handle.clone())
    }

    pub fn list(&self) -> Vec<TaskHandle> {
        self.tasks.iter().map(|e| e.handle.clone()).collect()
    }

    pub fn cancel(&self, id: TaskId) -> LexFlowResult<()> {
        let entry = self
            .tasks
            .get(&id)
            .ok_or_else(|| LexFlowError::RuntimeError(format!("unknown task {id}")))?;
        entry.handle.cancel();
        Ok(())
    }

    pub async fn wait(&self, id: TaskId, timeout_secs: Option<f64>) -> LexFlowResult<Value> {
        let handle = self
            .get(id)
            .ok_or_else(|| LexFlowError::RuntimeError(format!("unknown task {id}")))?;
        handle.wait(timeout_secs).await
    }

    /// Cancel every tracked task and await their settlement. Called on
    /// engine shutdown so no spawned work outlives the run.
    pub async fn cleanup(&self) {
        let entries: Vec<Arc<TaskEntry>> = self.tasks.iter().map(|e| e.clone()).collect();
        for entry in &entries {
            entry.handle.cancel();
        }
        for entry in entries {
            let join = entry.join.lock().await.take();
            if let Some(join) = join {
                let _ = join.await;
            }
        }
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}
