//! Task manager
//!
//! Runs submitted jobs on a fixed set of tokio worker tasks fed by a bounded
//! queue:
//! - Submission never blocks; a full queue is reported as [`TaskError::Rejected`]
//! - No two live tasks with overlapping [`TaskContext`]s
//! - Finished tasks stay pollable for the configured retention period

use crate::descriptor::{TaskDescriptor, TaskOutcome, TaskState};
use crate::error::TaskError;
use crate::progress::TaskProgress;
use crate::types::{TaskContext, TaskId};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use moka::sync::Cache;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type JobFn<R> = Box<dyn FnOnce(TaskProgress) -> BoxFuture<'static, R> + Send>;

struct Job<R> {
    state: Arc<TaskState<R>>,
    run: JobFn<R>,
}

/// Pool sizing and retention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker tasks
    pub workers: usize,
    /// Jobs that may wait for a worker before submissions are rejected
    pub queue_capacity: usize,
    /// How long finished tasks remain pollable
    pub retention: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 16,
            retention: Duration::from_secs(3600),
        }
    }
}

struct Registry<R> {
    live: DashMap<TaskId, Arc<TaskState<R>>>,
    finished: Cache<TaskId, Arc<TaskState<R>>>,
}

impl<R: Clone + Send + Sync + 'static> Registry<R> {
    fn get(&self, id: &TaskId) -> Option<Arc<TaskState<R>>> {
        self.live
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .or_else(|| self.finished.get(id))
    }

    fn retire(&self, state: &Arc<TaskState<R>>) {
        // visible in `finished` before it leaves `live`
        self.finished.insert(state.id, Arc::clone(state));
        self.live.remove(&state.id);
    }
}

struct Inner<R> {
    config: PoolConfig,
    registry: Arc<Registry<R>>,
    sender: Mutex<Option<mpsc::Sender<Job<R>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Bounded background task manager
///
/// Must be created inside a tokio runtime; workers are spawned on creation.
pub struct TaskManager<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for TaskManager<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> std::fmt::Debug for TaskManager<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("config", &self.inner.config)
            .field("live", &self.inner.registry.live.len())
            .finish_non_exhaustive()
    }
}

impl<R: Clone + Send + Sync + 'static> TaskManager<R> {
    /// Create the manager and spawn its workers
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel::<Job<R>>(config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let registry = Arc::new(Registry {
            live: DashMap::new(),
            finished: Cache::builder().time_to_live(config.retention).build(),
        });

        let handles = (0..workers)
            .map(|worker| tokio::spawn(worker_loop(worker, Arc::clone(&rx), Arc::clone(&registry))))
            .collect();

        tracing::debug!(workers, queue = config.queue_capacity, "task manager started");

        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                sender: Mutex::new(Some(tx)),
                workers: Mutex::new(handles),
            }),
        }
    }

    /// Pool configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.inner.config
    }

    /// Queue `job` for execution
    ///
    /// # Errors
    /// - `AlreadyExecuting` if a live task's context overlaps `context`
    /// - `Rejected` if the queue is full
    /// - `ShutDown` after [`shutdown`](Self::shutdown)
    pub fn submit<F, Fut>(
        &self,
        description: impl Into<String>,
        context: TaskContext,
        job: F,
    ) -> Result<TaskDescriptor<R>, TaskError>
    where
        F: FnOnce(TaskProgress) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let sender = self.inner.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(TaskError::ShutDown);
        };

        // check-then-insert happens under the sender lock, so two submissions
        // with overlapping contexts cannot both pass
        if let Some(existing) = self.find_first_live(|live| live.overlaps(&context)) {
            return Err(TaskError::AlreadyExecuting { task: existing.id });
        }

        let state = Arc::new(TaskState::new(description.into(), context));
        let snapshot = state.snapshot();
        self.inner.registry.live.insert(state.id, Arc::clone(&state));

        let run: JobFn<R> = Box::new(move |progress| job(progress).boxed());
        match tx.try_send(Job {
            state: Arc::clone(&state),
            run,
        }) {
            Ok(()) => {
                tracing::info!(task = %state.id, description = %state.description, "task submitted");
                Ok(snapshot)
            }
            Err(err) => {
                self.inner.registry.live.remove(&state.id);
                match err {
                    mpsc::error::TrySendError::Full(_) => {
                        tracing::warn!(
                            capacity = self.inner.config.queue_capacity,
                            "task queue full, rejecting submission"
                        );
                        Err(TaskError::Rejected {
                            capacity: self.inner.config.queue_capacity,
                        })
                    }
                    mpsc::error::TrySendError::Closed(_) => Err(TaskError::ShutDown),
                }
            }
        }
    }

    /// Snapshot of a live or retained task
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<TaskDescriptor<R>> {
        self.inner.registry.get(&id).map(|state| state.snapshot())
    }

    /// Live task with exactly this context
    #[must_use]
    pub fn live_task(&self, context: &TaskContext) -> Option<TaskDescriptor<R>> {
        self.find_first_live(|c| c == context)
    }

    /// First live task whose context matches, oldest first
    #[must_use]
    pub fn find_first_live(&self, matcher: impl Fn(&TaskContext) -> bool) -> Option<TaskDescriptor<R>> {
        self.live_tasks()
            .into_iter()
            .find(|task| matcher(&task.context))
    }

    /// Unfinished tasks, oldest first
    #[must_use]
    pub fn live_tasks(&self) -> Vec<TaskDescriptor<R>> {
        let mut tasks: Vec<_> = self
            .inner
            .registry
            .live
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .map(|entry| entry.value().snapshot())
            .collect();
        sort_tasks(&mut tasks);
        tasks
    }

    /// Every known task (live and retained), oldest first
    #[must_use]
    pub fn all_tasks(&self) -> Vec<TaskDescriptor<R>> {
        let registry = &self.inner.registry;
        let mut tasks: Vec<_> = registry
            .live
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        for (id, state) in &registry.finished {
            if !registry.live.contains_key(id.as_ref()) {
                tasks.push(state.snapshot());
            }
        }
        sort_tasks(&mut tasks);
        tasks
    }

    /// Forget a task (e.g. once its result has been consumed)
    pub fn remove_task(&self, id: TaskId) {
        self.inner.registry.live.remove(&id);
        self.inner.registry.finished.invalidate(&id);
    }

    /// Wait until the task finishes; `None` for unknown ids
    pub async fn wait_for(&self, id: TaskId) -> Option<TaskDescriptor<R>> {
        let state = self.inner.registry.get(&id)?;
        loop {
            let notified = state.done.notified();
            if state.is_finished() {
                return Some(state.snapshot());
            }
            notified.await;
        }
    }

    /// Stop accepting work and wait for queued jobs to drain
    pub async fn shutdown(&self) {
        drop(self.inner.sender.lock().take());
        let handles: Vec<_> = self.inner.workers.lock().drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "task worker ended abnormally");
            }
        }
        let live = self.live_tasks();
        if !live.is_empty() {
            tracing::warn!(count = live.len(), "task manager shut down with unfinished tasks");
        }
    }
}

fn sort_tasks<R>(tasks: &mut [TaskDescriptor<R>]) {
    tasks.sort_by(|a, b| (a.submitted_at, a.id).cmp(&(b.submitted_at, b.id)));
}

async fn worker_loop<R: Clone + Send + Sync + 'static>(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job<R>>>>,
    registry: Arc<Registry<R>>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(Job { state, run }) = job else {
            break;
        };

        state.mark_started();
        tracing::debug!(worker, task = %state.id, "task started");

        let outcome = match AssertUnwindSafe(run(state.progress.clone())).catch_unwind().await {
            Ok(value) => TaskOutcome::Completed(value),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(task = %state.id, panic = %message, "task panicked");
                TaskOutcome::Panicked(message)
            }
        };

        state.finish(outcome);
        registry.retire(&state);
        tracing::debug!(worker, task = %state.id, "task finished");
    }
    tracing::trace!(worker, "task worker exiting");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressSink;
    use std::collections::BTreeSet;
    use tokio::sync::{oneshot, watch};
    use wfm_scheme::{ProjectId, SchemeId};

    fn context(scheme: u64) -> TaskContext {
        TaskContext::ProjectMigration {
            scheme: SchemeId(scheme),
            projects: BTreeSet::from([ProjectId(scheme)]),
        }
    }

    fn config(workers: usize, queue_capacity: usize) -> PoolConfig {
        PoolConfig {
            workers,
            queue_capacity,
            retention: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn submit_runs_job_and_reports_progress() {
        let manager = TaskManager::<u32>::new(config(1, 4));

        let task = manager
            .submit("answer", context(1), |progress| async move {
                progress.make_progress(50, Some("thinking"), "halfway");
                42
            })
            .unwrap();
        assert!(!task.is_finished());

        let done = manager.wait_for(task.id).await.unwrap();
        assert!(done.is_finished());
        assert!(done.is_started());
        assert_eq!(done.outcome, Some(TaskOutcome::Completed(42)));
        assert_eq!(done.progress.unwrap().message, "halfway");

        // retained after finishing
        assert!(manager.task(task.id).is_some());
        assert!(manager.live_tasks().is_empty());
    }

    #[tokio::test]
    async fn same_context_is_refused_while_live() {
        let manager = TaskManager::<()>::new(config(1, 4));
        let (release, gate) = oneshot::channel::<()>();

        let first = manager
            .submit("first", context(1), move |_| async move {
                let _ = gate.await;
            })
            .unwrap();

        let second = manager.submit("second", context(1), |_| async {});
        assert_eq!(second, Err(TaskError::AlreadyExecuting { task: first.id }));

        // a different context is fine
        assert!(manager.submit("other", context(2), |_| async {}).is_ok());

        release.send(()).unwrap();
        manager.wait_for(first.id).await.unwrap();
        assert!(manager.submit("third", context(1), |_| async {}).is_ok());
    }

    #[tokio::test]
    async fn overlapping_context_is_refused_while_live() {
        let manager = TaskManager::<()>::new(config(2, 4));
        let (open, gate) = watch::channel(false);
        let to_default = |projects: &[u64]| TaskContext::ProjectMigration {
            scheme: SchemeId::DEFAULT,
            projects: projects.iter().copied().map(ProjectId).collect(),
        };

        let first = manager
            .submit("first", to_default(&[1, 2]), move |_| async move {
                let mut gate = gate;
                let _ = gate.wait_for(|open| *open).await;
            })
            .unwrap();

        let shared_project = TaskContext::DraftMigration {
            parent: SchemeId(9),
            projects: BTreeSet::from([ProjectId(2)]),
        };
        assert_eq!(
            manager.submit("shared project", shared_project, |_| async {}),
            Err(TaskError::AlreadyExecuting { task: first.id })
        );
        assert_eq!(
            manager.submit("same scheme", to_default(&[3]), |_| async {}),
            Err(TaskError::AlreadyExecuting { task: first.id })
        );

        open.send_replace(true);
        manager.wait_for(first.id).await.unwrap();
        assert!(manager.submit("after", to_default(&[2, 3]), |_| async {}).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_overlapping_submissions_admit_one() {
        let manager = TaskManager::<()>::new(config(1, 16));
        let (open, gate) = watch::channel(false);

        let accepted: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8u64)
                .map(|i| {
                    let manager = &manager;
                    let mut gate = gate.clone();
                    let context = TaskContext::ProjectMigration {
                        scheme: SchemeId::DEFAULT,
                        projects: BTreeSet::from([ProjectId(i), ProjectId(i + 1)]),
                    };
                    scope.spawn(move || {
                        manager.submit(format!("move {i}"), context, move |_| async move {
                            let _ = gate.wait_for(|open| *open).await;
                        })
                    })
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| handle.join().unwrap().ok())
                .collect()
        });

        assert_eq!(accepted.len(), 1);
        assert_eq!(manager.live_tasks().len(), 1);

        open.send_replace(true);
        manager.wait_for(accepted[0].id).await.unwrap();
    }

    #[tokio::test]
    async fn full_queue_rejects() {
        let manager = TaskManager::<()>::new(config(1, 1));
        let (release, gate) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        // occupies the only worker
        let busy = manager
            .submit("busy", context(1), move |_| async move {
                let _ = started_tx.send(());
                let _ = gate.await;
            })
            .unwrap();
        started_rx.await.unwrap();

        // fills the queue
        manager.submit("queued", context(2), |_| async {}).unwrap();

        let rejected = manager.submit("rejected", context(3), |_| async {});
        assert_eq!(rejected, Err(TaskError::Rejected { capacity: 1 }));
        assert!(rejected.unwrap_err().is_retryable());
        // a rejected task never becomes visible
        assert_eq!(manager.all_tasks().len(), 2);

        release.send(()).unwrap();
        manager.wait_for(busy.id).await.unwrap();
    }

    #[tokio::test]
    async fn panicking_job_is_recorded() {
        let manager = TaskManager::<u8>::new(config(1, 2));
        fn explode() -> u8 {
            panic!("scheme vanished")
        }

        let task = manager
            .submit("explodes", context(1), |_| async { explode() })
            .unwrap();

        let done = manager.wait_for(task.id).await.unwrap();
        assert_eq!(done.outcome, Some(TaskOutcome::Panicked("scheme vanished".into())));

        // the worker survives
        let next = manager.submit("next", context(1), |_| async { 1 }).unwrap();
        let done = manager.wait_for(next.id).await.unwrap();
        assert_eq!(done.outcome, Some(TaskOutcome::Completed(1)));
    }

    #[tokio::test]
    async fn removed_and_shut_down() {
        let manager = TaskManager::<()>::new(config(2, 2));
        let task = manager.submit("t", context(1), |_| async {}).unwrap();
        manager.wait_for(task.id).await.unwrap();

        manager.remove_task(task.id);
        assert!(manager.task(task.id).is_none());

        manager.shutdown().await;
        assert_eq!(
            manager.submit("late", context(1), |_| async {}),
            Err(TaskError::ShutDown)
        );
    }
}
