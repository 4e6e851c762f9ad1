//! Bounded-concurrency work queue for per-file tasks.
//!
//! Each enqueued path becomes a tokio task that waits for a semaphore
//! permit, runs the job and sends a `Completion` to the coordinator. The
//! queue size only drops when the coordinator acknowledges the completion
//! with `complete`, so an empty queue means every outcome has been applied.

use crate::error::TaskFailure;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Work run for one path.
pub type Job<T> = Arc<dyn Fn(PathBuf) -> BoxFuture<'static, Result<T, TaskFailure>> + Send + Sync>;

/// Outcome of one task, delivered to the coordinator.
#[derive(Debug)]
pub struct Completion<T> {
    pub path: PathBuf,
    pub result: Result<T, TaskFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Queued,
    Running { rerun: bool },
    /// Finished, waiting for `complete`.
    Done { rerun: bool },
}

pub struct IndexingScheduler<T> {
    semaphore: Arc<Semaphore>,
    job: Job<T>,
    completions: mpsc::UnboundedSender<Completion<T>>,
    states: Arc<DashMap<PathBuf, TaskState>>,
    size: AtomicUsize,
    idle: Notify,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
    workers: usize,
}

impl<T: Send + 'static> IndexingScheduler<T> {
    /// Scheduler running at most `workers` jobs at once. Completions arrive
    /// on the returned receiver.
    pub fn new(workers: usize, job: Job<T>) -> (Self, mpsc::UnboundedReceiver<Completion<T>>) {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            job,
            completions: tx,
            states: Arc::new(DashMap::new()),
            size: AtomicUsize::new(0),
            idle: Notify::new(),
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
            workers,
        };
        (scheduler, rx)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Paths queued, running or awaiting acknowledgement.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.size() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queue `path`. Returns `false` when it was already queued (or the
    /// scheduler is shut down). A path queued while its task runs is run
    /// once more after that task is acknowledged.
    pub fn enqueue(&self, path: PathBuf) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.states.entry(path.clone()) {
            Entry::Occupied(mut entry) => {
                match *entry.get() {
                    TaskState::Queued => {}
                    TaskState::Running { .. } => {
                        entry.insert(TaskState::Running { rerun: true });
                    }
                    TaskState::Done { .. } => {
                        entry.insert(TaskState::Done { rerun: true });
                    }
                }
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(TaskState::Queued);
                self.size.fetch_add(1, Ordering::SeqCst);
                self.spawn(path);
                true
            }
        }
    }

    /// Acknowledge the completion for `path`, re-running it if it was
    /// enqueued again meanwhile.
    pub fn complete(&self, path: &Path) {
        self.reap();
        let rerun = match self.states.remove(path) {
            Some((_, TaskState::Running { rerun } | TaskState::Done { rerun })) => rerun,
            Some((_, TaskState::Queued)) | None => false,
        };

        if rerun && !self.is_closed() {
            debug!(path = %path.display(), "re-running task enqueued while in flight");
            self.states.insert(path.to_path_buf(), TaskState::Queued);
            self.spawn(path.to_path_buf());
            return;
        }

        let before = self
            .size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if before <= 1 {
            self.idle.notify_waiters();
        }
    }

    /// Wait until the queue is empty.
    pub async fn drain(&self) {
        loop {
            let notified = self.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting work and abort in-flight tasks without delivering
    /// their completions.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.semaphore.close();
        self.tasks.lock().abort_all();
        self.states.clear();
        self.size.store(0, Ordering::SeqCst);
        self.idle.notify_waiters();
    }

    fn spawn(&self, path: PathBuf) {
        let semaphore = Arc::clone(&self.semaphore);
        let job = Arc::clone(&self.job);
        let states = Arc::clone(&self.states);
        let completions = self.completions.clone();

        self.tasks.lock().spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    if let Some(mut state) = states.get_mut(&path) {
                        *state = TaskState::Running { rerun: false };
                    }
                    match AssertUnwindSafe(job(path.clone())).catch_unwind().await {
                        Ok(result) => result,
                        Err(payload) => Err(TaskFailure::Panicked(panic_message(payload))),
                    }
                }
                Err(_) => Err(TaskFailure::Cancelled),
            };

            if let Some(mut state) = states.get_mut(&path) {
                let rerun = matches!(*state, TaskState::Running { rerun: true });
                *state = TaskState::Done { rerun };
            }
            if let Err(failure) = &result {
                warn!(path = %path.display(), "task failed: {failure}");
            }
            let _ = completions.send(Completion { path, result });
        });
    }

    /// Drop finished task handles.
    fn reap(&self) {
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
