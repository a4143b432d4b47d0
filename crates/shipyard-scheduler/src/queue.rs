//! Bounded-concurrency task queue.
//!
//! Tasks start in submission order, at most `concurrency` at a time. A task
//! that fails or panics is reported on the outcome channel and never takes
//! the queue or its siblings down. Nothing is persisted: tasks still queued
//! when the process exits are lost.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, warn};

use crate::error::{SchedulerError, SchedulerResult, panic_message};

/// A unit of work.
pub type Task = BoxFuture<'static, shipyard_core::Result<()>>;

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResult {
    Completed,
    Failed(String),
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub name: String,
    pub result: TaskResult,
}

struct QueuedTask {
    name: String,
    task: Task,
}

#[derive(Default)]
struct Counters {
    queued: AtomicUsize,
    active: AtomicUsize,
}

/// Handle to a running queue. Dropping every handle stops the dispatcher
/// once the tasks already submitted have started.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    counters: Arc<Counters>,
    concurrency: usize,
}

impl TaskQueue {
    /// Start a queue. Must be called from within a tokio runtime.
    pub fn new(concurrency: usize) -> Self {
        Self::start(concurrency, None)
    }

    /// Start a queue that reports every task outcome on the returned channel.
    pub fn with_outcomes(concurrency: usize) -> (Self, mpsc::UnboundedReceiver<TaskOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::start(concurrency, Some(tx)), rx)
    }

    fn start(concurrency: usize, outcomes: Option<mpsc::UnboundedSender<TaskOutcome>>) -> Self {
        let concurrency = concurrency.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        tokio::spawn(dispatch(
            rx,
            Arc::new(Semaphore::new(concurrency)),
            counters.clone(),
            outcomes,
        ));

        Self {
            tx,
            counters,
            concurrency,
        }
    }

    /// Submit a task. Never waits for a free slot.
    pub fn enqueue(&self, name: impl Into<String>, task: Task) -> SchedulerResult<()> {
        let name = name.into();
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        self.tx.send(QueuedTask { name, task }).map_err(|_| {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            SchedulerError::QueueClosed
        })
    }

    /// Tasks submitted but not yet started.
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    /// Tasks currently executing.
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<QueuedTask>,
    slots: Arc<Semaphore>,
    counters: Arc<Counters>,
    outcomes: Option<mpsc::UnboundedSender<TaskOutcome>>,
) {
    while let Some(QueuedTask { name, task }) = rx.recv().await {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };
        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.active.fetch_add(1, Ordering::SeqCst);

        let counters = counters.clone();
        let outcomes = outcomes.clone();
        tokio::spawn(async move {
            debug!(task = %name, "Task started");
            let result = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => TaskResult::Completed,
                Ok(Err(e)) => {
                    warn!(task = %name, error = %e, "Task failed");
                    TaskResult::Failed(e.to_string())
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(task = %name, panic = %message, "Task panicked");
                    TaskResult::Panicked(message)
                }
            };

            counters.active.fetch_sub(1, Ordering::SeqCst);
            drop(permit);

            if let Some(outcomes) = outcomes {
                let _ = outcomes.send(TaskOutcome { name, result });
            }
        });
    }
    debug!("Task queue closed");
}
