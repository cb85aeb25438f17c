// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Spawn, join and cancel worker tasks.
//!
//! Each task is an OS thread inheriting the spawning run's dispatcher. The
//! thread is promoted lazily, on its first scheduler call; its identity and
//! cancel token exist from the start, so a handle can cancel a task that
//! has not suspended yet (the request is delivered at its first suspension
//! point).

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::bridge::{self, Identity};
use crate::cancel::CancelToken;
use crate::error::{Error, Result, TaskId};

/// Shared completion state of one task.
pub(crate) struct TaskState {
    id: TaskId,
    cancel: Arc<CancelToken>,
    done: watch::Sender<bool>,
    group: Option<mpsc::UnboundedSender<TaskId>>,
}

impl TaskState {
    fn new(identity: &Identity, group: Option<mpsc::UnboundedSender<TaskId>>) -> Self {
        Self {
            id: identity.id,
            cancel: identity.cancel.clone(),
            done: watch::Sender::new(false),
            group,
        }
    }

    pub fn is_finished(&self) -> bool {
        *self.done.borrow()
    }

    fn finish(&self) {
        self.done.send_replace(true);
        if let Some(group) = &self.group {
            let _ = group.send(self.id);
        }
        trace!(task = %self.id, "task finished");
    }

    /// Resolves once the task has finished.
    async fn finished(self: Arc<Self>) -> Result<()> {
        let mut done = self.done.subscribe();
        // The sender lives in `self`, so the watch cannot close under us.
        let _ = done.wait_for(|finished| *finished).await;
        Ok(())
    }
}

enum Outcome<T> {
    Returned(T),
    Cancelled,
    Failed(Error),
}

struct ResultSlot<T> {
    inner: Mutex<Option<Outcome<T>>>,
}

impl<T> ResultSlot<T> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    fn set(&self, outcome: Outcome<T>) {
        *self.inner.lock().unwrap() = Some(outcome);
    }

    fn take(&self) -> Option<Outcome<T>> {
        self.inner.lock().unwrap().take()
    }

    fn peek<R>(&self, f: impl FnOnce(Option<&Outcome<T>>) -> R) -> R {
        f(self.inner.lock().unwrap().as_ref())
    }
}

/// Handle to a spawned task.
///
/// Clones refer to the same task. Dropping a handle detaches nothing: the
/// task keeps running and is cancelled and joined when its run ends.
pub struct TaskHandle<T> {
    state: Arc<TaskState>,
    result: Arc<ResultSlot<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            result: self.result.clone(),
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.state.id)
            .field("finished", &self.state.is_finished())
            .finish()
    }
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> TaskId {
        self.state.id
    }

    /// Check if the task has finished (non-blocking).
    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Request cancellation without waiting. No-op once finished.
    pub(crate) fn request_cancel(&self) {
        if !self.is_finished() {
            self.state.cancel.cancel();
        }
    }

    pub(crate) fn failed(&self) -> bool {
        self.result
            .peek(|outcome| matches!(outcome, Some(Outcome::Failed(_))))
    }

    pub(crate) fn succeeded(&self) -> bool {
        self.result
            .peek(|outcome| matches!(outcome, Some(Outcome::Returned(_))))
    }
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Suspend until the task finishes, without taking its result.
    pub fn wait(&self) -> Result<()> {
        if self.is_finished() {
            return Ok(());
        }
        bridge::call(self.state.clone().finished())
    }

    /// Suspend until the task finishes and return its result.
    ///
    /// A task that failed yields `Error::TaskFailed` with the original
    /// error as its cause; one that stopped on a cancellation yields
    /// `Error::TaskCancelled`.
    ///
    /// # Panics
    /// Panics if the result was already taken through another clone.
    pub fn join(self) -> Result<T> {
        self.wait()?;
        self.take_outcome()
    }

    /// Request cancellation, then wait for the task to terminate.
    ///
    /// Idempotent; a no-op on a finished task.
    pub fn cancel(&self) -> Result<()> {
        if self.is_finished() {
            return Ok(());
        }
        self.state.cancel.cancel();
        self.wait()
    }

    pub(crate) fn take_outcome(&self) -> Result<T> {
        let task = self.state.id;
        match self.result.take() {
            Some(Outcome::Returned(value)) => Ok(value),
            Some(Outcome::Cancelled) => Err(Error::TaskCancelled { task }),
            Some(Outcome::Failed(cause)) => Err(Error::TaskFailed {
                task,
                cause: Box::new(cause),
            }),
            None => panic!("strand: result of task {task} already taken"),
        }
    }
}

struct Registered {
    state: Arc<TaskState>,
    thread: JoinHandle<()>,
    daemon: bool,
}

/// Every task spawned during one run.
#[derive(Default)]
pub(crate) struct TaskRegistry {
    tasks: Mutex<Vec<Registered>>,
}

impl TaskRegistry {
    fn register(&self, entry: Registered) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.retain(|t| !(t.state.is_finished() && t.thread.is_finished()));
        tasks.push(entry);
    }

    /// Cancel every unfinished task and join the non-daemon threads.
    /// Daemon threads are detached. Repeats until no task is left, since a
    /// task may spawn others while it unwinds.
    pub fn reap(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
            if tasks.is_empty() {
                break;
            }
            for task in &tasks {
                if !task.state.is_finished() {
                    task.state.cancel.cancel();
                }
            }
            for task in tasks.into_iter().filter(|t| !t.daemon) {
                let _ = task.thread.join();
            }
        }
    }
}

/// Spawn `f` as a new task.
///
/// # Panics
/// Panics if no scheduler is running.
pub fn spawn<T, F>(f: F) -> Result<TaskHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    spawn_task(f, false, None)
}

/// Spawn `f` as a daemon task: at run exit it is cancelled but not waited
/// for.
///
/// # Panics
/// Panics if no scheduler is running.
pub fn spawn_daemon<T, F>(f: F) -> Result<TaskHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    spawn_task(f, true, None)
}

pub(crate) fn spawn_task<T, F>(
    f: F,
    daemon: bool,
    group: Option<mpsc::UnboundedSender<TaskId>>,
) -> Result<TaskHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let dispatcher = bridge::dispatcher();
    let identity = Identity::fresh();
    let id = identity.id;
    let state = Arc::new(TaskState::new(&identity, group));
    let result = Arc::new(ResultSlot::new());

    let config = dispatcher.config();
    let mut builder = thread::Builder::new().name(format!("{}-{}", config.thread_name, id.0));
    if let Some(size) = config.stack_size {
        builder = builder.stack_size(size);
    }

    let thread = {
        let dispatcher = dispatcher.clone();
        let state = state.clone();
        let result = result.clone();
        builder.spawn(move || {
            bridge::adopt(Some(dispatcher), Some(identity));
            let outcome = match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(Ok(value)) => Outcome::Returned(value),
                Ok(Err(Error::Cancelled { .. })) => Outcome::Cancelled,
                Ok(Err(err)) => Outcome::Failed(err),
                Err(payload) => Outcome::Failed(Error::Panicked(panic_message(payload))),
            };
            let _ = panic::catch_unwind(bridge::terminate);
            result.set(outcome);
            state.finish();
        })?
    };

    dispatcher.tasks().register(Registered {
        state: state.clone(),
        thread,
        daemon,
    });
    trace!(task = %id, daemon, "spawned task");

    Ok(TaskHandle { state, result })
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
