// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task groups: supervise a set of tasks under a completion policy.
//!
//! Members report to the group when they finish, so the group observes
//! completions in the order they happen rather than in spawn order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::bridge;
use crate::error::{Result, TaskId};
use crate::task::{spawn_task, TaskHandle};

/// What `TaskGroup::join` waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Every member.
    All,
    /// The first member to succeed; the rest are cancelled.
    Any,
    /// Nothing; remaining members are cancelled.
    None,
}

/// The member that satisfied an `Any` group, with its result.
#[derive(Debug)]
pub struct Completed<T> {
    pub task: TaskId,
    pub result: T,
}

/// A supervised set of tasks.
///
/// ```ignore
/// let mut group = TaskGroup::new(Policy::Any);
/// group.spawn(|| fetch(primary))?;
/// group.spawn(|| fetch(mirror))?;
/// group.join()?;
/// let body = group.take_completed().map(|c| c.result);
/// ```
pub struct TaskGroup<T> {
    policy: Policy,
    running: HashMap<TaskId, TaskHandle<T>>,
    finished: Vec<TaskHandle<T>>,
    done_tx: mpsc::UnboundedSender<TaskId>,
    done_rx: Arc<Mutex<mpsc::UnboundedReceiver<TaskId>>>,
    completed: Option<Completed<T>>,
    joined: bool,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new(policy: Policy) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            policy,
            running: HashMap::new(),
            finished: Vec::new(),
            done_tx,
            done_rx: Arc::new(Mutex::new(done_rx)),
            completed: None,
            joined: false,
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Members that have not been reported finished yet.
    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Spawn `f` as a member of this group.
    pub fn spawn<F>(&mut self, f: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let task = spawn_task(f, false, Some(self.done_tx.clone()))?;
        self.running.insert(task.id(), task.clone());
        Ok(task)
    }

    /// Suspend until the next member finishes. `Ok(None)` once every
    /// member has been reported.
    pub fn next_done(&mut self) -> Result<Option<TaskHandle<T>>> {
        while !self.running.is_empty() {
            let inbox = self.done_rx.clone();
            let id = bridge::call(async move {
                let mut inbox = inbox.lock().await;
                // The group holds a sender, so the channel never closes.
                Ok(inbox.recv().await)
            })?;
            if let Some(task) = id.and_then(|id| self.running.remove(&id)) {
                self.finished.push(task.clone());
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// Like `next_done`, but returns the member's result.
    pub fn next_result(&mut self) -> Result<Option<T>> {
        match self.next_done()? {
            Some(task) => task.take_outcome().map(Some),
            None => Ok(None),
        }
    }

    /// Cancel every unfinished member and wait for each to terminate.
    pub fn cancel_remaining(&mut self) -> Result<()> {
        for task in self.running.values() {
            task.request_cancel();
        }
        for task in self.running.values() {
            task.wait()?;
        }
        Ok(())
    }

    /// Close the group according to its policy.
    ///
    /// A member failure (other than `None` groups) cancels the remaining
    /// members and is returned as `Error::TaskFailed`. Under `Any`, the
    /// winning result moves into `completed()`.
    pub fn join(&mut self) -> Result<()> {
        self.joined = true;
        let outcome = match self.policy {
            Policy::All => self.join_all(),
            Policy::Any => self.join_any(),
            Policy::None => Ok(()),
        };
        match outcome {
            Ok(()) => self.cancel_remaining(),
            Err(err) => {
                let _ = self.cancel_remaining();
                Err(err)
            }
        }
    }

    fn join_all(&mut self) -> Result<()> {
        while let Some(task) = self.next_done()? {
            if task.failed() {
                return task.take_outcome().map(drop);
            }
        }
        Ok(())
    }

    fn join_any(&mut self) -> Result<()> {
        while let Some(task) = self.next_done()? {
            if task.succeeded() {
                let result = task.take_outcome()?;
                self.completed = Some(Completed {
                    task: task.id(),
                    result,
                });
                return Ok(());
            }
            if task.failed() {
                return task.take_outcome().map(drop);
            }
        }
        Ok(())
    }

    /// The member that satisfied an `Any` group.
    pub fn completed(&self) -> Option<&Completed<T>> {
        self.completed.as_ref()
    }

    pub fn take_completed(&mut self) -> Option<Completed<T>> {
        self.completed.take()
    }

    /// Members already reported finished, in completion order.
    pub fn finished(&self) -> &[TaskHandle<T>] {
        &self.finished
    }
}

impl<T> Drop for TaskGroup<T> {
    fn drop(&mut self) {
        if !self.joined {
            for task in self.running.values() {
                task.request_cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::{run, sleep};
    use std::time::Duration;

    #[test]
    fn all_waits_for_every_member() {
        let total = run(|| {
            let mut group = TaskGroup::new(Policy::All);
            for n in 1..=3u64 {
                group.spawn(move || {
                    sleep(Duration::from_millis(5 * n))?;
                    Ok(n)
                })?;
            }
            group.join()?;
            Ok(group.finished().len())
        })
        .unwrap();
        assert_eq!(total, 3);
    }

    #[test]
    fn all_fails_fast() {
        run(|| {
            let mut group = TaskGroup::new(Policy::All);
            let slow = group.spawn(|| sleep(Duration::from_secs(10)))?;
            group.spawn(|| Err(Error::custom("broken")))?;
            let err = group.join().unwrap_err();
            assert!(matches!(err, Error::TaskFailed { .. }));
            assert!(slow.is_finished());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn next_result_yields_completion_order() {
        run(|| {
            let mut group = TaskGroup::new(Policy::All);
            group.spawn(|| {
                sleep(Duration::from_millis(60))?;
                Ok("slow")
            })?;
            group.spawn(|| Ok("fast"))?;
            assert_eq!(group.next_result()?, Some("fast"));
            assert_eq!(group.next_result()?, Some("slow"));
            assert_eq!(group.next_result()?, None);
            Ok(())
        })
        .unwrap();
    }
}
