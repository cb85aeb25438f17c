// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! FIFO queue between workers, with optional capacity and completion
//! counting.
//!
//! `put` suspends while the queue is full, `get` while it is empty. Each
//! item put is "unfinished" until a consumer calls `task_done` for it;
//! `join` suspends until nothing is unfinished.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, Semaphore as Permits};

use crate::bridge;
use crate::error::Result;
use crate::sync::take_permit;

struct Inner<T> {
    items: Mutex<VecDeque<T>>,
    /// One permit per queued item.
    available: Arc<Permits>,
    /// One permit per free slot; `None` when unbounded.
    slots: Option<Arc<Permits>>,
    maxsize: usize,
    unfinished: Mutex<usize>,
    all_done: Notify,
}

/// Multi-producer, multi-consumer queue. Cheap to clone.
pub struct Queue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> Queue<T> {
    /// Unbounded queue.
    pub fn new() -> Self {
        Self::with_maxsize(0)
    }

    /// Queue holding at most `maxsize` items; 0 means unbounded.
    pub fn with_maxsize(maxsize: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::new()),
                available: Arc::new(Permits::new(0)),
                slots: (maxsize > 0).then(|| Arc::new(Permits::new(maxsize))),
                maxsize,
                unfinished: Mutex::new(0),
                all_done: Notify::new(),
            }),
        }
    }

    /// Append `item`, suspending while the queue is full.
    ///
    /// On cancellation the item is dropped and the queue is unchanged.
    pub fn put(&self, item: T) -> Result<()> {
        if let Some(slots) = &self.inner.slots {
            bridge::call(take_permit(slots.clone()))?;
        }
        self.inner.items.lock().unwrap().push_back(item);
        *self.inner.unfinished.lock().unwrap() += 1;
        self.inner.available.add_permits(1);
        Ok(())
    }

    /// Remove the oldest item, suspending while the queue is empty.
    pub fn get(&self) -> Result<T> {
        bridge::call(take_permit(self.inner.available.clone()))?;
        let item = self
            .inner
            .items
            .lock()
            .unwrap()
            .pop_front()
            .expect("queue permit without an item");
        if let Some(slots) = &self.inner.slots {
            slots.add_permits(1);
        }
        Ok(item)
    }

    /// Mark one previously fetched item as processed.
    ///
    /// # Panics
    /// Panics if called more times than items were put.
    pub fn task_done(&self) {
        let mut unfinished = self.inner.unfinished.lock().unwrap();
        assert!(*unfinished > 0, "strand: task_done() called too many times");
        *unfinished -= 1;
        if *unfinished == 0 {
            self.inner.all_done.notify_waiters();
        }
    }

    /// Suspend until every item put has been marked done.
    pub fn join(&self) -> Result<()> {
        if self.unfinished() == 0 {
            return Ok(());
        }
        let inner = self.inner.clone();
        bridge::call(async move {
            loop {
                let done = inner.all_done.notified();
                tokio::pin!(done);
                done.as_mut().enable();
                if *inner.unfinished.lock().unwrap() == 0 {
                    return Ok(());
                }
                done.await;
            }
        })
    }

    fn unfinished(&self) -> usize {
        *self.inner.unfinished.lock().unwrap()
    }

    pub fn qsize(&self) -> usize {
        self.inner.items.lock().unwrap().len()
    }

    pub fn empty(&self) -> bool {
        self.qsize() == 0
    }

    pub fn full(&self) -> bool {
        self.inner.maxsize > 0 && self.qsize() >= self.inner.maxsize
    }

    pub fn maxsize(&self) -> usize {
        self.inner.maxsize
    }
}

impl<T: Send + 'static> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}
