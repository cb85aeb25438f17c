// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Counting semaphores.

use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore as Permits;

use super::{take_permit, try_take_permit, ReleaseOnDrop};
use crate::bridge;
use crate::error::Result;

/// Counting semaphore. `acquire` suspends while the count is zero; waiters
/// are served FIFO.
#[derive(Clone)]
pub struct Semaphore {
    permits: Arc<Permits>,
}

impl Semaphore {
    pub fn new(value: usize) -> Self {
        Self {
            permits: Arc::new(Permits::new(value)),
        }
    }

    pub fn acquire(&self) -> Result<()> {
        bridge::call(take_permit(self.permits.clone()))
    }

    pub fn try_acquire(&self) -> bool {
        try_take_permit(&self.permits)
    }

    pub fn release(&self) {
        self.permits.add_permits(1);
    }

    /// Current count.
    pub fn value(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn locked(&self) -> bool {
        self.value() == 0
    }

    pub fn with<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.acquire()?;
        let _release = ReleaseOnDrop(|| self.release());
        f()
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("value", &self.value())
            .finish()
    }
}

/// Semaphore whose count may never exceed its initial value.
#[derive(Clone, Debug)]
pub struct BoundedSemaphore {
    inner: Semaphore,
    bound: usize,
    // Serializes releases so the bound check and the increment are one step.
    // Acquires only lower the count, so they need no part in it.
    releasing: Arc<Mutex<()>>,
}

impl BoundedSemaphore {
    pub fn new(value: usize) -> Self {
        Self {
            inner: Semaphore::new(value),
            bound: value,
            releasing: Arc::new(Mutex::new(())),
        }
    }

    pub fn acquire(&self) -> Result<()> {
        self.inner.acquire()
    }

    pub fn try_acquire(&self) -> bool {
        self.inner.try_acquire()
    }

    /// # Panics
    /// Panics if the release would raise the count above its initial value.
    pub fn release(&self) {
        let guard = self.releasing.lock().unwrap();
        if self.inner.value() >= self.bound {
            drop(guard);
            panic!("strand: BoundedSemaphore released too many times");
        }
        self.inner.release();
    }

    pub fn value(&self) -> usize {
        self.inner.value()
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    pub fn locked(&self) -> bool {
        self.inner.locked()
    }

    pub fn with<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.acquire()?;
        let _release = ReleaseOnDrop(|| self.release());
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_down_and_up() {
        crate::run(|| {
            let sem = Semaphore::new(2);
            sem.acquire()?;
            sem.acquire()?;
            assert!(sem.locked());
            assert!(!sem.try_acquire());
            sem.release();
            assert_eq!(sem.value(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn unbounded_release_grows() {
        let sem = Semaphore::new(0);
        sem.release();
        sem.release();
        assert_eq!(sem.value(), 2);
    }

    #[test]
    #[should_panic(expected = "released too many times")]
    fn bounded_release_past_initial_panics() {
        BoundedSemaphore::new(1).release();
    }

    #[test]
    fn concurrent_over_release_is_caught_once() {
        let sem = BoundedSemaphore::new(1);
        assert!(sem.try_acquire());
        let results: Vec<bool> = (0..8)
            .map(|_| {
                let sem = sem.clone();
                std::thread::spawn(move || sem.release())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().is_ok())
            .collect();
        assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(sem.value(), 1);
    }

    #[test]
    fn bounded_with_restores_count() {
        crate::run(|| {
            let sem = BoundedSemaphore::new(1);
            let value = sem.with(|| Ok(sem.value()))?;
            assert_eq!(value, 0);
            assert_eq!(sem.value(), 1);
            Ok(())
        })
        .unwrap();
    }
}
