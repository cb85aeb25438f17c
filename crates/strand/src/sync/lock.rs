// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Lock and reentrant lock.

use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore as Permits;

use super::{take_permit, try_take_permit, ReleaseOnDrop};
use crate::bridge;
use crate::error::{Result, TaskId};

/// Mutual exclusion with FIFO hand-off.
///
/// Owned by the worker that acquired it; only that worker may release it.
/// Prefer `with`, which releases on every exit path.
#[derive(Clone)]
pub struct Lock {
    permits: Arc<Permits>,
    owner: Arc<Mutex<Option<TaskId>>>,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Permits::new(1)),
            owner: Arc::new(Mutex::new(None)),
        }
    }

    /// Suspend until the lock is acquired.
    pub fn acquire(&self) -> Result<()> {
        let me = bridge::current_id();
        bridge::call(take_permit(self.permits.clone()))?;
        *self.owner.lock().unwrap() = Some(me);
        Ok(())
    }

    /// Acquire without honouring cancellation or timeouts.
    pub(crate) fn acquire_shielded(&self) -> Result<()> {
        let me = bridge::current_id();
        bridge::call_shielded(take_permit(self.permits.clone()))?;
        *self.owner.lock().unwrap() = Some(me);
        Ok(())
    }

    pub fn try_acquire(&self) -> bool {
        let me = bridge::current_id();
        if !try_take_permit(&self.permits) {
            return false;
        }
        *self.owner.lock().unwrap() = Some(me);
        true
    }

    /// # Panics
    /// Panics if the lock is not held, or is held by another worker.
    pub fn release(&self) {
        let holder = *self.owner.lock().unwrap();
        let Some(holder) = holder else {
            panic!("strand: release of an unlocked lock");
        };
        assert!(
            holder == bridge::current_id(),
            "strand: Lock released by a worker that does not own it"
        );
        // Only the owner clears the record, so it cannot change under us.
        let mut owner = self.owner.lock().unwrap();
        *owner = None;
        self.permits.add_permits(1);
    }

    pub fn locked(&self) -> bool {
        self.owner.lock().unwrap().is_some()
    }

    /// True if the calling worker holds the lock.
    pub(crate) fn held_by_current(&self) -> bool {
        let holder = *self.owner.lock().unwrap();
        holder.is_some_and(|holder| holder == bridge::current_id())
    }

    /// Run `f` holding the lock.
    pub fn with<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.acquire()?;
        let _release = ReleaseOnDrop(|| self.release());
        f()
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("owner", &*self.owner.lock().unwrap())
            .finish()
    }
}

/// Lock that its owner may acquire again; it is freed when every
/// acquisition has been released.
#[derive(Clone)]
pub struct RLock {
    permits: Arc<Permits>,
    owner: Arc<Mutex<Option<(TaskId, usize)>>>,
}

impl RLock {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Permits::new(1)),
            owner: Arc::new(Mutex::new(None)),
        }
    }

    pub fn acquire(&self) -> Result<()> {
        let me = bridge::current_id();
        if self.reenter(me) {
            return Ok(());
        }
        bridge::call(take_permit(self.permits.clone()))?;
        *self.owner.lock().unwrap() = Some((me, 1));
        Ok(())
    }

    pub fn try_acquire(&self) -> bool {
        let me = bridge::current_id();
        if self.reenter(me) {
            return true;
        }
        if !try_take_permit(&self.permits) {
            return false;
        }
        *self.owner.lock().unwrap() = Some((me, 1));
        true
    }

    fn reenter(&self, me: TaskId) -> bool {
        match self.owner.lock().unwrap().as_mut() {
            Some((owner, depth)) if *owner == me => {
                *depth += 1;
                true
            }
            _ => false,
        }
    }

    /// # Panics
    /// Panics if the calling worker does not own the lock.
    pub fn release(&self) {
        let me = bridge::current_id();
        let mut owner = self.owner.lock().unwrap();
        let held = matches!(*owner, Some((holder, _)) if holder == me);
        if !held {
            drop(owner);
            panic!("strand: RLock released by a worker that does not own it");
        }
        if let Some((_, depth)) = owner.as_mut() {
            *depth -= 1;
            if *depth == 0 {
                *owner = None;
                self.permits.add_permits(1);
            }
        }
    }

    pub fn locked(&self) -> bool {
        self.owner.lock().unwrap().is_some()
    }

    pub fn with<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.acquire()?;
        let _release = ReleaseOnDrop(|| self.release());
        f()
    }
}

impl Default for RLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RLock")
            .field("owner", &*self.owner.lock().unwrap())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run;

    #[test]
    fn lock_and_release() {
        run(|| {
            let lock = Lock::new();
            lock.acquire()?;
            assert!(lock.locked());
            assert!(!lock.try_acquire());
            lock.release();
            assert!(!lock.locked());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    #[should_panic(expected = "release of an unlocked lock")]
    fn release_unlocked_panics() {
        Lock::new().release();
    }

    #[test]
    #[should_panic(expected = "does not own it")]
    fn lock_rejects_foreign_release() {
        let _ = run(|| {
            let lock = Lock::new();
            let holder = {
                let lock = lock.clone();
                crate::spawn(move || {
                    lock.acquire()?;
                    crate::sleep(std::time::Duration::from_secs(10))
                })?
            };
            while !lock.locked() {
                crate::sleep(std::time::Duration::from_millis(1))?;
            }
            lock.release();
            holder.join()
        });
    }

    #[test]
    fn with_releases_on_error() {
        run(|| {
            let lock = Lock::new();
            let out: Result<()> = lock.with(|| Err(crate::Error::StreamClosed));
            assert!(out.is_err());
            assert!(!lock.locked());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn rlock_reenters() {
        run(|| {
            let lock = RLock::new();
            lock.acquire()?;
            lock.acquire()?;
            lock.release();
            assert!(lock.locked());
            lock.release();
            assert!(!lock.locked());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn rlock_rejects_foreign_release() {
        let err = run(|| {
            let lock = RLock::new();
            lock.acquire()?;
            let other = lock.clone();
            crate::spawn(move || {
                other.release();
                Ok(())
            })?
            .join()
        })
        .unwrap_err();
        assert!(matches!(err, crate::Error::TaskFailed { .. }));
    }
}
