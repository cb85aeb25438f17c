// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Condition variable over a `Lock`.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::Lock;
use crate::bridge;
use crate::error::Result;

type Waiters = Arc<Mutex<VecDeque<oneshot::Sender<()>>>>;

/// Wake the oldest waiter still listening. Returns false if none is left.
fn wake_one(waiters: &Waiters) -> bool {
    let mut waiters = waiters.lock().unwrap();
    while let Some(waiter) = waiters.pop_front() {
        if waiter.send(()).is_ok() {
            return true;
        }
    }
    false
}

/// One suspended `wait()`. A waiter dropped after its wakeup was sent but
/// before it was observed passes the wakeup on, so a cancelled wait never
/// swallows a notification.
struct Waiter {
    wakeup: oneshot::Receiver<()>,
    waiters: Waiters,
    woken: bool,
}

impl Future for Waiter {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        match Pin::new(&mut self.wakeup).poll(cx) {
            Poll::Ready(_) => {
                self.woken = true;
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if self.woken {
            return;
        }
        self.wakeup.close();
        if self.wakeup.try_recv().is_ok() {
            wake_one(&self.waiters);
        }
    }
}

/// Condition variable. `wait` and `notify` require the calling worker to
/// hold the lock.
#[derive(Clone)]
pub struct Condition {
    lock: Lock,
    waiters: Waiters,
}

impl Condition {
    /// A condition with a lock of its own.
    pub fn new() -> Self {
        Self::with_lock(Lock::new())
    }

    /// A condition sharing an existing lock.
    pub fn with_lock(lock: Lock) -> Self {
        Self {
            lock,
            waiters: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    pub fn acquire(&self) -> Result<()> {
        self.lock.acquire()
    }

    pub fn release(&self) {
        self.lock.release();
    }

    pub fn locked(&self) -> bool {
        self.lock.locked()
    }

    pub fn with<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.lock.with(f)
    }

    /// Release the lock, suspend until notified, reacquire the lock.
    ///
    /// The lock is held again when this returns, whether it returns `Ok`
    /// or a cancellation.
    ///
    /// # Panics
    /// Panics if the lock is not held.
    pub fn wait(&self) -> Result<()> {
        assert!(
            self.lock.held_by_current(),
            "strand: wait on a condition whose lock is not held"
        );
        let (notify, wakeup) = oneshot::channel();
        self.waiters.lock().unwrap().push_back(notify);
        let waiter = Waiter {
            wakeup,
            waiters: self.waiters.clone(),
            woken: false,
        };

        self.lock.release();
        let woken = bridge::call(waiter);
        let reacquired = self.lock.acquire_shielded();
        woken.and(reacquired)
    }

    /// Wait until `predicate` holds, checking it with the lock held.
    pub fn wait_for(&self, mut predicate: impl FnMut() -> bool) -> Result<()> {
        while !predicate() {
            self.wait()?;
        }
        Ok(())
    }

    /// Wake up to `n` waiters, oldest first.
    ///
    /// # Panics
    /// Panics if the lock is not held.
    pub fn notify(&self, n: usize) {
        assert!(
            self.lock.held_by_current(),
            "strand: notify on a condition whose lock is not held"
        );
        for _ in 0..n {
            if !wake_one(&self.waiters) {
                break;
            }
        }
    }

    pub fn notify_all(&self) {
        let n = self.waiters.lock().unwrap().len();
        self.notify(n);
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{run, spawn};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    #[should_panic(expected = "lock is not held")]
    fn wait_without_lock_panics() {
        let _ = Condition::new().wait();
    }

    #[test]
    #[should_panic(expected = "lock is not held")]
    fn notify_from_non_owner_panics() {
        let _ = run(|| {
            let cond = Condition::new();
            let holder = {
                let cond = cond.clone();
                spawn(move || cond.with(|| crate::sleep(Duration::from_secs(10))))?
            };
            while !cond.locked() {
                crate::sleep(Duration::from_millis(1))?;
            }
            cond.notify(1);
            holder.join()
        });
    }

    #[test]
    fn notify_wakes_waiter_with_lock_held() {
        run(|| {
            let cond = Condition::new();
            let ready = Arc::new(AtomicUsize::new(0));

            let waiter = {
                let (cond, ready) = (cond.clone(), ready.clone());
                spawn(move || {
                    cond.with(|| {
                        cond.wait_for(|| ready.load(Ordering::SeqCst) == 1)?;
                        assert!(cond.locked());
                        Ok(())
                    })
                })?
            };

            crate::sleep(Duration::from_millis(20))?;
            cond.with(|| {
                ready.store(1, Ordering::SeqCst);
                cond.notify_all();
                Ok(())
            })?;
            waiter.join()?;
            assert!(!cond.locked());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn cancelled_waiter_reacquires_and_passes_nothing_on() {
        run(|| {
            let cond = Condition::new();
            let task = {
                let cond = cond.clone();
                spawn(move || cond.with(|| cond.wait()))?
            };
            crate::sleep(Duration::from_millis(20))?;
            task.cancel()?;
            assert!(matches!(task.join(), Err(crate::Error::TaskCancelled { .. })));
            assert!(!cond.locked());
            Ok(())
        })
        .unwrap();
    }
}
