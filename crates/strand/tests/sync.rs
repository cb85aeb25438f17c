// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Integration tests for the synchronization primitives under contention
//! and cancellation.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strand::sync::{Condition, Event, Lock, RLock, Semaphore};
use strand::{Error, Result};

#[test]
fn lock_protects_counter_across_workers() {
    let total = strand::run(|| {
        let lock = Lock::new();
        let start = Event::new();
        let counter = Arc::new(AtomicI64::new(0));

        let worker = |step: i64| {
            let (lock, start, counter) = (lock.clone(), start.clone(), counter.clone());
            move || -> Result<()> {
                start.wait()?;
                for _ in 0..10_000 {
                    lock.with(|| {
                        // Non-atomic read-modify-write: only the lock keeps it exact.
                        let value = counter.load(Ordering::Relaxed);
                        counter.store(value + step, Ordering::Relaxed);
                        Ok(())
                    })?;
                }
                Ok(())
            }
        };

        let up = strand::spawn(worker(1))?;
        let down = strand::spawn(worker(-1))?;
        start.set();
        up.join()?;
        down.join()?;
        Ok(counter.load(Ordering::SeqCst))
    })
    .unwrap();
    assert_eq!(total, 0);
}

#[test]
fn cancelled_acquire_leaves_no_owner() {
    strand::run(|| {
        let lock = Lock::new();
        lock.acquire()?;

        let contender = {
            let lock = lock.clone();
            strand::spawn(move || lock.acquire())?
        };
        strand::sleep(Duration::from_millis(50))?;
        contender.cancel()?;
        assert!(matches!(contender.join(), Err(Error::TaskCancelled { .. })));

        lock.release();
        assert!(!lock.locked());
        Ok(())
    })
    .unwrap();
}

#[test]
fn cancelled_rlock_acquire_leaves_no_owner_or_depth() {
    strand::run(|| {
        let lock = RLock::new();
        lock.acquire()?;

        let contender = {
            let lock = lock.clone();
            strand::spawn(move || lock.acquire())?
        };
        strand::sleep(Duration::from_millis(50))?;
        contender.cancel()?;
        assert!(matches!(contender.join(), Err(Error::TaskCancelled { .. })));

        // One release frees it: the cancelled acquire added no depth.
        lock.release();
        assert!(!lock.locked());

        let next = {
            let lock = lock.clone();
            strand::spawn(move || {
                assert!(lock.try_acquire());
                lock.release();
                Ok(lock.locked())
            })?
        };
        assert!(!next.join()?);
        Ok(())
    })
    .unwrap();
}

#[test]
fn foreign_lock_release_fails_the_releaser() {
    strand::run(|| {
        let lock = Lock::new();
        lock.acquire()?;
        let intruder = {
            let lock = lock.clone();
            strand::spawn(move || {
                lock.release();
                Ok(())
            })?
        };
        assert!(matches!(intruder.join(), Err(Error::TaskFailed { .. })));
        assert!(lock.locked());
        assert!(!lock.try_acquire());
        lock.release();
        Ok(())
    })
    .unwrap();
}

#[test]
fn timed_out_acquire_leaves_no_owner() {
    strand::run(|| {
        let lock = Lock::new();
        lock.acquire()?;
        let waited = strand::ignore_after(Duration::from_millis(20), || lock.acquire())?;
        assert_eq!(waited, None);
        lock.release();
        assert!(!lock.locked());
        assert!(lock.try_acquire());
        lock.release();
        Ok(())
    })
    .unwrap();
}

#[test]
fn lock_hands_off_in_fifo_order() {
    let order = strand::run(|| {
        let lock = Lock::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        lock.acquire()?;

        let mut tasks = Vec::new();
        for n in 0..3 {
            let (lock, order) = (lock.clone(), order.clone());
            tasks.push(strand::spawn(move || {
                lock.with(|| {
                    order.lock().unwrap().push(n);
                    Ok(())
                })
            })?);
            // Let each contender queue up before the next one.
            strand::sleep(Duration::from_millis(30))?;
        }
        lock.release();
        for task in tasks {
            task.join()?;
        }
        let order = order.lock().unwrap().clone();
        Ok(order)
    })
    .unwrap();
    assert_eq!(order, vec![0, 1, 2]);
}

#[test]
fn semaphore_limits_concurrency() {
    strand::run(|| {
        let sem = Semaphore::new(2);
        let inside = Arc::new(AtomicI64::new(0));
        let peak = Arc::new(AtomicI64::new(0));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let (sem, inside, peak) = (sem.clone(), inside.clone(), peak.clone());
            tasks.push(strand::spawn(move || {
                sem.with(|| {
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    strand::sleep(Duration::from_millis(10))?;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })?);
        }
        for task in tasks {
            task.join()?;
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(sem.value(), 2);
        Ok(())
    })
    .unwrap();
}

#[test]
fn notify_wakes_oldest_waiters_first() {
    let woken = strand::run(|| {
        let cond = Condition::new();
        let woken = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for n in 0..3 {
            let (cond, woken) = (cond.clone(), woken.clone());
            tasks.push(strand::spawn(move || {
                cond.with(|| {
                    cond.wait()?;
                    woken.lock().unwrap().push(n);
                    Ok(())
                })
            })?);
            strand::sleep(Duration::from_millis(30))?;
        }

        cond.with(|| {
            cond.notify(2);
            Ok(())
        })?;
        strand::sleep(Duration::from_millis(50))?;
        let mut first = woken.lock().unwrap().clone();
        first.sort();
        assert_eq!(first, vec![0, 1]);

        cond.with(|| {
            cond.notify_all();
            Ok(())
        })?;
        for task in tasks {
            task.join()?;
        }
        let woken = woken.lock().unwrap().clone();
        Ok(woken)
    })
    .unwrap();
    assert_eq!(woken.len(), 3);
    assert_eq!(woken[2], 2);
}

#[test]
fn event_wait_is_cancellable() {
    strand::run(|| {
        let event = Event::new();
        let waiter = {
            let event = event.clone();
            strand::spawn(move || event.wait())?
        };
        strand::sleep(Duration::from_millis(20))?;
        waiter.cancel()?;
        assert!(!event.is_set());
        assert!(matches!(waiter.join(), Err(Error::TaskCancelled { .. })));
        Ok(())
    })
    .unwrap();
}
