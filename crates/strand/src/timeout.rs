// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Sleep and timeout regions.
//!
//! A timeout region pushes a deadline on the calling worker's scope stack.
//! Every suspension point inside the region races the nearest deadline;
//! the first to expire is delivered as `Error::Timeout` tagged with the
//! region that owns it, so an inner region never mistakes an outer one's
//! expiry (or a plain cancellation) for its own.

use std::time::{Duration, Instant};

use crate::bridge;
use crate::error::{Error, Result, ScopeId};

/// Suspend the calling worker for `duration`.
///
/// Cancellation and expired timeout regions are delivered here.
pub fn sleep(duration: Duration) -> Result<()> {
    bridge::call(async move {
        tokio::time::sleep(duration).await;
        Ok(())
    })
}

/// Guard form of a timeout region. The region ends when the guard drops.
///
/// ```ignore
/// let scope = strand::timeout_scope(Duration::from_secs(1));
/// let line = scope.finish(stream.readline())?;
/// ```
#[derive(Debug)]
pub struct TimeoutScope {
    id: ScopeId,
    deadline: Instant,
}

impl TimeoutScope {
    /// Open a region expiring `duration` from now.
    ///
    /// # Panics
    /// Panics if no scheduler is running.
    pub fn new(duration: Duration) -> Self {
        let deadline = Instant::now() + duration;
        let id = bridge::push_scope(deadline);
        Self { id, deadline }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// True if `err` is this region's own expiry.
    pub fn owns(&self, err: &Error) -> bool {
        err.timeout_scope() == Some(self.id)
    }

    /// Close the region, passing `result` through unchanged.
    pub fn finish<T>(self, result: Result<T>) -> Result<T> {
        result
    }

    /// Close the region, turning its own expiry into `Ok(None)`.
    pub fn ignore<T>(self, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if self.owns(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl Drop for TimeoutScope {
    fn drop(&mut self) {
        bridge::pop_scope(self.id);
    }
}

/// Open a timeout region; see [`TimeoutScope`].
pub fn timeout_scope(duration: Duration) -> TimeoutScope {
    TimeoutScope::new(duration)
}

/// Run `f` inside a timeout region.
///
/// Returns `Err(Error::Timeout { .. })` if a suspension point inside `f`
/// was still pending when `duration` elapsed.
pub fn timeout_after<T, F>(duration: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let scope = TimeoutScope::new(duration);
    let result = f();
    scope.finish(result)
}

/// Run `f` inside a timeout region, yielding `Ok(None)` if it expires.
///
/// Outer timeouts and cancellation propagate unchanged.
pub fn ignore_after<T, F>(duration: Duration, f: F) -> Result<Option<T>>
where
    F: FnOnce() -> Result<T>,
{
    let scope = TimeoutScope::new(duration);
    let result = f();
    scope.ignore(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run;

    #[test]
    fn sleep_short() {
        run(|| {
            let start = Instant::now();
            sleep(Duration::from_millis(10))?;
            assert!(start.elapsed() >= Duration::from_millis(9));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn timeout_completes() {
        let value = run(|| timeout_after(Duration::from_secs(1), || Ok(42))).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn timeout_expires() {
        run(|| {
            let start = Instant::now();
            let err = timeout_after(Duration::from_millis(20), || sleep(Duration::from_secs(10)))
                .unwrap_err();
            assert!(matches!(err, Error::Timeout { .. }));
            assert!(start.elapsed() < Duration::from_secs(5));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn ignore_swallows_own_expiry() {
        let out = run(|| ignore_after(Duration::from_millis(10), || sleep(Duration::from_secs(10))))
            .unwrap();
        assert_eq!(out, None);
    }

    #[test]
    fn outer_expiry_passes_through_inner_ignore() {
        run(|| {
            let outer = timeout_scope(Duration::from_millis(20));
            let inner = ignore_after(Duration::from_secs(10), || sleep(Duration::from_secs(10)));
            let err = inner.unwrap_err();
            assert!(outer.owns(&err));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn scope_closes_on_drop() {
        run(|| {
            {
                let _scope = timeout_scope(Duration::from_millis(5));
            }
            sleep(Duration::from_millis(20))
        })
        .unwrap();
    }
}
