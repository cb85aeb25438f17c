// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Event: a boolean flag workers can wait on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::bridge;
use crate::error::Result;

struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

/// `wait()` suspends until `set()`; nothing else ever suspends.
#[derive(Clone)]
pub struct Event {
    inner: Arc<Inner>,
}

impl Event {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Set the flag and wake every waiter.
    pub fn set(&self) {
        self.inner.flag.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn clear(&self) {
        self.inner.flag.store(false, Ordering::Release);
    }

    /// Suspend until the flag is set. Returns immediately if it already is.
    pub fn wait(&self) -> Result<()> {
        if self.is_set() {
            return Ok(());
        }
        let inner = self.inner.clone();
        bridge::call(async move {
            loop {
                let notified = inner.notify.notified();
                tokio::pin!(notified);
                // Register before checking, or a `set` in between is lost.
                notified.as_mut().enable();
                if inner.flag.load(Ordering::Acquire) {
                    return Ok(());
                }
                notified.await;
            }
        })
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("set", &self.is_set()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_never_suspends() {
        let event = Event::new();
        assert!(!event.is_set());
        event.set();
        assert!(event.is_set());
        event.clear();
        assert!(!event.is_set());
    }

    #[test]
    fn wait_returns_once_set() {
        crate::run(|| {
            let event = Event::new();
            let setter = event.clone();
            let task = crate::spawn(move || {
                crate::sleep(std::time::Duration::from_millis(10))?;
                setter.set();
                Ok(())
            })?;
            event.wait()?;
            task.join()
        })
        .unwrap();
    }
}
