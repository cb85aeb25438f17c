// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative cancellation token.
//!
//! AtomicBool flag + notify. The flag is consumed when a cancellation is
//! delivered, so each request interrupts exactly one pending operation.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Cancellation token shared between a worker and whoever holds its handle.
#[derive(Debug)]
pub(crate) struct CancelToken {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Request cancellation. Delivered at the next suspension point.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        // notify_one keeps a permit if nobody is waiting yet.
        self.notify.notify_one();
    }

    /// Check if cancellation was requested and not yet delivered.
    #[cfg(test)]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Consume a pending cancellation.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }

    /// Resolves once a cancellation is pending, consuming it.
    pub async fn cancelled(&self) {
        loop {
            if self.take() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
