// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Synchronization primitives for workers.
//!
//! Every wait is a suspension point on the scheduler, so cancellation and
//! timeouts are delivered into it. Waits are built on the scheduler's FIFO
//! semaphore: a wait that is cancelled before it was granted never takes a
//! permit, which is what keeps a cancelled `acquire` from leaving a phantom
//! owner behind. Releases never suspend and touch the semaphore directly.
//!
//! Primitives are cheap handles (`Clone`) over shared state.

mod condition;
mod event;
mod lock;
mod semaphore;

pub use condition::Condition;
pub use event::Event;
pub use lock::{Lock, RLock};
pub use semaphore::{BoundedSemaphore, Semaphore};

use std::sync::Arc;

use tokio::sync::Semaphore as Permits;

use crate::error::Result;

/// Wait for one permit and keep it; the holder gives it back with
/// `add_permits(1)`.
pub(crate) async fn take_permit(permits: Arc<Permits>) -> Result<()> {
    match permits.acquire().await {
        Ok(permit) => {
            permit.forget();
            Ok(())
        }
        Err(_) => unreachable!("strand semaphores are never closed"),
    }
}

pub(crate) fn try_take_permit(permits: &Permits) -> bool {
    match permits.try_acquire() {
        Ok(permit) => {
            permit.forget();
            true
        }
        Err(_) => false,
    }
}

/// Runs `release` when dropped, including during unwinding.
pub(crate) struct ReleaseOnDrop<F: FnMut()>(pub F);

impl<F: FnMut()> Drop for ReleaseOnDrop<F> {
    fn drop(&mut self) {
        (self.0)();
    }
}
