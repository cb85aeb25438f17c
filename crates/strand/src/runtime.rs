// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Entry point: boot a scheduler, run a program on it, tear it down.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tokio::runtime::Builder;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::bridge::{self, dispatcher::Dispatcher, DispatcherHandle};
use crate::config::Config;
use crate::error::Result;

/// Run `entry` as the main worker of a fresh scheduler with the default
/// configuration.
///
/// See [`run_with`].
pub fn run<T, F>(entry: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    run_with(Config::default(), entry)
}

/// Run `entry` as the main worker of a fresh scheduler.
///
/// The scheduler is driven on its own thread for the duration of the call.
/// When `entry` returns, tasks still running are cancelled, non-daemon
/// task threads are joined, and the scheduler shuts down. An error from
/// `entry` is returned; a panic is resumed on the caller.
///
/// # Panics
/// Panics if called from a thread that already belongs to a run.
pub fn run_with<T, F>(config: Config, entry: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    config.validate()?;
    assert!(
        !bridge::in_run(),
        "strand: run() cannot be nested inside a worker"
    );

    let scheduler = Builder::new_current_thread().enable_all().build()?;
    let (requests, inbox) = mpsc::unbounded_channel();
    let (shutdown, shutdown_rx) = oneshot::channel();
    let dispatcher = DispatcherHandle::new(
        requests,
        scheduler.handle().clone(),
        Arc::new(config),
    );

    let driver = thread::Builder::new()
        .name(format!("{}-scheduler", dispatcher.config().thread_name))
        .spawn(move || scheduler.block_on(Dispatcher::new().serve(inbox, shutdown_rx)))?;
    debug!("scheduler started");

    let claimed = bridge::claim_global(&dispatcher);
    bridge::adopt(Some(dispatcher.clone()), None);

    let outcome = panic::catch_unwind(AssertUnwindSafe(entry));

    dispatcher.tasks().reap();
    bridge::terminate();
    bridge::adopt(None, None);
    if claimed {
        bridge::release_global();
    }

    let _ = shutdown.send(());
    if driver.join().is_err() {
        warn!("scheduler thread panicked");
    }
    debug!("scheduler stopped");

    match outcome {
        Ok(result) => result,
        Err(payload) => panic::resume_unwind(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn returns_entry_value() {
        assert_eq!(run(|| Ok(7)).unwrap(), 7);
    }

    #[test]
    fn propagates_entry_error() {
        let err = run(|| -> Result<()> { Err(Error::custom("bad input")) }).unwrap_err();
        assert_eq!(err.to_string(), "bad input");
    }

    #[test]
    fn rejects_invalid_config() {
        let err = run_with(Config::new().read_chunk(0), || Ok(())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    #[should_panic(expected = "kaboom")]
    fn resumes_entry_panic() {
        let _ = run(|| -> Result<()> { panic!("kaboom") });
    }

    #[test]
    fn sequential_runs_are_independent() {
        for _ in 0..3 {
            run(|| crate::sleep(std::time::Duration::from_millis(1))).unwrap();
        }
    }
}
