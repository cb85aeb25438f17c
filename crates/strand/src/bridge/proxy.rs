// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Proxy task: the scheduler-side shadow of one promoted worker.

use std::future::{self, Future};
use std::pin::Pin;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::trace;

use crate::cancel::CancelToken;
use crate::error::{Error, Result, ScopeId, TaskId};

/// Type-erased operation shipped from a worker. The typed result travels
/// back on a one-shot captured inside the future.
pub(crate) type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A timeout region's expiry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    pub scope: ScopeId,
    pub at: Instant,
}

/// Run jobs one at a time until the dispatcher signals `stop`.
///
/// The worker is blocked while its job runs, so jobs never overlap.
pub(crate) async fn serve(
    worker: TaskId,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    mut stop: oneshot::Receiver<()>,
) {
    trace!(%worker, "proxy started");
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            job = jobs.recv() => match job {
                Some(job) => job.await,
                None => break,
            },
        }
    }
    trace!(%worker, "proxy stopped");
}

/// Race `op` against the worker's cancellation and its nearest deadline.
///
/// A cancellation requested before the call is delivered here without
/// starting `op`; an already expired deadline likewise. When `op` loses
/// the race it is dropped without being polled again.
pub(crate) async fn relay<T, F>(op: F, cancel: &CancelToken, deadline: Option<Deadline>) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.take() {
        return Err(Error::cancelled());
    }

    let expiry = async move {
        match deadline {
            Some(deadline) => {
                time::sleep_until(deadline.at.into()).await;
                deadline.scope
            }
            None => future::pending().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled()),
        scope = expiry => {
            trace!(?scope, "timeout scope expired");
            Err(Error::timeout(scope))
        }
        result = op => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn block_on<F: Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[test]
    fn relay_returns_result() {
        let token = CancelToken::new();
        let out = block_on(relay(async { Ok(5) }, &token, None));
        assert_eq!(out.unwrap(), 5);
    }

    #[test]
    fn relay_delivers_pending_cancel_once() {
        let token = CancelToken::new();
        token.cancel();
        let out = block_on(relay(async { Ok(5) }, &token, None));
        assert!(matches!(out, Err(Error::Cancelled { .. })));
        let out = block_on(relay(async { Ok(6) }, &token, None));
        assert_eq!(out.unwrap(), 6);
    }

    #[test]
    fn relay_expires_deadline() {
        let token = CancelToken::new();
        let deadline = Deadline {
            scope: ScopeId(9),
            at: Instant::now() + Duration::from_millis(20),
        };
        let slow = async {
            time::sleep(Duration::from_secs(5)).await;
            Ok(())
        };
        let out = block_on(relay(slow, &token, Some(deadline)));
        assert_eq!(out.unwrap_err().timeout_scope(), Some(ScopeId(9)));
    }
}
