// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Promotion bridge: lets an ordinary OS thread issue scheduler operations
//! as plain blocking function calls.
//!
//! A thread is promoted on its first scheduler call. Promotion asks the
//! run's dispatcher for a proxy task; from then on every call is packaged
//! as a job, handed to that proxy, and the thread blocks on a one-shot
//! reply until the scheduler has run the job to completion (or cancelled
//! it). Thread exit runs the worker's teardown hooks, the oldest of which
//! retires the proxy.
//!
//! Components:
//! - `dispatcher`: per-run singleton task owning the worker → proxy registry
//! - `proxy`: per-worker task that runs jobs and races them against
//!   cancellation and timeout deadlines

pub(crate) mod dispatcher;
pub(crate) mod proxy;

use std::cell::RefCell;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::cancel::CancelToken;
use crate::error::{Error, Result, ScopeId, TaskId};

pub(crate) use dispatcher::DispatcherHandle;
use proxy::{Deadline, Job};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Dispatcher reachable from threads that were not spawned by strand.
/// Claimed by the first active run.
static ACTIVE: Mutex<Option<DispatcherHandle>> = Mutex::new(None);

/// Who a worker is: fixed before the thread starts so its handle can
/// cancel it even before it promotes.
pub(crate) struct Identity {
    pub id: TaskId,
    pub cancel: Arc<CancelToken>,
}

impl Identity {
    pub fn fresh() -> Self {
        Self {
            id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)),
            cancel: Arc::new(CancelToken::new()),
        }
    }
}

/// Per-thread record of a promoted worker.
struct Worker {
    id: TaskId,
    jobs: mpsc::UnboundedSender<Job>,
    cancel: Arc<CancelToken>,
    scopes: Vec<Deadline>,
    teardown: Vec<Box<dyn FnOnce()>>,
}

impl Worker {
    fn nearest_deadline(&self) -> Option<Deadline> {
        self.scopes.iter().min_by_key(|d| d.at).copied()
    }
}

/// Thread-local slot. Threads that exit without `terminate()` (foreign
/// threads promoted through `enable()`) still run their hooks here.
struct WorkerSlot(RefCell<Option<Worker>>);

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        if let Some(mut worker) = self.0.get_mut().take() {
            while let Some(hook) = worker.teardown.pop() {
                hook();
            }
        }
    }
}

thread_local! {
    static WORKER: WorkerSlot = WorkerSlot(RefCell::new(None));
    static DISPATCHER: RefCell<Option<DispatcherHandle>> = const { RefCell::new(None) };
    static IDENTITY: RefCell<Option<Identity>> = const { RefCell::new(None) };
}

/// Point the calling thread at a dispatcher (and optionally a pre-made
/// identity for its first promotion).
pub(crate) fn adopt(dispatcher: Option<DispatcherHandle>, identity: Option<Identity>) {
    IDENTITY.with(|slot| *slot.borrow_mut() = identity);
    DISPATCHER.with(|slot| *slot.borrow_mut() = dispatcher);
}

/// Claim the process-wide slot. Returns false if another run holds it.
pub(crate) fn claim_global(dispatcher: &DispatcherHandle) -> bool {
    let mut active = ACTIVE.lock().unwrap();
    if active.is_some() {
        return false;
    }
    *active = Some(dispatcher.clone());
    true
}

pub(crate) fn release_global() {
    ACTIVE.lock().unwrap().take();
}

pub(crate) fn try_dispatcher() -> Option<DispatcherHandle> {
    DISPATCHER
        .with(|slot| slot.borrow().clone())
        .or_else(|| ACTIVE.lock().unwrap().clone())
}

/// The dispatcher of the run this thread belongs to.
///
/// # Panics
/// Panics if no scheduler is running.
pub(crate) fn dispatcher() -> DispatcherHandle {
    match try_dispatcher() {
        Some(dispatcher) => dispatcher,
        None => panic!("strand: no scheduler is running; wrap the program in strand::run()"),
    }
}

/// True if the calling thread already belongs to a run.
pub(crate) fn in_run() -> bool {
    WORKER.with(|slot| slot.0.borrow().is_some())
        || DISPATCHER.with(|slot| slot.borrow().is_some())
}

fn promote() -> Worker {
    let dispatcher = dispatcher();
    let identity = IDENTITY
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(Identity::fresh);
    let Some(jobs) = dispatcher.start(identity.id) else {
        panic!("strand: the scheduler has shut down");
    };

    let id = identity.id;
    let retire: Box<dyn FnOnce()> = Box::new(move || dispatcher.stop(id));
    Worker {
        id,
        jobs,
        cancel: identity.cancel,
        scopes: Vec::new(),
        teardown: vec![retire],
    }
}

fn with_worker<R>(f: impl FnOnce(&mut Worker) -> R) -> R {
    WORKER.with(|slot| {
        let mut slot = slot.0.borrow_mut();
        let worker = slot.get_or_insert_with(promote);
        f(worker)
    })
}

/// Run `op` on the scheduler on behalf of the calling thread. The call is
/// a suspension point: pending cancellation and expired timeout scopes are
/// delivered here.
pub(crate) fn call<T, F>(op: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    submit(op, true)
}

/// Like `call`, but the operation cannot be interrupted.
pub(crate) fn call_shielded<T, F>(op: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    submit(op, false)
}

fn submit<T, F>(op: F, interruptible: bool) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let (jobs, cancel, deadline) =
        with_worker(|w| (w.jobs.clone(), w.cancel.clone(), w.nearest_deadline()));

    let (reply, outcome) = oneshot::channel();
    let job: Job = if interruptible {
        Box::pin(async move {
            let _ = reply.send(proxy::relay(op, &cancel, deadline).await);
        })
    } else {
        Box::pin(async move {
            let _ = reply.send(op.await);
        })
    };

    if jobs.send(job).is_err() {
        // Proxy is gone: the run is shutting down around us.
        return Err(Error::cancelled());
    }
    outcome
        .blocking_recv()
        .unwrap_or_else(|_| Err(Error::cancelled()))
}

/// Id of the calling worker, promoting it if needed.
pub(crate) fn current_id() -> TaskId {
    with_worker(|w| w.id)
}

pub(crate) fn push_scope(at: Instant) -> ScopeId {
    let scope = ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed));
    with_worker(|w| w.scopes.push(Deadline { scope, at }));
    scope
}

pub(crate) fn pop_scope(scope: ScopeId) {
    let _ = WORKER.try_with(|slot| {
        if let Some(worker) = slot.0.borrow_mut().as_mut() {
            worker.scopes.retain(|d| d.scope != scope);
        }
    });
}

/// Run the calling worker's teardown hooks (newest first) and drop its
/// record. The first hook registered at promotion retires the proxy.
pub(crate) fn terminate() {
    loop {
        let hook = WORKER.with(|slot| {
            slot.0
                .borrow_mut()
                .as_mut()
                .and_then(|worker| worker.teardown.pop())
        });
        match hook {
            Some(hook) => hook(),
            None => break,
        }
    }
    WORKER.with(|slot| slot.0.borrow_mut().take());
}

/// Promote the calling thread now instead of on its first blocking call.
///
/// # Panics
/// Panics if no scheduler is running.
pub fn enable() {
    with_worker(|_| ());
}

/// Register `hook` to run when the calling worker terminates. Hooks run
/// newest first, before the worker's proxy is retired.
pub fn at_exit(hook: impl FnOnce() + 'static) {
    with_worker(|w| w.teardown.push(Box::new(hook)));
}

/// Id of the calling worker.
pub fn current_task() -> TaskId {
    current_id()
}
