// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Dispatcher: the per-run task that promotes and retires workers.
//!
//! All start/stop requests of a run funnel through one unbounded channel,
//! so the registry has a single writer and needs no lock. Replies go back
//! on a std one-shot channel; those can be waited on from thread-local
//! destructors, where the runtime's own thread-locals may already be gone.

use std::collections::HashMap;
use std::sync::{mpsc as std_mpsc, Arc};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::proxy::{self, Job};
use crate::config::Config;
use crate::error::TaskId;
use crate::task::TaskRegistry;

/// Bridge request. Consumed exactly once by the dispatcher.
pub(crate) enum Request {
    Start {
        worker: TaskId,
        reply: std_mpsc::SyncSender<mpsc::UnboundedSender<Job>>,
    },
    Stop {
        worker: TaskId,
        reply: std_mpsc::SyncSender<()>,
    },
}

struct ProxyEntry {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Dispatcher state. Lives inside the dispatcher task only.
pub(crate) struct Dispatcher {
    proxies: HashMap<TaskId, ProxyEntry>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            proxies: HashMap::new(),
        }
    }

    /// Serve requests until `shutdown` fires, then force-cancel every proxy
    /// whose worker never retired.
    pub async fn serve(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                request = requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
            }
        }

        for (worker, proxy) in self.proxies.drain() {
            warn!(%worker, "force-cancelling proxy of a worker that never retired");
            proxy.task.abort();
        }
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Start { worker, reply } => {
                let (jobs, inbox) = mpsc::unbounded_channel();
                let (stop, stopped) = oneshot::channel();
                let task = tokio::spawn(proxy::serve(worker, inbox, stopped));
                self.proxies.insert(worker, ProxyEntry { stop, task });
                debug!(%worker, "promoted worker");
                let _ = reply.send(jobs);
            }
            Request::Stop { worker, reply } => {
                if let Some(proxy) = self.proxies.remove(&worker) {
                    let _ = proxy.stop.send(());
                    let _ = proxy.task.await;
                    debug!(%worker, "retired worker");
                }
                let _ = reply.send(());
            }
        }
    }
}

/// Cloneable access to a run's dispatcher from worker threads.
#[derive(Clone)]
pub(crate) struct DispatcherHandle {
    requests: mpsc::UnboundedSender<Request>,
    runtime: Handle,
    config: Arc<Config>,
    tasks: Arc<TaskRegistry>,
}

impl DispatcherHandle {
    pub fn new(
        requests: mpsc::UnboundedSender<Request>,
        runtime: Handle,
        config: Arc<Config>,
    ) -> Self {
        Self {
            requests,
            runtime,
            config,
            tasks: Arc::new(TaskRegistry::default()),
        }
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Ask for a proxy. Blocks the calling thread. `None` once the run has
    /// shut down.
    pub fn start(&self, worker: TaskId) -> Option<mpsc::UnboundedSender<Job>> {
        let (reply, answer) = std_mpsc::sync_channel(1);
        self.requests.send(Request::Start { worker, reply }).ok()?;
        answer.recv().ok()
    }

    /// Retire a proxy. Blocks until the dispatcher has joined it.
    pub fn stop(&self, worker: TaskId) {
        let (reply, answer) = std_mpsc::sync_channel(1);
        if self.requests.send(Request::Stop { worker, reply }).is_ok() {
            let _ = answer.recv();
        }
    }
}
