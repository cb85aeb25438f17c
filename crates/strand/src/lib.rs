// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Strand: thread-style concurrency on a cooperative scheduler.
//!
//! Programs are written against blocking calls on ordinary OS threads
//! (spawn, join, cancel, locks, queues, stream reads and writes), while each
//! blocking call is executed as a suspension point of a lightweight task on
//! a single-threaded tokio scheduler. Because every wait happens on the
//! scheduler, cancellation and timeouts reach threads that are blocked
//! inside those calls, and interrupted I/O reports exactly how much it
//! moved.
//!
//! ```ignore
//! strand::run(|| {
//!     let task = strand::spawn(|| Ok(2 + 3))?;
//!     assert_eq!(task.join()?, 5);
//!     strand::timeout_after(Duration::from_millis(250), || strand::sleep(Duration::from_secs(1)))
//! })
//! ```
//!
//! Components:
//! - bridge: promotes threads into workers and relays their calls
//! - runtime: scheduler lifetime (`run`, `run_with`)
//! - task/group: spawn, join, cancel; policy-driven task groups
//! - timeout: sleep and timeout regions
//! - sync/queue: cancellation-safe primitives
//! - io: buffered streams over non-blocking endpoints

mod bridge;
mod cancel;
pub mod config;
pub mod error;
pub mod group;
pub mod io;
pub mod queue;
mod runtime;
pub mod sync;
pub mod task;
pub mod timeout;

pub use bridge::{at_exit, current_task, enable};
pub use config::{Config, ConfigError};
pub use error::{Error, Progress, Result, ScopeId, TaskId};
pub use group::{Completed, Policy, TaskGroup};
pub use queue::Queue;
pub use runtime::{run, run_with};
pub use task::{spawn, spawn_daemon, TaskHandle};
pub use timeout::{ignore_after, sleep, timeout_after, timeout_scope, TimeoutScope};
