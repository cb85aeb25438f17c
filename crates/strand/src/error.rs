// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Errors and cancellation signals.
//!
//! Cancellation is a value, not unwinding: every suspension point returns
//! `Err(Error::Cancelled { .. })` or `Err(Error::Timeout { .. })`, and the
//! operation that was interrupted annotates it with the work it had
//! already done before handing it back to the caller.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::config::ConfigError;

/// Identifies a spawned task (and the worker thread running it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one timeout region on a worker's scope stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) u64);

/// Work completed by an operation before it was interrupted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Progress {
    /// Nothing was consumed or transferred.
    #[default]
    None,
    /// Bytes consumed from a stream (`readall`, `read_exactly`).
    Read(Vec<u8>),
    /// Bytes placed into the caller's buffer (`readinto`).
    Filled(usize),
    /// Bytes handed to the endpoint (`write`, `writelines`).
    Written(usize),
    /// Complete lines consumed (`readlines`).
    Lines(Vec<Vec<u8>>),
}

impl Progress {
    /// Number of bytes this progress record accounts for.
    pub fn bytes(&self) -> usize {
        match self {
            Progress::None => 0,
            Progress::Read(data) => data.len(),
            Progress::Filled(n) | Progress::Written(n) => *n,
            Progress::Lines(lines) => lines.iter().map(Vec::len).sum(),
        }
    }
}

/// Errors produced by strand operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The current task was cancelled while suspended.
    #[error("operation cancelled")]
    Cancelled { progress: Progress },

    /// A timeout region expired while the task was suspended.
    #[error("operation timed out")]
    Timeout { scope: ScopeId, progress: Progress },

    /// `read_exactly` hit end of stream before collecting enough bytes.
    #[error("unexpected end of data after {} bytes", .partial.len())]
    EndOfData { partial: Vec<u8> },

    /// The stream was closed.
    #[error("stream is closed")]
    StreamClosed,

    /// A joined task failed; `cause` is the error it failed with.
    #[error("task {task} failed")]
    TaskFailed {
        task: TaskId,
        #[source]
        cause: Box<Error>,
    },

    /// A joined task stopped because it was cancelled.
    #[error("task {task} was cancelled")]
    TaskCancelled { task: TaskId },

    /// A task panicked with the given message.
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Application error raised inside a task.
    #[error(transparent)]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub(crate) fn cancelled() -> Self {
        Error::Cancelled {
            progress: Progress::None,
        }
    }

    pub(crate) fn timeout(scope: ScopeId) -> Self {
        Error::Timeout {
            scope,
            progress: Progress::None,
        }
    }

    /// Wrap an application error.
    pub fn custom<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Custom(err.into())
    }

    /// True for `Cancelled` and `Timeout`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled { .. } | Error::Timeout { .. })
    }

    /// The partial progress carried by a cancellation signal.
    pub fn progress(&self) -> Option<&Progress> {
        match self {
            Error::Cancelled { progress } | Error::Timeout { progress, .. } => Some(progress),
            _ => None,
        }
    }

    /// The timeout region that produced this error, if it is a timeout.
    pub fn timeout_scope(&self) -> Option<ScopeId> {
        match self {
            Error::Timeout { scope, .. } => Some(*scope),
            _ => None,
        }
    }

    /// Attach progress to a cancellation signal. Other errors pass through.
    pub fn with_progress(self, progress: Progress) -> Self {
        match self {
            Error::Cancelled { .. } => Error::Cancelled { progress },
            Error::Timeout { scope, .. } => Error::Timeout { scope, progress },
            other => other,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
