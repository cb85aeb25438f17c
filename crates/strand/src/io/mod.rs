// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Blocking-looking I/O over non-blocking endpoints.
//!
//! Every transfer is attempted eagerly on the worker thread. Only when the
//! endpoint would block does the worker suspend, waiting for readiness on
//! the scheduler's reactor, and retry once woken. The suspension is where
//! cancellation and timeouts land; the interrupted operation attaches the
//! bytes it had already moved to the signal.
//!
//! Components:
//! - `endpoint`: the `Endpoint` trait over raw-fd types
//! - `stream`: buffered `Stream` with progress accounting
//! - `net`: TCP listener, connect, unbuffered sockets and datagrams

mod endpoint;
mod net;
mod stream;

pub use endpoint::Endpoint;
pub use net::{connect, Datagram, Listener, Socket};
pub use stream::{Lines, Stream};

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use tokio::io::unix::AsyncFd;

use crate::bridge;
use crate::error::Result;

/// Set a file descriptor to non-blocking mode.
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Register `inner` with the reactor of the calling thread's run.
///
/// # Panics
/// Panics if no scheduler is running.
pub(crate) fn register<T: AsRawFd>(inner: T) -> Result<Arc<AsyncFd<T>>> {
    set_nonblocking(inner.as_raw_fd())?;
    let dispatcher = bridge::dispatcher();
    let _runtime = dispatcher.runtime().enter();
    Ok(Arc::new(AsyncFd::new(inner)?))
}

/// Suspend until `io` is readable (or writable), then clear the readiness
/// so the caller's retry decides whether it was real.
pub(crate) fn wait_ready<T>(io: &Arc<AsyncFd<T>>, writable: bool) -> Result<()>
where
    T: AsRawFd + Send + Sync + 'static,
{
    bridge::call(ready(io.clone(), writable))
}

async fn ready<T: AsRawFd>(io: Arc<AsyncFd<T>>, writable: bool) -> Result<()> {
    let mut guard = if writable {
        io.writable().await?
    } else {
        io.readable().await?
    };
    guard.clear_ready();
    Ok(())
}

/// Run `op` against the endpoint until it stops reporting `WouldBlock`,
/// suspending for readiness in between.
pub(crate) fn retry<T, R>(
    io: &Arc<AsyncFd<T>>,
    writable: bool,
    mut op: impl FnMut(&T) -> io::Result<R>,
) -> Result<R>
where
    T: AsRawFd + Send + Sync + 'static,
{
    loop {
        match op(io.get_ref()) {
            Ok(value) => return Ok(value),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => wait_ready(io, writable)?,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
