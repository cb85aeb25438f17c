// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Endpoints a `Stream` can own.

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;

/// A raw-fd byte endpoint driven in non-blocking mode.
///
/// `recv` and `send` must report `WouldBlock` instead of blocking once the
/// descriptor is non-blocking; `Stream` switches it on.
pub trait Endpoint: AsRawFd + Send + Sync + 'static {
    /// Receive into `buf`. `Ok(0)` is end of stream.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send a prefix of `data`, returning how much was taken.
    fn send(&self, data: &[u8]) -> io::Result<usize>;

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

impl Endpoint for TcpStream {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }

    fn send(&self, data: &[u8]) -> io::Result<usize> {
        (&*self).write(data)
    }
}

impl Endpoint for UnixStream {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }

    fn send(&self, data: &[u8]) -> io::Result<usize> {
        (&*self).write(data)
    }
}

/// Pipes and character devices. Regular files cannot be polled for
/// readiness and are rejected when the stream registers them.
impl Endpoint for File {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }

    fn send(&self, data: &[u8]) -> io::Result<usize> {
        (&*self).write(data)
    }

    fn flush(&self) -> io::Result<()> {
        (&*self).flush()
    }
}
