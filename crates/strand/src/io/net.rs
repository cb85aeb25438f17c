// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! TCP listener and connect, unbuffered sockets and UDP datagrams.
//!
//! `Socket` and `Datagram` make one system call per operation, retried
//! after readiness when it would block. Use `Stream` for buffered,
//! line-oriented traffic.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use tokio::io::unix::AsyncFd;

use super::{register, retry, wait_ready, Stream};
use crate::bridge;
use crate::error::{Error, Progress, Result};

/// Listening TCP socket whose `accept` is a suspension point.
pub struct Listener {
    io: Arc<AsyncFd<TcpListener>>,
}

impl Listener {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        Self::from_std(TcpListener::bind(addr)?)
    }

    /// Wrap an already bound listener.
    ///
    /// # Panics
    /// Panics if no scheduler is running.
    pub fn from_std(listener: TcpListener) -> Result<Self> {
        Ok(Self {
            io: register(listener)?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.io.get_ref().local_addr()?)
    }

    /// Suspend until a client connects.
    pub fn accept(&self) -> Result<(Stream<TcpStream>, SocketAddr)> {
        let (conn, peer) = retry(&self.io, false, |listener| listener.accept())?;
        Ok((Stream::new(conn)?, peer))
    }

    /// Like `accept`, but hands back an unbuffered `Socket`.
    pub fn accept_socket(&self) -> Result<(Socket, SocketAddr)> {
        let (conn, peer) = retry(&self.io, false, |listener| listener.accept())?;
        Ok((Socket::new(conn)?, peer))
    }
}

fn open(addr: SocketAddr) -> Result<TcpStream> {
    let conn = bridge::call(async move {
        tokio::net::TcpStream::connect(addr)
            .await
            .map_err(Error::from)
    })?;
    Ok(conn.into_std()?)
}

/// Open a TCP connection. Establishing it is a suspension point.
pub fn connect(addr: SocketAddr) -> Result<Stream<TcpStream>> {
    Stream::new(open(addr)?)
}

impl Stream<TcpStream> {
    /// Shut down one or both halves of the connection. Shutting down the
    /// write half lets the peer see end of stream while replies can still
    /// be read.
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        let conn = self.get_ref().ok_or(Error::StreamClosed)?;
        Ok(conn.shutdown(how)?)
    }
}

/// Unbuffered TCP socket.
pub struct Socket {
    io: Arc<AsyncFd<TcpStream>>,
    chunk: usize,
}

impl Socket {
    /// Take ownership of a connected stream.
    ///
    /// # Panics
    /// Panics if no scheduler is running.
    pub fn new(conn: TcpStream) -> Result<Self> {
        let chunk = bridge::dispatcher().config().read_chunk;
        Ok(Self {
            io: register(conn)?,
            chunk,
        })
    }

    /// Open a TCP connection. Establishing it is a suspension point.
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        Self::new(open(addr)?)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.io.get_ref().local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.io.get_ref().peer_addr()?)
    }

    /// Receive up to `max` bytes (at most the configured read chunk). An
    /// empty result means the peer closed its write half.
    pub fn recv(&self, max: usize) -> Result<Vec<u8>> {
        let mut data = vec![0; max.min(self.chunk)];
        let n = self.recv_into(&mut data)?;
        data.truncate(n);
        Ok(data)
    }

    pub fn recv_into(&self, buf: &mut [u8]) -> Result<usize> {
        retry(&self.io, false, |mut conn| conn.read(buf))
    }

    /// Send a prefix of `data`; returns how much was taken.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        retry(&self.io, true, |mut conn| conn.write(data))
    }

    /// Send all of `data`. An interruption carries the bytes already sent
    /// as `Progress::Written`.
    pub fn sendall(&self, data: &[u8]) -> Result<()> {
        let mut conn = self.io.get_ref();
        let mut sent = 0;
        while sent < data.len() {
            match conn.write(&data[sent..]) {
                Ok(0) => return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into()),
                Ok(n) => sent += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    wait_ready(&self.io, true)
                        .map_err(|e| e.with_progress(Progress::Written(sent)))?;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        Ok(self.io.get_ref().shutdown(how)?)
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Socket").field(self.io.get_ref()).finish()
    }
}

/// UDP socket whose receives are suspension points.
pub struct Datagram {
    io: Arc<AsyncFd<UdpSocket>>,
}

impl Datagram {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        Self::from_std(UdpSocket::bind(addr)?)
    }

    /// # Panics
    /// Panics if no scheduler is running.
    pub fn from_std(socket: UdpSocket) -> Result<Self> {
        Ok(Self {
            io: register(socket)?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.io.get_ref().local_addr()?)
    }

    /// Receive one datagram into `buf`; a datagram longer than `buf` is
    /// truncated.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        retry(&self.io, false, |socket| socket.recv_from(buf))
    }

    pub fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<usize> {
        retry(&self.io, true, |socket| socket.send_to(data, addr))
    }
}
