// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Buffered byte stream with exact progress accounting.
//!
//! The stream owns one endpoint and a FIFO buffer of bytes received but not
//! yet handed out. Bytes leave the buffer only through a read. At every
//! suspension point the buffer plus whatever an interrupted operation
//! reports as its progress add up to exactly what moved through the
//! endpoint: nothing is counted twice and nothing is dropped.

use std::io;
use std::sync::Arc;

use tokio::io::unix::AsyncFd;

use super::{register, wait_ready, Endpoint};
use crate::bridge;
use crate::error::{Error, Progress, Result};

/// Largest single receive `readall` grows to.
const MAX_READALL_CHUNK: usize = 1 << 22;

/// One receive from `fd` into `buf`, suspending while it would block.
fn recv<E: Endpoint>(fd: &Arc<AsyncFd<E>>, buf: &mut [u8]) -> Result<usize> {
    loop {
        match fd.get_ref().recv(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => wait_ready(fd, false)?,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Buffered stream over an endpoint.
pub struct Stream<E: Endpoint> {
    io: Option<Arc<AsyncFd<E>>>,
    buffer: Vec<u8>,
    // Reused receive area for `read` and `readline`; never longer than `chunk`.
    scratch: Vec<u8>,
    chunk: usize,
}

impl<E: Endpoint> Stream<E> {
    /// Take ownership of `endpoint`, switching it to non-blocking mode.
    ///
    /// # Panics
    /// Panics if no scheduler is running.
    pub fn new(endpoint: E) -> Result<Self> {
        let chunk = bridge::dispatcher().config().read_chunk;
        Ok(Self {
            io: Some(register(endpoint)?),
            buffer: Vec::new(),
            scratch: Vec::new(),
            chunk,
        })
    }

    fn io(&self) -> Result<&Arc<AsyncFd<E>>> {
        self.io.as_ref().ok_or(Error::StreamClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.io.is_none()
    }

    /// Bytes received but not yet read.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn get_ref(&self) -> Option<&E> {
        self.io.as_ref().map(|io| io.get_ref())
    }

    /// One receive into `buf`, suspending until the endpoint is readable.
    fn recv_into(&self, buf: &mut [u8]) -> Result<usize> {
        recv(self.io()?, buf)
    }

    /// One receive of at most `max` bytes (capped at the read chunk) into
    /// the scratch area. Returns the number of bytes received.
    fn recv_scratch(&mut self, max: usize) -> Result<usize> {
        let want = max.min(self.chunk);
        if self.scratch.len() < want {
            self.scratch.resize(want, 0);
        }
        let fd = self.io.as_ref().ok_or(Error::StreamClosed)?;
        recv(fd, &mut self.scratch[..want])
    }

    /// Send all of `data`. Interruptions report `base` plus what this call
    /// sent.
    fn send_all(&self, data: &[u8], base: usize) -> Result<()> {
        let fd = self.io()?;
        let mut sent = 0;
        while sent < data.len() {
            match fd.get_ref().send(&data[sent..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    wait_ready(fd, true)
                        .map_err(|e| e.with_progress(Progress::Written(base + sent)))?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Read up to `max` bytes. Buffered bytes are served first; otherwise
    /// one receive is issued. An empty result means end of stream.
    pub fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        self.io()?;
        if !self.buffer.is_empty() {
            let n = max.min(self.buffer.len());
            return Ok(self.buffer.drain(..n).collect());
        }
        if max == 0 {
            return Ok(Vec::new());
        }
        let n = self.recv_scratch(max)?;
        Ok(self.scratch[..n].to_vec())
    }

    /// Read through the next `\n`, inclusive. At end of stream, returns
    /// what is left (possibly without a terminator, possibly empty).
    ///
    /// An interrupted readline keeps the partial line buffered.
    pub fn readline(&mut self) -> Result<Vec<u8>> {
        self.io()?;
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buffer[scanned..].iter().position(|&b| b == b'\n') {
                let end = scanned + pos + 1;
                return Ok(self.buffer.drain(..end).collect());
            }
            scanned = self.buffer.len();
            let n = self.recv_scratch(self.chunk)?;
            if n == 0 {
                return Ok(std::mem::take(&mut self.buffer));
            }
            self.buffer.extend_from_slice(&self.scratch[..n]);
        }
    }

    /// Read lines until end of stream. Interruptions carry the complete
    /// lines read so far as `Progress::Lines`.
    pub fn readlines(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut lines = Vec::new();
        loop {
            match self.readline() {
                Ok(line) if line.is_empty() => return Ok(lines),
                Ok(line) => lines.push(line),
                Err(e) if e.is_cancellation() => {
                    return Err(e.with_progress(Progress::Lines(lines)))
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Iterate over lines until end of stream.
    pub fn lines(&mut self) -> Lines<'_, E> {
        Lines { stream: self }
    }

    /// Read until end of stream. Receives start at the configured chunk
    /// size and double each time one fills completely, up to
    /// `MAX_READALL_CHUNK`.
    pub fn readall(&mut self) -> Result<Vec<u8>> {
        self.io()?;
        let mut data = std::mem::take(&mut self.buffer);
        let mut chunk = self.chunk;
        loop {
            let start = data.len();
            data.resize(start + chunk, 0);
            let received = self.recv_into(&mut data[start..]);
            match received {
                Ok(0) => {
                    data.truncate(start);
                    return Ok(data);
                }
                Ok(n) => {
                    data.truncate(start + n);
                    if n == chunk {
                        chunk = (chunk * 2).min(MAX_READALL_CHUNK.max(self.chunk));
                    }
                }
                Err(e) => {
                    data.truncate(start);
                    if e.is_cancellation() {
                        return Err(e.with_progress(Progress::Read(data)));
                    }
                    self.unread(data);
                    return Err(e);
                }
            }
        }
    }

    /// Read exactly `n` bytes.
    ///
    /// End of stream first yields `Error::EndOfData` with the partial
    /// bytes; an interruption carries them as `Progress::Read`.
    pub fn read_exactly(&mut self, n: usize) -> Result<Vec<u8>> {
        // Grows with what arrives; `n` may come off the wire.
        let mut data = Vec::new();
        while data.len() < n {
            match self.read(n - data.len()) {
                Ok(more) if more.is_empty() => return Err(Error::EndOfData { partial: data }),
                Ok(more) => data.extend_from_slice(&more),
                Err(e) if e.is_cancellation() => {
                    return Err(e.with_progress(Progress::Read(data)))
                }
                Err(e) => {
                    self.unread(data);
                    return Err(e);
                }
            }
        }
        Ok(data)
    }

    /// Fill `buf`: buffered bytes first, then receives straight into the
    /// remainder until it is full or the stream ends. Returns the number of
    /// bytes placed; an interruption carries it as `Progress::Filled`.
    pub fn readinto(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.io()?;
        let mut filled = self.buffer.len().min(buf.len());
        buf[..filled].copy_from_slice(&self.buffer[..filled]);
        self.buffer.drain(..filled);

        while filled < buf.len() {
            match self.recv_into(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.is_cancellation() => {
                    return Err(e.with_progress(Progress::Filled(filled)))
                }
                Err(_) if filled > 0 => break,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Send all of `data` and return its length. An interruption carries
    /// the bytes already sent as `Progress::Written`.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.send_all(data, 0)?;
        Ok(data.len())
    }

    /// Send each item in order. Progress counts bytes across all items.
    pub fn writelines<I>(&mut self, items: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let mut total = 0;
        for item in items {
            let item = item.as_ref();
            self.send_all(item, total)?;
            total += item.len();
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.io()?.get_ref().flush()?;
        Ok(())
    }

    /// Flush and release the endpoint. Idempotent; later operations fail
    /// with `Error::StreamClosed`.
    pub fn close(&mut self) -> Result<()> {
        match self.io.take() {
            Some(io) => {
                io.get_ref().flush()?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Put bytes collected by a failed read back in front of the buffer.
    fn unread(&mut self, mut data: Vec<u8>) {
        data.extend_from_slice(&self.buffer);
        self.buffer = data;
    }
}

impl<E: Endpoint + std::fmt::Debug> std::fmt::Debug for Stream<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("endpoint", &self.get_ref())
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

/// Iterator over the lines of a stream; see [`Stream::lines`].
pub struct Lines<'a, E: Endpoint> {
    stream: &'a mut Stream<E>,
}

impl<E: Endpoint> Iterator for Lines<'_, E> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.stream.readline() {
            Ok(line) if line.is_empty() => None,
            Ok(line) => Some(Ok(line)),
            Err(e) => Some(Err(e)),
        }
    }
}
