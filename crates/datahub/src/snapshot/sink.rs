// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Snapshot output sinks.
//!
//! The engine writes through a non-blocking sink: `try_write` may accept a
//! partial chunk or report `WouldBlock`, and `wait_writable` parks until
//! the sink can make progress again. The unix implementation is an
//! anonymous pipe whose read end belongs to the consumer; tests use an
//! in-memory sink with scriptable chunking and backpressure.

use std::io;

/// Outcome of waiting for writability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    /// The sink can accept more bytes.
    Ready,
    /// The remote end hung up.
    Closed,
}

/// Non-blocking byte sink for encoded snapshot data.
pub trait SnapshotSink {
    /// Attempt to write some of `buf`, returning the number of bytes
    /// accepted.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when the sink is full, `BrokenPipe` when the reader
    /// has gone away, any other error for an unrecoverable fault.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Block until the sink is writable again or the reader hangs up.
    ///
    /// # Errors
    ///
    /// Any I/O error is treated as an unrecoverable fault by the engine.
    fn wait_writable(&mut self) -> io::Result<SinkStatus>;
}

/// Staging buffer between the formatter and the sink.
///
/// Holds at most one formatter chunk at a time; the engine fully drains it
/// before resuming the formatter, so no write exceeds the chunk the
/// formatter composed.
#[derive(Debug, Default)]
pub(crate) struct OutBuffer {
    buf: Vec<u8>,
    next: usize,
}

impl OutBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_str(&mut self, text: &str) {
        self.buf.extend_from_slice(text.as_bytes());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.next >= self.buf.len()
    }

    pub(crate) fn pending(&self) -> &[u8] {
        &self.buf[self.next..]
    }

    pub(crate) fn consume(&mut self, count: usize) {
        self.next += count;
        if self.is_empty() {
            self.buf.clear();
            self.next = 0;
        }
    }
}

/// In-memory sink for tests and file-backed tooling.
///
/// Accepts at most `max_chunk` bytes per write and can simulate
/// backpressure by reporting `WouldBlock` on a fixed cadence.
pub struct MemorySink {
    data: std::rc::Rc<std::cell::RefCell<Vec<u8>>>,
    max_chunk: usize,
    block_every: usize,
    writes: usize,
}

/// Shared view of a [`MemorySink`]'s collected bytes.
#[derive(Clone)]
pub struct MemoryHandle(std::rc::Rc<std::cell::RefCell<Vec<u8>>>);

impl MemoryHandle {
    /// The bytes written so far.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    /// The bytes written so far, as UTF-8 text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    /// An always-writable sink that accepts everything at once.
    #[must_use]
    pub fn new() -> Self {
        Self::with_backpressure(usize::MAX, 0)
    }

    /// A sink that accepts at most `max_chunk` bytes per write and, when
    /// `block_every` is non-zero, reports `WouldBlock` on every
    /// `block_every`-th write attempt.
    #[must_use]
    pub fn with_backpressure(max_chunk: usize, block_every: usize) -> Self {
        Self {
            data: std::rc::Rc::new(std::cell::RefCell::new(Vec::new())),
            max_chunk: max_chunk.max(1),
            block_every,
            writes: 0,
        }
    }

    /// Handle for reading back what the engine streamed.
    #[must_use]
    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle(std::rc::Rc::clone(&self.data))
    }
}

impl SnapshotSink for MemorySink {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes += 1;
        if self.block_every > 0 && self.writes % self.block_every == 0 {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let count = buf.len().min(self.max_chunk);
        self.data.borrow_mut().extend_from_slice(&buf[..count]);
        Ok(count)
    }

    fn wait_writable(&mut self) -> io::Result<SinkStatus> {
        Ok(SinkStatus::Ready)
    }
}

#[cfg(unix)]
pub use pipe::PipeSink;

#[cfg(unix)]
mod pipe {
    use super::{SinkStatus, SnapshotSink};
    use std::io::{self, Write};
    use std::os::fd::AsRawFd;

    /// Anonymous-pipe sink. The engine owns the non-blocking write end;
    /// the read end is handed to the snapshot consumer.
    pub struct PipeSink {
        writer: io::PipeWriter,
    }

    impl PipeSink {
        /// Create the pipe pair, returning the sink and the consumer's
        /// read end.
        ///
        /// # Errors
        ///
        /// Propagates pipe creation or fcntl failures.
        pub fn new() -> io::Result<(Self, io::PipeReader)> {
            let (reader, writer) = io::pipe()?;
            set_nonblocking(writer.as_raw_fd())?;
            Ok((Self { writer }, reader))
        }
    }

    fn set_nonblocking(fd: std::os::fd::RawFd) -> io::Result<()> {
        // SAFETY: fcntl on an fd we own, with valid flag arguments.
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    impl SnapshotSink for PipeSink {
        fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writer.write(buf)
        }

        fn wait_writable(&mut self) -> io::Result<SinkStatus> {
            let mut pollfd = libc::pollfd {
                fd: self.writer.as_raw_fd(),
                events: libc::POLLOUT,
                revents: 0,
            };
            // SAFETY: a single valid pollfd, blocking indefinitely.
            let rc = unsafe { libc::poll(&mut pollfd, 1, -1) };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            if pollfd.revents & libc::POLLHUP != 0 {
                return Ok(SinkStatus::Closed);
            }
            if pollfd.revents & libc::POLLOUT != 0 {
                return Ok(SinkStatus::Ready);
            }
            // Anything else on the write end is unrecoverable.
            Err(io::Error::other("snapshot pipe poll error"))
        }
    }
}
