//! Byte-stream transport consumed by a [`crate::conn::Connection`].
//!
//! The core is transport-agnostic: it only ever needs a blocking
//! `read`/`write` pair, split into independently usable halves so the
//! reader thread and the responder never contend for the same lock while
//! one of them is blocked in a syscall. Grounded in the older
//! thread-per-connection `rust-9p` sibling's `TcpStream::try_clone()`
//! pattern rather than the teacher's tokio `AsyncRead`/`AsyncWrite` split,
//! since the runtime here is OS threads, not an async executor.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;

/// The read half of a split [`Transport`]. Owned exclusively by a
/// connection's reader thread.
pub struct ReadHalf(Box<dyn Read + Send>);

impl ReadHalf {
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

/// The write half of a split [`Transport`], guarded by a connection's
/// write lock (`conn.wlock`).
pub struct WriteHalf(Box<dyn Write + Send>);

impl WriteHalf {
    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf)
    }
}

/// A connection's half-duplex byte stream, plus a hook to forcibly unblock
/// a reader stuck in a blocking read (used by [`crate::conn::Connection::shutdown`]).
pub struct Transport {
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    closer: Box<dyn Fn() + Send + Sync>,
}

impl Transport {
    pub fn new(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
        closer: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Transport {
            reader: Box::new(reader),
            writer: Box::new(writer),
            closer: Box::new(closer),
        }
    }

    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        let writer = stream.try_clone()?;
        let closer_handle = stream.try_clone()?;
        Ok(Transport::new(stream, writer, move || {
            let _ = closer_handle.shutdown(Shutdown::Both);
        }))
    }

    pub fn from_unix(stream: UnixStream) -> io::Result<Self> {
        let writer = stream.try_clone()?;
        let closer_handle = stream.try_clone()?;
        Ok(Transport::new(stream, writer, move || {
            let _ = closer_handle.shutdown(Shutdown::Both);
        }))
    }

    /// Split into independent read/write halves plus the forced-close hook.
    pub fn split(self) -> (ReadHalf, WriteHalf, Box<dyn Fn() + Send + Sync>) {
        (ReadHalf(self.reader), WriteHalf(self.writer), self.closer)
    }
}
