//! Full-buffer reads and writes over any `Read`/`Write`.
//!
//! Streams may return short counts, `Interrupted` or `WouldBlock` at any
//! point. These helpers loop until the whole request has been moved or a
//! hard failure is seen. A read that hits its timeout stops with
//! [`TransportError::TimedOut`]; writes keep retrying.

use std::io::{ErrorKind, IoSlice, IoSliceMut, Read, Write};
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{Result, TransportError};
use crate::poll::wait_readable;

/// Pause before retrying a write that reported `WouldBlock`.
pub const WOULD_BLOCK_PAUSE: Duration = Duration::from_millis(10);

/// Read exactly `buf.len()` bytes.
///
/// Returns [`TransportError::Eof`] if the stream ends first.
pub fn read_exact<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let expected = buf.len();
    let mut received = 0usize;
    while received < expected {
        match reader.read(&mut buf[received..]) {
            Ok(0) => return Err(TransportError::Eof { expected, received }),
            Ok(n) => received += n,
            Err(err) => read_failed(err, expected, received)?,
        }
    }
    Ok(())
}

/// Fill `first` and then `second` from one stream.
///
/// Each read is issued against whatever remains of the two buffers, so once
/// `first` is full only `second` is targeted.
pub fn read_exact_scattered<R: Read + ?Sized>(
    reader: &mut R,
    first: &mut [u8],
    second: &mut [u8],
) -> Result<()> {
    let expected = first.len() + second.len();
    let mut received = 0usize;
    let mut bufs = [IoSliceMut::new(first), IoSliceMut::new(second)];
    let mut remaining: &mut [IoSliceMut<'_>] = &mut bufs;
    // Drop empty leading buffers so a zero-length first segment is skipped.
    IoSliceMut::advance_slices(&mut remaining, 0);

    while !remaining.is_empty() {
        match reader.read_vectored(remaining) {
            Ok(0) => return Err(TransportError::Eof { expected, received }),
            Ok(n) => {
                received += n;
                IoSliceMut::advance_slices(&mut remaining, n);
            }
            Err(err) => read_failed(err, expected, received)?,
        }
    }
    Ok(())
}

/// Write all of `buf`.
///
/// `Interrupted` is retried at once, `WouldBlock` after [`WOULD_BLOCK_PAUSE`].
/// A broken pipe stops the loop immediately with [`TransportError::BrokenPipe`].
pub fn write_all<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < buf.len() {
        match writer.write(&buf[offset..]) {
            Ok(0) => return Err(TransportError::WriteZero),
            Ok(n) => offset += n,
            Err(err) => retry_or_fail(err)?,
        }
    }
    Ok(())
}

/// Write every segment in order, as if they were one buffer.
///
/// `expected` is the total the caller computed for the message; a mismatch
/// with the segment lengths is reported before anything is written. The
/// segment list is consumed on every path.
pub fn write_vectored<W: Write + ?Sized>(
    writer: &mut W,
    mut segments: Vec<IoSlice<'_>>,
    expected: usize,
) -> Result<()> {
    let actual: usize = segments.iter().map(|s| s.len()).sum();
    if actual != expected {
        tracing::error!(expected, actual, "internal error: segment amounts incorrect");
        return Err(TransportError::LengthMismatch { expected, actual });
    }

    let mut remaining: &mut [IoSlice<'_>] = &mut segments;
    IoSlice::advance_slices(&mut remaining, 0);

    while !remaining.is_empty() {
        match writer.write_vectored(remaining) {
            Ok(0) => return Err(TransportError::WriteZero),
            Ok(n) => IoSlice::advance_slices(&mut remaining, n),
            Err(err) => retry_or_fail(err)?,
        }
    }
    Ok(())
}

fn read_failed(err: std::io::Error, expected: usize, received: usize) -> Result<()> {
    match err.kind() {
        ErrorKind::Interrupted => Ok(()),
        ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            Err(TransportError::TimedOut { expected, received })
        }
        _ => Err(TransportError::Io(err)),
    }
}

fn retry_or_fail(err: std::io::Error) -> Result<()> {
    match err.kind() {
        ErrorKind::Interrupted => Ok(()),
        ErrorKind::WouldBlock => {
            warn!("write would block, retrying");
            std::thread::sleep(WOULD_BLOCK_PAUSE);
            Ok(())
        }
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => {
            warn!("pipe broken");
            Err(TransportError::BrokenPipe)
        }
        _ => Err(TransportError::Io(err)),
    }
}

/// Reader that gives up once a deadline passes.
///
/// Every read first waits for the descriptor to turn readable with the time
/// that is left, and fails with `ErrorKind::TimedOut` when none is. `None`
/// never expires.
pub struct DeadlineReader<'a, R: ?Sized> {
    inner: &'a mut R,
    deadline: Option<Instant>,
    consumed: usize,
}

impl<'a, R: Read + AsRawFd + ?Sized> DeadlineReader<'a, R> {
    pub fn new(inner: &'a mut R, deadline: Option<Instant>) -> Self {
        Self {
            inner,
            deadline,
            consumed: 0,
        }
    }

    /// Bytes read through this wrapper so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    fn wait(&self) -> std::io::Result<()> {
        let left = self
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        match wait_readable(&[self.inner.as_raw_fd()], left) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(ErrorKind::TimedOut.into()),
            Err(TransportError::Io(err)) => Err(err),
            Err(err) => Err(std::io::Error::other(err)),
        }
    }
}

impl<R: Read + AsRawFd + ?Sized> Read for DeadlineReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.wait()?;
        let n = self.inner.read(buf)?;
        self.consumed += n;
        Ok(n)
    }

    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> std::io::Result<usize> {
        self.wait()?;
        let n = self.inner.read_vectored(bufs)?;
        self.consumed += n;
        Ok(n)
    }
}
