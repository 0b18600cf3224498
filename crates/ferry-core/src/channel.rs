//! Spool channel between the download and the upload leg.
//!
//! One producer writes, one consumer reads, and bytes come out in the order
//! they went in. The consumer blocks while it has caught up with the
//! producer and the producer is still running; once the producer has
//! finished or failed and everything has been read, the consumer sees end of
//! data.
//!
//! # Media
//!
//! - **Disk**: bytes go to a temporary file. The producer never waits, so a
//!   slow upload only costs disk space. The reader holds its own handle on
//!   the file and never reads past the published write position.
//! - **Memory**: bytes go to a fixed-capacity ring. The producer blocks while
//!   the ring is full, so the download is paced by the upload.
//!
//! With either medium, dropping the reader makes later writes fail with
//! `BrokenPipe`, so a producer never waits on a consumer that is gone.

use crate::config::{RelayConfig, RelayMedium};
use crate::error::Result;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tempfile::TempPath;
use tracing::{debug, trace};

/// Spool file name prefix
const SPOOL_PREFIX: &str = "ferry-";

/// Spool file name suffix
const SPOOL_SUFFIX: &str = ".spool";

/// Producer lifecycle as seen by the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    /// Still writing
    Running,
    /// Wrote everything it had
    Finished,
    /// Stopped early; whatever was written is still readable
    Failed,
}

/// State shared by both ends, guarded by [`Shared::state`]
#[derive(Debug)]
struct ChannelState {
    /// Bytes published by the writer (the write cursor)
    written: u64,
    /// Bytes handed out by the reader (the read cursor)
    consumed: u64,
    producer: ProducerState,
    reader_closed: bool,
    /// Ring storage, memory medium only
    ring: Option<Ring>,
}

#[derive(Debug)]
struct Ring {
    buf: VecDeque<u8>,
    capacity: usize,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ChannelState>,
    /// Signalled on every write, read, producer settle and reader close
    changed: Condvar,
}

impl Shared {
    fn new(ring: Option<Ring>) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                written: 0,
                consumed: 0,
                producer: ProducerState::Running,
                reader_closed: false,
                ring,
            }),
            changed: Condvar::new(),
        }
    }

    // A panic while holding the lock cannot leave the counters half-updated,
    // so a poisoned mutex is still usable.
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, ChannelState>) -> MutexGuard<'a, ChannelState> {
        self.changed.wait(guard).unwrap_or_else(|e| e.into_inner())
    }
}

/// A relay spool
///
/// Owns the scratch storage. The two ends returned by [`RelayChannel::open`]
/// are handed to the legs; the channel itself stays with the coordinator
/// and removes the scratch storage on [`close`](Self::close) or drop.
///
/// # Example
///
/// ```
/// use ferry_core::{RelayChannel, RelayConfig};
/// use std::io::{Read, Write};
///
/// let (channel, mut writer, mut reader) = RelayChannel::open(&RelayConfig::default()).unwrap();
/// writer.write_all(b"hello").unwrap();
/// writer.finish();
///
/// let mut out = Vec::new();
/// reader.read_to_end(&mut out).unwrap();
/// assert_eq!(out, b"hello");
/// channel.close().unwrap();
/// ```
#[derive(Debug)]
pub struct RelayChannel {
    shared: Arc<Shared>,
    spool: Option<TempPath>,
}

impl RelayChannel {
    /// Allocate a fresh channel for one transfer
    ///
    /// # Errors
    ///
    /// Returns an error if the spool file cannot be created or reopened.
    pub fn open(config: &RelayConfig) -> Result<(Self, ChannelWriter, ChannelReader)> {
        match config.medium {
            RelayMedium::Disk => Self::open_spool(config.spool_dir.as_deref()),
            RelayMedium::Memory => Ok(Self::open_ring(config.ring_capacity)),
        }
    }

    fn open_spool(dir: Option<&Path>) -> Result<(Self, ChannelWriter, ChannelReader)> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SPOOL_PREFIX).suffix(SPOOL_SUFFIX);
        let spool = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let read_handle = spool.reopen()?;
        let (write_handle, path) = spool.into_parts();
        debug!(path = %path.display(), "Opened relay spool");

        let shared = Arc::new(Shared::new(None));
        let channel = Self {
            shared: Arc::clone(&shared),
            spool: Some(path),
        };
        let writer = ChannelWriter::new(Arc::clone(&shared), Some(write_handle));
        let reader = ChannelReader::new(shared, Some(read_handle));
        Ok((channel, writer, reader))
    }

    fn open_ring(capacity: usize) -> (Self, ChannelWriter, ChannelReader) {
        debug!(capacity, "Opened in-memory relay ring");
        let ring = Ring {
            buf: VecDeque::with_capacity(capacity.min(1024 * 1024)),
            capacity,
        };
        let shared = Arc::new(Shared::new(Some(ring)));
        let channel = Self {
            shared: Arc::clone(&shared),
            spool: None,
        };
        let writer = ChannelWriter::new(Arc::clone(&shared), None);
        let reader = ChannelReader::new(shared, None);
        (channel, writer, reader)
    }

    /// Bytes published by the writer so far
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.shared.lock().written
    }

    /// Bytes handed to the reader so far
    #[must_use]
    pub fn bytes_consumed(&self) -> u64 {
        self.shared.lock().consumed
    }

    /// Current producer state
    #[must_use]
    pub fn producer_state(&self) -> ProducerState {
        self.shared.lock().producer
    }

    /// Spool file location, disk medium only
    #[must_use]
    pub fn spool_path(&self) -> Option<&Path> {
        self.spool.as_deref()
    }

    /// Remove the scratch storage
    ///
    /// # Errors
    ///
    /// Returns an error if the spool file could not be deleted.
    pub fn close(mut self) -> io::Result<()> {
        match self.spool.take() {
            Some(path) => {
                debug!(path = %path.display(), "Removing relay spool");
                path.close()
            }
            None => Ok(()),
        }
    }
}

/// Write end of a [`RelayChannel`], owned by the download leg
///
/// Dropping the writer without calling [`finish`](Self::finish) marks the
/// producer as failed, which lets the reader drain and stop.
#[derive(Debug)]
pub struct ChannelWriter {
    shared: Arc<Shared>,
    spool: Option<File>,
    settled: bool,
}

impl ChannelWriter {
    fn new(shared: Arc<Shared>, spool: Option<File>) -> Self {
        Self {
            shared,
            spool,
            settled: false,
        }
    }

    /// Mark the producer as done and wake the reader
    pub fn finish(mut self) {
        self.settle(ProducerState::Finished);
    }

    /// Mark the producer as failed and wake the reader
    pub fn abandon(mut self) {
        self.settle(ProducerState::Failed);
    }

    fn settle(&mut self, outcome: ProducerState) {
        if self.settled {
            return;
        }
        self.settled = true;
        // Release the handle before waking the reader
        self.spool = None;

        let mut state = self.shared.lock();
        state.producer = outcome;
        trace!(written = state.written, ?outcome, "Producer settled");
        drop(state);
        self.shared.changed.notify_all();
    }

    fn write_ring(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.shared.lock();
        loop {
            if state.reader_closed {
                return Err(broken_pipe());
            }
            let ring = state
                .ring
                .as_ref()
                .ok_or_else(|| io::Error::other("relay ring missing"))?;
            if ring.buf.len() < ring.capacity {
                break;
            }
            state = self.shared.wait(state);
        }

        let n = {
            let ring = state
                .ring
                .as_mut()
                .ok_or_else(|| io::Error::other("relay ring missing"))?;
            let n = buf.len().min(ring.capacity - ring.buf.len());
            ring.buf.extend(&buf[..n]);
            n
        };
        state.written += n as u64;
        drop(state);
        self.shared.changed.notify_all();
        Ok(n)
    }

    fn write_spool(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.shared.lock().reader_closed {
            return Err(broken_pipe());
        }
        let file = self
            .spool
            .as_mut()
            .ok_or_else(|| io::Error::other("relay spool already closed"))?;
        let n = file.write(buf)?;

        let mut state = self.shared.lock();
        state.written += n as u64;
        drop(state);
        self.shared.changed.notify_all();
        Ok(n)
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.settled {
            return Err(io::Error::other("relay writer already settled"));
        }
        if self.spool.is_some() {
            self.write_spool(buf)
        } else {
            self.write_ring(buf)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.spool.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        self.settle(ProducerState::Failed);
    }
}

/// Read end of a [`RelayChannel`], owned by the upload leg
#[derive(Debug)]
pub struct ChannelReader {
    shared: Arc<Shared>,
    spool: Option<File>,
    position: u64,
}

impl ChannelReader {
    fn new(shared: Arc<Shared>, spool: Option<File>) -> Self {
        Self {
            shared,
            spool,
            position: 0,
        }
    }

    /// Bytes read so far
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    fn read_spool(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = {
            let mut state = self.shared.lock();
            loop {
                if state.written > self.position {
                    break state.written - self.position;
                }
                if state.producer != ProducerState::Running {
                    return Ok(0);
                }
                state = self.shared.wait(state);
            }
        };

        let want = buf.len().min(usize::try_from(available).unwrap_or(usize::MAX));
        let file = self
            .spool
            .as_mut()
            .ok_or_else(|| io::Error::other("relay spool already closed"))?;
        let n = file.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "relay spool shorter than its write position",
            ));
        }
        self.position += n as u64;

        self.shared.lock().consumed = self.position;
        Ok(n)
    }

    fn read_ring(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.shared.lock();
        loop {
            let ring = state
                .ring
                .as_ref()
                .ok_or_else(|| io::Error::other("relay ring missing"))?;
            if !ring.buf.is_empty() {
                break;
            }
            if state.producer != ProducerState::Running {
                return Ok(0);
            }
            state = self.shared.wait(state);
        }

        let n = {
            let ring = state
                .ring
                .as_mut()
                .ok_or_else(|| io::Error::other("relay ring missing"))?;
            let n = buf.len().min(ring.buf.len());
            for (slot, byte) in buf.iter_mut().zip(ring.buf.drain(..n)) {
                *slot = byte;
            }
            n
        };
        self.position += n as u64;
        state.consumed = self.position;
        drop(state);
        // Wake a writer waiting for room
        self.shared.changed.notify_all();
        Ok(n)
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.spool.is_some() {
            self.read_spool(buf)
        } else {
            self.read_ring(buf)
        }
    }
}

impl Drop for ChannelReader {
    fn drop(&mut self) {
        self.spool = None;
        let mut state = self.shared.lock();
        state.reader_closed = true;
        if let Some(ring) = state.ring.as_mut() {
            ring.buf.clear();
        }
        drop(state);
        self.shared.changed.notify_all();
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "relay reader closed")
}
