//! Scripted endpoint fixture
//!
//! A [`TransferEndpoint`] whose behavior is fixed up front: the bytes it
//! serves, the chunk size and pacing, when it fails and how, whether it
//! stalls until aborted, and whether its own abort request fails. Everything
//! it sees is recorded for assertions.
//!
//! # Example
//!
//! ```no_run
//! use ferry_core::{ErrorCategory, relay_transfer};
//! use ferry_integration_tests::fixtures::{Failure, ScriptedEndpoint};
//!
//! let source = ScriptedEndpoint::serving(vec![7u8; 4096]).fail_after(1024, Failure::Network);
//! let target = ScriptedEndpoint::new();
//!
//! let err = relay_transfer(&source, &target, "in", "out", 0, None).unwrap_err();
//! assert_eq!(err.category(), ErrorCategory::Transfer);
//! assert_eq!(target.abort_count(), 1);
//! ```

use ferry_core::{ProgressListener, RelayError, Result, TransferEndpoint};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// How a scripted endpoint fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Connection reset, surfaced as a transfer error
    Network,
    /// Negative server reply
    ProtocolReply,
    /// Data connection broke, with a connection reset as the cause
    DataTransfer,
    /// The endpoint call panics
    Panic,
}

impl Failure {
    fn raise(self) -> RelayError {
        match self {
            Self::Network => RelayError::Transfer(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "simulated network error",
            )),
            Self::ProtocolReply => RelayError::protocol_reply("451 requested action aborted"),
            Self::DataTransfer => RelayError::data_transfer_caused_by(
                "data connection lost",
                io::Error::new(io::ErrorKind::ConnectionReset, "simulated network error"),
            ),
            Self::Panic => panic!("scripted endpoint panicked"),
        }
    }
}

/// Offsets an operation was invoked with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServedRange {
    /// Offset of the first byte moved through the stream
    pub stream_offset: u64,
    /// Offset on the endpoint side
    pub remote_offset: u64,
}

/// Endpoint with scripted behavior
#[derive(Debug)]
pub struct ScriptedEndpoint {
    data: Vec<u8>,
    chunk_size: usize,
    delay: Option<Duration>,
    fail_after: Option<(u64, Failure)>,
    stall: bool,
    abort_fails: bool,

    received: Mutex<Vec<u8>>,
    ranges: Mutex<Vec<ServedRange>>,
    aborts: AtomicUsize,
    aborted: Mutex<bool>,
    abort_signal: Condvar,
    reads: AtomicUsize,
    empty_reads: AtomicUsize,
}

impl Default for ScriptedEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEndpoint {
    /// Endpoint serving nothing, accepting any upload
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            chunk_size: 64 * 1024,
            delay: None,
            fail_after: None,
            stall: false,
            abort_fails: false,
            received: Mutex::new(Vec::new()),
            ranges: Mutex::new(Vec::new()),
            aborts: AtomicUsize::new(0),
            aborted: Mutex::new(false),
            abort_signal: Condvar::new(),
            reads: AtomicUsize::new(0),
            empty_reads: AtomicUsize::new(0),
        }
    }

    /// Endpoint whose downloads yield `data`
    pub fn serving(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::new()
        }
    }

    /// Move `size` bytes per step
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Sleep `delay` after every step
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail with `failure` once `bytes` have been moved
    pub fn fail_after(mut self, bytes: u64, failure: Failure) -> Self {
        self.fail_after = Some((bytes, failure));
        self
    }

    /// Move nothing and block until aborted
    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Reject abort requests
    pub fn failing_abort(mut self) -> Self {
        self.abort_fails = true;
        self
    }

    /// Bytes uploaded to this endpoint so far
    pub fn received(&self) -> Vec<u8> {
        lock(&self.received).clone()
    }

    /// Offsets of every operation invoked so far
    pub fn ranges(&self) -> Vec<ServedRange> {
        lock(&self.ranges).clone()
    }

    /// Abort requests received
    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    /// Reads issued against the relay stream during uploads
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Reads that returned no data
    pub fn empty_read_count(&self) -> usize {
        self.empty_reads.load(Ordering::SeqCst)
    }

    fn record(&self, stream_offset: u64, remote_offset: u64) {
        lock(&self.ranges).push(ServedRange {
            stream_offset,
            remote_offset,
        });
    }

    fn check(&self, moved: u64) -> Result<()> {
        if *lock(&self.aborted) {
            return Err(RelayError::Aborted);
        }
        match self.fail_after {
            Some((limit, failure)) if moved >= limit => Err(failure.raise()),
            _ => Ok(()),
        }
    }

    fn pause(&self) {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
    }

    fn wait_for_abort(&self) -> Result<()> {
        let mut aborted = lock(&self.aborted);
        while !*aborted {
            aborted = self
                .abort_signal
                .wait(aborted)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        Err(RelayError::Aborted)
    }
}

impl TransferEndpoint for ScriptedEndpoint {
    fn stream_to_sink(
        &self,
        _path: &str,
        sink: &mut dyn Write,
        restart_at: u64,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<()> {
        self.record(restart_at, restart_at);
        if self.stall {
            return self.wait_for_abort();
        }
        let start = usize::try_from(restart_at)
            .ok()
            .filter(|&start| start <= self.data.len())
            .ok_or_else(|| RelayError::data_transfer("restart offset past end of data"))?;

        let mut sent = 0u64;
        for chunk in self.data[start..].chunks(self.chunk_size) {
            self.check(sent)?;
            let chunk = match self.fail_after {
                Some((limit, _)) => &chunk[..chunk.len().min((limit - sent) as usize)],
                None => chunk,
            };
            sink.write_all(chunk)?;
            sent += chunk.len() as u64;
            if let Some(listener) = listener {
                listener.transferred(chunk.len());
            }
            self.pause();
        }
        if let Some((limit, failure)) = self.fail_after {
            if sent >= limit && (start as u64 + sent) < self.data.len() as u64 {
                return Err(failure.raise());
            }
        }
        Ok(())
    }

    fn stream_from_source(
        &self,
        _path: &str,
        source: &mut dyn Read,
        stream_offset: u64,
        remote_offset: u64,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<()> {
        self.record(stream_offset, remote_offset);
        if self.stall {
            return self.wait_for_abort();
        }

        let mut buf = vec![0u8; self.chunk_size];
        let mut taken = 0u64;
        loop {
            self.check(taken)?;
            let want = match self.fail_after {
                Some((limit, _)) => buf.len().min((limit - taken) as usize),
                None => buf.len(),
            };
            let n = source.read(&mut buf[..want])?;
            self.reads.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                self.empty_reads.fetch_add(1, Ordering::SeqCst);
                break;
            }
            lock(&self.received).extend_from_slice(&buf[..n]);
            taken += n as u64;
            if let Some(listener) = listener {
                listener.transferred(n);
            }
            self.pause();
        }
        if let Some(listener) = listener {
            listener.completed();
        }
        Ok(())
    }

    fn abort_current_transfer(&self, _forceful: bool) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        if self.abort_fails {
            return Err(RelayError::protocol_reply("502 ABOR not implemented"));
        }
        *lock(&self.aborted) = true;
        self.abort_signal.notify_all();
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
