//! Endpoint backed by a local directory.
//!
//! Paths are resolved relative to the endpoint root and may not leave it.
//! Data moves in fixed-size chunks; an abort request is observed between
//! chunks and makes the operation in flight fail with
//! [`RelayError::Aborted`].

use crate::DEFAULT_CHUNK_SIZE;
use ferry_core::{ProgressListener, RelayError, Result, TransferEndpoint};
use std::borrow::Cow;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// A [`TransferEndpoint`] serving files under a root directory
#[derive(Debug)]
pub struct LocalEndpoint {
    root: PathBuf,
    chunk_size: usize,
    throttle: Option<Duration>,
    busy: AtomicBool,
    abort_requested: AtomicBool,
}

/// Marks the endpoint busy for the lifetime of one operation
struct Operation<'a> {
    endpoint: &'a LocalEndpoint,
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        self.endpoint.abort_requested.store(false, Ordering::Release);
        self.endpoint.busy.store(false, Ordering::Release);
    }
}

impl LocalEndpoint {
    /// Create an endpoint rooted at `root`
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::EndpointState`] if `root` is not a directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(RelayError::EndpointState(Cow::Owned(format!(
                "endpoint root {} is not a directory",
                root.display()
            ))));
        }
        Ok(Self {
            root,
            chunk_size: DEFAULT_CHUNK_SIZE,
            throttle: None,
            busy: AtomicBool::new(false),
            abort_requested: AtomicBool::new(false),
        })
    }

    /// Use `size` byte chunks (at least one byte)
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Sleep `delay` after every chunk, to emulate a slow link
    #[must_use]
    pub fn with_throttle(mut self, delay: Duration) -> Self {
        self.throttle = (!delay.is_zero()).then_some(delay);
        self
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Chunk size in bytes
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Whether an operation is in flight
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Resolve `path` under the root, rejecting anything that escapes it
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::EndpointState`] for empty paths and paths with
    /// `..` or platform prefix components.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        let mut depth = 0usize;
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(RelayError::EndpointState(Cow::Owned(format!(
                        "path {path:?} escapes the endpoint root"
                    ))));
                }
            }
        }
        if depth == 0 {
            return Err(RelayError::endpoint_state("empty path"));
        }
        Ok(resolved)
    }

    fn begin(&self) -> Result<Operation<'_>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RelayError::endpoint_state("another transfer is in progress"));
        }
        self.abort_requested.store(false, Ordering::Release);
        Ok(Operation { endpoint: self })
    }

    fn check_abort(&self) -> Result<()> {
        if self.abort_requested.load(Ordering::Acquire) {
            return Err(RelayError::Aborted);
        }
        Ok(())
    }

    /// Copy `from` into `to` chunk by chunk until `from` is exhausted
    fn pump(
        &self,
        from: &mut dyn Read,
        to: &mut dyn Write,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<u64> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0u64;
        loop {
            self.check_abort()?;
            let n = match from.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            // An abort that arrived while waiting for data wins over end of data
            self.check_abort()?;
            if n == 0 {
                break;
            }
            to.write_all(&buf[..n])?;
            total += n as u64;
            if let Some(listener) = listener {
                listener.transferred(n);
            }
            trace!(chunk = n, total, "Chunk moved");
            if let Some(delay) = self.throttle {
                thread::sleep(delay);
            }
        }
        to.flush()?;
        Ok(total)
    }

    /// Run `op` with listener notifications around it
    fn observed<F>(&self, listener: Option<&dyn ProgressListener>, op: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        if let Some(listener) = listener {
            listener.started();
        }
        let result = op();
        if let Some(listener) = listener {
            match &result {
                Ok(()) => listener.completed(),
                Err(RelayError::Aborted) => listener.aborted(),
                Err(_) => listener.failed(),
            }
        }
        result
    }

    fn open_source(&self, path: &str, full: &Path) -> Result<File> {
        File::open(full).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                RelayError::data_transfer_caused_by(format!("{path}: no such file"), e)
            }
            _ => RelayError::Transfer(e),
        })
    }
}

impl TransferEndpoint for LocalEndpoint {
    fn stream_to_sink(
        &self,
        path: &str,
        sink: &mut dyn Write,
        restart_at: u64,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<()> {
        let _operation = self.begin()?;
        let full = self.resolve(path)?;
        let mut file = self.open_source(path, &full)?;

        let len = file.metadata()?.len();
        if restart_at > len {
            return Err(RelayError::data_transfer(format!(
                "restart offset {restart_at} is past the end of {path} ({len} bytes)"
            )));
        }
        file.seek(SeekFrom::Start(restart_at))?;
        debug!(path, restart_at, len, "Download started");

        self.observed(listener, || {
            let sent = self.pump(&mut file, sink, listener)?;
            debug!(path, sent, "Download finished");
            Ok(())
        })
    }

    fn stream_from_source(
        &self,
        path: &str,
        source: &mut dyn Read,
        stream_offset: u64,
        remote_offset: u64,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<()> {
        let _operation = self.begin()?;
        let full = self.resolve(path)?;

        let mut file = if remote_offset == 0 {
            File::create(&full)?
        } else {
            let file = OpenOptions::new().write(true).open(&full).map_err(|e| {
                RelayError::data_transfer_caused_by(format!("{path}: cannot resume"), e)
            })?;
            let len = file.metadata()?.len();
            if remote_offset > len {
                return Err(RelayError::data_transfer(format!(
                    "remote offset {remote_offset} is past the end of {path} ({len} bytes)"
                )));
            }
            file.set_len(remote_offset)?;
            file
        };
        file.seek(SeekFrom::Start(remote_offset))?;
        debug!(path, stream_offset, remote_offset, "Upload started");

        self.observed(listener, || {
            let received = self.pump(source, &mut file, listener)?;
            file.sync_data()?;
            debug!(path, received, "Upload finished");
            Ok(())
        })
    }

    fn abort_current_transfer(&self, forceful: bool) -> Result<()> {
        if !self.is_busy() {
            return Err(RelayError::endpoint_state("no transfer in progress"));
        }
        debug!(root = %self.root.display(), forceful, "Abort requested");
        self.abort_requested.store(true, Ordering::Release);
        Ok(())
    }
}

/// Create `path` under `root` with `data`, creating parent directories
///
/// Convenience for seeding endpoint roots.
pub fn seed_file(root: &Path, path: &str, data: &[u8]) -> io::Result<PathBuf> {
    let full = root.join(path.trim_start_matches('/'));
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&full, data)?;
    Ok(full)
}
