//! The endpoint contract a relay consumes.
//!
//! An endpoint is anything able to download a remote file into a local
//! writer, upload from a local reader into a remote file, and cancel the
//! operation currently in flight. The protocol behind it (FTP, FTPS, a
//! local directory) is the endpoint's business.

use crate::error::Result;
use crate::listener::ProgressListener;
use std::io::{Read, Write};
use std::sync::Arc;

/// A transfer-capable endpoint
///
/// `abort_current_transfer` is called from a different thread than the one
/// running `stream_to_sink` or `stream_from_source`, so implementations must
/// make the in-flight operation observe the request and return, typically
/// with [`RelayError::Aborted`](crate::RelayError::Aborted).
pub trait TransferEndpoint: Send + Sync {
    /// Write the bytes of remote `path` into `sink`, starting at byte
    /// `restart_at` of the remote file.
    fn stream_to_sink(
        &self,
        path: &str,
        sink: &mut dyn Write,
        restart_at: u64,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<()>;

    /// Read `source` to its end and store the bytes into remote `path`.
    ///
    /// `stream_offset` is the logical file offset of the first byte `source`
    /// yields; the reader is already positioned there and must not be
    /// skipped. `remote_offset` is where writing starts in the remote file.
    fn stream_from_source(
        &self,
        path: &str,
        source: &mut dyn Read,
        stream_offset: u64,
        remote_offset: u64,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<()>;

    /// Ask the in-flight operation to stop.
    ///
    /// A forceful abort may drop the data connection without waiting for the
    /// remote side to acknowledge.
    fn abort_current_transfer(&self, forceful: bool) -> Result<()>;
}

impl<T: TransferEndpoint + ?Sized> TransferEndpoint for Arc<T> {
    fn stream_to_sink(
        &self,
        path: &str,
        sink: &mut dyn Write,
        restart_at: u64,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<()> {
        (**self).stream_to_sink(path, sink, restart_at, listener)
    }

    fn stream_from_source(
        &self,
        path: &str,
        source: &mut dyn Read,
        stream_offset: u64,
        remote_offset: u64,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<()> {
        (**self).stream_from_source(path, source, stream_offset, remote_offset, listener)
    }

    fn abort_current_transfer(&self, forceful: bool) -> Result<()> {
        (**self).abort_current_transfer(forceful)
    }
}
