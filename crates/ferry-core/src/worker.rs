//! Leg workers.
//!
//! Each worker drives one endpoint operation against its end of the relay
//! channel, then reports the outcome exactly once. Errors and panics are
//! captured here and never cross the thread boundary; the coordinator
//! replays them on its own thread.

use crate::channel::{ChannelReader, ChannelWriter};
use crate::endpoint::TransferEndpoint;
use crate::error::{RelayError, Result};
use crate::listener::ProgressListener;
use crate::state::{CompletionState, Leg};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

/// Run `op`, turning a panic into [`RelayError::Internal`]
pub(crate) fn contain_panic<F>(op: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    panic::catch_unwind(AssertUnwindSafe(op))
        .unwrap_or_else(|payload| Err(RelayError::from_panic(payload)))
}

/// Download leg: `source` writes `path` into the channel
pub(crate) fn run_source<E>(
    source: &E,
    path: &str,
    restart_at: u64,
    mut writer: ChannelWriter,
    completion: &CompletionState,
) where
    E: TransferEndpoint + ?Sized,
{
    debug!(leg = %Leg::Source, path, restart_at, "Leg started");

    let result = contain_panic(|| {
        source.stream_to_sink(path, &mut writer, restart_at, None)?;
        writer.flush()?;
        Ok(())
    });

    match result {
        Ok(()) => {
            debug!(leg = %Leg::Source, "Leg completed");
            writer.finish();
            completion.report(Leg::Source, Ok(()));
        }
        Err(e) => {
            debug!(leg = %Leg::Source, error = %e, "Leg failed");
            completion.report(Leg::Source, Err(e));
            // The sink stays blocked on the channel until the coordinator has
            // seen this failure, then drains what was written and stops
            completion.wait_until_decided();
            writer.abandon();
        }
    }
}

/// Upload leg: `target` stores the channel's bytes into `path`
pub(crate) fn run_sink<E>(
    target: &E,
    path: &str,
    restart_at: u64,
    mut reader: ChannelReader,
    listener: Option<&dyn ProgressListener>,
    completion: &CompletionState,
) where
    E: TransferEndpoint + ?Sized,
{
    debug!(leg = %Leg::Sink, path, restart_at, "Leg started");

    let result = contain_panic(|| {
        target.stream_from_source(path, &mut reader, restart_at, restart_at, listener)
    });

    let consumed = reader.position();
    match result {
        Ok(()) => {
            debug!(leg = %Leg::Sink, consumed, "Leg completed");
            drop(reader);
            completion.report(Leg::Sink, Ok(()));
        }
        Err(e) => {
            debug!(leg = %Leg::Sink, consumed, error = %e, "Leg failed");
            completion.report(Leg::Sink, Err(e));
            // Closing the read side fails the source's next write, which must
            // not happen before the coordinator has seen this failure
            completion.wait_until_decided();
            drop(reader);
        }
    }
}
