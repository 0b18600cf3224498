//! Transfer coordinator.
//!
//! Runs the download and the upload leg on two scoped threads joined by a
//! [`RelayChannel`], waits for both to complete or for the first one to
//! fail, asks the surviving leg to stop, and always releases the channel.
//!
//! ```text
//!            ┌──────────────┐   write    ┌──────────────┐   read    ┌──────────────┐
//!  source ──▶│ source leg   │──────────▶│ RelayChannel │──────────▶│  sink leg    │──▶ target
//!            └──────┬───────┘            └──────────────┘           └──────┬───────┘
//!                   │ report                                               │ report
//!                   └─────────────────▶ CompletionState ◀──────────────────┘
//!                                             │ wait_decision
//!                                        coordinator
//! ```
//!
//! A source failure outranks a sink failure observed at the same time. No
//! timeout applies: a leg that neither progresses nor fails keeps the relay
//! waiting until the other leg fails.

use crate::channel::{ChannelReader, ChannelWriter, RelayChannel};
use crate::config::RelayConfig;
use crate::endpoint::TransferEndpoint;
use crate::error::{RelayError, Result};
use crate::listener::ProgressListener;
use crate::state::{CompletionState, Decision, Leg};
use crate::worker::{contain_panic, run_sink, run_source};
use std::thread::{self, Scope};
use std::time::{Duration, Instant};
use tracing::{Span, debug, info, info_span, warn};

/// What to relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// File on the source endpoint
    pub source_path: String,
    /// File on the target endpoint
    pub target_path: String,
    /// Offset applied to both legs
    pub restart_at: u64,
}

impl TransferRequest {
    /// Relay `source_path` to `target_path` from the beginning
    pub fn new(source_path: impl Into<String>, target_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            target_path: target_path.into(),
            restart_at: 0,
        }
    }

    /// Resume both legs at `offset`
    #[must_use]
    pub fn restart_at(mut self, offset: u64) -> Self {
        self.restart_at = offset;
        self
    }
}

/// Summary of a successful relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes that went through the channel
    pub bytes_relayed: u64,
    /// Wall time from channel allocation to release
    pub elapsed: Duration,
}

/// Coordinates one relay between a source and a target endpoint
///
/// # Example
///
/// ```no_run
/// use ferry_core::{Relay, RelayConfig, TransferEndpoint, TransferRequest};
///
/// fn copy(source: &dyn TransferEndpoint, target: &dyn TransferEndpoint) -> ferry_core::Result<()> {
///     let relay = Relay::new(source, target).with_config(RelayConfig::in_memory(1 << 20));
///     let stats = relay.run(&TransferRequest::new("in/report.csv", "out/report.csv"), None)?;
///     println!("relayed {} bytes", stats.bytes_relayed);
///     Ok(())
/// }
/// ```
pub struct Relay<'a, S: ?Sized, T: ?Sized> {
    source: &'a S,
    target: &'a T,
    config: RelayConfig,
}

impl<'a, S, T> Relay<'a, S, T>
where
    S: TransferEndpoint + ?Sized,
    T: TransferEndpoint + ?Sized,
{
    /// Relay from `source` to `target` with the default configuration
    pub fn new(source: &'a S, target: &'a T) -> Self {
        Self {
            source,
            target,
            config: RelayConfig::default(),
        }
    }

    /// Replace the configuration
    #[must_use]
    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Current configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run the relay to completion
    ///
    /// Returns only once both legs have returned and the channel has been
    /// released. `listener` is given to the upload leg only.
    ///
    /// # Errors
    ///
    /// Returns the error of the first leg observed to fail, source first on
    /// a tie, with its category intact. Configuration and channel allocation
    /// failures are returned before any leg starts.
    pub fn run(
        &self,
        request: &TransferRequest,
        listener: Option<&dyn ProgressListener>,
    ) -> Result<RelayStats> {
        self.config.validate()?;

        let span = info_span!(
            "relay",
            source = %request.source_path,
            target = %request.target_path,
            restart_at = request.restart_at,
        );
        let _enter = span.enter();
        info!("Relay started");

        let started = Instant::now();
        let (channel, writer, reader) = RelayChannel::open(&self.config)?;
        let completion = CompletionState::new();

        // Leaving the scope joins both legs, which drops both channel ends
        let outcome = thread::scope(|scope| {
            self.spawn_source(scope, &span, request, writer, &completion);
            self.spawn_sink(scope, &span, request, reader, listener, &completion);
            let decision = completion.wait_decision();
            self.conclude(decision)
        });

        let bytes_relayed = channel.bytes_consumed();
        if let Err(e) = channel.close() {
            warn!(error = %e, "Failed to remove relay spool");
        }
        let elapsed = started.elapsed();

        match outcome {
            Ok(()) => {
                info!(bytes_relayed, ?elapsed, "Relay completed");
                Ok(RelayStats {
                    bytes_relayed,
                    elapsed,
                })
            }
            Err(e) => {
                warn!(error = %e, category = %e.category(), "Relay failed");
                Err(e)
            }
        }
    }

    fn spawn_source<'scope>(
        &'scope self,
        scope: &'scope Scope<'scope, '_>,
        span: &Span,
        request: &'scope TransferRequest,
        writer: ChannelWriter,
        completion: &'scope CompletionState,
    ) {
        let span = span.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.config.thread_name_prefix, Leg::Source))
            .spawn_scoped(scope, move || {
                let _enter = span.enter();
                run_source(
                    self.source,
                    &request.source_path,
                    request.restart_at,
                    writer,
                    completion,
                );
            });
        // The writer went down with the closure, so the sink sees end of data
        if let Err(e) = spawned {
            completion.report(Leg::Source, Err(RelayError::Transfer(e)));
        }
    }

    fn spawn_sink<'scope>(
        &'scope self,
        scope: &'scope Scope<'scope, '_>,
        span: &Span,
        request: &'scope TransferRequest,
        reader: ChannelReader,
        listener: Option<&'scope dyn ProgressListener>,
        completion: &'scope CompletionState,
    ) {
        let span = span.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.config.thread_name_prefix, Leg::Sink))
            .spawn_scoped(scope, move || {
                let _enter = span.enter();
                run_sink(
                    self.target,
                    &request.target_path,
                    request.restart_at,
                    reader,
                    listener,
                    completion,
                );
            });
        // The reader went down with the closure, so the source gets BrokenPipe
        if let Err(e) = spawned {
            completion.report(Leg::Sink, Err(RelayError::Transfer(e)));
        }
    }

    fn conclude(&self, decision: Decision) -> Result<()> {
        match decision {
            Decision::Success => Ok(()),
            Decision::SourceFailed { error, sink_done } => {
                debug!(error = %error, sink_done, "Source leg failed first");
                if !sink_done {
                    self.abort_leg(Leg::Sink);
                }
                Err(error)
            }
            Decision::SinkFailed { error, source_done } => {
                debug!(error = %error, source_done, "Sink leg failed first");
                if !source_done {
                    self.abort_leg(Leg::Source);
                }
                Err(error)
            }
        }
    }

    /// Best-effort abort; failures are logged and dropped
    fn abort_leg(&self, leg: Leg) {
        let forceful = self.config.forceful_abort;
        let result = contain_panic(|| match leg {
            Leg::Source => self.source.abort_current_transfer(forceful),
            Leg::Sink => self.target.abort_current_transfer(forceful),
        });
        match result {
            Ok(()) => debug!(%leg, forceful, "Abort requested"),
            Err(e) => warn!(%leg, error = %e, "Abort request failed"),
        }
    }
}

/// Relay `source_path` on `source` to `target_path` on `target`
///
/// Shorthand for [`Relay::run`] with the default configuration.
///
/// # Errors
///
/// See [`Relay::run`].
pub fn relay_transfer<S, T>(
    source: &S,
    target: &T,
    source_path: &str,
    target_path: &str,
    restart_at: u64,
    listener: Option<&dyn ProgressListener>,
) -> Result<RelayStats>
where
    S: TransferEndpoint + ?Sized,
    T: TransferEndpoint + ?Sized,
{
    let request = TransferRequest::new(source_path, target_path).restart_at(restart_at);
    Relay::new(source, target).run(&request, listener)
}
