//! Completion state shared by the two legs and the coordinator.
//!
//! Each leg reports exactly once. The coordinator blocks on the condition
//! variable and re-evaluates the whole record under the lock every time it
//! wakes, so a report can never be missed between the check and the wait.

use crate::error::{RelayError, Result};
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use tracing::warn;

/// One side of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    /// Download from the source endpoint into the channel
    Source,
    /// Upload from the channel to the target endpoint
    Sink,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Sink => write!(f, "sink"),
        }
    }
}

#[derive(Debug)]
enum LegStatus {
    Running,
    Done,
    Failed(RelayError),
    /// Failed, and the error was already handed to the coordinator
    Reported,
}

impl LegStatus {
    fn is_running(&self) -> bool {
        matches!(self, LegStatus::Running)
    }

    fn is_done(&self) -> bool {
        matches!(self, LegStatus::Done)
    }
}

#[derive(Debug)]
struct Outcomes {
    source: LegStatus,
    sink: LegStatus,
    /// Set once the coordinator has taken its decision
    decided: bool,
}

impl Outcomes {
    fn leg_mut(&mut self, leg: Leg) -> &mut LegStatus {
        match leg {
            Leg::Source => &mut self.source,
            Leg::Sink => &mut self.sink,
        }
    }
}

/// What the coordinator does once it has seen enough
#[derive(Debug)]
pub enum Decision {
    /// Both legs completed without error
    Success,
    /// The source leg failed; `sink_done` tells whether the sink had already
    /// completed when the failure was observed
    SourceFailed {
        /// Error reported by the source leg
        error: RelayError,
        /// Sink completion at decision time
        sink_done: bool,
    },
    /// The sink leg failed and the source leg had not
    SinkFailed {
        /// Error reported by the sink leg
        error: RelayError,
        /// Source completion at decision time
        source_done: bool,
    },
}

impl Decision {
    /// Leg whose error decided the outcome, if any
    #[must_use]
    pub fn failed_leg(&self) -> Option<Leg> {
        match self {
            Decision::Success => None,
            Decision::SourceFailed { .. } => Some(Leg::Source),
            Decision::SinkFailed { .. } => Some(Leg::Sink),
        }
    }
}

/// Synchronized record of both legs' outcomes
#[derive(Debug)]
pub struct CompletionState {
    outcomes: Mutex<Outcomes>,
    changed: Condvar,
}

impl Default for CompletionState {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionState {
    /// Both legs running
    #[must_use]
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(Outcomes {
                source: LegStatus::Running,
                sink: LegStatus::Running,
                decided: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Outcomes> {
        self.outcomes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the outcome of `leg` and wake the coordinator
    ///
    /// Only the first report for a leg counts.
    pub fn report(&self, leg: Leg, result: Result<()>) {
        let mut outcomes = self.lock();
        let status = outcomes.leg_mut(leg);
        if !status.is_running() {
            warn!(%leg, "Ignoring second completion report");
            return;
        }
        *status = match result {
            Ok(()) => LegStatus::Done,
            Err(error) => LegStatus::Failed(error),
        };
        drop(outcomes);
        self.changed.notify_all();
    }

    /// Whether `leg` completed without error
    #[must_use]
    pub fn is_done(&self, leg: Leg) -> bool {
        self.lock().leg_mut(leg).is_done()
    }

    /// Whether `leg` has reported at all
    #[must_use]
    pub fn has_reported(&self, leg: Leg) -> bool {
        !self.lock().leg_mut(leg).is_running()
    }

    /// Block until both legs completed or one failed
    ///
    /// A source failure takes priority over a sink failure observed at the
    /// same time. The failing leg's error is moved into the decision, so this
    /// yields a failure at most once per leg.
    pub fn wait_decision(&self) -> Decision {
        let mut outcomes = self.lock();
        loop {
            if let Some(decision) = Self::decide(&mut outcomes) {
                outcomes.decided = true;
                drop(outcomes);
                self.changed.notify_all();
                return decision;
            }
            outcomes = self.wait(outcomes);
        }
    }

    /// Whether the coordinator has taken its decision
    #[must_use]
    pub fn is_decided(&self) -> bool {
        self.lock().decided
    }

    /// Block until the coordinator has taken its decision
    ///
    /// A failed leg calls this before releasing its end of the channel, so
    /// the other leg cannot run into a follow-up failure (end of data, broken
    /// pipe) before the first failure has been seen.
    pub fn wait_until_decided(&self) {
        let mut outcomes = self.lock();
        while !outcomes.decided {
            outcomes = self.wait(outcomes);
        }
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Outcomes>) -> MutexGuard<'a, Outcomes> {
        self.changed.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    fn decide(outcomes: &mut Outcomes) -> Option<Decision> {
        if matches!(outcomes.source, LegStatus::Failed(_)) {
            if let LegStatus::Failed(error) =
                std::mem::replace(&mut outcomes.source, LegStatus::Reported)
            {
                return Some(Decision::SourceFailed {
                    error,
                    sink_done: outcomes.sink.is_done(),
                });
            }
        }

        if matches!(outcomes.sink, LegStatus::Failed(_)) {
            if let LegStatus::Failed(error) =
                std::mem::replace(&mut outcomes.sink, LegStatus::Reported)
            {
                return Some(Decision::SinkFailed {
                    error,
                    source_done: outcomes.source.is_done(),
                });
            }
        }

        if outcomes.source.is_done() && outcomes.sink.is_done() {
            return Some(Decision::Success);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_success_needs_both_legs() {
        let state = Arc::new(CompletionState::new());
        state.report(Leg::Source, Ok(()));
        assert!(state.is_done(Leg::Source));
        assert!(!state.has_reported(Leg::Sink));

        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_decision())
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());

        state.report(Leg::Sink, Ok(()));
        assert!(matches!(waiter.join().unwrap(), Decision::Success));
    }

    #[test]
    fn test_source_error_wins_tie() {
        let state = CompletionState::new();
        state.report(Leg::Sink, Err(RelayError::Aborted));
        state.report(Leg::Source, Err(RelayError::data_transfer("reset")));

        match state.wait_decision() {
            Decision::SourceFailed { error, sink_done } => {
                assert_eq!(error.category(), ErrorCategory::DataTransfer);
                assert!(!sink_done);
            }
            other => panic!("expected source failure, got {other:?}"),
        }
    }

    #[test]
    fn test_sink_failure_reports_source_progress() {
        let state = CompletionState::new();
        state.report(Leg::Source, Ok(()));
        state.report(Leg::Sink, Err(RelayError::protocol_reply("552")));

        let decision = state.wait_decision();
        assert_eq!(decision.failed_leg(), Some(Leg::Sink));
        match decision {
            Decision::SinkFailed { error, source_done } => {
                assert_eq!(error.category(), ErrorCategory::ProtocolReply);
                assert!(source_done);
            }
            other => panic!("expected sink failure, got {other:?}"),
        }
    }

    #[test]
    fn test_failure_does_not_wait_for_other_leg() {
        let state = Arc::new(CompletionState::new());
        let reporter = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                state.report(Leg::Sink, Err(RelayError::Aborted));
            })
        };

        let start = Instant::now();
        let decision = state.wait_decision();
        reporter.join().unwrap();
        assert_eq!(decision.failed_leg(), Some(Leg::Sink));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!state.has_reported(Leg::Source));
    }

    #[test]
    fn test_second_report_ignored() {
        let state = CompletionState::new();
        state.report(Leg::Source, Ok(()));
        state.report(Leg::Source, Err(RelayError::Aborted));
        state.report(Leg::Sink, Ok(()));
        assert!(matches!(state.wait_decision(), Decision::Success));
    }

    #[test]
    fn test_wait_until_decided() {
        let state = Arc::new(CompletionState::new());
        state.report(Leg::Source, Err(RelayError::Aborted));
        assert!(!state.is_decided());

        let failed_leg = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_until_decided())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!failed_leg.is_finished());

        assert_eq!(state.wait_decision().failed_leg(), Some(Leg::Source));
        failed_leg.join().unwrap();
        assert!(state.is_decided());
    }

    #[test]
    fn test_leg_display() {
        assert_eq!(Leg::Source.to_string(), "source");
        assert_eq!(Leg::Sink.to_string(), "sink");
    }
}
