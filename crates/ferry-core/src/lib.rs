//! # Ferry Core
//!
//! Server-to-server relay: moves a file from one transfer endpoint to
//! another without holding it in memory, by running the download and the
//! upload at the same time against one shared spool.
//!
//! This crate provides:
//! - The endpoint contract a relay drives ([`TransferEndpoint`])
//! - A spool channel with blocking read and write ends ([`RelayChannel`])
//! - Completion bookkeeping shared by both legs ([`CompletionState`])
//! - The coordinator that starts both legs, propagates the first failure and
//!   releases the spool ([`Relay`], [`relay_transfer`])
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Coordinator                               │
//! │   (waits for both legs or the first failure, aborts the other)  │
//! ├───────────────────────────────┬─────────────────────────────────┤
//! │         Source leg            │            Sink leg             │
//! │   (download into the spool)   │   (upload out of the spool)     │
//! ├───────────────────────────────┴─────────────────────────────────┤
//! │                       Relay channel                              │
//! │   (temp file or bounded ring, strict FIFO, blocking reads)      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod state;
mod worker;

pub use channel::{ChannelReader, ChannelWriter, ProducerState, RelayChannel};
pub use config::{RelayConfig, RelayMedium};
pub use coordinator::{Relay, RelayStats, TransferRequest, relay_transfer};
pub use endpoint::TransferEndpoint;
pub use error::{ErrorCategory, RelayError, Result};
pub use listener::{ByteCounter, ProgressListener};
pub use state::{CompletionState, Decision, Leg};
