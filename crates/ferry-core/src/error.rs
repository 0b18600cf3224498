//! Error types for relay operations
//!
//! Every failure a leg can report falls into one of a small set of
//! categories. The coordinator replays the error of the first failed leg to
//! the caller unchanged, so the category seen by the caller is always the one
//! the endpoint produced.
//!
//! # Error Categories
//!
//! - **ProtocolReply**: the remote side answered with something unexpected
//! - **Transfer**: plain I/O failure while moving bytes
//! - **EndpointState**: an endpoint was driven in an illegal order
//! - **DataTransfer**: the endpoint's data connection failed
//! - **Aborted**: the transfer was cancelled on request
//! - **Internal**: anything else, including a panic inside an endpoint
//!
//! # Example
//!
//! ```
//! use ferry_core::{ErrorCategory, RelayError};
//!
//! let err = RelayError::data_transfer("connection reset");
//! assert_eq!(err.category(), ErrorCategory::DataTransfer);
//! ```

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Boxed error used as the cause of a data transfer failure
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by a relay or by either of its legs
#[derive(Debug, Error)]
pub enum RelayError {
    // ============ Endpoint Errors ============
    /// The remote side sent a malformed or unexpected reply
    #[error("Illegal reply: {0}")]
    ProtocolReply(Cow<'static, str>),

    /// I/O failure while relaying bytes
    #[error("Transfer I/O error: {0}")]
    Transfer(#[from] std::io::Error),

    /// Operation called in an illegal sequence on an endpoint
    #[error("Invalid endpoint state: {0}")]
    EndpointState(Cow<'static, str>),

    /// Transfer-specific failure reported by an endpoint
    #[error("Data transfer failed: {message}")]
    DataTransfer {
        /// Human-readable description
        message: Cow<'static, str>,
        /// Underlying cause, when one is known
        #[source]
        source: Option<BoxedCause>,
    },

    /// Transfer cancelled by an abort request
    #[error("Transfer aborted")]
    Aborted,

    // ============ Local Errors ============
    /// Relay configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Unanticipated failure, never silently dropped
    #[error("Internal error: {0}")]
    Internal(Cow<'static, str>),
}

/// Coarse classification of a [`RelayError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed or unexpected remote reply
    ProtocolReply,
    /// Generic I/O failure
    Transfer,
    /// Illegal call sequencing on an endpoint
    EndpointState,
    /// Data connection failure
    DataTransfer,
    /// Explicit cancellation
    Aborted,
    /// Configuration rejected
    Config,
    /// Catch-all
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtocolReply => write!(f, "protocol-reply"),
            Self::Transfer => write!(f, "transfer"),
            Self::EndpointState => write!(f, "endpoint-state"),
            Self::DataTransfer => write!(f, "data-transfer"),
            Self::Aborted => write!(f, "aborted"),
            Self::Config => write!(f, "config"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

impl RelayError {
    /// Category of this error
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::ProtocolReply(_) => ErrorCategory::ProtocolReply,
            RelayError::Transfer(_) => ErrorCategory::Transfer,
            RelayError::EndpointState(_) => ErrorCategory::EndpointState,
            RelayError::DataTransfer { .. } => ErrorCategory::DataTransfer,
            RelayError::Aborted => ErrorCategory::Aborted,
            RelayError::InvalidConfig(_) => ErrorCategory::Config,
            RelayError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Returns true if the leg stopped because it was asked to
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, RelayError::Aborted)
    }

    /// Create a protocol reply error with static context (zero allocation)
    #[must_use]
    pub const fn protocol_reply(context: &'static str) -> Self {
        RelayError::ProtocolReply(Cow::Borrowed(context))
    }

    /// Create an endpoint state error with static context (zero allocation)
    #[must_use]
    pub const fn endpoint_state(context: &'static str) -> Self {
        RelayError::EndpointState(Cow::Borrowed(context))
    }

    /// Create a data transfer error without an underlying cause
    #[must_use]
    pub fn data_transfer(message: impl Into<Cow<'static, str>>) -> Self {
        RelayError::DataTransfer {
            message: message.into(),
            source: None,
        }
    }

    /// Create a data transfer error wrapping its cause
    #[must_use]
    pub fn data_transfer_caused_by(
        message: impl Into<Cow<'static, str>>,
        cause: impl Into<BoxedCause>,
    ) -> Self {
        RelayError::DataTransfer {
            message: message.into(),
            source: Some(cause.into()),
        }
    }

    /// Create an internal error with static context (zero allocation)
    #[must_use]
    pub const fn internal(context: &'static str) -> Self {
        RelayError::Internal(Cow::Borrowed(context))
    }

    /// Build an internal error from a caught panic payload
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            Cow::Borrowed(*s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Cow::Owned(s.clone())
        } else {
            Cow::Borrowed("endpoint panicked")
        };
        RelayError::Internal(message)
    }
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn test_categories() {
        assert_eq!(
            RelayError::protocol_reply("550").category(),
            ErrorCategory::ProtocolReply
        );
        assert_eq!(
            RelayError::from(io::Error::other("boom")).category(),
            ErrorCategory::Transfer
        );
        assert_eq!(
            RelayError::endpoint_state("not connected").category(),
            ErrorCategory::EndpointState
        );
        assert_eq!(
            RelayError::data_transfer("reset").category(),
            ErrorCategory::DataTransfer
        );
        assert_eq!(RelayError::Aborted.category(), ErrorCategory::Aborted);
        assert_eq!(
            RelayError::internal("oops").category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_data_transfer_keeps_cause() {
        let cause = io::Error::new(io::ErrorKind::ConnectionReset, "peer reset");
        let err = RelayError::data_transfer_caused_by("download interrupted", cause);

        let source = err.source().expect("cause should be kept");
        assert!(source.to_string().contains("peer reset"));
        assert!(err.to_string().contains("download interrupted"));
    }

    #[test]
    fn test_is_abort() {
        assert!(RelayError::Aborted.is_abort());
        assert!(!RelayError::data_transfer("x").is_abort());
    }

    #[test]
    fn test_from_panic_payloads() {
        let err = RelayError::from_panic(Box::new("static message"));
        assert!(err.to_string().contains("static message"));

        let err = RelayError::from_panic(Box::new(String::from("owned message")));
        assert!(err.to_string().contains("owned message"));

        let err = RelayError::from_panic(Box::new(42u32));
        assert!(matches!(err, RelayError::Internal(_)));
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::DataTransfer.to_string(), "data-transfer");
        assert_eq!(ErrorCategory::Aborted.to_string(), "aborted");
    }
}
