//! Relay configuration.

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::PathBuf;

/// Largest in-memory ring accepted by validation (1 GiB)
pub const MAX_RING_CAPACITY: usize = 1024 * 1024 * 1024;

/// Default in-memory ring capacity (4 MiB)
pub const DEFAULT_RING_CAPACITY: usize = 4 * 1024 * 1024;

/// Where relayed bytes are held between the two legs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMedium {
    /// Temporary file, unbounded; the download never waits for the upload
    #[default]
    Disk,
    /// Fixed-capacity ring in memory; the download blocks while it is full
    Memory,
}

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Spool medium
    #[serde(default)]
    pub medium: RelayMedium,
    /// Ring capacity in bytes, used with [`RelayMedium::Memory`]
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    /// Directory for the spool file (system temp dir when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spool_dir: Option<PathBuf>,
    /// Whether aborts of the surviving leg are forceful
    #[serde(default = "default_true")]
    pub forceful_abort: bool,
    /// Prefix for the names of the two leg threads
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_ring_capacity() -> usize {
    DEFAULT_RING_CAPACITY
}

fn default_true() -> bool {
    true
}

fn default_thread_name_prefix() -> String {
    "ferry".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            medium: RelayMedium::Disk,
            ring_capacity: default_ring_capacity(),
            spool_dir: None,
            forceful_abort: true,
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl RelayConfig {
    /// Configuration using an in-memory ring of `capacity` bytes
    #[must_use]
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            medium: RelayMedium::Memory,
            ring_capacity: capacity,
            ..Self::default()
        }
    }

    /// Configuration spooling to a temp file inside `dir`
    #[must_use]
    pub fn spooled_in(dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidConfig`] if the ring capacity is out of
    /// range for the memory medium or the spool directory does not exist.
    pub fn validate(&self) -> Result<()> {
        if self.medium == RelayMedium::Memory
            && (self.ring_capacity == 0 || self.ring_capacity > MAX_RING_CAPACITY)
        {
            return Err(RelayError::InvalidConfig(Cow::Borrowed(
                "ring capacity must be between 1 byte and 1 GiB",
            )));
        }

        if let Some(dir) = &self.spool_dir {
            if !dir.is_dir() {
                return Err(RelayError::InvalidConfig(Cow::Owned(format!(
                    "spool directory {} does not exist",
                    dir.display()
                ))));
            }
        }

        if self.thread_name_prefix.contains('\0') {
            return Err(RelayError::InvalidConfig(Cow::Borrowed(
                "thread name prefix contains a NUL byte",
            )));
        }

        Ok(())
    }
}
