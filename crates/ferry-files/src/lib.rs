//! # Ferry Files
//!
//! Filesystem side of Ferry.
//!
//! This crate provides:
//! - [`LocalEndpoint`], a transfer endpoint serving a local directory, with
//!   resumable downloads and uploads and cooperative abort
//! - BLAKE3 digests for checking that a relayed file arrived intact

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod hasher;
pub mod local;

pub use hasher::{hash_bytes, hash_file, hash_file_from};
pub use local::{LocalEndpoint, seed_file};

/// Default chunk size (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
