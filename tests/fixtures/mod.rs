//! Test fixtures for relay integration tests

pub mod scripted;

pub use scripted::{Failure, ScriptedEndpoint, ServedRange};
