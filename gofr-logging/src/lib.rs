//! Logging setup for GoFr tooling
//!
//! Everything in the workspace logs through `tracing`; this crate installs
//! the process-wide subscriber from configuration.

pub mod init;

pub use init::{init_logging_from_config, init_simple_tracing, init_tracing};
