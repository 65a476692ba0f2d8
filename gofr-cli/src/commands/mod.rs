//! Handlers behind the `gofr` subcommands

pub mod config;
pub mod migrate;
