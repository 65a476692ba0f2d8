//! GoFr migration tooling
//!
//! The `gofr` binary scaffolds migration files, reports migration status and
//! manages configuration. Applications embed [`migrate::MigrateCommand`] in
//! their own binary to run the migrations they compiled in.

pub mod cli;
pub mod commands;
pub mod generate;
pub mod migrate;

pub use migrate::MigrateCommand;
