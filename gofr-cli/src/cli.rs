//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create migrations and inspect their history
    Migrate {
        #[command(subcommand)]
        migrate_cmd: MigrateCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Scaffold a new migration file and regenerate the directory's mod.rs
    Create {
        /// Migration name, e.g. create_users
        #[arg(long, value_name = "NAME")]
        name: String,

        /// Migrations directory (defaults to the configured directory)
        #[arg(long, value_name = "PATH")]
        dir: Option<PathBuf>,

        /// Backend the migration is written for (defaults to the configured backend)
        #[arg(long, value_name = "BACKEND")]
        database: Option<String>,
    },

    /// Show the UP/DOWN history of an application
    Status {
        /// Application name (defaults to the configured app name)
        #[arg(long, value_name = "APP")]
        app: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output file path
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration in use
    Show {
        /// Output format: yaml, json
        #[arg(long, value_name = "FORMAT", default_value = "yaml")]
        format: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_migrate_create() {
        let cli = Cli::parse_from([
            "gofr", "--log-level", "debug", "migrate", "create", "--name", "create_users", "--database", "mongo",
        ]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Some(Commands::Migrate {
                migrate_cmd: MigrateCommands::Create { name, dir, database },
            }) => {
                assert_eq!(name, "create_users");
                assert!(dir.is_none());
                assert_eq!(database.as_deref(), Some("mongo"));
            }
            _ => panic!("expected migrate create"),
        }
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::parse_from(["gofr", "config", "show", "--config", "gofr.yaml", "--format", "json"]);
        assert_eq!(cli.config, Some(PathBuf::from("gofr.yaml")));
        assert!(matches!(
            cli.command,
            Some(Commands::Config { config_cmd: ConfigCommands::Show { ref format } }) if format == "json"
        ));
    }
}
