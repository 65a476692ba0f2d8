use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use gofr::cli::{Cli, Commands, ConfigCommands, MigrateCommands};
use gofr::commands::config::{handle_config_generate, handle_config_show, handle_config_validate, load_config};
use gofr::commands::migrate::{handle_migrate_create, handle_migrate_status};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // `config validate` reports a broken file itself instead of failing to start
    let config = match &cli.command {
        Some(Commands::Config {
            config_cmd: ConfigCommands::Validate { .. },
        }) => gofr_config::GofrConfig::default(),
        _ => load_config(cli.config.as_ref())?,
    };

    match cli.log_level.as_deref() {
        Some(level) => gofr_logging::init_simple_tracing(level)?,
        None => gofr_logging::init_logging_from_config(&config.logging)?,
    }
    debug!("Loaded configuration for app '{}'", config.app.name);

    match &cli.command {
        Some(Commands::Migrate { migrate_cmd }) => match migrate_cmd {
            MigrateCommands::Create { name, dir, database } => {
                handle_migrate_create(&config, name, dir.clone(), database.as_deref()).map(|_| ())
            }
            MigrateCommands::Status { app } => handle_migrate_status(&config, app.clone()).await,
        },
        Some(Commands::Config { config_cmd }) => match config_cmd {
            ConfigCommands::Validate { config_file } => handle_config_validate(config_file),
            ConfigCommands::Generate { output, force } => handle_config_generate(output, *force),
            ConfigCommands::Show { format } => handle_config_show(&config, format),
        },
        None => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            cmd.print_help().context("Failed to print help")?;
            println!();
            Ok(())
        }
    }
}
