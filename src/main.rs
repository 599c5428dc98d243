// ABOUTME: Entry point for the rollout CLI application.
// ABOUTME: Parses arguments, installs logging, and dispatches to command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, ProjectCommands};
use rollout::config::Config;
use rollout::error::{Error, Result};
use rollout::output::Output;
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let output = Output::new(cli.format);
    let cwd = env::current_dir()?;

    if let Commands::Init { force } = cli.command {
        return commands::init(&cwd, force, &output);
    }

    let config = load_config(&cwd)?;
    let deployer = commands::build_deployer(&config, &cwd)?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Projects { command } => {
            let store = deployer.projects();
            match command {
                ProjectCommands::List => commands::list_projects(store, &output).await,
                ProjectCommands::Show { slug } => {
                    commands::show_project(store, &slug, &output).await
                }
                ProjectCommands::Steps { slug } => {
                    commands::list_steps(store, &slug, &output).await
                }
                ProjectCommands::Seed => commands::seed_projects(store, &output).await,
                ProjectCommands::Save { file } => {
                    commands::save_projects(store, &file, &output).await
                }
                ProjectCommands::Delete { slug } => {
                    commands::delete_project(store, &slug, &output).await
                }
            }
        }
        Commands::Deploy {
            slug,
            triggered_by,
            branch,
        } => {
            commands::deploy(&deployer, &slug, triggered_by, branch.as_deref(), output).await
        }
        Commands::Resume => commands::resume(&deployer, output).await,
        Commands::Retry => commands::retry(&deployer, output).await,
        Commands::Cancel => commands::cancel(&deployer, &output).await,
        Commands::Status => commands::status(&deployer, &output).await,
    }
}

/// Discover the config file, falling back to defaults rooted at `cwd`.
fn load_config(cwd: &Path) -> Result<Config> {
    match Config::discover(cwd) {
        Ok(config) => Ok(config),
        Err(Error::ConfigNotFound(dir)) => {
            tracing::debug!(dir = %dir.display(), "no config file found, using defaults");
            Ok(Config::defaults_in(cwd))
        }
        Err(e) => Err(e),
    }
}
