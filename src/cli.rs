// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use rollout::output::OutputMode;
use rollout::types::ProjectSlug;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollout")]
#[command(about = "Crash-resumable deployment pipelines for self-hosted projects")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "normal", global = true)]
    pub format: OutputMode,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new rollout.yml configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Inspect and manage deployable projects
    Projects {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Deploy a project and stream its progress
    Deploy {
        /// Project to deploy
        slug: ProjectSlug,

        /// Who requested the deployment (default: user@hostname)
        #[arg(long)]
        triggered_by: Option<String>,

        /// Only deploy if the project tracks this branch
        #[arg(long)]
        branch: Option<String>,
    },

    /// Resume a deployment interrupted by a restart
    Resume,

    /// Retry the failed step of the last deployment
    Retry,

    /// Cancel the running deployment
    Cancel,

    /// Show the current and last deployment
    Status,
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// List all projects
    List,

    /// Show one project
    Show { slug: ProjectSlug },

    /// List a project's steps in order
    Steps { slug: ProjectSlug },

    /// Insert the built-in projects that are missing
    Seed,

    /// Create or update projects from a YAML file
    Save { file: PathBuf },

    /// Delete a project
    Delete { slug: ProjectSlug },
}
