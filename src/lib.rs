// ABOUTME: Library root for rollout - exposes the deployment engine and its collaborators.
// ABOUTME: The command-line binary is in main.rs.

pub mod config;
pub mod deploy;
pub mod error;
pub mod events;
pub mod gate;
pub mod notify;
pub mod output;
pub mod project;
pub mod runner;
pub mod state;
pub mod types;
