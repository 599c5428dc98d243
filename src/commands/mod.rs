// ABOUTME: Command module aggregator for the rollout CLI.
// ABOUTME: Re-exports init, project, deploy, and control command handlers.

mod control;
mod deploy;
mod engine;
mod init;
mod projects;

pub use control::{cancel, resume, retry, status};
pub use deploy::deploy;
pub use engine::build_deployer;
pub use init::init;
pub use projects::{
    delete_project, list_projects, list_steps, save_projects, seed_projects, show_project,
};
