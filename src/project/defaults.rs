// ABOUTME: Built-in project definitions seeded on first boot.
// ABOUTME: Seeding only inserts missing slugs and never overwrites existing rows.

use nonempty::nonempty;

use super::{Project, ProjectStore, ProjectStoreError, StepConfig, WorkDir};
use crate::types::ProjectSlug;

fn slug(value: &str) -> ProjectSlug {
    ProjectSlug::new(value).expect("built-in slugs are valid")
}

/// The well-known projects every installation starts with.
pub fn default_projects() -> Vec<Project> {
    let backend = Project::new(
        slug("backend"),
        "Backend service",
        WorkDir::CurrentDir,
        nonempty![
            StepConfig::new("git_pull", "Pull latest changes", "git").with_args(["pull", "--ff-only"]),
            StepConfig::new("npm_install", "Install dependencies", "npm").with_args(["ci"]),
            StepConfig::new("build", "Build", "npm").with_args(["run", "build"]),
            StepConfig::new("restart_service", "Restart service", "pm2")
                .with_args(["restart", "{process}"])
                .restarting(),
            StepConfig::new("verify", "Verify service", "pm2")
                .with_args(["describe", "{process}"])
                .on_module_init(),
        ],
    )
    .with_process_name("backend")
    .with_branch("main");

    let frontend = Project::new(
        slug("frontend"),
        "Frontend site",
        WorkDir::DeployPath,
        nonempty![
            StepConfig::new("git_pull", "Pull latest changes", "git").with_args(["pull", "--ff-only"]),
            StepConfig::new("npm_install", "Install dependencies", "npm").with_args(["ci"]),
            StepConfig::new("build", "Build", "npm").with_args(["run", "build"]),
        ],
    )
    .with_branch("main");

    vec![backend, frontend]
}

/// Insert default projects whose slugs are not yet stored.
///
/// Returns the slugs that were inserted.
pub async fn seed_defaults(store: &dyn ProjectStore) -> Result<Vec<ProjectSlug>, ProjectStoreError> {
    let mut inserted = Vec::new();
    for project in default_projects() {
        if store.get(&project.slug).await?.is_some() {
            continue;
        }
        let saved = store.save(project).await?;
        tracing::info!(project = %saved.slug, "seeded default project");
        inserted.push(saved.slug);
    }
    Ok(inserted)
}
