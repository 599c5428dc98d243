// ABOUTME: Project management commands: list, show, steps, seed, save, delete.
// ABOUTME: Operate on the configured project store.

use rollout::error::Result;
use rollout::output::Output;
use rollout::project::{Project, ProjectStore, seed_defaults};
use rollout::types::ProjectSlug;
use serde::Deserialize;
use std::path::Path;

pub async fn list_projects(store: &dyn ProjectStore, output: &Output) -> Result<()> {
    let projects = store.list().await?;
    output.value(&projects, || {
        if projects.is_empty() {
            return "No projects. Run `rollout projects seed` to add the defaults.".to_string();
        }
        projects
            .iter()
            .map(|p| {
                let state = if p.enabled { "" } else { " (disabled)" };
                format!("{:<20} {} [{} steps]{state}", p.slug, p.name, p.steps.len())
            })
            .collect::<Vec<_>>()
            .join("\n")
    });
    Ok(())
}

pub async fn show_project(store: &dyn ProjectStore, slug: &ProjectSlug, output: &Output) -> Result<()> {
    let project = get(store, slug).await?;
    output.value(&project, || {
        serde_yaml::to_string(&project).unwrap_or_else(|e| format!("{project:?} ({e})"))
    });
    Ok(())
}

pub async fn list_steps(store: &dyn ProjectStore, slug: &ProjectSlug, output: &Output) -> Result<()> {
    let steps = store.steps(slug).await?;
    output.value(&steps, || {
        steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let mut flags = Vec::new();
                if step.triggers_restart {
                    flags.push("restart");
                }
                if step.runs_on_module_init {
                    flags.push("after restart");
                }
                if step.skip {
                    flags.push("skipped");
                }
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", flags.join(", "))
                };
                format!(
                    "{}. {} ({}): {}{flags}",
                    i + 1,
                    step.name,
                    step.id,
                    step.command_line()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    });
    Ok(())
}

pub async fn seed_projects(store: &dyn ProjectStore, output: &Output) -> Result<()> {
    let inserted = seed_defaults(store).await?;
    if inserted.is_empty() {
        output.success("All default projects already exist");
    } else {
        let names: Vec<_> = inserted.iter().map(ProjectSlug::as_str).collect();
        output.success(&format!("Seeded {}", names.join(", ")));
    }
    Ok(())
}

/// Save every project in `file`, which holds either one project or a `projects:` list.
pub async fn save_projects(store: &dyn ProjectStore, file: &Path, output: &Output) -> Result<()> {
    let content = tokio::fs::read_to_string(file).await?;
    for project in parse_projects(&content)? {
        let saved = store.save(project).await?;
        output.success(&format!("Saved {}", saved.slug));
    }
    Ok(())
}

pub async fn delete_project(store: &dyn ProjectStore, slug: &ProjectSlug, output: &Output) -> Result<()> {
    store.delete(slug).await?;
    output.success(&format!("Deleted {slug}"));
    Ok(())
}

async fn get(store: &dyn ProjectStore, slug: &ProjectSlug) -> Result<Project> {
    store
        .get(slug)
        .await?
        .ok_or_else(|| rollout::project::ProjectStoreError::NotFound(slug.clone()).into())
}

fn parse_projects(content: &str) -> Result<Vec<Project>> {
    #[derive(Deserialize)]
    struct ProjectList {
        projects: Vec<Project>,
    }

    let value: serde_yaml::Value = serde_yaml::from_str(content)?;
    if value.get("projects").is_some() {
        Ok(serde_yaml::from_value::<ProjectList>(value)?.projects)
    } else {
        Ok(vec![serde_yaml::from_value(value)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT: &str = r#"
slug: docs
name: Docs site
work_dir: "{deploy_path}"
steps:
  - id: build
    name: Build
    command: npm
    args: [run, build]
"#;

    #[test]
    fn parses_single_project() {
        let projects = parse_projects(PROJECT).unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].slug.as_str(), "docs");
    }

    #[test]
    fn parses_project_list() {
        let list = format!(
            "projects:\n{}",
            PROJECT
                .lines()
                .filter(|l| !l.is_empty())
                .enumerate()
                .map(|(i, l)| if i == 0 { format!("  - {l}") } else { format!("    {l}") })
                .collect::<Vec<_>>()
                .join("\n")
        );
        let projects = parse_projects(&list).unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "Docs site");
    }
}
