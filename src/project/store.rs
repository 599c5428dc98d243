// ABOUTME: Project store contract and an in-memory implementation.
// ABOUTME: Projects are listed in creation order and validated before every save.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Project, ProjectError, StepConfig};
use crate::state::timestamp;
use crate::types::ProjectSlug;

/// Errors from project stores.
#[derive(Debug, thiserror::Error)]
pub enum ProjectStoreError {
    #[error("project not found: {0}")]
    NotFound(ProjectSlug),

    #[error("invalid project `{slug}`: {source}")]
    Invalid {
        slug: ProjectSlug,
        #[source]
        source: ProjectError,
    },

    #[error("project store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("project store YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Durable records of deployable projects.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// All projects, oldest first.
    async fn list(&self) -> Result<Vec<Project>, ProjectStoreError>;

    async fn get(&self, slug: &ProjectSlug) -> Result<Option<Project>, ProjectStoreError>;

    /// Insert or update a project, returning the stored record.
    async fn save(&self, project: Project) -> Result<Project, ProjectStoreError>;

    async fn delete(&self, slug: &ProjectSlug) -> Result<(), ProjectStoreError>;

    /// The ordered step list of a project.
    async fn steps(&self, slug: &ProjectSlug) -> Result<Vec<StepConfig>, ProjectStoreError> {
        self.get(slug)
            .await?
            .map(|p| p.steps.into_iter().collect())
            .ok_or_else(|| ProjectStoreError::NotFound(slug.clone()))
    }
}

/// Insert or replace `project` in `projects`, keeping the original creation time.
pub(super) fn upsert(
    projects: &mut Vec<Project>,
    mut project: Project,
) -> Result<Project, ProjectStoreError> {
    project
        .validate()
        .map_err(|source| ProjectStoreError::Invalid {
            slug: project.slug.clone(),
            source,
        })?;

    project.updated_at = timestamp::now();
    match projects.iter().position(|p| p.slug == project.slug) {
        Some(index) => {
            project.created_at = projects[index].created_at;
            projects[index] = project.clone();
        }
        None => projects.push(project.clone()),
    }
    Ok(project)
}

pub(super) fn sorted(mut projects: Vec<Project>) -> Vec<Project> {
    projects.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.slug.cmp(&b.slug))
    });
    projects
}

/// Project store held in memory.
#[derive(Default)]
pub struct MemoryProjectStore {
    projects: Mutex<Vec<Project>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projects(projects: impl IntoIterator<Item = Project>) -> Self {
        Self {
            projects: Mutex::new(projects.into_iter().collect()),
        }
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn list(&self) -> Result<Vec<Project>, ProjectStoreError> {
        Ok(sorted(self.projects.lock().clone()))
    }

    async fn get(&self, slug: &ProjectSlug) -> Result<Option<Project>, ProjectStoreError> {
        Ok(self.projects.lock().iter().find(|p| &p.slug == slug).cloned())
    }

    async fn save(&self, project: Project) -> Result<Project, ProjectStoreError> {
        upsert(&mut self.projects.lock(), project)
    }

    async fn delete(&self, slug: &ProjectSlug) -> Result<(), ProjectStoreError> {
        let mut projects = self.projects.lock();
        let before = projects.len();
        projects.retain(|p| &p.slug != slug);
        if projects.len() == before {
            return Err(ProjectStoreError::NotFound(slug.clone()));
        }
        Ok(())
    }
}
