// ABOUTME: Project store persisted as a single YAML document.
// ABOUTME: Read-modify-write cycles are serialized and files are replaced atomically.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::Project;
use super::store::{ProjectStore, ProjectStoreError, sorted, upsert};
use crate::types::ProjectSlug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProjectsFile {
    #[serde(default)]
    projects: Vec<Project>,
}

/// Stores projects in a YAML file such as `.rollout/projects.yml`.
pub struct YamlProjectStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl YamlProjectStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<ProjectsFile, ProjectStoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(ProjectsFile::default()),
            Ok(content) => Ok(serde_yaml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ProjectsFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, file: &ProjectsFile) -> Result<(), ProjectStoreError> {
        let yaml = serde_yaml::to_string(file)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, yaml).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for YamlProjectStore {
    async fn list(&self) -> Result<Vec<Project>, ProjectStoreError> {
        Ok(sorted(self.load().await?.projects))
    }

    async fn get(&self, slug: &ProjectSlug) -> Result<Option<Project>, ProjectStoreError> {
        Ok(self
            .load()
            .await?
            .projects
            .into_iter()
            .find(|p| &p.slug == slug))
    }

    async fn save(&self, project: Project) -> Result<Project, ProjectStoreError> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        let saved = upsert(&mut file.projects, project)?;
        self.store(&file).await?;
        tracing::debug!(project = %saved.slug, path = %self.path.display(), "saved project");
        Ok(saved)
    }

    async fn delete(&self, slug: &ProjectSlug) -> Result<(), ProjectStoreError> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        let before = file.projects.len();
        file.projects.retain(|p| &p.slug != slug);
        if file.projects.len() == before {
            return Err(ProjectStoreError::NotFound(slug.clone()));
        }
        self.store(&file).await
    }
}
