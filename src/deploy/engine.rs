// ABOUTME: Deployer: the single entry point for starting, resuming, retrying, and cancelling deployments.
// ABOUTME: Serializes control operations and owns the background task of the active deployment.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::handle::{DeploymentHandle, Finished, wait_finished};
use super::pipeline::{CANCELLED_MESSAGE, RunPlan};
use super::{DeployError, EngineSettings};
use crate::events::{Broadcaster, DeploymentEvent, Subscription};
use crate::gate::FeatureGate;
use crate::notify::Notifier;
use crate::project::{Project, ProjectStore};
use crate::runner::StepRunner;
use crate::state::{DeploymentState, DeploymentStatus, Slot, StateStore, StepStatus};
use crate::types::{DeploymentId, ProjectSlug};

/// External collaborators of the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub projects: Arc<dyn ProjectStore>,
    pub states: Arc<dyn StateStore>,
    pub runner: Arc<dyn StepRunner>,
    pub gate: Arc<dyn FeatureGate>,
    pub notifier: Arc<dyn Notifier>,
}

/// The deployment being driven by this process.
struct ActiveRun {
    id: DeploymentId,
    token: CancellationToken,
    finished: Finished,
}

pub(super) struct Inner {
    pub(super) projects: Arc<dyn ProjectStore>,
    pub(super) states: Arc<dyn StateStore>,
    pub(super) runner: Arc<dyn StepRunner>,
    pub(super) gate: Arc<dyn FeatureGate>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) settings: EngineSettings,
    pub(super) broadcaster: Broadcaster,
    control: AsyncMutex<()>,
    active: parking_lot::Mutex<Option<ActiveRun>>,
}

/// Runs project pipelines, one deployment at a time.
///
/// Cloning is cheap; clones share the same engine.
#[derive(Clone)]
pub struct Deployer {
    inner: Arc<Inner>,
}

impl Deployer {
    pub fn new(collaborators: Collaborators, settings: EngineSettings) -> Self {
        let Collaborators {
            projects,
            states,
            runner,
            gate,
            notifier,
        } = collaborators;
        Self {
            inner: Arc::new(Inner {
                projects,
                states,
                runner,
                gate,
                notifier,
                broadcaster: Broadcaster::new(),
                settings,
                control: AsyncMutex::new(()),
                active: parking_lot::Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn projects(&self) -> &dyn ProjectStore {
        self.inner.projects.as_ref()
    }

    /// Start a deployment of `slug`.
    ///
    /// Pre-flight failures (another deployment running, unknown or disabled
    /// project, unresolvable paths) are returned without touching any state.
    pub async fn start(
        &self,
        slug: &ProjectSlug,
        triggered_by: &str,
    ) -> Result<DeploymentHandle, DeployError> {
        self.start_with(slug, None, triggered_by).await
    }

    /// Start a deployment in response to a push to `branch`.
    pub async fn start_for_branch(
        &self,
        slug: &ProjectSlug,
        branch: &str,
        triggered_by: &str,
    ) -> Result<DeploymentHandle, DeployError> {
        self.start_with(slug, Some(branch), triggered_by).await
    }

    async fn start_with(
        &self,
        slug: &ProjectSlug,
        branch: Option<&str>,
        triggered_by: &str,
    ) -> Result<DeploymentHandle, DeployError> {
        let _control = self.inner.control.lock().await;
        self.ensure_idle().await?;

        let project = self.load_project(slug).await?;
        if let Some(branch) = branch
            && !project.accepts_branch(branch)
        {
            return Err(DeployError::BranchNotTracked {
                project: project.slug.clone(),
                branch: branch.to_string(),
            });
        }
        let work_dir = self.inner.preflight(&project)?;

        let state = DeploymentState::new(
            project.slug.clone(),
            project.steps.first(),
            self.inner.settings.max_attempts,
            triggered_by,
        );
        self.inner
            .states
            .set(Slot::Current, Some(&state), self.inner.settings.effective_ttl())
            .await?;
        info!(deployment = %state.id, project = %project.slug, triggered_by, "deployment started");

        let steps = project.steps_from(0);
        Ok(self.launch(
            state,
            RunPlan {
                project,
                steps,
                work_dir,
                announce: true,
            },
        ))
    }

    /// Continue a deployment left `running` by a previous process.
    ///
    /// Returns `None` when there is nothing to resume, or when the stored
    /// deployment can no longer run and has been marked failed.
    pub async fn resume(&self) -> Result<Option<DeploymentHandle>, DeployError> {
        let _control = self.inner.control.lock().await;
        if self.is_driving() {
            return Ok(None);
        }
        let Some(state) = self
            .inner
            .states
            .get(Slot::Current)
            .await?
            .filter(DeploymentState::is_running)
        else {
            return Ok(None);
        };

        let Some(project) = self.inner.projects.get(&state.project).await? else {
            let reason = format!("project {} no longer exists", state.project);
            self.abandon(state, &reason).await?;
            return Ok(None);
        };
        let Some(index) = project.position(&state.current_step.step) else {
            let reason = format!(
                "step {} no longer exists in project {}",
                state.current_step.step, project.slug
            );
            self.abandon(state, &reason).await?;
            return Ok(None);
        };
        let work_dir = match self.inner.preflight(&project) {
            Ok(work_dir) => work_dir,
            Err(e) => {
                self.abandon(state, &e.to_string()).await?;
                return Ok(None);
            }
        };

        let next = if state.current_step.status == StepStatus::Success {
            index + 1
        } else {
            index
        };
        let steps = project.steps_from(next);
        info!(
            deployment = %state.id,
            project = %project.slug,
            remaining = steps.len(),
            "resuming deployment after step {}",
            state.current_step.step
        );

        Ok(Some(self.launch(
            state,
            RunPlan {
                project,
                steps,
                work_dir,
                announce: false,
            },
        )))
    }

    /// Re-run the failed step of the last deployment and continue from there.
    pub async fn retry_step(&self) -> Result<DeploymentHandle, DeployError> {
        let _control = self.inner.control.lock().await;
        self.ensure_idle().await?;

        let mut state = self
            .inner
            .states
            .get(Slot::Last)
            .await?
            .ok_or_else(|| DeployError::NothingToRetry("no previous deployment".into()))?;
        if state.status != DeploymentStatus::Failed {
            return Err(DeployError::NothingToRetry(format!(
                "last deployment {} did not fail",
                state.id
            )));
        }
        if state.current_step.status != StepStatus::Failed {
            return Err(DeployError::NothingToRetry(format!(
                "last deployment {} has no failed step",
                state.id
            )));
        }

        let project = self.load_project(&state.project).await?;
        let index = project.position(&state.current_step.step).ok_or_else(|| {
            DeployError::NothingToRetry(format!(
                "step {} no longer exists in project {}",
                state.current_step.step, project.slug
            ))
        })?;
        let work_dir = self.inner.preflight(&project)?;

        let step = state.current_step.step.clone();
        state.current_step.reset();
        state.completed_steps.remove(&step);
        state.status = DeploymentStatus::Running;
        state.finished_at = None;
        self.inner
            .states
            .set(Slot::Current, Some(&state), self.inner.settings.effective_ttl())
            .await?;
        info!(deployment = %state.id, project = %project.slug, step = %step, "retrying failed step");

        let steps = project.steps_from(index);
        Ok(self.launch(
            state,
            RunPlan {
                project,
                steps,
                work_dir,
                announce: true,
            },
        ))
    }

    /// Cancel the running deployment and return its final snapshot.
    ///
    /// A deployment with no task in this process (its driver is gone) is
    /// marked failed directly.
    pub async fn cancel(&self) -> Result<DeploymentState, DeployError> {
        let _control = self.inner.control.lock().await;
        let active = self
            .inner
            .active
            .lock()
            .as_ref()
            .map(|run| (run.id.clone(), run.token.clone(), run.finished.clone()));
        if let Some((id, token, finished)) = active {
            info!(deployment = %id, "cancelling deployment");
            token.cancel();
            return wait_finished(finished).await;
        }

        let Some(mut state) = self
            .inner
            .states
            .get(Slot::Current)
            .await?
            .filter(DeploymentState::is_running)
        else {
            return Err(DeployError::NothingToCancel);
        };

        warn!(deployment = %state.id, "no local task drives this deployment, marking it cancelled");
        state.current_step.fail(CANCELLED_MESSAGE);
        state.archive_current_step();
        state.finish(DeploymentStatus::Failed);
        self.persist_both(&state).await?;
        self.inner
            .broadcaster
            .emit(DeploymentEvent::deployment_complete(&state));
        self.inner.broadcaster.complete();
        Ok(state)
    }

    /// Snapshot in the current slot, running or not.
    pub async fn current(&self) -> Result<Option<DeploymentState>, DeployError> {
        Ok(self.inner.states.get(Slot::Current).await?)
    }

    /// Most recently finished deployment.
    pub async fn last(&self) -> Result<Option<DeploymentState>, DeployError> {
        Ok(self.inner.states.get(Slot::Last).await?)
    }

    /// Attach to the event stream of the deployment in progress, if any.
    ///
    /// Only events emitted after subscribing are delivered.
    pub fn subscribe(&self) -> Option<Subscription> {
        self.inner.broadcaster.subscribe()
    }

    /// Whether this process is driving a deployment right now.
    pub fn is_driving(&self) -> bool {
        self.inner.active.lock().is_some()
    }

    async fn ensure_idle(&self) -> Result<(), DeployError> {
        if let Some(current) = self.inner.states.get(Slot::Current).await?
            && current.is_running()
        {
            return Err(DeployError::AlreadyInProgress {
                id: current.id,
                project: current.project,
            });
        }
        Ok(())
    }

    async fn load_project(&self, slug: &ProjectSlug) -> Result<Project, DeployError> {
        self.inner
            .projects
            .get(slug)
            .await?
            .ok_or_else(|| DeployError::ProjectNotFound(slug.clone()))
    }

    /// Mark a stored deployment failed because it cannot be continued.
    async fn abandon(&self, mut state: DeploymentState, reason: &str) -> Result<(), DeployError> {
        error!(deployment = %state.id, "cannot resume deployment: {reason}");
        state.current_step.fail(reason);
        state.archive_current_step();
        state.finish(DeploymentStatus::Failed);
        self.persist_both(&state).await
    }

    async fn persist_both(&self, state: &DeploymentState) -> Result<(), DeployError> {
        let ttl = self.inner.settings.effective_ttl();
        self.inner.states.set(Slot::Current, Some(state), ttl).await?;
        self.inner.states.set(Slot::Last, Some(state), ttl).await?;
        Ok(())
    }

    /// Open the event stream and spawn the task driving `state`.
    fn launch(&self, state: DeploymentState, plan: RunPlan) -> DeploymentHandle {
        let events = self.inner.broadcaster.open();
        let token = CancellationToken::new();
        let (done, finished) = watch::channel(None);
        *self.inner.active.lock() = Some(ActiveRun {
            id: state.id.clone(),
            token: token.clone(),
            finished: finished.clone(),
        });

        let handle = DeploymentHandle::new(state.clone(), events, finished);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let id = state.id.clone();
            let final_state = inner.drive(state, plan, token).await;
            inner.clear_active(&id);
            let _ = done.send(Some(final_state));
        });
        handle
    }
}

impl Inner {
    /// Check that `project` can run here and resolve its working directory.
    fn preflight(&self, project: &Project) -> Result<PathBuf, DeployError> {
        if !project.enabled {
            return Err(DeployError::ProjectDisabled(project.slug.clone()));
        }
        let work_dir =
            project
                .work_dir
                .resolve(&self.settings.paths)
                .ok_or_else(|| DeployError::WorkDirUnresolved {
                    project: project.slug.clone(),
                    work_dir: project.work_dir.to_string(),
                })?;
        let process_name = project.process_name.as_deref();
        if let Some(step) = project
            .steps
            .iter()
            .find(|step| step.resolved_args(process_name).is_none())
        {
            return Err(DeployError::MissingProcessName {
                project: project.slug.clone(),
                step: step.id.clone(),
            });
        }
        Ok(work_dir)
    }

    fn clear_active(&self, id: &DeploymentId) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|run| &run.id == id) {
            active.take();
        }
    }
}
