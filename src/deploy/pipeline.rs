// ABOUTME: The background task that walks a project's steps for one deployment.
// ABOUTME: Persists every state change before announcing it, retries failing steps, and honors cancellation.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::engine::Inner;
use crate::events::DeploymentEvent;
use crate::notify::{Notification, format_duration};
use crate::project::{Project, StepConfig};
use crate::runner::{Invocation, OutputChunk, ProcessError};
use crate::state::{DeploymentState, DeploymentStatus, Slot, StepStatus, timestamp};

/// Error recorded on the step that was running when a deployment was cancelled.
pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

/// What a deployment task should execute.
pub(super) struct RunPlan {
    pub project: Project,
    /// Remaining steps, starting with the one to run next.
    pub steps: Vec<StepConfig>,
    pub work_dir: PathBuf,
    /// Send a start notification once the gate passes.
    pub announce: bool,
}

enum Outcome {
    Completed,
    /// A restart step spawned the replacement process; it resumes the rest.
    HandedOver,
    Failed { step_name: String, error: String },
    Cancelled,
}

enum StepResult {
    Succeeded,
    Failed(String),
    Cancelled,
}

impl Inner {
    /// Drive `state` through `plan` and return the last snapshot.
    pub(super) async fn drive(
        &self,
        mut state: DeploymentState,
        plan: RunPlan,
        token: CancellationToken,
    ) -> DeploymentState {
        let (namespace, key) = (&self.settings.gate_namespace, &self.settings.gate_key);
        if self.gate.is_disabled(namespace, key).await {
            warn!(deployment = %state.id, "deployment blocked by feature flag {namespace}/{key}");
            // A resumed hand-over sits on the already archived restart step.
            if state.current_step.status == StepStatus::Success
                && let Some(next) = plan.steps.first()
            {
                state.advance_to(next, self.settings.max_attempts);
            }
            if state.current_step.status != StepStatus::Success {
                state.current_step.fail(format!(
                    "Deployment pipeline is disabled by feature flag {namespace}/{key}"
                ));
            }
            state.finish(DeploymentStatus::Failed);
            self.persist_final(&state).await;
            self.broadcaster.emit(DeploymentEvent::deployment_complete(&state));
            self.broadcaster.complete();
            return state;
        }

        if plan.announce {
            self.notifier
                .send(Notification::started(&plan.project.name, &state))
                .await;
        }

        match self.run_steps(&mut state, &plan, &token).await {
            Outcome::Completed => self.finish_success(&mut state, &plan.project).await,
            Outcome::HandedOver => {
                info!(
                    deployment = %state.id,
                    "restart requested, remaining steps continue in the new process"
                );
                self.broadcaster.complete();
            }
            Outcome::Failed { step_name, error } => {
                self.finish_failure(&mut state, &plan.project, &step_name, &error)
                    .await
            }
            Outcome::Cancelled => self.finish_cancelled(&mut state).await,
        }
        state
    }

    async fn run_steps(
        &self,
        state: &mut DeploymentState,
        plan: &RunPlan,
        token: &CancellationToken,
    ) -> Outcome {
        for step in &plan.steps {
            state.advance_to(step, self.settings.max_attempts);
            if token.is_cancelled() {
                return Outcome::Cancelled;
            }

            if step.skip {
                info!(deployment = %state.id, step = %step.id, "skipping step");
                state.current_step.skip();
                state.archive_current_step();
                self.persist(state).await;
                self.emit_step_complete(state);
                continue;
            }

            let result = if step.triggers_restart {
                self.trigger_restart(state, step, plan)
                    .await
                    .map(|()| Outcome::HandedOver)
            } else {
                match self.run_with_retries(state, step, plan, token).await {
                    StepResult::Succeeded => continue,
                    StepResult::Failed(error) => Err(error),
                    StepResult::Cancelled => return Outcome::Cancelled,
                }
            };
            return match result {
                Ok(outcome) => outcome,
                Err(error) => Outcome::Failed {
                    step_name: step.name.clone(),
                    error,
                },
            };
        }
        Outcome::Completed
    }

    /// Spawn the restart command detached. The step counts as done once spawned.
    async fn trigger_restart(
        &self,
        state: &mut DeploymentState,
        step: &StepConfig,
        plan: &RunPlan,
    ) -> Result<(), String> {
        state.current_step.begin_attempt(1);
        self.persist(state).await;
        self.broadcaster.emit(DeploymentEvent::StepStart {
            step: step.id.clone(),
            started_at: state.current_step.started_at.unwrap_or_else(timestamp::now),
            attempt: None,
            max_attempts: None,
        });

        let spawned = match self.invocation(state, step, plan) {
            Some(invocation) => self
                .runner
                .spawn_detached(&invocation)
                .map(|()| invocation)
                .map_err(|e| e.to_string()),
            None => Err(missing_process_message(step)),
        };

        match spawned {
            Ok(invocation) => {
                info!(deployment = %state.id, step = %step.id, command = %invocation, "spawned restart command");
                state.current_step.append_output(&format!(
                    "Started `{invocation}` in the background; remaining steps run after the restart.\n"
                ));
                state.current_step.succeed();
                state.archive_current_step();
                self.persist(state).await;
                self.emit_step_complete(state);
                Ok(())
            }
            Err(error) => {
                error!(deployment = %state.id, step = %step.id, "restart command failed to start: {error}");
                state.current_step.fail(error.clone());
                state.archive_current_step();
                self.persist(state).await;
                self.emit_step_complete(state);
                Err(error)
            }
        }
    }

    async fn run_with_retries(
        &self,
        state: &mut DeploymentState,
        step: &StepConfig,
        plan: &RunPlan,
        token: &CancellationToken,
    ) -> StepResult {
        let max_attempts = self.settings.max_attempts;
        let Some(invocation) = self.invocation(state, step, plan) else {
            let error = missing_process_message(step);
            state.current_step.fail(error.clone());
            state.archive_current_step();
            self.persist(state).await;
            self.emit_step_complete(state);
            return StepResult::Failed(error);
        };

        let mut attempt = 1;
        loop {
            if token.is_cancelled() {
                return StepResult::Cancelled;
            }

            state.current_step.begin_attempt(attempt);
            self.persist(state).await;
            self.broadcaster.emit(DeploymentEvent::StepStart {
                step: step.id.clone(),
                started_at: state.current_step.started_at.unwrap_or_else(timestamp::now),
                attempt: Some(attempt),
                max_attempts: Some(max_attempts),
            });
            info!(
                deployment = %state.id,
                step = %step.id,
                "running `{invocation}` (attempt {attempt}/{max_attempts})"
            );

            let error = match self.execute(state, &invocation, token).await {
                Ok(()) => {
                    state.current_step.succeed();
                    state.archive_current_step();
                    self.persist(state).await;
                    self.emit_step_complete(state);
                    return StepResult::Succeeded;
                }
                Err(e) if e.is_cancelled() || token.is_cancelled() => return StepResult::Cancelled,
                Err(e) => e,
            };

            if attempt >= max_attempts {
                warn!(deployment = %state.id, step = %step.id, "step failed after {attempt} attempts: {error}");
                state.current_step.fail(error.to_string());
                state.archive_current_step();
                self.persist(state).await;
                self.emit_step_complete(state);
                return StepResult::Failed(error.to_string());
            }

            let backoff = self.settings.retry_backoff;
            warn!(deployment = %state.id, step = %step.id, "attempt {attempt}/{max_attempts} failed: {error}");
            let note = format!(
                "\n[attempt {attempt}/{max_attempts} failed: {error}; retrying in {}]\n",
                format_duration(backoff)
            );
            state.current_step.error = Some(error.to_string());
            state.current_step.append_output(&note);
            self.broadcaster.emit(DeploymentEvent::StepOutput {
                step: step.id.clone(),
                output: note,
            });
            attempt += 1;

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = token.cancelled() => return StepResult::Cancelled,
            }
        }
    }

    /// Run one attempt, appending output to the current step as it streams.
    async fn execute(
        &self,
        state: &mut DeploymentState,
        invocation: &Invocation,
        token: &CancellationToken,
    ) -> Result<(), ProcessError> {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let run = self.runner.run(invocation, sender);
        tokio::pin!(run);

        let mut kill_sent = false;
        let result = loop {
            tokio::select! {
                biased;
                Some(chunk) = receiver.recv() => self.record_output(state, chunk),
                result = &mut run => break result,
                _ = token.cancelled(), if !kill_sent => {
                    kill_sent = true;
                    if self.runner.cancel() {
                        info!(deployment = %state.id, "terminated running step command");
                    }
                }
            }
        };
        while let Ok(chunk) = receiver.try_recv() {
            self.record_output(state, chunk);
        }
        result
    }

    fn record_output(&self, state: &mut DeploymentState, chunk: OutputChunk) {
        state.current_step.append_output(&chunk.text);
        self.broadcaster.emit(DeploymentEvent::StepOutput {
            step: state.current_step.step.clone(),
            output: chunk.text,
        });
    }

    fn invocation(
        &self,
        state: &DeploymentState,
        step: &StepConfig,
        plan: &RunPlan,
    ) -> Option<Invocation> {
        let args = step.resolved_args(plan.project.process_name.as_deref())?;
        Some(
            Invocation::new(&step.command, &plan.work_dir)
                .args(args)
                .env("ROLLOUT_DEPLOYMENT_ID", state.id.as_str())
                .env("ROLLOUT_PROJECT", state.project.as_str())
                .env("ROLLOUT_STEP", step.id.as_str())
                .env("ROLLOUT_TRIGGERED_BY", &state.triggered_by),
        )
    }

    async fn finish_success(&self, state: &mut DeploymentState, project: &Project) {
        state.finish(DeploymentStatus::Success);
        self.persist_final(state).await;
        self.broadcaster.emit(DeploymentEvent::deployment_complete(state));
        self.broadcaster.complete();
        info!(deployment = %state.id, project = %state.project, "deployment succeeded");
        self.notifier
            .send(Notification::succeeded(&project.name, state))
            .await;
    }

    async fn finish_failure(
        &self,
        state: &mut DeploymentState,
        project: &Project,
        step_name: &str,
        error: &str,
    ) {
        state.finish(DeploymentStatus::Failed);
        self.persist_final(state).await;
        self.broadcaster.emit(DeploymentEvent::deployment_complete(state));
        self.broadcaster.complete();
        error!(deployment = %state.id, project = %state.project, "deployment failed at {step_name}: {error}");
        self.notifier
            .send(Notification::failed(&project.name, state, step_name, error))
            .await;
    }

    async fn finish_cancelled(&self, state: &mut DeploymentState) {
        state.current_step.fail(CANCELLED_MESSAGE);
        state.archive_current_step();
        state.finish(DeploymentStatus::Failed);
        self.persist_final(state).await;
        self.emit_step_complete(state);
        self.broadcaster.emit(DeploymentEvent::deployment_complete(state));
        self.broadcaster.complete();
        warn!(deployment = %state.id, project = %state.project, "deployment cancelled");
    }

    fn emit_step_complete(&self, state: &DeploymentState) {
        let step = &state.current_step;
        self.broadcaster.emit(DeploymentEvent::StepComplete {
            step: step.step.clone(),
            status: step.status,
            error: step.error.clone(),
            finished_at: step.finished_at,
        });
    }

    /// Write the snapshot to the current slot. Failures are logged, never fatal.
    pub(super) async fn persist(&self, state: &DeploymentState) {
        if let Err(e) = self
            .states
            .set(Slot::Current, Some(state), self.settings.effective_ttl())
            .await
        {
            error!(deployment = %state.id, "failed to persist deployment state: {e}");
        }
    }

    /// Write a terminal snapshot to both slots.
    pub(super) async fn persist_final(&self, state: &DeploymentState) {
        for slot in [Slot::Current, Slot::Last] {
            if let Err(e) = self
                .states
                .set(slot, Some(state), self.settings.effective_ttl())
                .await
            {
                error!(deployment = %state.id, slot = %slot, "failed to persist deployment state: {e}");
            }
        }
    }
}

fn missing_process_message(step: &StepConfig) -> String {
    format!(
        "step {} uses {{process}} but the project has no process name",
        step.id
    )
}
