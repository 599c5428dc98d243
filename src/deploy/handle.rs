// ABOUTME: Handle returned when a deployment is started, resumed, or retried.
// ABOUTME: Carries the initial snapshot, a live event subscription, and the final-state signal.

use tokio::sync::watch;

use super::DeployError;
use crate::events::{DeploymentEvent, Subscription};
use crate::state::DeploymentState;
use crate::types::DeploymentId;

/// Receiver side of a deployment task's final state.
pub(super) type Finished = watch::Receiver<Option<DeploymentState>>;

/// A deployment running in the background.
#[derive(Debug)]
pub struct DeploymentHandle {
    deployment: DeploymentState,
    events: Subscription,
    finished: Finished,
}

impl DeploymentHandle {
    pub(super) fn new(deployment: DeploymentState, events: Subscription, finished: Finished) -> Self {
        Self {
            deployment,
            events,
            finished,
        }
    }

    /// The snapshot persisted before the task started.
    pub fn deployment(&self) -> &DeploymentState {
        &self.deployment
    }

    pub fn id(&self) -> &DeploymentId {
        &self.deployment.id
    }

    /// Next event of this deployment, or `None` once its stream completes.
    pub async fn next_event(&mut self) -> Option<DeploymentEvent> {
        self.events.recv().await
    }

    /// Split into the event subscription and a waiter for the final state.
    pub fn into_parts(self) -> (DeploymentState, Subscription, FinalState) {
        (
            self.deployment,
            self.events,
            FinalState {
                finished: self.finished,
            },
        )
    }

    /// Wait for the task to stop driving the deployment and return its last snapshot.
    ///
    /// A deployment handed over to a restarted process is still `running`.
    pub async fn wait(self) -> Result<DeploymentState, DeployError> {
        wait_finished(self.finished).await
    }

    /// Drain every event, then return them with the final snapshot.
    pub async fn collect(mut self) -> Result<(Vec<DeploymentEvent>, DeploymentState), DeployError> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let state = wait_finished(self.finished).await?;
        Ok((events, state))
    }
}

/// Waiter for a deployment task's final snapshot.
pub struct FinalState {
    finished: Finished,
}

impl FinalState {
    pub async fn wait(self) -> Result<DeploymentState, DeployError> {
        wait_finished(self.finished).await
    }
}

pub(super) async fn wait_finished(mut finished: Finished) -> Result<DeploymentState, DeployError> {
    let state = finished
        .wait_for(Option::is_some)
        .await
        .map_err(|_| DeployError::Interrupted)?;
    state.clone().ok_or(DeployError::Interrupted)
}
