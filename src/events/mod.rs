// ABOUTME: Deployment lifecycle events and their JSON wire format.
// ABOUTME: Events fan out to live subscribers through the Broadcaster.

mod broadcaster;

pub use broadcaster::{Broadcaster, Subscription};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{DeploymentState, StepStatus, timestamp};
use crate::types::StepId;

/// One event of a deployment, serialized as `{"type": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeploymentEvent {
    #[serde(rename_all = "camelCase")]
    StepStart {
        step: StepId,
        #[serde(with = "timestamp")]
        started_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attempt: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_attempts: Option<u32>,
    },

    StepOutput { step: StepId, output: String },

    #[serde(rename_all = "camelCase")]
    StepComplete {
        step: StepId,
        status: StepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            with = "timestamp::option"
        )]
        finished_at: Option<DateTime<Utc>>,
    },

    DeploymentComplete { deployment: Box<DeploymentState> },
}

impl DeploymentEvent {
    pub fn deployment_complete(state: &DeploymentState) -> Self {
        DeploymentEvent::DeploymentComplete {
            deployment: Box::new(state.clone()),
        }
    }

    /// Short event name, as used in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            DeploymentEvent::StepStart { .. } => "step_start",
            DeploymentEvent::StepOutput { .. } => "step_output",
            DeploymentEvent::StepComplete { .. } => "step_complete",
            DeploymentEvent::DeploymentComplete { .. } => "deployment_complete",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Render as one Server-Sent-Events frame.
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", self.to_json()?))
    }
}
