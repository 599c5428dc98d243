// ABOUTME: Deployment notifications (start, success, failure) and the notifier contract.
// ABOUTME: Notifiers swallow their own delivery failures; the pipeline never waits on them to succeed.

use async_trait::async_trait;
use std::time::Duration;

use crate::state::DeploymentState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Started,
    Succeeded,
    Failed,
}

/// A message about a deployment, ready for an email-like transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub subject: String,
    pub body: String,
    /// Total deployment duration, on success.
    pub duration: Option<Duration>,
}

impl Notification {
    pub fn started(project_name: &str, state: &DeploymentState) -> Self {
        Self {
            kind: NotificationKind::Started,
            subject: format!("Deployment started: {project_name}"),
            body: format!(
                "Deployment {} of {} was started by {}.",
                state.id, project_name, state.triggered_by
            ),
            duration: None,
        }
    }

    pub fn succeeded(project_name: &str, state: &DeploymentState) -> Self {
        let duration = state.duration();
        let took = duration.map(format_duration).unwrap_or_else(|| "unknown".to_string());
        Self {
            kind: NotificationKind::Succeeded,
            subject: format!("Deployment succeeded: {project_name}"),
            body: format!(
                "Deployment {} of {} finished successfully in {} ({} step(s), triggered by {}).",
                state.id,
                project_name,
                took,
                state.completed_steps.len(),
                state.triggered_by
            ),
            duration,
        }
    }

    pub fn failed(project_name: &str, state: &DeploymentState, step_name: &str, error: &str) -> Self {
        Self {
            kind: NotificationKind::Failed,
            subject: format!("Deployment failed: {project_name}"),
            body: format!(
                "Deployment {} of {} failed at step \"{}\".\n\nError: {}\n\nTriggered by {}.",
                state.id, project_name, step_name, error, state.triggered_by
            ),
            duration: state.duration(),
        }
    }

    /// Copy with the subject prefixed, e.g. `[rollout] Deployment failed: ...`.
    pub fn with_subject_prefix(mut self, prefix: &str) -> Self {
        if !prefix.is_empty() {
            self.subject = format!("{prefix} {}", self.subject);
        }
        self
    }
}

/// Format a duration to whole seconds in humantime style, e.g. `42s` or `1m 5s`.
pub fn format_duration(duration: Duration) -> String {
    humantime_serde::re::humantime::format_duration(Duration::from_secs(duration.as_secs()))
        .to_string()
}

/// Delivers notifications. Delivery errors are handled (logged) by the implementation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification);
}

/// Notifier that writes notifications to the tracing log.
pub struct LogNotifier {
    recipients: Vec<String>,
    subject_prefix: String,
}

impl LogNotifier {
    pub fn new(recipients: Vec<String>, subject_prefix: impl Into<String>) -> Self {
        Self {
            recipients,
            subject_prefix: subject_prefix.into(),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) {
        let notification = notification.with_subject_prefix(&self.subject_prefix);
        let to = self.recipients.join(", ");
        match notification.kind {
            NotificationKind::Failed => {
                tracing::error!(to = %to, "{}\n{}", notification.subject, notification.body)
            }
            _ => tracing::info!(to = %to, "{}\n{}", notification.subject, notification.body),
        }
    }
}
