// ABOUTME: Deploy command implementation.
// ABOUTME: Starts a deployment and follows its event stream, cancelling on Ctrl-C.

use rollout::deploy::{DeploymentHandle, Deployer};
use rollout::error::{Error, Result};
use rollout::output::{Output, summary_line};
use rollout::state::{DeploymentState, DeploymentStatus};
use rollout::types::ProjectSlug;

/// Deploy `slug` and stream its progress until the deployment stops.
pub async fn deploy(
    deployer: &Deployer,
    slug: &ProjectSlug,
    triggered_by: Option<String>,
    branch: Option<&str>,
    mut output: Output,
) -> Result<()> {
    output.start_timer();
    let actor = triggered_by.unwrap_or_else(default_actor);
    let handle = match branch {
        Some(branch) => deployer.start_for_branch(slug, branch, &actor).await?,
        None => deployer.start(slug, &actor).await?,
    };

    output.progress(&format!(
        "Deploying {} ({}) as {actor}",
        slug,
        handle.id()
    ));
    let state = follow(deployer, handle, &output).await?;
    report(&state, &output)
}

/// Print events until the stream ends, then return the final snapshot.
pub async fn follow(
    deployer: &Deployer,
    handle: DeploymentHandle,
    output: &Output,
) -> Result<DeploymentState> {
    let (_, mut events, final_state) = handle.into_parts();
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => output.event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                output.progress("Cancelling deployment...");
                let deployer = deployer.clone();
                tokio::spawn(async move {
                    if let Err(e) = deployer.cancel().await {
                        tracing::warn!("cancel failed: {e}");
                    }
                });
            }
        }
    }

    Ok(final_state.wait().await?)
}

/// Turn the final snapshot into the command's result.
pub fn report(state: &DeploymentState, output: &Output) -> Result<()> {
    match state.status {
        DeploymentStatus::Success => {
            output.success(&summary_line(state));
            Ok(())
        }
        DeploymentStatus::Running => {
            output.success(&format!(
                "{}; the restarted process resumes the remaining steps",
                summary_line(state)
            ));
            Ok(())
        }
        DeploymentStatus::Failed => {
            let step = &state.current_step;
            let reason = match &step.error {
                Some(error) => format!("step {} failed: {error}", step.step),
                None => format!("step {} did not complete", step.step),
            };
            Err(Error::DeploymentFailed {
                id: state.id.to_string(),
                reason,
            })
        }
    }
}

/// `user@hostname` of whoever runs the command.
fn default_actor() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{user}@{}", gethostname::gethostname().to_string_lossy())
}
