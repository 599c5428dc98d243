// ABOUTME: Control commands for deployments outside the normal deploy flow.
// ABOUTME: Resume after restart, retry a failed step, cancel, and show status.

use super::deploy::{follow, report};
use rollout::deploy::Deployer;
use rollout::error::Result;
use rollout::output::{Output, summary_line};
use rollout::state::DeploymentState;
use serde::Serialize;

pub async fn resume(deployer: &Deployer, mut output: Output) -> Result<()> {
    output.start_timer();
    let Some(handle) = deployer.resume().await? else {
        output.success("Nothing to resume");
        return Ok(());
    };
    output.progress(&format!(
        "Resuming {} ({})",
        handle.deployment().project,
        handle.id()
    ));
    let state = follow(deployer, handle, &output).await?;
    report(&state, &output)
}

pub async fn retry(deployer: &Deployer, mut output: Output) -> Result<()> {
    output.start_timer();
    let handle = deployer.retry_step().await?;
    output.progress(&format!(
        "Retrying {} of {} ({})",
        handle.deployment().current_step.step,
        handle.deployment().project,
        handle.id()
    ));
    let state = follow(deployer, handle, &output).await?;
    report(&state, &output)
}

pub async fn cancel(deployer: &Deployer, output: &Output) -> Result<()> {
    let state = deployer.cancel().await?;
    output.success(&summary_line(&state));
    Ok(())
}

pub async fn status(deployer: &Deployer, output: &Output) -> Result<()> {
    #[derive(Serialize)]
    struct Status<T> {
        current: Option<T>,
        last: Option<T>,
    }

    let status = Status {
        current: deployer.current().await?,
        last: deployer.last().await?,
    };
    output.value(&status, || {
        let line = |label: &str, state: &Option<DeploymentState>| match state {
            Some(state) => format!("{label}: {}", summary_line(state)),
            None => format!("{label}: none"),
        };
        format!(
            "{}\n{}",
            line("Current", &status.current),
            line("Last", &status.last)
        )
    });
    Ok(())
}
