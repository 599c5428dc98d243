// ABOUTME: Compile-fail test verifying DeploymentId and StepId are not interchangeable.
// ABOUTME: This test should fail to compile, validating type safety.

use rollout::types::{DeploymentId, StepId};

fn takes_deployment_id(_id: DeploymentId) {}

fn main() {
    let step_id = StepId::new("build");
    takes_deployment_id(step_id); // ERROR: expected DeploymentId, found StepId
}
