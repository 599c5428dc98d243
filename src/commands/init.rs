// ABOUTME: Init command implementation.
// ABOUTME: Writes the rollout.yml template into the working directory.

use rollout::config::init_config;
use rollout::error::Result;
use rollout::output::Output;
use std::path::Path;

pub fn init(dir: &Path, force: bool, output: &Output) -> Result<()> {
    let path = init_config(dir, force)?;
    output.success(&format!("Created {}", path.display()));
    Ok(())
}
