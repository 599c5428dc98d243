// ABOUTME: Deployment engine: pre-flight checks, the step pipeline, crash resume, retry, and cancel.
// ABOUTME: Exports the Deployer entry point, its handle, settings, and error types.

mod engine;
mod error;
mod handle;
mod pipeline;
mod settings;

pub use engine::{Collaborators, Deployer};
pub use error::{DeployError, DeployErrorKind};
pub use handle::{DeploymentHandle, FinalState};
pub use pipeline::CANCELLED_MESSAGE;
pub use settings::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BACKOFF, EngineSettings, MIN_STATE_TTL};
