// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to prevent ID confusion at compile time.

mod id;
mod project_slug;

pub use id::{DeploymentId, Id, StepId};
pub use project_slug::{ProjectSlug, ProjectSlugError};
