// ABOUTME: URL-safe project slug validation.
// ABOUTME: Slugs identify projects in stores, state snapshots, and the CLI.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectSlugError {
    #[error("project slug cannot be empty")]
    Empty,

    #[error("project slug exceeds maximum length of 63 characters")]
    TooLong,

    #[error("project slug must start and end with a letter or digit")]
    BadBoundary,

    #[error("project slug must be lowercase")]
    NotLowercase,

    #[error("invalid character in project slug: '{0}'")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectSlug(String);

impl ProjectSlug {
    pub fn new(value: &str) -> Result<Self, ProjectSlugError> {
        if value.is_empty() {
            return Err(ProjectSlugError::Empty);
        }

        if value.len() > 63 {
            return Err(ProjectSlugError::TooLong);
        }

        let is_separator = |c: char| c == '-' || c == '_';
        if value.starts_with(is_separator) || value.ends_with(is_separator) {
            return Err(ProjectSlugError::BadBoundary);
        }

        for c in value.chars() {
            if c.is_ascii_uppercase() {
                return Err(ProjectSlugError::NotLowercase);
            }
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && !is_separator(c) {
                return Err(ProjectSlugError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectSlug {
    type Err = ProjectSlugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProjectSlug {
    type Error = ProjectSlugError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ProjectSlug> for String {
    fn from(slug: ProjectSlug) -> Self {
        slug.0
    }
}
