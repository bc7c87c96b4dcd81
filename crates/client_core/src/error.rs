use std::fmt;

use shared::{domain::ProjectId, error::SortKeyProblem};
use thiserror::Error;

use crate::orchestrator::Branch;

/// The read operations the catalog API offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ProjectsByYear,
    ProjectsWorkingDirectory,
    Years,
    Version,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProjectsByYear => "projects_by_year",
            Self::ProjectsWorkingDirectory => "projects_working_directory",
            Self::Years => "years",
            Self::Version => "version",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum FetchCause {
    #[error("invalid request url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("server responded with status {status}")]
    Status { status: reqwest::StatusCode },
    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
#[error("{operation} fetch failed: {cause}")]
pub struct FetchError {
    pub operation: Operation,
    #[source]
    pub cause: FetchCause,
}

impl FetchError {
    pub fn new(operation: Operation, cause: FetchCause) -> Self {
        Self { operation, cause }
    }

    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match &self.cause {
            FetchCause::Status { status } => Some(*status),
            FetchCause::Transport(err) | FetchCause::Body(err) => err.status(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("project {identifier} has no usable sort key: {problem}")]
pub struct InvalidRecordError {
    pub identifier: ProjectId,
    #[source]
    pub problem: SortKeyProblem,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    InvalidRecord(#[from] InvalidRecordError),
    #[error("project {0} is not in the current project list")]
    UnknownProject(ProjectId),
    #[error("{branch} branch did not run to completion: {message}")]
    Branch { branch: Branch, message: String },
}
