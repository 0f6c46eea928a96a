//! Error types for workflow migration
//!
//! Provides error handling for:
//! - Issue search and issue store failures (the external seams)
//! - Incomplete or invalid status mappings
//! - Task submission, lookup and phase transitions

use crate::phase::MigrationPhase;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use wfm_scheme::{IssueId, IssueTypeId, SchemeError, StatusId};
use wfm_tasks::{ContextKind, TaskError};

/// Issue search failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    /// Search backend not reachable
    #[error("issue search unavailable: {0}")]
    Unavailable(String),

    /// Query could not be executed
    #[error("invalid issue query: {0}")]
    InvalidQuery(String),
}

/// Issue store failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Issue no longer exists
    #[error("issue not found: {0}")]
    IssueNotFound(IssueId),

    /// The store refused the update
    #[error("issue {issue} could not be updated: {reason}")]
    Rejected { issue: IssueId, reason: String },

    /// Backend not reachable
    #[error("issue store unavailable: {0}")]
    Unavailable(String),
}

/// One problem with an admin-supplied status mapping
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MappingProblem {
    /// A status of the old workflow has no target
    Missing {
        issue_type: IssueTypeId,
        status: StatusId,
    },
    /// The chosen target is not a step of the new workflow
    InvalidTarget {
        issue_type: IssueTypeId,
        status: StatusId,
        target: StatusId,
        workflow: String,
    },
}

impl fmt::Display for MappingProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { issue_type, status } => {
                write!(f, "no target status for '{status}' of issue type '{issue_type}'")
            }
            Self::InvalidTarget {
                issue_type,
                status,
                target,
                workflow,
            } => write!(
                f,
                "target '{target}' for '{status}' of issue type '{issue_type}' is not a status of workflow '{workflow}'"
            ),
        }
    }
}

/// Every problem found while validating a status mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    problems: Vec<MappingProblem>,
}

impl ValidationErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, problem: MappingProblem) {
        self.problems.push(problem);
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingProblem> {
        self.problems.iter()
    }

    /// `(issue type, status)` pairs with no target
    #[must_use]
    pub fn missing(&self) -> Vec<(&IssueTypeId, &StatusId)> {
        self.problems
            .iter()
            .filter_map(|p| match p {
                MappingProblem::Missing { issue_type, status } => Some((issue_type, status)),
                MappingProblem::InvalidTarget { .. } => None,
            })
            .collect()
    }

    /// `Ok(())` when nothing was recorded
    ///
    /// # Errors
    /// Returns `self` if any problem was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mapping problem(s)", self.problems.len())?;
        for problem in &self.problems {
            write!(f, "; {problem}")?;
        }
        Ok(())
    }
}

/// Main migration error type
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Status mapping is incomplete or names invalid targets
    #[error("invalid status mapping: {0}")]
    Validation(ValidationErrors),

    /// Request could not be resolved into a migration
    #[error("invalid migration request: {0}")]
    InvalidRequest(String),

    /// Worker pool saturated; nothing was submitted
    #[error("migration queue is full (capacity: {capacity}), try again later")]
    Rejected { capacity: usize },

    /// A polled task belongs to a different kind of migration
    #[error("task belongs to a {found}, expected a {expected}")]
    WrongTaskContext {
        expected: ContextKind,
        found: ContextKind,
    },

    /// Caller lacks the administer permission
    #[error("user '{user}' may not migrate workflow schemes")]
    PermissionDenied { user: String },

    /// Scheme storage error
    #[error("scheme error: {0}")]
    Scheme(#[from] SchemeError),

    /// Task manager error
    #[error("task error: {0}")]
    Task(TaskError),

    /// Issue search failed
    #[error("search error: {0}")]
    Search(#[from] SearchError),

    /// Migration phase change not allowed
    #[error("illegal migration phase transition: {from} -> {to}")]
    InvalidTransition {
        from: MigrationPhase,
        to: MigrationPhase,
    },
}

impl From<TaskError> for MigrationError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Rejected { capacity } => Self::Rejected { capacity },
            other => Self::Task(other),
        }
    }
}

impl From<ValidationErrors> for MigrationError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

impl MigrationError {
    /// Caller supplied an incomplete or invalid mapping
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Retrying later may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Misuse of the API rather than a runtime condition
    #[inline]
    #[must_use]
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::WrongTaskContext { .. } | Self::InvalidTransition { .. }
        )
    }

    /// Validation problems, if this is a validation error
    #[must_use]
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

/// Configuration loading failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_task_maps_to_retryable_rejection() {
        let err = MigrationError::from(TaskError::Rejected { capacity: 8 });
        assert!(matches!(err, MigrationError::Rejected { capacity: 8 }));
        assert!(err.is_retryable());
        assert!(!err.is_validation());
    }

    #[test]
    fn validation_errors_list_every_problem() {
        let mut errors = ValidationErrors::new();
        errors.push(MappingProblem::Missing {
            issue_type: "Bug".into(),
            status: "Fixed".into(),
        });
        errors.push(MappingProblem::InvalidTarget {
            issue_type: "Task".into(),
            status: "Open".into(),
            target: "Nope".into(),
            workflow: "W2".into(),
        });

        let rendered = errors.to_string();
        assert!(rendered.starts_with("2 mapping problem(s)"));
        assert!(rendered.contains("'Fixed' of issue type 'Bug'"));
        assert_eq!(errors.missing().len(), 1);

        let err = MigrationError::from(errors);
        assert!(err.is_validation());
        assert!(!err.is_programmer_error());
    }

    #[test]
    fn wrong_context_is_programmer_error() {
        let err = MigrationError::WrongTaskContext {
            expected: ContextKind::DraftMigration,
            found: ContextKind::ProjectMigration,
        };
        assert!(err.is_programmer_error());
        assert_eq!(
            err.to_string(),
            "task belongs to a project migration, expected a draft migration"
        );
    }
}
