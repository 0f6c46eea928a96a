//! Error types for scheme storage and locking

use crate::ids::{ProjectId, SchemeId};

/// Scheme repository errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemeError {
    /// No assignable scheme with this id
    #[error("workflow scheme not found: {0}")]
    SchemeNotFound(SchemeId),

    /// No draft with this id (or for this parent)
    #[error("draft workflow scheme not found: {0}")]
    DraftNotFound(SchemeId),

    /// No project with this id
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    /// Workflow name not registered
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Parent already has a draft
    #[error("workflow scheme {parent} already has a draft")]
    DraftAlreadyExists { parent: SchemeId },

    /// The system default scheme cannot be edited, drafted or deleted
    #[error("the default workflow scheme cannot be modified")]
    DefaultSchemeImmutable,

    /// Scheme is still used by projects
    #[error("workflow scheme {0} is in use by one or more projects")]
    SchemeActive(SchemeId),

    /// A migration task currently works on this scheme
    #[error("workflow scheme {0} is being migrated")]
    BeingMigrated(SchemeId),
}

impl SchemeError {
    /// Whether the caller referenced something that does not exist
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SchemeNotFound(_)
                | Self::DraftNotFound(_)
                | Self::ProjectNotFound(_)
                | Self::WorkflowNotFound(_)
        )
    }
}
