//! Task identifiers and contexts

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use ulid::Ulid;
use wfm_scheme::{ProjectId, SchemeId};

/// Unique task identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Ulid);

impl TaskId {
    /// Generate new task ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// What a background task operates on
///
/// Used to correlate poll requests with the right in-flight task and to keep
/// two tasks with overlapping contexts from running at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskContext {
    /// Projects being moved onto an assignable scheme
    ProjectMigration {
        scheme: SchemeId,
        projects: BTreeSet<ProjectId>,
    },
    /// A draft being migrated onto its parent's projects
    DraftMigration {
        parent: SchemeId,
        projects: BTreeSet<ProjectId>,
    },
}

/// Discriminant of [`TaskContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextKind {
    ProjectMigration,
    DraftMigration,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProjectMigration => f.write_str("project migration"),
            Self::DraftMigration => f.write_str("draft migration"),
        }
    }
}

impl TaskContext {
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        match self {
            Self::ProjectMigration { .. } => ContextKind::ProjectMigration,
            Self::DraftMigration { .. } => ContextKind::DraftMigration,
        }
    }

    /// Scheme the task holds locks for
    #[must_use]
    pub fn scheme(&self) -> SchemeId {
        match self {
            Self::ProjectMigration { scheme, .. } => *scheme,
            Self::DraftMigration { parent, .. } => *parent,
        }
    }

    #[must_use]
    pub fn projects(&self) -> &BTreeSet<ProjectId> {
        match self {
            Self::ProjectMigration { projects, .. } | Self::DraftMigration { projects, .. } => projects,
        }
    }

    /// Whether the task touches `scheme`
    #[inline]
    #[must_use]
    pub fn touches_scheme(&self, scheme: SchemeId) -> bool {
        self.scheme() == scheme
    }

    /// Two contexts overlap when they share a scheme or any project
    #[must_use]
    pub fn overlaps(&self, other: &TaskContext) -> bool {
        self.scheme() == other.scheme() || !self.projects().is_disjoint(other.projects())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projects(ids: &[u64]) -> BTreeSet<ProjectId> {
        ids.iter().copied().map(ProjectId).collect()
    }

    #[test]
    fn task_id_round_trips_through_string() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn context_overlap() {
        let a = TaskContext::ProjectMigration {
            scheme: SchemeId(1),
            projects: projects(&[1, 2]),
        };
        let b = TaskContext::DraftMigration {
            parent: SchemeId(2),
            projects: projects(&[2]),
        };
        let c = TaskContext::DraftMigration {
            parent: SchemeId(1),
            projects: projects(&[9]),
        };
        let d = TaskContext::ProjectMigration {
            scheme: SchemeId(3),
            projects: projects(&[3]),
        };

        assert!(a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(!a.overlaps(&d));
        assert_eq!(c.kind(), ContextKind::DraftMigration);
        assert!(c.touches_scheme(SchemeId(1)));
    }
}
