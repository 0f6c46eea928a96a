//! Migration requests and the immutable context they resolve to

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use wfm_scheme::{AssignableWorkflowScheme, DraftWorkflowScheme, IssueTypeId, Project, ProjectId, SchemeId, WorkflowMappings};
use wfm_tasks::{ContextKind, TaskContext};

/// What the admin asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MigrationRequest {
    /// Associate `projects` with the assignable scheme `target`
    Projects {
        projects: Vec<ProjectId>,
        target: SchemeId,
    },
    /// Publish a draft onto every project using its parent
    Draft { draft: SchemeId },
}

impl MigrationRequest {
    #[must_use]
    pub fn projects(projects: impl IntoIterator<Item = ProjectId>, target: SchemeId) -> Self {
        Self::Projects {
            projects: projects.into_iter().collect(),
            target,
        }
    }

    #[must_use]
    pub fn draft(draft: SchemeId) -> Self {
        Self::Draft { draft }
    }
}

/// Projects moving from one assignable scheme to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignableMigration {
    pub projects: Vec<Project>,
    pub source: AssignableWorkflowScheme,
    pub target: AssignableWorkflowScheme,
}

/// A draft replacing its parent on the parent's projects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftMigration {
    pub draft: DraftWorkflowScheme,
    pub parent: AssignableWorkflowScheme,
    pub projects: Vec<Project>,
}

/// Resolved, immutable description of one migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MigrationContext {
    Assignable(AssignableMigration),
    Draft(DraftMigration),
}

impl MigrationContext {
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        match self {
            Self::Assignable(_) => ContextKind::ProjectMigration,
            Self::Draft(_) => ContextKind::DraftMigration,
        }
    }

    /// Mappings the issues currently follow
    #[must_use]
    pub fn old_mappings(&self) -> &WorkflowMappings {
        match self {
            Self::Assignable(m) => &m.source.mappings,
            Self::Draft(m) => &m.parent.mappings,
        }
    }

    /// Mappings the issues move to
    #[must_use]
    pub fn new_mappings(&self) -> &WorkflowMappings {
        match self {
            Self::Assignable(m) => &m.target.mappings,
            Self::Draft(m) => &m.draft.mappings,
        }
    }

    #[must_use]
    pub fn projects(&self) -> &[Project] {
        match self {
            Self::Assignable(m) => &m.projects,
            Self::Draft(m) => &m.projects,
        }
    }

    #[must_use]
    pub fn project_ids(&self) -> BTreeSet<ProjectId> {
        self.projects().iter().map(|p| p.id).collect()
    }

    /// Issue types used by any project in scope
    #[must_use]
    pub fn issue_types(&self) -> BTreeSet<IssueTypeId> {
        self.projects()
            .iter()
            .flat_map(|p| p.issue_types.iter().cloned())
            .collect()
    }

    /// Scheme whose locks serialise this migration
    ///
    /// Drafts lock their parent. The default scheme is never locked.
    #[must_use]
    pub fn lock_scheme(&self) -> Option<SchemeId> {
        let id = match self {
            Self::Assignable(m) => m.target.id,
            Self::Draft(m) => m.parent.id,
        };
        (!id.is_default()).then_some(id)
    }

    /// Context the background task is registered under
    #[must_use]
    pub fn task_context(&self) -> TaskContext {
        match self {
            Self::Assignable(m) => TaskContext::ProjectMigration {
                scheme: m.target.id,
                projects: self.project_ids(),
            },
            Self::Draft(m) => TaskContext::DraftMigration {
                parent: m.parent.id,
                projects: self.project_ids(),
            },
        }
    }

    /// Old scheme equals new scheme
    #[must_use]
    pub fn is_no_op(&self) -> bool {
        match self {
            Self::Assignable(m) => m.source.id == m.target.id,
            Self::Draft(m) => m.draft.mappings == m.parent.mappings,
        }
    }

    /// Short label for logs and task descriptions
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Assignable(m) => format!(
                "associate {} project(s) with workflow scheme '{}'",
                m.projects.len(),
                m.target.name
            ),
            Self::Draft(m) => format!("publish draft of workflow scheme '{}'", m.parent.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn scheme(id: u64, workflow: &str) -> AssignableWorkflowScheme {
        AssignableWorkflowScheme {
            id: SchemeId(id),
            name: format!("S{id}"),
            description: None,
            mappings: WorkflowMappings::new().with_mapping("Bug", workflow),
        }
    }

    fn projects() -> Vec<Project> {
        vec![
            Project::new(ProjectId(1), "ONE", "One").with_issue_types(["Bug", "Task"]),
            Project::new(ProjectId(2), "TWO", "Two").with_issue_types(["Bug", "Story"]),
        ]
    }

    #[test]
    fn assignable_context_locks_target() {
        let ctx = MigrationContext::Assignable(AssignableMigration {
            projects: projects(),
            source: AssignableWorkflowScheme::system_default(),
            target: scheme(5, "W2"),
        });
        assert_eq!(ctx.lock_scheme(), Some(SchemeId(5)));
        assert_eq!(ctx.kind(), ContextKind::ProjectMigration);
        assert_eq!(ctx.issue_types().len(), 3);
        assert!(!ctx.is_no_op());
        assert_eq!(
            ctx.task_context(),
            TaskContext::ProjectMigration {
                scheme: SchemeId(5),
                projects: [ProjectId(1), ProjectId(2)].into(),
            }
        );
    }

    #[test]
    fn moving_to_default_scheme_takes_no_lock() {
        let ctx = MigrationContext::Assignable(AssignableMigration {
            projects: projects(),
            source: scheme(5, "W2"),
            target: AssignableWorkflowScheme::system_default(),
        });
        assert_eq!(ctx.lock_scheme(), None);
    }

    #[test]
    fn draft_context_locks_parent() {
        let parent = scheme(3, "W1");
        let draft = DraftWorkflowScheme {
            id: SchemeId(4),
            parent_id: parent.id,
            name: parent.name.clone(),
            mappings: parent.mappings.clone(),
            last_modified_by: None,
            last_modified: Utc::now(),
        };
        let mut ctx = DraftMigration {
            draft,
            parent,
            projects: projects(),
        };
        assert!(MigrationContext::Draft(ctx.clone()).is_no_op());

        ctx.draft.mappings = WorkflowMappings::new().with_mapping("Bug", "W2");
        let ctx = MigrationContext::Draft(ctx);
        assert!(!ctx.is_no_op());
        assert_eq!(ctx.lock_scheme(), Some(SchemeId(3)));
        assert_eq!(ctx.task_context().kind(), ContextKind::DraftMigration);
    }
}
