//! Scheme repository
//!
//! Persists assignable schemes, their drafts and project associations.
//! [`InMemorySchemeRepository`] is the bundled implementation; other stores
//! plug in through [`SchemeRepository`].

use crate::error::SchemeError;
use crate::ids::{ProjectId, SchemeId};
use crate::project::Project;
use crate::scheme::{AssignableWorkflowScheme, DraftWorkflowScheme, WorkflowMappings, WorkflowScheme};
use crate::workflow::WorkflowRegistry;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Storage for workflow schemes and their project associations
///
/// Implementations synchronise internally; callers that need to serialise
/// whole edit/migration sequences use [`SchemeLockService`](crate::SchemeLockService).
pub trait SchemeRepository: Send + Sync + std::fmt::Debug {
    /// Workflow definitions referenced by schemes
    fn workflows(&self) -> &WorkflowRegistry;

    /// Create an assignable scheme
    ///
    /// # Errors
    /// - `WorkflowNotFound` if a mapping names an unknown workflow
    fn create_scheme(
        &self,
        name: &str,
        description: Option<&str>,
        mappings: WorkflowMappings,
    ) -> Result<AssignableWorkflowScheme, SchemeError>;

    /// Assignable scheme by id; [`SchemeId::DEFAULT`] yields the system default
    fn scheme(&self, id: SchemeId) -> Result<AssignableWorkflowScheme, SchemeError>;

    /// All stored assignable schemes, in id order
    fn assignable_schemes(&self) -> Vec<AssignableWorkflowScheme>;

    /// Replace name, description and mappings of a stored scheme
    fn update_scheme(&self, scheme: &AssignableWorkflowScheme) -> Result<AssignableWorkflowScheme, SchemeError>;

    /// Delete an inactive scheme together with its draft
    fn delete_scheme(&self, id: SchemeId) -> Result<(), SchemeError>;

    /// Create the draft of `parent`, copying its mappings
    fn create_draft_of(&self, parent: SchemeId, author: Option<&str>) -> Result<DraftWorkflowScheme, SchemeError>;

    fn draft(&self, id: SchemeId) -> Result<DraftWorkflowScheme, SchemeError>;

    fn draft_for_parent(&self, parent: SchemeId) -> Option<DraftWorkflowScheme>;

    fn has_draft(&self, parent: SchemeId) -> bool {
        self.draft_for_parent(parent).is_some()
    }

    /// Replace the mappings of a stored draft
    fn update_draft(&self, draft: &DraftWorkflowScheme, author: Option<&str>) -> Result<DraftWorkflowScheme, SchemeError>;

    fn delete_draft(&self, id: SchemeId) -> Result<(), SchemeError>;

    /// Copy the draft's mappings onto its parent and discard the draft
    fn promote_draft(&self, id: SchemeId) -> Result<AssignableWorkflowScheme, SchemeError>;

    fn project(&self, id: ProjectId) -> Result<Project, SchemeError>;

    /// All projects, in id order
    fn projects(&self) -> Vec<Project>;

    /// Store a project; its scheme (if any) must exist
    fn add_project(&self, project: Project) -> Result<Project, SchemeError>;

    /// Projects associated with `scheme` (default scheme: projects without one)
    fn projects_using(&self, scheme: SchemeId) -> Vec<Project>;

    /// Associate a project with a scheme; `None` or the default id reset it
    fn assign_scheme(&self, project: ProjectId, scheme: Option<SchemeId>) -> Result<(), SchemeError>;

    /// Scheme in effect for a project
    fn scheme_for_project(&self, project: ProjectId) -> Result<AssignableWorkflowScheme, SchemeError> {
        let project = self.project(project)?;
        self.scheme(project.effective_scheme())
    }

    /// Whether any project uses the scheme; drafts are never active
    fn is_active(&self, scheme: &WorkflowScheme) -> bool {
        match scheme {
            WorkflowScheme::Draft(_) => false,
            WorkflowScheme::Assignable(s) => !self.projects_using(s.id).is_empty(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    schemes: BTreeMap<SchemeId, AssignableWorkflowScheme>,
    drafts: BTreeMap<SchemeId, DraftWorkflowScheme>,
    projects: BTreeMap<ProjectId, Project>,
}

impl State {
    fn allocate_id(&mut self) -> SchemeId {
        self.next_id += 1;
        SchemeId(self.next_id)
    }

    fn parent_name(&self, parent: SchemeId) -> String {
        self.schemes
            .get(&parent)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    fn with_parent_name(&self, mut draft: DraftWorkflowScheme) -> DraftWorkflowScheme {
        draft.name = self.parent_name(draft.parent_id);
        draft
    }
}

/// In-memory [`SchemeRepository`]
#[derive(Debug, Default)]
pub struct InMemorySchemeRepository {
    workflows: WorkflowRegistry,
    state: RwLock<State>,
}

impl InMemorySchemeRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository sharing an existing workflow registry
    #[must_use]
    pub fn with_workflows(workflows: WorkflowRegistry) -> Self {
        Self {
            workflows,
            state: RwLock::default(),
        }
    }

    fn check_workflows(&self, mappings: &WorkflowMappings) -> Result<(), SchemeError> {
        for name in mappings.workflow_names() {
            self.workflows.require(name)?;
        }
        Ok(())
    }
}

impl SchemeRepository for InMemorySchemeRepository {
    fn workflows(&self) -> &WorkflowRegistry {
        &self.workflows
    }

    fn create_scheme(
        &self,
        name: &str,
        description: Option<&str>,
        mappings: WorkflowMappings,
    ) -> Result<AssignableWorkflowScheme, SchemeError> {
        self.check_workflows(&mappings)?;

        let mut state = self.state.write();
        let scheme = AssignableWorkflowScheme {
            id: state.allocate_id(),
            name: name.to_string(),
            description: description.map(str::to_string),
            mappings,
        };
        state.schemes.insert(scheme.id, scheme.clone());
        tracing::debug!(scheme = %scheme.id, name, "created workflow scheme");
        Ok(scheme)
    }

    fn scheme(&self, id: SchemeId) -> Result<AssignableWorkflowScheme, SchemeError> {
        if id.is_default() {
            return Ok(AssignableWorkflowScheme::system_default());
        }
        self.state
            .read()
            .schemes
            .get(&id)
            .cloned()
            .ok_or(SchemeError::SchemeNotFound(id))
    }

    fn assignable_schemes(&self) -> Vec<AssignableWorkflowScheme> {
        self.state.read().schemes.values().cloned().collect()
    }

    fn update_scheme(&self, scheme: &AssignableWorkflowScheme) -> Result<AssignableWorkflowScheme, SchemeError> {
        if scheme.is_default() {
            return Err(SchemeError::DefaultSchemeImmutable);
        }
        self.check_workflows(&scheme.mappings)?;

        let mut state = self.state.write();
        let stored = state
            .schemes
            .get_mut(&scheme.id)
            .ok_or(SchemeError::SchemeNotFound(scheme.id))?;
        stored.name.clone_from(&scheme.name);
        stored.description.clone_from(&scheme.description);
        stored.mappings = scheme.mappings.clone();
        Ok(stored.clone())
    }

    fn delete_scheme(&self, id: SchemeId) -> Result<(), SchemeError> {
        if id.is_default() {
            return Err(SchemeError::DefaultSchemeImmutable);
        }
        let mut state = self.state.write();
        if !state.schemes.contains_key(&id) {
            return Err(SchemeError::SchemeNotFound(id));
        }
        if state.projects.values().any(|p| p.scheme == Some(id)) {
            return Err(SchemeError::SchemeActive(id));
        }
        state.schemes.remove(&id);
        state.drafts.retain(|_, d| d.parent_id != id);
        tracing::debug!(scheme = %id, "deleted workflow scheme");
        Ok(())
    }

    fn create_draft_of(&self, parent: SchemeId, author: Option<&str>) -> Result<DraftWorkflowScheme, SchemeError> {
        if parent.is_default() {
            return Err(SchemeError::DefaultSchemeImmutable);
        }
        let mut state = self.state.write();
        let parent_scheme = state
            .schemes
            .get(&parent)
            .cloned()
            .ok_or(SchemeError::SchemeNotFound(parent))?;
        if state.drafts.values().any(|d| d.parent_id == parent) {
            return Err(SchemeError::DraftAlreadyExists { parent });
        }

        let draft = DraftWorkflowScheme {
            id: state.allocate_id(),
            parent_id: parent,
            name: parent_scheme.name,
            mappings: parent_scheme.mappings,
            last_modified_by: author.map(str::to_string),
            last_modified: Utc::now(),
        };
        state.drafts.insert(draft.id, draft.clone());
        tracing::debug!(draft = %draft.id, parent = %parent, "created draft workflow scheme");
        Ok(draft)
    }

    fn draft(&self, id: SchemeId) -> Result<DraftWorkflowScheme, SchemeError> {
        let state = self.state.read();
        state
            .drafts
            .get(&id)
            .cloned()
            .map(|d| state.with_parent_name(d))
            .ok_or(SchemeError::DraftNotFound(id))
    }

    fn draft_for_parent(&self, parent: SchemeId) -> Option<DraftWorkflowScheme> {
        let state = self.state.read();
        state
            .drafts
            .values()
            .find(|d| d.parent_id == parent)
            .cloned()
            .map(|d| state.with_parent_name(d))
    }

    fn update_draft(&self, draft: &DraftWorkflowScheme, author: Option<&str>) -> Result<DraftWorkflowScheme, SchemeError> {
        self.check_workflows(&draft.mappings)?;

        let mut state = self.state.write();
        let stored = state
            .drafts
            .get_mut(&draft.id)
            .ok_or(SchemeError::DraftNotFound(draft.id))?;
        stored.mappings = draft.mappings.clone();
        stored.last_modified_by = author.map(str::to_string);
        stored.last_modified = Utc::now();
        let updated = stored.clone();
        Ok(state.with_parent_name(updated))
    }

    fn delete_draft(&self, id: SchemeId) -> Result<(), SchemeError> {
        self.state
            .write()
            .drafts
            .remove(&id)
            .map(|_| ())
            .ok_or(SchemeError::DraftNotFound(id))
    }

    fn promote_draft(&self, id: SchemeId) -> Result<AssignableWorkflowScheme, SchemeError> {
        let mut state = self.state.write();
        let parent_id = state.drafts.get(&id).ok_or(SchemeError::DraftNotFound(id))?.parent_id;
        if !state.schemes.contains_key(&parent_id) {
            return Err(SchemeError::SchemeNotFound(parent_id));
        }
        let draft = state.drafts.remove(&id).ok_or(SchemeError::DraftNotFound(id))?;
        let parent = state
            .schemes
            .get_mut(&parent_id)
            .ok_or(SchemeError::SchemeNotFound(parent_id))?;
        parent.mappings = draft.mappings;
        tracing::info!(draft = %id, parent = %parent.id, "promoted draft workflow scheme");
        Ok(parent.clone())
    }

    fn project(&self, id: ProjectId) -> Result<Project, SchemeError> {
        self.state
            .read()
            .projects
            .get(&id)
            .cloned()
            .ok_or(SchemeError::ProjectNotFound(id))
    }

    fn projects(&self) -> Vec<Project> {
        self.state.read().projects.values().cloned().collect()
    }

    fn add_project(&self, mut project: Project) -> Result<Project, SchemeError> {
        let mut state = self.state.write();
        match project.scheme {
            Some(id) if id.is_default() => project.scheme = None,
            Some(id) if !state.schemes.contains_key(&id) => {
                return Err(SchemeError::SchemeNotFound(id));
            }
            _ => {}
        }
        state.projects.insert(project.id, project.clone());
        Ok(project)
    }

    fn projects_using(&self, scheme: SchemeId) -> Vec<Project> {
        self.state
            .read()
            .projects
            .values()
            .filter(|p| p.effective_scheme() == scheme)
            .cloned()
            .collect()
    }

    fn assign_scheme(&self, project: ProjectId, scheme: Option<SchemeId>) -> Result<(), SchemeError> {
        let scheme = scheme.filter(|id| !id.is_default());
        let mut state = self.state.write();
        if let Some(id) = scheme {
            if !state.schemes.contains_key(&id) {
                return Err(SchemeError::SchemeNotFound(id));
            }
        }
        let stored = state
            .projects
            .get_mut(&project)
            .ok_or(SchemeError::ProjectNotFound(project))?;
        stored.scheme = scheme;
        tracing::debug!(project = %project, scheme = ?scheme, "assigned workflow scheme");
        Ok(())
    }
}
