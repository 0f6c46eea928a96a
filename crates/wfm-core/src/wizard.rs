//! Migration wizard request handlers
//!
//! The three steps an admin walks through: pick a target scheme, map the
//! orphaned statuses, watch progress. Each step is a plain function over a
//! [`MigrationCoordinator`] and a [`WizardState`] carried between requests.

use crate::context::{MigrationContext, MigrationRequest};
use crate::coordinator::{MigrationCoordinator, MigrationOutcome, MigrationTask};
use crate::error::{MigrationError, ValidationErrors};
use crate::executor::MigrationResult;
use crate::mapping::StatusMapping;
use crate::phase::{validate_transition, MigrationPhase};
use crate::polling::{self, TaskLookup};
use serde::{Deserialize, Serialize};
use wfm_scheme::{IssueTypeId, StatusId};
use wfm_tasks::TaskId;

/// Who is driving the wizard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    pub admin: bool,
}

impl Actor {
    #[must_use]
    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: true,
        }
    }

    #[must_use]
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: false,
        }
    }

    fn require_admin(&self) -> Result<(), MigrationError> {
        if self.admin {
            Ok(())
        } else {
            Err(MigrationError::PermissionDenied {
                user: self.name.clone(),
            })
        }
    }
}

/// State carried between wizard requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WizardState {
    pub phase: MigrationPhase,
    pub context: Option<MigrationContext>,
    pub task: Option<TaskId>,
}

/// Statuses of one issue type the admin has to map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTypeMapping {
    pub issue_type: IssueTypeId,
    pub affected_issues: u64,
    /// Statuses without an equivalent in the new workflow
    pub statuses: Vec<StatusId>,
    /// Statuses of the new workflow to choose from
    pub targets: Vec<StatusId>,
}

/// Result of the target selection step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectTargetView {
    NothingToDo,
    MappingRequired {
        total_affected_issues: u64,
        issue_types: Vec<IssueTypeMapping>,
    },
}

/// Result of the mapping submission step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    NothingToDo,
    /// Applied without a background task
    Completed,
    /// Background migration started
    Started(TaskId),
    /// Another migration of this scheme is running
    AlreadyRunning(TaskId),
    /// Mapping incomplete; fix and resubmit
    Invalid(ValidationErrors),
}

/// What the progress page renders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressView {
    pub task: TaskId,
    pub percent: u64,
    pub message: Option<String>,
    pub sub_task: Option<String>,
    pub finished: bool,
    pub phase: MigrationPhase,
    pub result: Option<MigrationResult>,
}

/// Step 1: resolve the request and list the mappings it needs
///
/// A failed request leaves `state` untouched so the admin can retry.
///
/// # Errors
/// `PermissionDenied` for non-admins, otherwise as
/// [`MigrationCoordinator::prepare`] plus search failures.
pub async fn select_target(
    coordinator: &MigrationCoordinator,
    actor: &Actor,
    state: &mut WizardState,
    request: &MigrationRequest,
) -> Result<SelectTargetView, MigrationError> {
    actor.require_admin()?;
    validate_transition(state.phase, MigrationPhase::Validating)?;

    let context = coordinator.prepare(request)?;
    let view = plan_mappings(coordinator, &context).await?;

    state.phase.advance(MigrationPhase::Validating)?;
    state.phase.advance(match view {
        SelectTargetView::NothingToDo => MigrationPhase::NothingToDo,
        SelectTargetView::MappingRequired { .. } => MigrationPhase::MappingRequired,
    })?;
    state.context = Some(context);
    Ok(view)
}

async fn plan_mappings(
    coordinator: &MigrationCoordinator,
    context: &MigrationContext,
) -> Result<SelectTargetView, MigrationError> {
    let builder = coordinator.mapping_builder(context);
    if builder.do_nothing() {
        return Ok(SelectTargetView::NothingToDo);
    }
    let search = coordinator.search().as_ref();
    let mut issue_types = Vec::new();
    for issue_type in builder.types_needing_migration() {
        issue_types.push(IssueTypeMapping {
            affected_issues: builder.num_affected_issues(search, &issue_type).await?,
            statuses: builder.statuses_needing_migration(&issue_type)?,
            targets: builder.target_statuses(&issue_type)?,
            issue_type,
        });
    }
    Ok(SelectTargetView::MappingRequired {
        total_affected_issues: builder.total_affected_issues(search).await?,
        issue_types,
    })
}

/// Step 2: submit the admin's status mapping
///
/// Validation problems come back as [`StepResult::Invalid`] with the wizard
/// waiting for a corrected mapping.
///
/// # Errors
/// `PermissionDenied`, `InvalidTransition` when called out of order,
/// `Rejected` when the worker pool is saturated.
pub async fn submit_mapping(
    coordinator: &MigrationCoordinator,
    actor: &Actor,
    state: &mut WizardState,
    mapping: StatusMapping,
) -> Result<StepResult, MigrationError> {
    actor.require_admin()?;
    validate_transition(state.phase, MigrationPhase::Validating)?;
    let Some(context) = state.context.clone() else {
        return Err(MigrationError::InvalidRequest("no migration selected".into()));
    };
    state.phase.advance(MigrationPhase::Validating)?;

    match coordinator.migrate(context, mapping).await {
        Ok(MigrationOutcome::NothingToDo) => {
            state.phase.advance(MigrationPhase::NothingToDo)?;
            Ok(StepResult::NothingToDo)
        }
        Ok(MigrationOutcome::Completed) => {
            state.phase.advance(MigrationPhase::Success)?;
            Ok(StepResult::Completed)
        }
        Ok(MigrationOutcome::Submitted(task)) => {
            state.phase.advance(MigrationPhase::Running)?;
            tracing::info!(task = %task.id, user = %actor.name, "migration started from wizard");
            state.task = Some(task.id);
            Ok(StepResult::Started(task.id))
        }
        Ok(MigrationOutcome::AlreadyRunning(task)) => {
            state.phase.advance(MigrationPhase::MappingRequired)?;
            Ok(StepResult::AlreadyRunning(task.id))
        }
        Err(MigrationError::Validation(errors)) => {
            state.phase.advance(MigrationPhase::MappingRequired)?;
            Ok(StepResult::Invalid(errors))
        }
        Err(err) => {
            // leave the wizard ready for another attempt
            state.phase.advance(MigrationPhase::MappingRequired)?;
            Err(err)
        }
    }
}

/// Step 3: poll the running migration
///
/// # Errors
/// `PermissionDenied`, `InvalidRequest` if no migration was started,
/// `WrongTaskContext` or `Task(TaskNotFound)` from the lookup.
pub fn progress(
    coordinator: &MigrationCoordinator,
    actor: &Actor,
    state: &mut WizardState,
) -> Result<ProgressView, MigrationError> {
    actor.require_admin()?;
    let (Some(context), Some(id)) = (state.context.as_ref(), state.task) else {
        return Err(MigrationError::InvalidRequest("no migration is running".into()));
    };

    let task = coordinator
        .current_task(context.kind(), &TaskLookup::Id(id))?
        .ok_or_else(|| MigrationError::InvalidRequest("no migration is running".into()))?;

    let result = polling::result(&task);
    if let Some(result) = &result {
        if state.phase == MigrationPhase::Running {
            state.phase.advance(result.status.phase())?;
        }
    }
    Ok(render(&task, state.phase, result))
}

fn render(task: &MigrationTask, phase: MigrationPhase, result: Option<MigrationResult>) -> ProgressView {
    ProgressView {
        task: task.id,
        percent: task.percent(),
        message: task.progress.as_ref().map(|p| p.message.clone()),
        sub_task: task.progress.as_ref().and_then(|p| p.sub_task.clone()),
        finished: polling::is_done(task),
        phase,
        result,
    }
}
