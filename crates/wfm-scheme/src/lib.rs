//! WFM Scheme - workflow schemes and their project associations
//!
//! Provides:
//! - Identifier newtypes for schemes, projects, issues, issue types and statuses
//! - Workflows and the [`WorkflowRegistry`]
//! - Assignable schemes, drafts and the [`WorkflowScheme`] tagged union
//! - The [`SchemeRepository`] seam with an in-memory implementation
//! - Scheme-scoped locks ([`SchemeLockService`])
//!
//! # Example
//!
//! ```rust,ignore
//! use wfm_scheme::{InMemorySchemeRepository, SchemeRepository, Workflow, WorkflowMappings};
//!
//! let repo = InMemorySchemeRepository::new();
//! repo.workflows().register(Workflow::new("W1", ["Open", "Fixed"]));
//! let scheme = repo.create_scheme("Software", None, WorkflowMappings::new().with_mapping("Bug", "W1"))?;
//! let draft = repo.create_draft_of(scheme.id, Some("admin"))?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod ids;
pub mod lock;
pub mod project;
pub mod repository;
pub mod scheme;
pub mod workflow;

pub use error::SchemeError;
pub use ids::{IssueId, IssueTypeId, ProjectId, SchemeId, StatusId};
pub use lock::{SchemeAction, SchemeGuard, SchemeLockService};
pub use project::{Issue, Project};
pub use repository::{InMemorySchemeRepository, SchemeRepository};
pub use scheme::{AssignableWorkflowScheme, DraftWorkflowScheme, WorkflowMappings, WorkflowScheme};
pub use workflow::{Workflow, WorkflowRegistry, SYSTEM_WORKFLOW};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
