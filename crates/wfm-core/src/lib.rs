//! WFM Core - workflow scheme migration
//!
//! Moves the issues of one or more projects from the workflows of an old
//! scheme to those of a new one:
//! - [`MappingBuilder`] works out which statuses need an admin-chosen target
//! - [`MigrationCoordinator`] serialises migrations and scheme edits per
//!   scheme and submits migrations to a bounded worker pool
//! - [`MigrationExecutor`] migrates issues page by page, isolating failures
//! - [`polling`] and [`wizard`] expose task state to callers
//!
//! # Example
//!
//! ```rust,ignore
//! use wfm_core::{MigrationConfig, MigrationCoordinator, MigrationRequest, StatusMapping};
//!
//! let coordinator = MigrationCoordinator::new(repo, search, store, MigrationConfig::default());
//! let context = coordinator.prepare(&MigrationRequest::projects([project], target))?;
//! let mapping = StatusMapping::new().with("Bug", "Fixed", "Done");
//! let outcome = coordinator.migrate(context, mapping).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod issues;
pub mod mapping;
pub mod phase;
pub mod polling;
pub mod wizard;

pub use config::MigrationConfig;
pub use context::{AssignableMigration, DraftMigration, MigrationContext, MigrationRequest};
pub use coordinator::{MigrationCoordinator, MigrationOutcome, MigrationTask};
pub use error::{ConfigError, MappingProblem, MigrationError, SearchError, StoreError, ValidationErrors};
pub use executor::{complete_migration, MigrationExecutor, MigrationResult, MigrationStatus};
pub use issues::{InMemoryIssueStore, IssueQuery, IssueSearch, IssueStore, PageRequest};
pub use mapping::{MappingBuilder, RequiredMapping, StatusMapping, WorkflowChange};
pub use phase::{allowed_transitions, validate_transition, MigrationPhase};
pub use polling::TaskLookup;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
