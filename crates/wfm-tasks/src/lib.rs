//! WFM Tasks - bounded background task manager
//!
//! Jobs are submitted with a [`TaskContext`] describing what they operate on
//! and run on a fixed pool of tokio workers. Callers poll [`TaskDescriptor`]
//! snapshots by id or by context until the task finishes.
//!
//! # Example
//!
//! ```rust,ignore
//! use wfm_tasks::{PoolConfig, TaskManager, ProgressSink};
//!
//! let manager = TaskManager::<u32>::new(PoolConfig::default());
//! let task = manager.submit("count", context, |progress| async move {
//!     progress.make_progress(50, None, "halfway");
//!     42
//! })?;
//! let done = manager.wait_for(task.id).await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod descriptor;
pub mod error;
pub mod manager;
pub mod progress;
pub mod types;

pub use descriptor::{TaskDescriptor, TaskOutcome};
pub use error::TaskError;
pub use manager::{PoolConfig, TaskManager};
pub use progress::{NullSink, ProgressEvent, ProgressSink, StepSink, TaskProgress};
pub use types::{ContextKind, TaskContext, TaskId};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
