//! Workflows and the registry that resolves them by name

use crate::error::SchemeError;
use crate::ids::StatusId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the built-in workflow every issue type falls back to
pub const SYSTEM_WORKFLOW: &str = "jira";

/// A named state machine; only its steps (statuses) matter for migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow name
    pub name: String,
    /// Statuses that are valid steps, in display order
    pub statuses: Vec<StatusId>,
}

impl Workflow {
    /// Create a workflow from a name and its step statuses
    #[must_use]
    pub fn new<S: Into<StatusId>>(name: impl Into<String>, statuses: impl IntoIterator<Item = S>) -> Self {
        let mut steps: Vec<StatusId> = Vec::new();
        for status in statuses {
            let status = status.into();
            if !steps.contains(&status) {
                steps.push(status);
            }
        }
        Self {
            name: name.into(),
            statuses: steps,
        }
    }

    /// The built-in system workflow
    #[must_use]
    pub fn system() -> Self {
        Self::new(
            SYSTEM_WORKFLOW,
            ["Open", "In Progress", "Reopened", "Resolved", "Closed"],
        )
    }

    /// Whether `status` is a valid step of this workflow
    #[inline]
    #[must_use]
    pub fn has_status(&self, status: &StatusId) -> bool {
        self.statuses.contains(status)
    }
}

/// Thread-safe name → workflow lookup
#[derive(Debug, Clone)]
pub struct WorkflowRegistry {
    inner: Arc<RwLock<HashMap<String, Workflow>>>,
}

impl WorkflowRegistry {
    /// Registry holding only the system workflow
    #[must_use]
    pub fn new() -> Self {
        let mut map = HashMap::new();
        let system = Workflow::system();
        map.insert(system.name.clone(), system);
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Add or replace a workflow
    pub fn register(&self, workflow: Workflow) {
        tracing::debug!(workflow = %workflow.name, "registering workflow");
        self.inner.write().insert(workflow.name.clone(), workflow);
    }

    /// Look a workflow up by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Workflow> {
        self.inner.read().get(name).cloned()
    }

    /// Like [`get`](Self::get) but missing workflows are an error
    pub fn require(&self, name: &str) -> Result<Workflow, SchemeError> {
        self.get(name)
            .ok_or_else(|| SchemeError::WorkflowNotFound(name.to_string()))
    }

    /// All registered workflow names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_dedups_statuses() {
        let wf = Workflow::new("W1", ["Open", "Fixed", "Open"]);
        assert_eq!(wf.statuses.len(), 2);
        assert!(wf.has_status(&StatusId::from("Fixed")));
        assert!(!wf.has_status(&StatusId::from("Done")));
    }

    #[test]
    fn registry_always_knows_system_workflow() {
        let registry = WorkflowRegistry::new();
        assert!(registry.get(SYSTEM_WORKFLOW).is_some());
        assert!(matches!(
            registry.require("missing"),
            Err(SchemeError::WorkflowNotFound(_))
        ));

        registry.register(Workflow::new("W2", ["Open", "Done"]));
        assert_eq!(registry.names(), vec!["W2".to_string(), "jira".to_string()]);
    }
}
