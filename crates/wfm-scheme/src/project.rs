//! Projects and the issues they own

use crate::ids::{IssueId, IssueTypeId, ProjectId, SchemeId, StatusId};
use serde::{Deserialize, Serialize};

/// A project; `scheme == None` means it uses the default scheme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub key: String,
    pub name: String,
    /// Issue types available in this project
    #[serde(default)]
    pub issue_types: Vec<IssueTypeId>,
    #[serde(default)]
    pub scheme: Option<SchemeId>,
}

impl Project {
    #[must_use]
    pub fn new(id: ProjectId, key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            name: name.into(),
            issue_types: Vec::new(),
            scheme: None,
        }
    }

    /// With the issue types the project uses
    #[must_use]
    pub fn with_issue_types<T: Into<IssueTypeId>>(mut self, types: impl IntoIterator<Item = T>) -> Self {
        self.issue_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// With an assigned scheme
    #[must_use]
    pub fn with_scheme(mut self, scheme: SchemeId) -> Self {
        self.scheme = Some(scheme);
        self
    }

    /// Assigned scheme, resolving "none" to the default scheme id
    #[inline]
    #[must_use]
    pub fn effective_scheme(&self) -> SchemeId {
        self.scheme.unwrap_or(SchemeId::DEFAULT)
    }
}

/// The fields of an issue that workflow migration reads and writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub key: String,
    pub project: ProjectId,
    pub issue_type: IssueTypeId,
    pub status: StatusId,
    /// Name of the workflow the issue currently runs on
    pub workflow: String,
}
