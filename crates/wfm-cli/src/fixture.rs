//! Scheme and issue data loaded from a TOML file
//!
//! ```toml
//! [[workflows]]
//! name = "W1"
//! statuses = ["Open", "Fixed"]
//!
//! [[schemes]]
//! name = "Old"
//! workflows = { Bug = "W1" }
//!
//! [[projects]]
//! id = 1
//! key = "PRJ"
//! issue_types = ["Bug"]
//! scheme = "Old"
//!
//! [[issues]]
//! id = 1
//! project = "PRJ"
//! issue_type = "Bug"
//! status = "Fixed"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use wfm_core::InMemoryIssueStore;
use wfm_scheme::{
    InMemorySchemeRepository, Issue, IssueId, IssueTypeId, Project, ProjectId, SchemeId, SchemeRepository, Workflow,
    WorkflowMappings,
};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FixtureFile {
    #[serde(default)]
    workflows: Vec<WorkflowDef>,
    #[serde(default)]
    schemes: Vec<SchemeDef>,
    #[serde(default)]
    drafts: Vec<DraftDef>,
    #[serde(default)]
    projects: Vec<ProjectDef>,
    #[serde(default)]
    issues: Vec<IssueDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkflowDef {
    name: String,
    statuses: Vec<String>,
}

fn workflow_mappings(default_workflow: Option<&str>, workflows: &BTreeMap<String, String>) -> WorkflowMappings {
    let mut mappings = WorkflowMappings::new();
    if let Some(default) = default_workflow {
        mappings = mappings.with_default(default);
    }
    for (issue_type, workflow) in workflows {
        mappings = mappings.with_mapping(issue_type.as_str(), workflow.as_str());
    }
    mappings
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemeDef {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    default_workflow: Option<String>,
    /// Issue type → workflow name
    #[serde(default)]
    workflows: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DraftDef {
    /// Name of the parent scheme
    parent: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    default_workflow: Option<String>,
    #[serde(default)]
    workflows: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectDef {
    id: u64,
    key: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    issue_types: Vec<String>,
    /// Scheme name; absent means the default scheme
    #[serde(default)]
    scheme: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IssueDef {
    id: u64,
    /// Project key
    project: String,
    issue_type: String,
    status: String,
}

impl FixtureFile {
    pub(crate) fn parse(input: &str) -> Result<Self> {
        toml::from_str(input).context("invalid fixture")
    }

    pub(crate) fn load(path: &Path) -> Result<Self> {
        let input =
            std::fs::read_to_string(path).with_context(|| format!("failed to read fixture {}", path.display()))?;
        Self::parse(&input).with_context(|| format!("in {}", path.display()))
    }

    /// Populate an in-memory repository and issue table
    pub(crate) fn build(self) -> Result<Fixture> {
        let repo = InMemorySchemeRepository::new();
        for workflow in self.workflows {
            repo.workflows().register(Workflow::new(workflow.name, workflow.statuses));
        }

        let mut schemes = BTreeMap::new();
        for def in &self.schemes {
            if schemes.contains_key(&def.name) {
                bail!("duplicate scheme name {:?}", def.name);
            }
            let mappings = workflow_mappings(def.default_workflow.as_deref(), &def.workflows);
            let scheme = repo
                .create_scheme(&def.name, def.description.as_deref(), mappings)
                .with_context(|| format!("scheme {:?}", def.name))?;
            schemes.insert(def.name.clone(), scheme.id);
        }

        let mut fixture = Fixture {
            repo: Arc::new(repo),
            issues: Arc::new(InMemoryIssueStore::new()),
            schemes,
            projects: BTreeMap::new(),
        };

        for def in self.projects {
            let name = def.name.unwrap_or_else(|| def.key.clone());
            let mut project = Project::new(ProjectId(def.id), def.key.as_str(), name).with_issue_types(def.issue_types);
            if let Some(name) = &def.scheme {
                project = project.with_scheme(fixture.scheme_id(name)?);
            }
            fixture
                .repo
                .add_project(project)
                .with_context(|| format!("project {}", def.key))?;
            fixture.projects.insert(def.key, ProjectId(def.id));
        }

        for def in self.drafts {
            let parent = fixture.scheme_id(&def.parent)?;
            let mut draft = fixture
                .repo
                .create_draft_of(parent, def.author.as_deref())
                .with_context(|| format!("draft of {:?}", def.parent))?;
            draft.mappings = workflow_mappings(def.default_workflow.as_deref(), &def.workflows);
            fixture
                .repo
                .update_draft(&draft, def.author.as_deref())
                .with_context(|| format!("draft of {:?}", def.parent))?;
        }

        for def in self.issues {
            let project = fixture.project_id(&def.project)?;
            let issue_type = IssueTypeId::from(def.issue_type.as_str());
            let scheme = fixture.repo.scheme_for_project(project)?;
            fixture.issues.insert(Issue {
                id: IssueId(def.id),
                key: format!("{}-{}", def.project, def.id),
                project,
                workflow: scheme.mappings.actual_workflow(&issue_type).to_string(),
                issue_type,
                status: def.status.as_str().into(),
            });
        }

        tracing::debug!(
            schemes = fixture.schemes.len(),
            projects = fixture.projects.len(),
            issues = fixture.issues.len(),
            "fixture loaded"
        );
        Ok(fixture)
    }
}

/// Loaded fixture with name lookups
#[derive(Debug)]
pub(crate) struct Fixture {
    pub(crate) repo: Arc<InMemorySchemeRepository>,
    pub(crate) issues: Arc<InMemoryIssueStore>,
    schemes: BTreeMap<String, SchemeId>,
    projects: BTreeMap<String, ProjectId>,
}

impl Fixture {
    /// Scheme id by name; `default` names the system default scheme
    pub(crate) fn scheme_id(&self, name: &str) -> Result<SchemeId> {
        if name.eq_ignore_ascii_case("default") {
            return Ok(SchemeId::DEFAULT);
        }
        match self.schemes.get(name) {
            Some(id) => Ok(*id),
            None => bail!("unknown scheme {name:?}"),
        }
    }

    pub(crate) fn project_id(&self, key: &str) -> Result<ProjectId> {
        match self.projects.get(key) {
            Some(id) => Ok(*id),
            None => bail!("unknown project {key:?}"),
        }
    }

    /// Id of the draft of the named scheme
    pub(crate) fn draft_id(&self, parent: &str) -> Result<SchemeId> {
        let parent = self.scheme_id(parent)?;
        self.repo
            .draft_for_parent(parent)
            .map(|draft| draft.id)
            .with_context(|| format!("scheme {parent} has no draft"))
    }

    /// Issues of the given projects, by id
    pub(crate) fn issues_of(&self, projects: &[ProjectId]) -> Vec<Issue> {
        self.issues
            .issues()
            .into_iter()
            .filter(|issue| projects.contains(&issue.project))
            .collect()
    }
}
