use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wfm_core::wizard::{self, Actor, ProgressView, SelectTargetView, StepResult, WizardState};
use wfm_core::{
    IssueSearch, IssueStore, MigrationConfig, MigrationCoordinator, MigrationRequest, MigrationStatus, StatusMapping,
};
use wfm_scheme::{Issue, ProjectId, SchemeRepository};

mod fixture;

use fixture::{Fixture, FixtureFile};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One `--map` entry: issue type, old status, new status
type MappingEntry = (String, String, String);

fn parse_mapping_entry(value: &str) -> Result<MappingEntry, String> {
    let (issue_type, statuses) = value
        .split_once(':')
        .ok_or_else(|| format!("expected ISSUE_TYPE:FROM=TO, got {value:?}"))?;
    let (from, to) = statuses
        .split_once('=')
        .ok_or_else(|| format!("expected ISSUE_TYPE:FROM=TO, got {value:?}"))?;
    let (issue_type, from, to) = (issue_type.trim(), from.trim(), to.trim());
    if issue_type.is_empty() || from.is_empty() || to.is_empty() {
        return Err(format!("empty part in mapping {value:?}"));
    }
    Ok((issue_type.to_string(), from.to_string(), to.to_string()))
}

fn fixture_arg() -> Arg {
    Arg::new("fixture")
        .long("fixture")
        .short('f')
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("TOML file with workflows, schemes, drafts, projects and issues")
}

fn projects_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("project")
                .long("project")
                .short('p')
                .required(true)
                .action(ArgAction::Append)
                .help("Key of a project to move (repeatable)"),
        )
        .arg(
            Arg::new("target")
                .long("target")
                .short('t')
                .required(true)
                .help("Name of the scheme to move the projects to"),
        )
}

fn draft_arg() -> Arg {
    Arg::new("draft")
        .long("draft")
        .short('d')
        .required(true)
        .help("Name of the scheme whose draft to publish")
}

fn map_arg() -> Arg {
    Arg::new("map")
        .long("map")
        .short('m')
        .action(ArgAction::Append)
        .value_parser(parse_mapping_entry)
        .help("Status mapping as ISSUE_TYPE:FROM=TO (repeatable)")
}

fn cli() -> Command {
    Command::new("wfm")
        .version(wfm_core::VERSION)
        .about("Workflow scheme migration")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Migration settings (TOML)"),
        )
        .arg(
            Arg::new("user")
                .long("user")
                .global(true)
                .default_value("admin")
                .help("Name recorded as the acting administrator"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand(
            projects_args(Command::new("plan").about("Show the status mappings a project migration needs"))
                .arg(fixture_arg()),
        )
        .subcommand(
            Command::new("plan-draft")
                .about("Show the status mappings publishing a draft needs")
                .arg(fixture_arg())
                .arg(draft_arg()),
        )
        .subcommand(
            projects_args(Command::new("migrate").about("Move projects to another scheme"))
                .arg(fixture_arg())
                .arg(map_arg()),
        )
        .subcommand(
            Command::new("migrate-draft")
                .about("Publish a draft scheme, migrating the issues of its projects")
                .arg(fixture_arg())
                .arg(draft_arg())
                .arg(map_arg()),
        )
}

fn init_tracing(json: bool) {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn request(command: &str, args: &ArgMatches, fixture: &Fixture) -> Result<MigrationRequest> {
    if command.ends_with("-draft") {
        let parent = args.get_one::<String>("draft").context("--draft is required")?;
        return Ok(MigrationRequest::draft(fixture.draft_id(parent)?));
    }
    let projects = args
        .get_many::<String>("project")
        .into_iter()
        .flatten()
        .map(|key| fixture.project_id(key))
        .collect::<Result<Vec<_>>>()?;
    let target = args.get_one::<String>("target").context("--target is required")?;
    Ok(MigrationRequest::projects(projects, fixture.scheme_id(target)?))
}

fn status_mapping(args: &ArgMatches) -> StatusMapping {
    args.get_many::<MappingEntry>("map")
        .into_iter()
        .flatten()
        .fold(StatusMapping::new(), |mapping, (issue_type, from, to)| {
            mapping.with(issue_type.as_str(), from.as_str(), to.as_str())
        })
}

#[derive(Debug, Serialize)]
struct Report {
    step: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    problems: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<ProgressView>,
    issues: Vec<Issue>,
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Poll the wizard until the started migration finishes
async fn watch(coordinator: &MigrationCoordinator, actor: &Actor, state: &mut WizardState) -> Result<ProgressView> {
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    let mut last_percent = None;
    loop {
        interval.tick().await;
        let view = wizard::progress(coordinator, actor, state)?;
        if last_percent != Some(view.percent) {
            tracing::info!(
                percent = view.percent,
                message = view.message.as_deref().unwrap_or(""),
                sub_task = view.sub_task.as_deref().unwrap_or(""),
                "migration progress"
            );
            last_percent = Some(view.percent);
        }
        if view.finished {
            return Ok(view);
        }
    }
}

async fn run(matches: &ArgMatches) -> Result<ExitCode> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => MigrationConfig::load(path)?,
        None => MigrationConfig::default(),
    };
    let (command, args) = matches.subcommand().context("no command given")?;
    let path = args.get_one::<PathBuf>("fixture").context("--fixture is required")?;
    let fixture = FixtureFile::load(path)?.build()?;
    let request = request(command, args, &fixture)?;
    let actor = Actor::admin(
        matches
            .get_one::<String>("user")
            .map_or("admin", String::as_str),
    );

    let coordinator = MigrationCoordinator::new(
        Arc::clone(&fixture.repo) as Arc<dyn SchemeRepository>,
        Arc::clone(&fixture.issues) as Arc<dyn IssueSearch>,
        Arc::clone(&fixture.issues) as Arc<dyn IssueStore>,
        config,
    );
    let mut state = WizardState::default();
    let view = wizard::select_target(&coordinator, &actor, &mut state, &request).await?;

    if matches!(command, "plan" | "plan-draft") {
        print_json(&view)?;
        return Ok(ExitCode::SUCCESS);
    }

    let projects: Vec<ProjectId> = state
        .context
        .as_ref()
        .map(|context| context.projects().iter().map(|p| p.id).collect())
        .unwrap_or_default();
    let mut report = Report {
        step: "nothing_to_do",
        problems: Vec::new(),
        progress: None,
        issues: Vec::new(),
    };
    let mut code = ExitCode::SUCCESS;

    if let SelectTargetView::MappingRequired { .. } = view {
        match wizard::submit_mapping(&coordinator, &actor, &mut state, status_mapping(args)).await? {
            StepResult::NothingToDo => {}
            StepResult::Completed => report.step = "completed",
            StepResult::Started(task) => {
                tracing::info!(task = %task, "migration started");
                let progress = watch(&coordinator, &actor, &mut state).await?;
                let aborted = progress
                    .result
                    .as_ref()
                    .is_some_and(|result| result.status == MigrationStatus::Aborted);
                if aborted {
                    code = ExitCode::FAILURE;
                }
                report.step = "migrated";
                report.progress = Some(progress);
            }
            StepResult::AlreadyRunning(task) => {
                report.step = "already_running";
                report.problems.push(format!("migration {task} is already running"));
                code = ExitCode::FAILURE;
            }
            StepResult::Invalid(errors) => {
                report.step = "mapping_required";
                report.problems = errors.iter().map(ToString::to_string).collect();
                code = ExitCode::from(2);
            }
        }
    }

    coordinator.shutdown().await;
    report.issues = fixture.issues_of(&projects);
    print_json(&report)?;
    Ok(code)
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    match run(&matches).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mapping_entries_parse() {
        assert_eq!(
            parse_mapping_entry("Bug:Fixed=Done").unwrap(),
            ("Bug".to_string(), "Fixed".to_string(), "Done".to_string())
        );
        assert_eq!(
            parse_mapping_entry(" Sub-task : In Review = In Progress ").unwrap(),
            ("Sub-task".to_string(), "In Review".to_string(), "In Progress".to_string())
        );
        assert!(parse_mapping_entry("Bug=Done").is_err());
        assert!(parse_mapping_entry("Bug:Fixed").is_err());
        assert!(parse_mapping_entry(":Fixed=Done").is_err());
    }

    #[test]
    fn command_line_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn repeated_maps_collect_into_one_mapping() {
        let matches = cli().get_matches_from([
            "wfm", "migrate", "-f", "x.toml", "-p", "PRJ", "-t", "New", "-m", "Bug:Fixed=Done", "-m", "Bug:Closed=Done",
        ]);
        let (_, args) = matches.subcommand().unwrap();
        let mapping = status_mapping(args);
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.target(&"Bug".into(), &"Closed".into()), Some(&"Done".into()));
    }
}
