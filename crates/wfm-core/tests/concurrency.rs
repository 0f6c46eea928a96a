use std::sync::Arc;
use std::time::Duration;
use wfm_core::{IssueStore, MigrationConfig, MigrationCoordinator, MigrationError, MigrationOutcome, MigrationRequest, StatusMapping};
use wfm_scheme::{Issue, IssueId, Project, ProjectId, SchemeAction, SchemeError, SchemeRepository, WorkflowMappings};
use wfm_tasks::TaskId;
use wfm_test_utils::{Fixture, GatedStore, PROJECT};

fn fixed_to_done() -> StatusMapping {
    StatusMapping::new().with("Bug", "Fixed", "Done")
}

async fn wait_until_started(coordinator: &MigrationCoordinator, id: TaskId) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !coordinator.tasks().task(id).is_some_and(|t| t.is_started()) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("task started");
}

#[tokio::test]
async fn lock_is_released_after_failing_task() {
    let fixture = Fixture::new();
    let coordinator = fixture.coordinator(MigrationConfig::default());
    let scheme = fixture.target.id;

    let result: Result<(), &str> = coordinator
        .wait_for_updates_to_finish_and_execute(Some(scheme), async { Err("boom") })
        .await;
    assert_eq!(result, Err("boom"));

    // second acquisition is immediate
    let guard = coordinator.locks().try_lock_all(scheme).expect("lock free");
    assert_eq!(guard.held(), SchemeAction::ALL.len());
}

#[tokio::test]
async fn draft_migration_serialises_with_parent_edits() {
    let fixture = Fixture::bug_in_fixed();
    let mut draft = fixture.repo.create_draft_of(fixture.source.id, None).unwrap();
    draft.mappings = WorkflowMappings::new().with_mapping("Bug", "W2");
    fixture.repo.update_draft(&draft, None).unwrap();

    let coordinator = fixture.coordinator(MigrationConfig::default());
    let ctx = coordinator.prepare(&MigrationRequest::draft(draft.id)).unwrap();
    let parent = fixture.source.clone();

    coordinator
        .wait_for_updates_to_finish_and_execute(ctx.lock_scheme(), async {
            assert!(coordinator
                .locks()
                .try_lock(SchemeAction::UpdateScheme, parent.id)
                .is_none());
            let edit = tokio::time::timeout(Duration::from_millis(50), coordinator.update_scheme(&parent)).await;
            assert!(edit.is_err(), "parent edit must wait for the draft migration lock");
        })
        .await;

    coordinator.update_scheme(&parent).await.unwrap();
}

#[tokio::test]
async fn second_migration_reports_the_running_one() {
    let fixture = Fixture::bug_in_fixed();
    let gated = Arc::new(GatedStore::new(Arc::clone(&fixture.issues)));
    let coordinator =
        fixture.coordinator_with_store(Arc::clone(&gated) as Arc<dyn IssueStore>, MigrationConfig::default());
    let request = MigrationRequest::projects([PROJECT], fixture.target.id);

    let first = coordinator
        .migrate(coordinator.prepare(&request).unwrap(), fixed_to_done())
        .await
        .unwrap();
    let MigrationOutcome::Submitted(first) = first else {
        panic!("expected first migration to be submitted, got {first:?}");
    };

    let second = coordinator
        .migrate(coordinator.prepare(&request).unwrap(), fixed_to_done())
        .await
        .unwrap();
    let MigrationOutcome::AlreadyRunning(active) = second else {
        panic!("expected the running migration to be reported, got {second:?}");
    };
    assert_eq!(active.id, first.id);
    assert_eq!(coordinator.tasks().all_tasks().len(), 1);

    gated.open();
    let done = coordinator.tasks().wait_for(first.id).await.unwrap();
    assert!(done.is_finished());
    assert_eq!(fixture.issue(1).status.as_str(), "Done");
}

#[tokio::test]
async fn scheme_edits_refused_while_migrating() {
    let fixture = Fixture::bug_in_fixed();
    let gated = Arc::new(GatedStore::new(Arc::clone(&fixture.issues)));
    let coordinator =
        fixture.coordinator_with_store(Arc::clone(&gated) as Arc<dyn IssueStore>, MigrationConfig::default());

    let ctx = coordinator
        .prepare(&MigrationRequest::projects([PROJECT], fixture.target.id))
        .unwrap();
    let outcome = coordinator.migrate(ctx, fixed_to_done()).await.unwrap();
    let task = outcome.task().expect("submitted").clone();

    let mut renamed = fixture.target.clone();
    renamed.name = "Renamed".into();
    let err = coordinator.update_scheme(&renamed).await.unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Scheme(SchemeError::BeingMigrated(id)) if id == fixture.target.id
    ));
    let err = coordinator.delete_scheme(fixture.target.id).await.unwrap_err();
    assert!(matches!(err, MigrationError::Scheme(SchemeError::BeingMigrated(_))));

    // schemes the migration does not touch stay editable
    coordinator.update_scheme(&fixture.source).await.unwrap();

    gated.open();
    coordinator.tasks().wait_for(task.id).await.unwrap();
    assert_eq!(coordinator.update_scheme(&renamed).await.unwrap().name, "Renamed");
}

#[tokio::test]
async fn saturated_pool_rejects_with_retryable_error() {
    let fixture = Fixture::bug_in_fixed();
    let mut targets = vec![fixture.target.clone()];
    for n in 2..=3 {
        let project = ProjectId(n);
        fixture
            .repo
            .add_project(
                Project::new(project, format!("P{n}"), format!("Project {n}"))
                    .with_issue_types(["Bug"])
                    .with_scheme(fixture.source.id),
            )
            .unwrap();
        fixture.issues.insert(Issue {
            id: IssueId(n * 100),
            key: format!("P{n}-1"),
            project,
            issue_type: "Bug".into(),
            status: "Fixed".into(),
            workflow: "W1".into(),
        });
        targets.push(
            fixture
                .repo
                .create_scheme(&format!("New {n}"), None, WorkflowMappings::new().with_mapping("Bug", "W2"))
                .unwrap(),
        );
    }

    let gated = Arc::new(GatedStore::new(Arc::clone(&fixture.issues)));
    let coordinator = fixture.coordinator_with_store(
        Arc::clone(&gated) as Arc<dyn IssueStore>,
        MigrationConfig::default().with_workers(1).with_queue_capacity(1),
    );
    let migrate = |n: u64| {
        let coordinator = coordinator.clone();
        let target = targets[usize::try_from(n - 1).unwrap()].id;
        async move {
            let ctx = coordinator
                .prepare(&MigrationRequest::projects([ProjectId(n)], target))
                .unwrap();
            coordinator.migrate(ctx, fixed_to_done()).await
        }
    };

    let running = migrate(1).await.unwrap();
    wait_until_started(&coordinator, running.task().unwrap().id).await;
    let queued = migrate(2).await.unwrap();
    assert!(matches!(queued, MigrationOutcome::Submitted(_)));

    let err = migrate(3).await.unwrap_err();
    assert!(matches!(err, MigrationError::Rejected { capacity: 1 }));
    assert!(err.is_retryable());

    gated.open();
    for outcome in [running, queued] {
        coordinator.tasks().wait_for(outcome.task().unwrap().id).await.unwrap();
    }
    assert_eq!(fixture.repo.project(ProjectId(3)).unwrap().scheme, Some(fixture.source.id));
}
