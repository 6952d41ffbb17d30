//! SQLite store tests: migrations, round-trip equality, conditional
//! updates, secondary-index scans, and retention deletes.

use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

use vigil::domain::errors::DomainError;
use vigil::domain::models::escalation::EscalationTarget;
use vigil::domain::models::{
    Alert, AlertSeverity, AlertStatus, ChannelKind, Contact, EscalationPolicy, EscalationRule,
    EscalationTrigger, ExecutionStatus, ImpactLevel, IngressEvent, JobStatus,
    MaintenanceWindow, NotificationJob, OnCallSchedule, RemediationAction,
    RemediationExecution, Team,
};
use vigil::domain::ports::{
    AlertRepository, DirectoryRepository, ExecutionRepository, JobRepository,
};
use vigil::infrastructure::database::{
    all_embedded_migrations, create_test_pool, Migrator, SqliteAlertRepository,
    SqliteDirectoryRepository, SqliteExecutionRepository, SqliteJobRepository,
};

async fn migrated_pool() -> sqlx::SqlitePool {
    let pool = create_test_pool().await.unwrap();
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .unwrap();
    pool
}

fn sample_alert(constitutional: bool) -> Alert {
    let now = Utc::now();
    let event = IngressEvent {
        rule_name: "ServiceDown".to_string(),
        severity: AlertSeverity::Critical,
        message: "service unreachable".to_string(),
        source: "svc-a".to_string(),
        labels: BTreeMap::from([("service".to_string(), "pgc".to_string())]),
        annotations: BTreeMap::from([("runbook".to_string(), "RB-12".to_string())]),
        constitutional_flag: constitutional,
        external_id: Some(format!("ext-{}", Uuid::new_v4())),
        timestamp: now,
    };
    Alert::from_ingress(
        Uuid::new_v4(),
        &event,
        "ServiceDown/svc-a/service=pgc".to_string(),
        now,
    )
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let pool = migrated_pool().await;
    let applied = Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .unwrap();
    assert_eq!(applied, 0, "re-running migrations must be a no-op");
}

#[tokio::test]
async fn alert_round_trip_preserves_every_field() {
    let pool = migrated_pool().await;
    let repo = SqliteAlertRepository::new(pool);

    let mut alert = sample_alert(true);
    alert.policy_id = Some(Uuid::new_v4());
    alert.escalation_level = 2;
    alert.rule_cursor = 3;
    alert.cursor_version = 7;
    alert.merge_count = 4;
    alert.degraded = true;
    alert.remediation_attempted = true;
    alert.remediation_success = Some(false);
    alert.ack_by = Some(Uuid::new_v4());
    alert.acked_at = Some(alert.created_at);

    repo.insert(&alert).await.unwrap();
    let read = repo.get(alert.id).await.unwrap().unwrap();

    // rfc3339 keeps full timestamp precision, so whole-record equality
    // holds.
    assert_eq!(read, alert);
    assert!(read.constitutional_flag);
    assert_eq!(read.version, alert.version);
}

#[tokio::test]
async fn alert_conditional_update_detects_interleaving() {
    let pool = migrated_pool().await;
    let repo = SqliteAlertRepository::new(pool);

    let alert = sample_alert(false);
    repo.insert(&alert).await.unwrap();

    let mut first = repo.get(alert.id).await.unwrap().unwrap();
    let mut second = repo.get(alert.id).await.unwrap().unwrap();

    first.merge_count = 1;
    repo.update(&mut first).await.unwrap();
    assert_eq!(first.version, 2);

    second.merge_count = 9;
    let err = repo.update(&mut second).await.unwrap_err();
    assert!(matches!(err, DomainError::VersionMismatch { .. }));

    // Re-read and replay.
    let mut fresh = repo.get(alert.id).await.unwrap().unwrap();
    assert_eq!(fresh.merge_count, 1);
    fresh.merge_count = 9;
    repo.update(&mut fresh).await.unwrap();
    assert_eq!(fresh.version, 3);
}

#[tokio::test]
async fn alert_insert_is_idempotent_guard() {
    let pool = migrated_pool().await;
    let repo = SqliteAlertRepository::new(pool);

    let alert = sample_alert(false);
    repo.insert(&alert).await.unwrap();
    assert!(matches!(
        repo.insert(&alert).await,
        Err(DomainError::AlreadyExists { .. })
    ));
}

#[tokio::test]
async fn alert_correlation_and_external_scans() {
    let pool = migrated_pool().await;
    let repo = SqliteAlertRepository::new(pool);

    let alert = sample_alert(false);
    let external_id = alert.external_id.clone().unwrap();
    repo.insert(&alert).await.unwrap();

    let live = repo
        .find_live_by_correlation(&alert.correlation_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.id, alert.id);

    assert!(repo.find_by_external_id(&external_id).await.unwrap().is_some());
    assert!(repo.find_by_external_id("nope").await.unwrap().is_none());

    // Once resolved, the correlation scan goes quiet.
    let mut resolved = repo.get(alert.id).await.unwrap().unwrap();
    resolved
        .transition_to(AlertStatus::Resolved, Utc::now())
        .unwrap();
    repo.update(&mut resolved).await.unwrap();
    assert!(repo
        .find_live_by_correlation(&alert.correlation_key)
        .await
        .unwrap()
        .is_none());

    let by_status = repo.list_by_status(AlertStatus::Resolved).await.unwrap();
    assert_eq!(by_status.len(), 1);
}

#[tokio::test]
async fn alert_retention_honors_constitutional_flag() {
    let pool = migrated_pool().await;
    let repo = SqliteAlertRepository::new(pool);
    let now = Utc::now();

    let mut ordinary = sample_alert(false);
    ordinary.created_at = now - Duration::days(60);
    ordinary.transition_to(AlertStatus::Resolved, now).unwrap();
    let mut constitutional = sample_alert(true);
    constitutional.created_at = now - Duration::days(60);
    constitutional
        .transition_to(AlertStatus::Resolved, now)
        .unwrap();
    let mut live = sample_alert(false);
    live.created_at = now - Duration::days(60);

    repo.insert(&ordinary).await.unwrap();
    repo.insert(&constitutional).await.unwrap();
    repo.insert(&live).await.unwrap();

    let deleted = repo
        .delete_expired(now - Duration::days(30), false)
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    assert!(repo.get(ordinary.id).await.unwrap().is_none());
    // Constitutional record and the live alert survive.
    assert!(repo.get(constitutional.id).await.unwrap().is_some());
    assert!(repo.get(live.id).await.unwrap().is_some());
}

#[tokio::test]
async fn job_round_trip_and_due_scan() {
    let pool = migrated_pool().await;
    let repo = SqliteJobRepository::new(pool);
    let now = Utc::now();

    let mut job = NotificationJob::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        ChannelKind::Webhook,
        "escalation",
        9,
        now,
        now + Duration::minutes(15),
    )
    .with_variable("alert_id", "a-1")
    .with_constitutional_flag(true);
    job.last_error = Some("503".to_string());
    job.attempts = 2;

    repo.insert(&job).await.unwrap();
    let read = repo.get(job.id).await.unwrap().unwrap();
    assert_eq!(read, job);

    // Due scan picks it up; a future job is excluded.
    let mut future = job.clone();
    future.id = Uuid::new_v4();
    future.scheduled_not_before = now + Duration::hours(1);
    repo.insert(&future).await.unwrap();

    let due = repo.list_due(now, 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, job.id);

    // Terminal transition is visible to the open-jobs scan.
    let mut claimed = repo.get(job.id).await.unwrap().unwrap();
    claimed.transition_to(JobStatus::InFlight, now).unwrap();
    repo.update(&mut claimed).await.unwrap();
    claimed.transition_to(JobStatus::Delivered, now).unwrap();
    repo.update(&mut claimed).await.unwrap();

    let open = repo.list_open_by_alert(job.alert_id).await.unwrap();
    assert!(open.is_empty());
}

#[tokio::test]
async fn execution_round_trip_and_open_scan() {
    let pool = migrated_pool().await;
    let repo = SqliteExecutionRepository::new(pool);
    let now = Utc::now();

    let action_id = Uuid::new_v4();
    let alert_id = Uuid::new_v4();
    let mut execution = RemediationExecution::new(
        Uuid::new_v4(),
        action_id,
        alert_id,
        ExecutionStatus::Pending,
        true,
        now,
    );
    execution.stdout_tail = "partial output".to_string();
    execution.stderr_tail = "warn: retry".to_string();
    execution.exit_code = Some(0);

    repo.insert(&execution).await.unwrap();
    let read = repo.get(execution.id).await.unwrap().unwrap();
    assert_eq!(read, execution);
    assert!(read.constitutional_flag);

    // The open scan enforces at-most-one concurrent execution per pair.
    assert!(repo.find_open(action_id, alert_id).await.unwrap().is_some());

    let mut running = repo.get(execution.id).await.unwrap().unwrap();
    running.transition_to(ExecutionStatus::Approved, now).unwrap();
    repo.update(&mut running).await.unwrap();
    running.transition_to(ExecutionStatus::Running, now).unwrap();
    repo.update(&mut running).await.unwrap();
    running.transition_to(ExecutionStatus::Success, now).unwrap();
    repo.update(&mut running).await.unwrap();

    assert!(repo.find_open(action_id, alert_id).await.unwrap().is_none());
    assert_eq!(repo.list_by_alert(alert_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn directory_round_trips() {
    let pool = migrated_pool().await;
    let repo = SqliteDirectoryRepository::new(pool);
    let now = Utc::now();

    let contact = Contact::new(Uuid::new_v4(), "Ada", now)
        .with_address(ChannelKind::Email, "ada@example.org")
        .with_address(ChannelKind::Webhook, "https://hooks.example/ada");
    repo.upsert_contact(&contact).await.unwrap();
    assert_eq!(repo.get_contact(contact.id).await.unwrap().unwrap(), contact);

    let team = Team::new(Uuid::new_v4(), "platform", now).with_member(contact.id);
    repo.upsert_team(&team).await.unwrap();
    assert_eq!(repo.get_team(team.id).await.unwrap().unwrap(), team);

    let schedule = OnCallSchedule::new(
        Uuid::new_v4(),
        team.id,
        contact.id,
        now - Duration::hours(1),
        now + Duration::hours(7),
    )
    .with_override(Uuid::new_v4());
    repo.upsert_schedule(&schedule).await.unwrap();
    assert_eq!(
        repo.list_schedules_for_team(team.id).await.unwrap(),
        vec![schedule]
    );

    let rule = EscalationRule::new(
        Uuid::new_v4(),
        "page-oncall",
        EscalationTrigger::SeverityIncrease,
        300,
        EscalationTarget::Team(team.id),
        ChannelKind::Pagerduty,
        now,
    )
    .with_severity_threshold(AlertSeverity::Emergency);
    repo.upsert_rule(&rule).await.unwrap();
    assert_eq!(repo.get_rule(rule.id).await.unwrap().unwrap(), rule);

    let mut policy = EscalationPolicy::new(Uuid::new_v4(), "critical-path", now)
        .with_rule(rule.id)
        .with_max_escalations(2);
    policy.severity_filter = vec![AlertSeverity::Critical, AlertSeverity::Emergency];
    policy.constitutional_only = true;
    repo.upsert_policy(&policy).await.unwrap();
    assert_eq!(repo.get_policy(policy.id).await.unwrap().unwrap(), policy);

    let action = RemediationAction::new(
        Uuid::new_v4(),
        "service_restart",
        "restart.sh {service}",
        ImpactLevel::Medium,
        now,
    )
    .with_timeout_secs(120)
    .with_approval_required(true);
    repo.upsert_action(&action).await.unwrap();
    assert_eq!(repo.get_action(action.id).await.unwrap().unwrap(), action);
    assert_eq!(
        repo.get_action_by_name("service_restart")
            .await
            .unwrap()
            .unwrap(),
        action
    );

    let mut window =
        MaintenanceWindow::new(Uuid::new_v4(), "upgrade", now, now + Duration::hours(4), now)
            .with_source("svc-a");
    window
        .label_selector
        .insert("env".to_string(), "prod".to_string());
    repo.upsert_maintenance_window(&window).await.unwrap();
    assert_eq!(repo.list_maintenance_windows().await.unwrap(), vec![window]);
}
