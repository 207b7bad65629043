//! Setup pipeline against the in-memory workspace.

mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use common::{Fixture, ADMIN, CATALOG, GROUP, LAKEHOUSE, POPULATION, TABLE_ROWS};
use lab_config::LibrarySettings;
use lab_core::{LabError, PollPolicy};
use lab_orchestrator::lockdown::{lockdown_entitlements, READ_ONLY_PRIVILEGES};
use lab_orchestrator::warehouse::StatementRunner;
use lab_orchestrator::{ChangeKind, SetupMode, StageName, StageOutcome, StageStatus};
use lab_provider::models::{
    ClusterState, LibraryInstallStatus, PermissionLevel, Principal, SecurableType, WarehouseState,
};
use lab_provider::mock::{MockWorkspace, Mutation};
use pretty_assertions::assert_eq;

#[tokio::test(start_paused = true)]
async fn full_setup_provisions_everything() {
    let fx = Fixture::new();
    let run = fx.orchestrator().setup(SetupMode::Full).await;

    assert!(run.success(), "{:#?}", run.stages);
    let names: Vec<StageName> = run.stages.iter().map(|s| s.stage).collect();
    assert_eq!(
        names,
        vec![
            StageName::Cluster,
            StageName::Libraries,
            StageName::Upload,
            StageName::Tables,
            StageName::Lockdown
        ]
    );

    // Running cluster owned by the caller with every library installed.
    let cluster = fx.mock.cluster_by_name("Small Spark 4.0").unwrap();
    assert_eq!(cluster.state, ClusterState::Running);
    assert_eq!(cluster.single_user_name.as_deref(), Some(ADMIN));
    assert_eq!(run.cluster_id.as_deref(), Some(cluster.cluster_id.as_str()));
    let statuses = fx.mock.library_statuses(&cluster.cluster_id);
    assert_eq!(statuses.len(), LibrarySettings::default().maven.len() + LibrarySettings::default().pypi.len());
    assert!(statuses.iter().all(|s| s.status == LibraryInstallStatus::Installed));

    // Every table, each with its documented row count checked.
    let tables = fx.mock.tables();
    for (table, _) in TABLE_ROWS {
        assert!(tables.contains(&format!("{LAKEHOUSE}.{table}")), "missing {table}");
    }
    assert_eq!(run.stage(StageName::Tables).unwrap().count(ChangeKind::Created), 5);
    assert_eq!(fx.mock.files().len(), 5);

    // Group with five catalog privileges and one attach entry.
    let group = fx.mock.group_by_name(GROUP).unwrap();
    assert_eq!(run.group_id.as_deref(), Some(group.id.as_str()));
    let grants = fx.mock.grants(SecurableType::Catalog, CATALOG);
    let expected: BTreeSet<String> = READ_ONLY_PRIVILEGES.iter().map(|p| p.to_string()).collect();
    assert_eq!(grants[GROUP], expected);
    let acl = fx.mock.cluster_acl(&cluster.cluster_id);
    let entry = acl
        .iter()
        .find(|e| e.principal() == Some(Principal::Group(GROUP.to_string())))
        .unwrap();
    assert!(entry.has_level(PermissionLevel::CanAttachTo));

    // Default population stripped of both creation rights.
    let users = fx.mock.group_by_name(POPULATION).unwrap();
    assert_eq!(
        users.entitlement_values(),
        BTreeSet::from(["workspace-access".to_string()])
    );

    // Personal Compute policy locked and closed to the population only.
    assert!(fx.policy_locked());
    assert_eq!(fx.policy_users(), vec![Principal::User(ADMIN.to_string())]);
}

#[tokio::test(start_paused = true)]
async fn second_setup_creates_nothing() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();
    assert!(orchestrator.setup(SetupMode::Full).await.success());
    fx.mock.clear_journal();

    let run = orchestrator.setup(SetupMode::Full).await;

    assert!(run.success(), "{:#?}", run.stages);
    assert_eq!(run.count(ChangeKind::Created), 0);
    assert_eq!(run.count(ChangeKind::Removed), 0);
    assert!(fx.mock.journal().iter().all(|m| !m.is_create() && !m.is_delete()));
    assert!(!fx.mock.journal().iter().any(|m| matches!(
        m,
        Mutation::ExecuteStatement(sql) if sql.starts_with("CREATE")
    )));

    let cluster = run.stage(StageName::Cluster).unwrap();
    assert_eq!(cluster.count(ChangeKind::Reused), 1);
    let tables = run.stage(StageName::Tables).unwrap();
    assert_eq!(tables.count(ChangeKind::Reused), TABLE_ROWS.len());
    let lockdown = run.stage(StageName::Lockdown).unwrap();
    assert!(lockdown
        .changes
        .iter()
        .all(|c| c.kind.is_noop()), "{:#?}", lockdown.changes);
}

#[tokio::test(start_paused = true)]
async fn grants_keep_other_principals() {
    let fx = Fixture::new();
    fx.mock.seed_grant(SecurableType::Catalog, CATALOG, "data_engineers", &["ALL_PRIVILEGES"]);
    fx.mock.seed_grant(SecurableType::Catalog, CATALOG, "account users", &["USE_CATALOG", "BROWSE"]);
    let before = fx.mock.grants(SecurableType::Catalog, CATALOG);

    assert!(fx.orchestrator().setup(SetupMode::Full).await.success());

    let after = fx.mock.grants(SecurableType::Catalog, CATALOG);
    for (principal, privileges) in &before {
        assert!(privileges.is_subset(&after[principal]), "{principal} lost privileges");
    }
    assert!(after.contains_key(GROUP));
}

#[tokio::test(start_paused = true)]
async fn attach_grant_preserves_admin_manage() {
    let fx = Fixture::new();
    let run = fx.orchestrator().setup(SetupMode::Full).await;
    assert!(run.success());

    let cluster_id = run.cluster_id.unwrap();
    let acl = fx.mock.cluster_acl(&cluster_id);
    let admin = acl
        .iter()
        .find(|e| e.principal() == Some(Principal::User(ADMIN.to_string())))
        .unwrap();
    assert!(admin.has_level(PermissionLevel::CanManage));
    assert_eq!(acl.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn terminated_cluster_is_started_not_recreated() {
    let fx = Fixture::new();
    let id = fx.mock.add_cluster("Small Spark 4.0", ClusterState::Terminated);

    let run = fx.orchestrator().setup(SetupMode::ClusterOnly).await;

    assert!(run.success(), "{:#?}", run.stages);
    assert_eq!(run.cluster_id.as_deref(), Some(id.as_str()));
    assert_eq!(run.stage(StageName::Cluster).unwrap().count(ChangeKind::Started), 1);
    assert!(fx.mock.journal().iter().all(|m| !m.is_create()));
    assert_eq!(run.stage(StageName::Upload).unwrap().status(), StageStatus::Skipped);
    assert_eq!(run.stage(StageName::Lockdown).unwrap().status(), StageStatus::Skipped);
}

#[tokio::test(start_paused = true)]
async fn one_failing_library_does_not_block_the_rest() {
    let fx = Fixture::new();
    fx.mock.fail_library("neo4j==6.0.2");

    let run = fx.orchestrator().setup(SetupMode::ClusterOnly).await;

    let libraries = run.stage(StageName::Libraries).unwrap();
    assert_eq!(libraries.status(), StageStatus::Failed);
    let failures: Vec<&str> = libraries.failures().map(|c| c.resource.as_str()).collect();
    assert_eq!(failures, vec!["pypi:neo4j==6.0.2"]);
    assert_eq!(
        libraries.count(ChangeKind::Created),
        LibrarySettings::default().maven.len() + LibrarySettings::default().pypi.len() - 1
    );
    assert_eq!(run.stage(StageName::Cluster).unwrap().status(), StageStatus::Passed);
    assert!(!run.success());
}

#[tokio::test(start_paused = true)]
async fn stuck_cluster_times_out_but_data_track_completes() {
    let mut fx = Fixture::new();
    fx.config.timeouts.cluster_secs = 5;
    fx.mock.stall_clusters();

    let run = fx.orchestrator().setup(SetupMode::Full).await;

    let cluster = run.stage(StageName::Cluster).unwrap();
    assert_eq!(cluster.status(), StageStatus::Failed);
    assert!(cluster.error.as_deref().unwrap().contains("Timed out"));
    assert_eq!(run.stage(StageName::Libraries).unwrap().status(), StageStatus::Skipped);
    assert_eq!(run.stage(StageName::Upload).unwrap().status(), StageStatus::Passed);
    assert_eq!(run.stage(StageName::Tables).unwrap().status(), StageStatus::Passed);
    // The named cluster exists, so lockdown still attaches the group to it.
    assert_eq!(run.stage(StageName::Lockdown).unwrap().status(), StageStatus::Passed);
    assert!(!run.success());
}

#[tokio::test(start_paused = true)]
async fn missing_warehouse_fails_tables_only() {
    let fx = Fixture::new();
    let mut config = fx.config.clone();
    config.warehouse.name = "Nonexistent".to_string();
    let client: std::sync::Arc<dyn lab_provider::ResourceClient> = fx.mock.clone();
    let orchestrator = lab_orchestrator::Orchestrator::new(client, config);

    let run = orchestrator.setup(SetupMode::TablesOnly).await;

    assert_eq!(run.stage(StageName::Upload).unwrap().status(), StageStatus::Passed);
    let tables = run.stage(StageName::Tables).unwrap();
    assert_eq!(tables.status(), StageStatus::Failed);
    assert!(tables.error.as_deref().unwrap().contains("Nonexistent"));
}

#[tokio::test(start_paused = true)]
async fn missing_volume_fails_before_any_transfer() {
    let fx = Fixture::new();
    let mut config = fx.config.clone();
    config.volume.volume = "absent".to_string();
    let client: std::sync::Arc<dyn lab_provider::ResourceClient> = fx.mock.clone();
    let orchestrator = lab_orchestrator::Orchestrator::new(client, config);

    let run = orchestrator.setup(SetupMode::TablesOnly).await;

    let upload = run.stage(StageName::Upload).unwrap();
    assert_eq!(upload.status(), StageStatus::Failed);
    assert!(upload.changes.is_empty());
    assert!(fx.mock.files().is_empty());
    // No source files in the volume, so no table is created.
    let tables = run.stage(StageName::Tables).unwrap();
    assert_eq!(tables.failures().count(), TABLE_ROWS.len());
}

#[tokio::test(start_paused = true)]
async fn loaded_tables_are_reused_without_their_source_files() {
    let fx = Fixture::new();
    assert!(fx.orchestrator().setup(SetupMode::TablesOnly).await.success());
    let mut config = fx.config.clone();
    config.volume.volume = "absent".to_string();
    let client: std::sync::Arc<dyn lab_provider::ResourceClient> = fx.mock.clone();
    let orchestrator = lab_orchestrator::Orchestrator::new(client, config);

    let run = orchestrator.setup(SetupMode::TablesOnly).await;

    let tables = run.stage(StageName::Tables).unwrap();
    assert_eq!(tables.failures().count(), 0, "{:#?}", tables.changes);
    assert_eq!(tables.count(ChangeKind::Reused), TABLE_ROWS.len());
}

#[tokio::test(start_paused = true)]
async fn stalled_statement_times_out_after_five_polls() {
    let mock = MockWorkspace::new();
    let warehouse = mock.add_warehouse("Starter Warehouse", WarehouseState::Running);
    mock.stall_statements_containing("OPTIMIZE");
    let runner = StatementRunner::new(&mock, warehouse, PollPolicy::from_secs(1, 5));

    let start = tokio::time::Instant::now();
    let err = runner.execute("OPTIMIZE `c`.`s`.`t`").await.unwrap_err();

    assert!(matches!(err, LabError::Timeout { waited_secs: 5, .. }));
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));
    assert_eq!(mock.canceled_statements(), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_table_fails_alone() {
    let mut fx = Fixture::new();
    fx.config.timeouts.statement_secs = 5;
    fx.mock.stall_statements_containing("`sensor_readings`");

    let run = fx.orchestrator().setup(SetupMode::TablesOnly).await;

    let tables = run.stage(StageName::Tables).unwrap();
    assert_eq!(tables.status(), StageStatus::Failed);
    let failed: Vec<&str> = tables.failures().map(|c| c.resource.as_str()).collect();
    assert_eq!(failed, vec!["table sensor_readings"]);
    assert_eq!(tables.count(ChangeKind::Created), 4);
    // The row-count probe and the create both timed out and were canceled.
    assert_eq!(fx.mock.canceled_statements(), 2);
}

#[tokio::test(start_paused = true)]
async fn canceled_statement_is_retried_once() {
    let fx = Fixture::new();
    let needle = "CREATE OR REPLACE TABLE `workshop`.`lakehouse`.`systems`";
    fx.mock.cancel_once_containing(needle);

    let run = fx.orchestrator().setup(SetupMode::TablesOnly).await;

    assert!(run.success(), "{:#?}", run.stages);
    let submissions = fx.mock.sql_log().iter().filter(|s| s.starts_with(needle)).count();
    assert_eq!(submissions, 2);
}

#[tokio::test]
async fn lockdown_twice_is_a_noop() {
    let mock = MockWorkspace::new();
    mock.add_group(POPULATION, &["allow-cluster-create", "allow-instance-pool-create"]);

    let mut first = StageOutcome::new(StageName::Lockdown);
    lockdown_entitlements(&mock, POPULATION, &mut first).await.unwrap();
    assert_eq!(first.count(ChangeKind::Removed), 2);
    mock.clear_journal();

    let mut second = StageOutcome::new(StageName::Lockdown);
    lockdown_entitlements(&mock, POPULATION, &mut second).await.unwrap();
    assert_eq!(second.count(ChangeKind::Removed), 0);
    assert_eq!(second.count(ChangeKind::AlreadyAbsent), 2);
    assert!(mock.journal().is_empty());
}
