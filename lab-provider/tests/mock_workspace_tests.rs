use lab_provider::mock::{MockWorkspace, Mutation};
use lab_provider::models::{
    AccessControlRequest, ClusterState, Library, LibraryInstallStatus, PatchOperation,
    PermissionLevel, PermissionsChange, SecurableType, StatementState,
};
use lab_provider::ResourceClient;

#[tokio::test]
async fn started_cluster_runs_after_boot_polls() {
    let ws = MockWorkspace::new();
    ws.set_boot_polls(3);
    let id = ws.add_cluster("Small Spark 4.0", ClusterState::Terminated);

    ws.start_cluster(&id).await.unwrap();
    assert_eq!(ws.get_cluster(&id).await.unwrap().state, ClusterState::Pending);
    assert_eq!(ws.get_cluster(&id).await.unwrap().state, ClusterState::Pending);
    assert_eq!(ws.get_cluster(&id).await.unwrap().state, ClusterState::Running);

    let err = ws.start_cluster(&id).await.unwrap_err();
    assert!(matches!(err, lab_provider::ClientError::Rejected { .. }));
}

#[tokio::test]
async fn failing_library_fails_alone() {
    let ws = MockWorkspace::new();
    let id = ws.add_cluster("c", ClusterState::Running);
    ws.fail_library("broken==1.0");

    ws.install_libraries(&id, &[Library::pypi("neo4j==6.0.2"), Library::pypi("broken==1.0")])
        .await
        .unwrap();
    let statuses = ws.cluster_library_statuses(&id).await.unwrap();

    let by_name = |name: &str| {
        statuses
            .iter()
            .find(|s| s.library.name() == name)
            .map(|s| s.status)
    };
    assert_eq!(by_name("neo4j==6.0.2"), Some(LibraryInstallStatus::Installed));
    assert_eq!(by_name("broken==1.0"), Some(LibraryInstallStatus::Failed));
}

#[tokio::test]
async fn statements_move_through_lifecycle() {
    let ws = MockWorkspace::new();
    ws.add_catalog("cat");
    let wh = ws.add_warehouse("Starter Warehouse", lab_provider::models::WarehouseState::Running);
    ws.set_statement_polls(2);

    let submitted = ws
        .execute_statement(&wh, "CREATE SCHEMA IF NOT EXISTS `cat`.`lakehouse`")
        .await
        .unwrap();
    assert_eq!(submitted.state(), StatementState::Pending);

    let id = submitted.statement_id;
    assert_eq!(ws.get_statement(&id).await.unwrap().state(), StatementState::Running);
    assert_eq!(ws.get_statement(&id).await.unwrap().state(), StatementState::Succeeded);
    assert!(ws.has_schema("cat.lakehouse"));
}

#[tokio::test]
async fn grant_updates_are_deltas() {
    let ws = MockWorkspace::new();
    ws.add_catalog("cat");
    ws.add_group("workshop", &[]);
    ws.seed_grant(SecurableType::Catalog, "cat", "admins", &["ALL_PRIVILEGES"]);

    ws.update_grants(
        SecurableType::Catalog,
        "cat",
        &[PermissionsChange {
            principal: "workshop".to_string(),
            add: vec!["USE_CATALOG".to_string(), "SELECT".to_string()],
            remove: vec![],
        }],
    )
    .await
    .unwrap();

    let grants = ws.grants(SecurableType::Catalog, "cat");
    assert!(grants["admins"].contains("ALL_PRIVILEGES"));
    assert_eq!(grants["workshop"].len(), 2);

    let err = ws
        .update_grants(
            SecurableType::Catalog,
            "cat",
            &[PermissionsChange {
                principal: "nobody".to_string(),
                add: vec!["SELECT".to_string()],
                remove: vec![],
            }],
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Could not find principal"));
}

#[tokio::test]
async fn deleting_group_drops_its_acl_entries() {
    let ws = MockWorkspace::new();
    let cluster = ws.add_cluster("c", ClusterState::Running);
    let group = ws.add_group("workshop", &[]);
    ws.add_cluster_acl(&cluster, AccessControlRequest::user("admin@example.com", PermissionLevel::CanManage));

    ws.update_cluster_permissions(
        &cluster,
        &[AccessControlRequest::group("workshop", PermissionLevel::CanAttachTo)],
    )
    .await
    .unwrap();
    assert_eq!(ws.cluster_acl(&cluster).len(), 2);

    ws.delete_group(&group.id).await.unwrap();
    let acl = ws.cluster_acl(&cluster);
    assert_eq!(acl.len(), 1);
    assert_eq!(acl[0].user_name.as_deref(), Some("admin@example.com"));
    assert!(ws.delete_group(&group.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn entitlement_removal_is_targeted() {
    let ws = MockWorkspace::new();
    let users = ws.add_group(
        "users",
        &["workspace-access", "allow-cluster-create", "allow-instance-pool-create"],
    );

    ws.patch_group(&users.id, &[PatchOperation::remove_entitlement("allow-cluster-create")])
        .await
        .unwrap();

    let after = ws.get_group(&users.id).await.unwrap().entitlement_values();
    assert!(after.contains("workspace-access"));
    assert!(after.contains("allow-instance-pool-create"));
    assert!(!after.contains("allow-cluster-create"));
    assert!(matches!(ws.journal().last(), Some(Mutation::PatchGroup { operations: 1, .. })));
}

#[tokio::test]
async fn uploads_require_existing_volume() {
    let ws = MockWorkspace::new();
    let err = ws
        .upload_file("/Volumes/c/s/v/a.csv", b"x".to_vec(), true)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    ws.add_volume("c.s.v");
    ws.upload_file("/Volumes/c/s/v/a.csv", b"x".to_vec(), true).await.unwrap();
    ws.upload_file("/Volumes/c/s/v/a.csv", b"xy".to_vec(), true).await.unwrap();

    let listing = ws.list_directory("/Volumes/c/s/v").await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name, "a.csv");
    assert_eq!(listing[0].file_size, Some(2));
}
