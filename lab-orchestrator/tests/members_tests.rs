mod common;

use common::{Fixture, GROUP};
use lab_orchestrator::{ChangeKind, SetupMode, StageStatus};
use lab_provider::models::ClusterState;
use pretty_assertions::assert_eq;

fn emails(list: &[&str]) -> Vec<String> {
    list.iter().map(|e| e.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn add_creates_users_memberships_and_personal_clusters() {
    let fx = Fixture::new();
    fx.mock.add_user("bob@example.com");
    let orchestrator = fx.orchestrator();
    assert!(orchestrator.setup(SetupMode::Full).await.success());

    let roster = emails(&["jane.doe@example.com", "bob@example.com"]);
    let outcome = orchestrator.add_members(&roster).await;

    assert_eq!(outcome.status(), StageStatus::Passed, "{:#?}", outcome.changes);
    assert_eq!(outcome.count(ChangeKind::Created), 5); // 1 user, 2 members, 2 clusters
    let group = fx.mock.group_by_name(GROUP).unwrap();
    assert_eq!(group.members.len(), 2);

    let personal = fx.mock.cluster_by_name("lab-jane-doe").unwrap();
    assert_eq!(personal.single_user_name.as_deref(), Some("jane.doe@example.com"));
    assert!(fx.mock.cluster_by_name("lab-bob").is_some());

    // Re-adding is a no-op.
    let again = orchestrator.add_members(&roster).await;
    assert_eq!(again.count(ChangeKind::Created), 0);
    assert_eq!(again.count(ChangeKind::AlreadyPresent), 2);
    assert_eq!(again.count(ChangeKind::Reused), 2);
}

#[tokio::test(start_paused = true)]
async fn list_reports_members_sorted_with_cluster_state() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();
    assert!(orchestrator.setup(SetupMode::Full).await.success());
    orchestrator
        .add_members(&emails(&["zoe@example.com", "amy@example.com"]))
        .await;

    let rows = orchestrator.list_members().await.unwrap();

    let listed: Vec<(&str, &str)> = rows
        .iter()
        .map(|r| (r.email.as_str(), r.cluster_name.as_str()))
        .collect();
    assert_eq!(
        listed,
        vec![("amy@example.com", "lab-amy"), ("zoe@example.com", "lab-zoe")]
    );
    assert!(rows.iter().all(|r| r.cluster_state == Some(ClusterState::Pending)));
}

#[tokio::test(start_paused = true)]
async fn remove_counts_unknown_users_without_failing() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();
    assert!(orchestrator.setup(SetupMode::Full).await.success());
    orchestrator.add_members(&emails(&["amy@example.com"])).await;
    fx.mock.add_user("outsider@example.com");

    let outcome = orchestrator
        .remove_members(&emails(&[
            "amy@example.com",
            "ghost@example.com",
            "outsider@example.com",
        ]))
        .await;

    assert_eq!(outcome.status(), StageStatus::Passed, "{:#?}", outcome.changes);
    assert_eq!(outcome.count(ChangeKind::Removed), 1);
    assert_eq!(outcome.count(ChangeKind::Deleted), 1);
    assert!(fx.mock.cluster_by_name("lab-amy").is_none());
    assert!(fx.mock.group_by_name(GROUP).unwrap().members.is_empty());
    // ghost: no such user; outsider: not a member and no cluster.
    assert_eq!(outcome.count(ChangeKind::AlreadyAbsent), 3);
}

#[tokio::test]
async fn members_need_the_workshop_group() {
    let fx = Fixture::new();

    let outcome = fx
        .orchestrator()
        .add_members(&emails(&["amy@example.com"]))
        .await;

    assert_eq!(outcome.status(), StageStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("lab setup"));
}
