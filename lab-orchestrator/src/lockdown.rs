//! Least-privilege access for workshop participants.
//!
//! Every step reads the current state first and mutates only when its
//! post-condition does not already hold, so a partially applied lockdown is
//! completed by running it again. Mutations are deltas: entitlements are
//! removed by name, grants and ACL entries are added for one principal.

use std::collections::BTreeSet;

use lab_config::AccessSettings;
use lab_core::{lab_println, lab_success, LabError, Result};
use lab_provider::models::{
    AccessControlEntry, AccessControlRequest, ClusterPolicy, Group, PatchOperation,
    PermissionLevel, PermissionsChange, Principal, PrivilegeAssignment, SecurableType,
};
use lab_provider::{ClientError, ResourceClient};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::report::{ChangeKind, StageOutcome};

/// Creation rights stripped from the default population.
pub const ENTITLEMENTS_TO_REMOVE: [&str; 2] =
    ["allow-cluster-create", "allow-instance-pool-create"];

/// Catalog privileges granted to the workshop group.
pub const READ_ONLY_PRIVILEGES: [&str; 5] =
    ["USE_CATALOG", "USE_SCHEMA", "SELECT", "READ_VOLUME", "BROWSE"];

/// Policy family of the built-in Personal Compute policy.
pub const PERSONAL_COMPUTE_FAMILY: &str = "personal-vm";
const PERSONAL_COMPUTE_NAME: &str = "Personal Compute";

/// Override key that makes every node type unselectable.
const LOCKED_OVERRIDE_KEY: &str = "node_type_id";

pub async fn find_group(client: &dyn ResourceClient, name: &str) -> Result<Option<Group>> {
    let groups = client.find_groups(name).await?;
    Ok(groups.into_iter().find(|g| g.display_name == name))
}

async fn population_group(client: &dyn ResourceClient, name: &str) -> Result<Group> {
    let group = find_group(client, name)
        .await?
        .ok_or_else(|| LabError::NotFound(format!("group '{name}'")))?;
    // Search results omit entitlements.
    Ok(client.get_group(&group.id).await?)
}

fn present_entitlements(group: &Group) -> Vec<&'static str> {
    let current = group.entitlement_values();
    ENTITLEMENTS_TO_REMOVE
        .iter()
        .copied()
        .filter(|e| current.contains(*e))
        .collect()
}

/// Remove the creation entitlements from the default population.
pub async fn lockdown_entitlements(
    client: &dyn ResourceClient,
    population: &str,
    stage: &mut StageOutcome,
) -> Result<()> {
    lab_println!("Removing creation entitlements from '{population}'...");
    let group = population_group(client, population).await?;
    let present = present_entitlements(&group);

    for entitlement in ENTITLEMENTS_TO_REMOVE {
        if !present.contains(&entitlement) {
            stage.record(format!("entitlement {entitlement}"), ChangeKind::AlreadyAbsent);
        }
    }

    if !present.is_empty() {
        let operations: Vec<PatchOperation> = present
            .iter()
            .map(|e| PatchOperation::remove_entitlement(e))
            .collect();
        client.patch_group(&group.id, &operations).await?;
        info!(group = population, removed = ?present, "removed entitlements");
        for entitlement in &present {
            stage.record(format!("entitlement {entitlement}"), ChangeKind::Removed);
        }
    }

    let after = client.get_group(&group.id).await?;
    let remaining = present_entitlements(&after);
    if !remaining.is_empty() {
        return Err(LabError::Verification(format!(
            "'{population}' still has {}",
            remaining.join(", ")
        )));
    }
    lab_success!("'{population}' cannot create clusters or instance pools");
    Ok(())
}

/// The Personal Compute policy in full, matched by family first and then by name.
pub async fn find_personal_compute_policy(
    client: &dyn ResourceClient,
) -> Result<Option<ClusterPolicy>> {
    let policies = client.list_cluster_policies().await?;
    let found = policies
        .iter()
        .find(|p| p.policy_family_id.as_deref() == Some(PERSONAL_COMPUTE_FAMILY))
        .or_else(|| policies.iter().find(|p| p.name == PERSONAL_COMPUTE_NAME));
    match found {
        // Listings may omit the overrides.
        Some(policy) => Ok(Some(client.get_cluster_policy(&policy.policy_id).await?)),
        None => Ok(None),
    }
}

fn overrides_of(policy: &ClusterPolicy) -> Result<Map<String, Value>> {
    let text = match policy.policy_family_definition_overrides.as_deref() {
        Some(text) if !text.trim().is_empty() => text,
        _ => return Ok(Map::new()),
    };
    match serde_json::from_str(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(LabError::Verification(format!(
            "policy '{}' overrides are not a JSON object",
            policy.name
        ))),
        Err(e) => Err(LabError::Verification(format!(
            "policy '{}' overrides are unreadable: {e}",
            policy.name
        ))),
    }
}

fn is_locked(overrides: &Map<String, Value>) -> bool {
    overrides
        .get(LOCKED_OVERRIDE_KEY)
        .and_then(|rule| rule.get("type"))
        .and_then(Value::as_str)
        == Some("forbidden")
}

fn with_overrides(policy: &ClusterPolicy, overrides: Map<String, Value>) -> ClusterPolicy {
    ClusterPolicy {
        policy_family_definition_overrides: Some(Value::Object(overrides).to_string()),
        ..policy.clone()
    }
}

fn has_direct_level(entry: &AccessControlEntry, level: PermissionLevel) -> bool {
    entry
        .all_permissions
        .iter()
        .any(|p| p.permission_level == level && !p.inherited)
}

/// Direct entries of `acl` as requests, leaving out `excluded`.
fn direct_requests_without(
    acl: &[AccessControlEntry],
    excluded: &Principal,
) -> Vec<AccessControlRequest> {
    acl.iter()
        .filter(|e| e.principal().as_ref() != Some(excluded))
        .flat_map(|e| {
            e.all_permissions
                .iter()
                .filter(|p| !p.inherited)
                .map(move |p| AccessControlRequest {
                    user_name: e.user_name.clone(),
                    group_name: e.group_name.clone(),
                    service_principal_name: e.service_principal_name.clone(),
                    permission_level: p.permission_level,
                })
        })
        .collect()
}

/// Make the Personal Compute policy unusable and take the population off its ACL.
///
/// Only the `node_type_id` override is written; other overrides and other
/// principals' ACL entries stay as they are. A workspace without the policy
/// passes.
pub async fn lockdown_personal_compute_policy(
    client: &dyn ResourceClient,
    population: &str,
    stage: &mut StageOutcome,
) -> Result<()> {
    lab_println!("Locking down the {PERSONAL_COMPUTE_NAME} policy...");
    let Some(policy) = find_personal_compute_policy(client).await? else {
        warn!("personal compute policy not found");
        stage.record_detail(
            format!("cluster policy {PERSONAL_COMPUTE_NAME}"),
            ChangeKind::AlreadyAbsent,
            "policy not present in this workspace",
        );
        return Ok(());
    };
    let policy_id = policy.policy_id.as_str();
    let resource = format!("cluster policy {}", policy.name);

    let mut overrides = overrides_of(&policy)?;
    if is_locked(&overrides) {
        stage.record(resource, ChangeKind::AlreadyPresent);
    } else {
        overrides.insert(
            LOCKED_OVERRIDE_KEY.to_string(),
            json!({ "type": "forbidden", "hidden": true }),
        );
        client
            .edit_cluster_policy(&with_overrides(&policy, overrides))
            .await?;
        let after = client.get_cluster_policy(policy_id).await?;
        if !is_locked(&overrides_of(&after)?) {
            return Err(LabError::Verification(format!(
                "policy '{}' still allows node types",
                policy.name
            )));
        }
        info!(policy_id, "forbade node types on personal compute policy");
        stage.record_detail(resource, ChangeKind::Updated, "node_type_id forbidden");
    }

    let acl_resource = format!("policy ACL {} -> {population}", policy.name);
    let principal = Principal::Group(population.to_string());
    let before = client.get_cluster_policy_permissions(policy_id).await?;
    let holds = |acl: &[AccessControlEntry]| {
        find_entry(acl, &principal).is_some_and(|e| has_direct_level(e, PermissionLevel::CanUse))
    };
    if !holds(&before) {
        stage.record(acl_resource, ChangeKind::AlreadyAbsent);
        return Ok(());
    }

    // The permissions API cannot remove a single entry; resend everyone else's.
    let kept = direct_requests_without(&before, &principal);
    client
        .set_cluster_policy_permissions(policy_id, &kept)
        .await?;

    let after = client.get_cluster_policy_permissions(policy_id).await?;
    if holds(&after) {
        return Err(LabError::Verification(format!(
            "'{population}' can still use policy '{}'",
            policy.name
        )));
    }
    let remaining = direct_requests_without(&after, &principal);
    if kept.iter().any(|k| !remaining.contains(k)) {
        return Err(LabError::Verification(format!(
            "other ACL entries on policy '{}' changed",
            policy.name
        )));
    }
    info!(policy_id, population, "removed CAN_USE on personal compute policy");
    lab_success!("'{population}' can no longer use the {} policy", policy.name);
    stage.record(acl_resource, ChangeKind::Removed);
    Ok(())
}

/// Undo [`lockdown_personal_compute_policy`]: drop the override and give the
/// population CAN_USE again.
pub async fn restore_personal_compute_policy(
    client: &dyn ResourceClient,
    population: &str,
    stage: &mut StageOutcome,
) -> Result<()> {
    let Some(policy) = find_personal_compute_policy(client).await? else {
        stage.record_detail(
            format!("cluster policy {PERSONAL_COMPUTE_NAME}"),
            ChangeKind::AlreadyAbsent,
            "policy not present in this workspace",
        );
        return Ok(());
    };
    let policy_id = policy.policy_id.as_str();
    let resource = format!("cluster policy {} override", policy.name);

    let mut overrides = overrides_of(&policy)?;
    if is_locked(&overrides) {
        overrides.remove(LOCKED_OVERRIDE_KEY);
        client
            .edit_cluster_policy(&with_overrides(&policy, overrides))
            .await?;
        if is_locked(&overrides_of(&client.get_cluster_policy(policy_id).await?)?) {
            return Err(LabError::Verification(format!(
                "policy '{}' still forbids node types",
                policy.name
            )));
        }
        info!(policy_id, "removed personal compute lockdown override");
        stage.record(resource, ChangeKind::Removed);
    } else {
        stage.record(resource, ChangeKind::AlreadyAbsent);
    }

    let acl_resource = format!("policy ACL {} -> {population}", policy.name);
    let principal = Principal::Group(population.to_string());
    let holds = |acl: &[AccessControlEntry]| {
        find_entry(acl, &principal).is_some_and(|e| e.has_level(PermissionLevel::CanUse))
    };
    if holds(&client.get_cluster_policy_permissions(policy_id).await?) {
        stage.record(acl_resource, ChangeKind::AlreadyPresent);
        return Ok(());
    }

    client
        .update_cluster_policy_permissions(
            policy_id,
            &[AccessControlRequest::group(population, PermissionLevel::CanUse)],
        )
        .await?;
    if !holds(&client.get_cluster_policy_permissions(policy_id).await?) {
        return Err(LabError::Verification(format!(
            "'{population}' has no CAN_USE entry on policy '{}'",
            policy.name
        )));
    }
    lab_success!("Restored the {} policy for '{population}'", policy.name);
    stage.record(acl_resource, ChangeKind::Created);
    Ok(())
}

/// Add the creation entitlements back. Only ever run on explicit request.
pub async fn restore_entitlements(
    client: &dyn ResourceClient,
    population: &str,
    stage: &mut StageOutcome,
) -> Result<()> {
    let group = population_group(client, population).await?;
    let present = present_entitlements(&group);
    let missing: Vec<&str> = ENTITLEMENTS_TO_REMOVE
        .iter()
        .copied()
        .filter(|e| !present.contains(e))
        .collect();

    for entitlement in &present {
        stage.record(format!("entitlement {entitlement}"), ChangeKind::AlreadyPresent);
    }
    if missing.is_empty() {
        return Ok(());
    }

    let operations: Vec<PatchOperation> = missing
        .iter()
        .map(|e| PatchOperation::add_entitlement(e))
        .collect();
    client.patch_group(&group.id, &operations).await?;
    info!(group = population, restored = ?missing, "restored entitlements");

    let after = client.get_group(&group.id).await?.entitlement_values();
    for entitlement in &missing {
        if !after.contains(*entitlement) {
            return Err(LabError::Verification(format!(
                "'{population}' is still missing {entitlement}"
            )));
        }
        stage.record(format!("entitlement {entitlement}"), ChangeKind::Created);
    }
    lab_success!("Restored creation entitlements on '{population}'");
    Ok(())
}

/// Return the id of the named group, creating it empty if needed.
pub async fn get_or_create_group(
    client: &dyn ResourceClient,
    name: &str,
    stage: &mut StageOutcome,
) -> Result<String> {
    let resource = format!("group {name}");
    if let Some(group) = find_group(client, name).await? {
        debug!(group_id = %group.id, "group exists");
        stage.record(resource, ChangeKind::Reused);
        return Ok(group.id);
    }

    match client.create_group(name).await {
        Ok(group) => {
            info!(group_id = %group.id, name, "created group");
            lab_println!("  Created group '{name}' ({})", group.id);
            stage.record(resource, ChangeKind::Created);
            Ok(group.id)
        }
        // Another run created it between the lookup and the create.
        Err(ClientError::Rejected { status: 409, .. }) => {
            let group = find_group(client, name)
                .await?
                .ok_or_else(|| LabError::NotFound(resource.clone()))?;
            stage.record(resource, ChangeKind::Reused);
            Ok(group.id)
        }
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn held_privileges(
    assignments: &[PrivilegeAssignment],
    principal: &str,
) -> BTreeSet<String> {
    assignments
        .iter()
        .filter(|a| a.principal == principal)
        .flat_map(|a| a.privileges.iter().cloned())
        .collect()
}

/// Grant the read-only privilege set on `catalog` to `group` and read it back.
pub async fn grant_catalog_read_only(
    client: &dyn ResourceClient,
    catalog: &str,
    group: &str,
    stage: &mut StageOutcome,
) -> Result<()> {
    let resource = format!("catalog grants {catalog} -> {group}");
    let held = held_privileges(&client.get_grants(SecurableType::Catalog, catalog).await?, group);
    if READ_ONLY_PRIVILEGES.iter().all(|p| held.contains(*p)) {
        stage.record(resource, ChangeKind::AlreadyPresent);
        return Ok(());
    }

    let change = PermissionsChange {
        principal: group.to_string(),
        add: READ_ONLY_PRIVILEGES.iter().map(|p| p.to_string()).collect(),
        remove: Vec::new(),
    };
    client
        .update_grants(SecurableType::Catalog, catalog, &[change])
        .await?;

    let after = held_privileges(&client.get_grants(SecurableType::Catalog, catalog).await?, group);
    let missing: Vec<&str> = READ_ONLY_PRIVILEGES
        .iter()
        .copied()
        .filter(|p| !after.contains(*p))
        .collect();
    if !missing.is_empty() {
        return Err(LabError::Verification(format!(
            "{group} is missing {} on {catalog}",
            missing.join(", ")
        )));
    }

    info!(catalog, group, "granted read-only catalog access");
    lab_success!("Granted {} on {catalog} to {group}", READ_ONLY_PRIVILEGES.join(", "));
    stage.record_detail(resource, ChangeKind::Updated, READ_ONLY_PRIVILEGES.join(", "));
    Ok(())
}

fn find_entry<'a>(
    acl: &'a [AccessControlEntry],
    principal: &Principal,
) -> Option<&'a AccessControlEntry> {
    acl.iter().find(|e| e.principal().as_ref() == Some(principal))
}

/// Give `group` attach-only rights on the cluster without touching other entries.
pub async fn grant_cluster_attach(
    client: &dyn ResourceClient,
    cluster_id: &str,
    group: &str,
    stage: &mut StageOutcome,
) -> Result<()> {
    let resource = format!("cluster ACL {cluster_id} -> {group}");
    let principal = Principal::Group(group.to_string());

    let before = client.get_cluster_permissions(cluster_id).await?;
    if find_entry(&before, &principal).is_some_and(|e| e.has_level(PermissionLevel::CanAttachTo)) {
        stage.record(resource, ChangeKind::AlreadyPresent);
        return Ok(());
    }

    client
        .update_cluster_permissions(
            cluster_id,
            &[AccessControlRequest::group(group, PermissionLevel::CanAttachTo)],
        )
        .await?;

    let after = client.get_cluster_permissions(cluster_id).await?;
    if !find_entry(&after, &principal).is_some_and(|e| e.has_level(PermissionLevel::CanAttachTo)) {
        return Err(LabError::Verification(format!(
            "{group} has no CAN_ATTACH_TO entry on cluster {cluster_id}"
        )));
    }

    for entry in &before {
        let Some(other) = entry.principal() else {
            continue;
        };
        if other == principal {
            continue;
        }
        let preserved = find_entry(&after, &other).is_some_and(|now| {
            entry
                .all_permissions
                .iter()
                .all(|p| now.has_level(p.permission_level))
        });
        if !preserved {
            return Err(LabError::Verification(format!(
                "ACL entry for {other} on cluster {cluster_id} changed"
            )));
        }
    }

    info!(cluster_id, group, "granted CAN_ATTACH_TO");
    lab_success!("Granted CAN_ATTACH_TO on cluster {cluster_id} to {group}");
    stage.record(resource, ChangeKind::Updated);
    Ok(())
}

/// The lockdown steps in order, stopping at the first failure.
///
/// Without a cluster every step but the attach grant still runs, and the
/// attach grant fails. Returns the workshop group id.
pub async fn run_lockdown(
    client: &dyn ResourceClient,
    access: &AccessSettings,
    catalog: &str,
    cluster_id: Option<&str>,
    stage: &mut StageOutcome,
) -> Result<String> {
    lockdown_entitlements(client, &access.population_group, stage).await?;
    lockdown_personal_compute_policy(client, &access.population_group, stage).await?;
    let group_id = get_or_create_group(client, &access.group_name, stage).await?;
    grant_catalog_read_only(client, catalog, &access.group_name, stage).await?;
    let cluster_id = cluster_id
        .ok_or_else(|| LabError::NotFound("shared cluster for the attach grant".to_string()))?;
    grant_cluster_attach(client, cluster_id, &access.group_name, stage).await?;
    Ok(group_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_provider::mock::MockWorkspace;
    use lab_provider::models::ClusterState;

    use crate::report::StageName;

    #[tokio::test]
    async fn lockdown_removes_only_present_entitlements() {
        let mock = MockWorkspace::new();
        mock.add_group("users", &["allow-cluster-create", "workspace-access"]);
        let mut stage = StageOutcome::new(StageName::Lockdown);

        lockdown_entitlements(&mock, "users", &mut stage).await.unwrap();

        let users = mock.group_by_name("users").unwrap();
        assert_eq!(
            users.entitlement_values(),
            BTreeSet::from(["workspace-access".to_string()])
        );
        assert_eq!(stage.count(ChangeKind::Removed), 1);
        assert_eq!(stage.count(ChangeKind::AlreadyAbsent), 1);
    }

    #[tokio::test]
    async fn existing_attach_entry_is_not_patched() {
        let mock = MockWorkspace::new();
        mock.add_group("workshop", &[]);
        let cluster_id = mock.add_cluster("shared", ClusterState::Running);
        mock.add_cluster_acl(
            &cluster_id,
            AccessControlRequest::group("workshop", PermissionLevel::CanAttachTo),
        );
        let mut stage = StageOutcome::new(StageName::Lockdown);

        grant_cluster_attach(&mock, &cluster_id, "workshop", &mut stage)
            .await
            .unwrap();

        assert!(mock.journal().is_empty());
        assert_eq!(stage.count(ChangeKind::AlreadyPresent), 1);
    }

    #[tokio::test]
    async fn grant_to_unknown_group_is_rejected() {
        let mock = MockWorkspace::new();
        mock.add_catalog("lab");
        let mut stage = StageOutcome::new(StageName::Lockdown);

        let err = grant_catalog_read_only(&mock, "lab", "nobody", &mut stage)
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::Rejected(_)));
    }

    async fn seeded_policy(mock: &MockWorkspace) -> String {
        let id = mock.add_cluster_policy("Personal Compute", Some(PERSONAL_COMPUTE_FAMILY));
        let mut policy = mock.cluster_policy(&id).unwrap();
        policy.policy_family_definition_overrides =
            Some(r#"{"autotermination_minutes":{"type":"fixed","value":60}}"#.to_string());
        mock.edit_cluster_policy(&policy).await.unwrap();
        let entry = AccessControlRequest::group("users", PermissionLevel::CanUse);
        mock.add_cluster_policy_acl(&id, entry);
        let entry = AccessControlRequest::group("admins", PermissionLevel::CanUse);
        mock.add_cluster_policy_acl(&id, entry);
        mock.clear_journal();
        id
    }

    fn policy_overrides(mock: &MockWorkspace, id: &str) -> Map<String, Value> {
        overrides_of(&mock.cluster_policy(id).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn policy_lockdown_keeps_other_overrides_and_users() {
        let mock = MockWorkspace::new();
        let id = seeded_policy(&mock).await;
        let mut stage = StageOutcome::new(StageName::Lockdown);

        lockdown_personal_compute_policy(&mock, "users", &mut stage)
            .await
            .unwrap();

        let overrides = policy_overrides(&mock, &id);
        assert!(is_locked(&overrides));
        assert!(overrides.contains_key("autotermination_minutes"));
        let acl = mock.cluster_policy_acl(&id);
        assert!(find_entry(&acl, &Principal::Group("users".into())).is_none());
        assert!(find_entry(&acl, &Principal::Group("admins".into())).is_some());
        assert_eq!(stage.count(ChangeKind::Updated), 1);
        assert_eq!(stage.count(ChangeKind::Removed), 1);

        // A second pass has nothing left to do.
        mock.clear_journal();
        let mut again = StageOutcome::new(StageName::Lockdown);
        lockdown_personal_compute_policy(&mock, "users", &mut again)
            .await
            .unwrap();
        assert!(mock.journal().is_empty());
        assert!(again.changes.iter().all(|c| c.kind.is_noop()));
    }

    #[tokio::test]
    async fn policy_restore_undoes_the_lockdown() {
        let mock = MockWorkspace::new();
        let id = seeded_policy(&mock).await;
        let mut stage = StageOutcome::new(StageName::Lockdown);
        lockdown_personal_compute_policy(&mock, "users", &mut stage)
            .await
            .unwrap();

        let mut restore = StageOutcome::new(StageName::RestorePolicy);
        restore_personal_compute_policy(&mock, "users", &mut restore)
            .await
            .unwrap();

        let overrides = policy_overrides(&mock, &id);
        assert!(!overrides.contains_key(LOCKED_OVERRIDE_KEY));
        assert!(overrides.contains_key("autotermination_minutes"));
        let acl = mock.cluster_policy_acl(&id);
        let users = find_entry(&acl, &Principal::Group("users".into())).unwrap();
        assert!(users.has_level(PermissionLevel::CanUse));
        assert_eq!(restore.count(ChangeKind::Removed), 1);
        assert_eq!(restore.count(ChangeKind::Created), 1);
    }

    #[tokio::test]
    async fn missing_policy_is_not_an_error() {
        let mock = MockWorkspace::new();
        let mut stage = StageOutcome::new(StageName::Lockdown);

        lockdown_personal_compute_policy(&mock, "users", &mut stage)
            .await
            .unwrap();
        restore_personal_compute_policy(&mock, "users", &mut stage)
            .await
            .unwrap();

        assert_eq!(stage.count(ChangeKind::AlreadyAbsent), 2);
        assert!(mock.journal().is_empty());
    }
}
