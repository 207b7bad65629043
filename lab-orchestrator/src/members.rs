//! Workshop group membership and personal clusters.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use lab_config::LabConfig;
use lab_core::{lab_println, lab_warning, LabError, Result};
use lab_provider::models::{ClusterState, Group, PatchOperation, User};
use lab_provider::ResourceClient;
use serde::Serialize;
use tracing::{debug, info};

use crate::cluster::build_cluster_spec;
use crate::lockdown::find_group;
use crate::report::{ChangeKind, StageOutcome};

/// Maximum members added per group patch.
pub const MEMBER_BATCH_SIZE: usize = 50;

/// Read participant emails from a CSV with an `email` column.
///
/// Emails are trimmed and lowercased; duplicates keep their first position.
pub fn read_roster(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| LabError::Config(format!("Cannot read {}: {e}", path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| LabError::Config(format!("Cannot read {}: {e}", path.display())))?;
    let column = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("email"))
        .ok_or_else(|| {
            LabError::Config(format!("{} has no 'email' column", path.display()))
        })?;

    let mut seen = HashSet::new();
    let mut emails = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| LabError::Config(format!("Malformed row in {}: {e}", path.display())))?;
        let Some(email) = record.get(column).map(|e| e.trim().to_lowercase()) else {
            continue;
        };
        if !email.is_empty() && seen.insert(email.clone()) {
            emails.push(email);
        }
    }
    Ok(emails)
}

/// `jane.doe@example.com` -> `lab-jane-doe`
pub fn personal_cluster_name(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    format!("lab-{}", local.replace('.', "-"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberRow {
    pub email: String,
    pub display_name: Option<String>,
    pub cluster_name: String,
    pub cluster_state: Option<ClusterState>,
}

async fn workshop_group(client: &dyn ResourceClient, name: &str) -> Result<Group> {
    let group = find_group(client, name).await?.ok_or_else(|| {
        LabError::NotFound(format!("group '{name}' (run `lab setup` first)"))
    })?;
    Ok(client.get_group(&group.id).await?)
}

async fn find_user(client: &dyn ResourceClient, email: &str) -> Result<Option<User>> {
    let users = client.find_users(email).await?;
    Ok(users
        .into_iter()
        .find(|u| u.user_name.eq_ignore_ascii_case(email)))
}

/// Add each email to the workshop group and give them a personal cluster.
///
/// Per-user failures are recorded and the batch continues.
pub async fn add_members(
    client: &dyn ResourceClient,
    config: &LabConfig,
    emails: &[String],
    stage: &mut StageOutcome,
) -> Result<()> {
    let group = workshop_group(client, &config.access.group_name).await?;
    lab_println!("Adding {} users to '{}'...", emails.len(), group.display_name);

    let mut ready = Vec::new();
    let mut to_add: Vec<(&str, String)> = Vec::new();
    for email in emails {
        let user = match find_user(client, email).await {
            Ok(Some(user)) => user,
            Ok(None) => match client.create_user(email).await {
                Ok(user) => {
                    info!(email, "created workspace user");
                    stage.record(format!("user {email}"), ChangeKind::Created);
                    user
                }
                Err(err) => {
                    lab_warning!("Could not create user {email}: {err}");
                    stage.record_detail(format!("user {email}"), ChangeKind::Failed, err.to_string());
                    continue;
                }
            },
            Err(err) => {
                stage.record_detail(format!("user {email}"), ChangeKind::Failed, err.to_string());
                continue;
            }
        };

        if group.has_member(&user.id) {
            stage.record(format!("member {email}"), ChangeKind::AlreadyPresent);
            ready.push(email.as_str());
        } else {
            to_add.push((email.as_str(), user.id));
        }
    }

    for batch in to_add.chunks(MEMBER_BATCH_SIZE) {
        let operation = PatchOperation::add_members(batch.iter().map(|(_, id)| id.as_str()));
        match client.patch_group(&group.id, &[operation]).await {
            Ok(()) => {
                debug!(count = batch.len(), "added member batch");
                for (email, _) in batch {
                    stage.record(format!("member {email}"), ChangeKind::Created);
                    ready.push(*email);
                }
            }
            Err(err) => {
                for (email, _) in batch {
                    stage.record_detail(format!("member {email}"), ChangeKind::Failed, err.to_string());
                }
            }
        }
    }

    let existing: HashSet<String> = client
        .list_clusters()
        .await?
        .into_iter()
        .map(|c| c.cluster_name)
        .collect();

    for email in ready {
        let name = personal_cluster_name(email);
        let resource = format!("cluster {name}");
        if existing.contains(&name) {
            stage.record(resource, ChangeKind::Reused);
            continue;
        }
        let spec = build_cluster_spec(&config.cluster, &name, email);
        match client.create_cluster(&spec).await {
            Ok(cluster_id) => {
                info!(cluster_id, name, owner = email, "created personal cluster");
                stage.record(resource, ChangeKind::Created);
            }
            Err(err) => {
                lab_warning!("Could not create {name}: {err}");
                stage.record_detail(resource, ChangeKind::Failed, err.to_string());
            }
        }
    }
    Ok(())
}

/// Remove each email from the workshop group and delete their personal cluster.
///
/// Unknown users and non-members are recorded as already absent.
pub async fn remove_members(
    client: &dyn ResourceClient,
    config: &LabConfig,
    emails: &[String],
    stage: &mut StageOutcome,
) -> Result<()> {
    let group = workshop_group(client, &config.access.group_name).await?;
    let clusters: HashMap<String, String> = client
        .list_clusters()
        .await?
        .into_iter()
        .map(|c| (c.cluster_name, c.cluster_id))
        .collect();

    for email in emails {
        let member = format!("member {email}");
        let user = match find_user(client, email).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                stage.record_detail(member, ChangeKind::AlreadyAbsent, "no such user");
                continue;
            }
            Err(err) => {
                stage.record_detail(member, ChangeKind::Failed, err.to_string());
                continue;
            }
        };

        if group.has_member(&user.id) {
            if let Err(err) = client
                .patch_group(&group.id, &[PatchOperation::remove_member(&user.id)])
                .await
            {
                stage.record_detail(member, ChangeKind::Failed, err.to_string());
                continue;
            }
            stage.record(member, ChangeKind::Removed);
        } else {
            stage.record_detail(member, ChangeKind::AlreadyAbsent, "not a member");
        }

        let name = personal_cluster_name(email);
        let resource = format!("cluster {name}");
        let Some(cluster_id) = clusters.get(&name) else {
            stage.record(resource, ChangeKind::AlreadyAbsent);
            continue;
        };
        match client.permanent_delete_cluster(cluster_id).await {
            Ok(()) => stage.record(resource, ChangeKind::Deleted),
            Err(err) if err.is_not_found() => stage.record(resource, ChangeKind::AlreadyAbsent),
            Err(err) => stage.record_detail(resource, ChangeKind::Failed, err.to_string()),
        }
    }
    Ok(())
}

/// Group members with their personal cluster state, sorted by email.
pub async fn list_members(client: &dyn ResourceClient, config: &LabConfig) -> Result<Vec<MemberRow>> {
    let group = workshop_group(client, &config.access.group_name).await?;
    let states: HashMap<String, ClusterState> = client
        .list_clusters()
        .await?
        .into_iter()
        .map(|c| (c.cluster_name, c.state))
        .collect();

    let mut rows = Vec::new();
    for member in &group.members {
        let user = match client.get_user(&member.value).await {
            Ok(user) => user,
            // Nested groups and service principals are not users.
            Err(err) if err.is_not_found() => continue,
            Err(err) => return Err(err.into()),
        };
        let cluster_name = personal_cluster_name(&user.user_name);
        rows.push(MemberRow {
            cluster_state: states.get(&cluster_name).copied(),
            email: user.user_name,
            display_name: user.display_name,
            cluster_name,
        });
    }
    rows.sort_by(|a, b| a.email.cmp(&b.email));
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn roster_is_normalised_and_deduplicated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.csv");
        fs::write(
            &path,
            "Name,Email\nJane, Jane.Doe@Example.com \nBob,bob@example.com\nJ,jane.doe@example.com\nX,\n",
        )
        .unwrap();

        let emails = read_roster(&path).unwrap();
        assert_eq!(emails, vec!["jane.doe@example.com", "bob@example.com"]);
    }

    #[test]
    fn roster_without_email_column_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.csv");
        fs::write(&path, "name\nJane\n").unwrap();

        assert!(matches!(read_roster(&path), Err(LabError::Config(_))));
    }

    #[test]
    fn cluster_name_uses_local_part() {
        assert_eq!(personal_cluster_name("jane.doe@example.com"), "lab-jane-doe");
        assert_eq!(personal_cluster_name("bob@example.com"), "lab-bob");
    }
}
