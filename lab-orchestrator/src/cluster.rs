//! Shared cluster lifecycle: find by name, start or create, wait until running.

use std::collections::BTreeMap;

use lab_config::{ClusterSettings, Timeouts};
use lab_core::{lab_println, lab_success, poll_until, LabError, PollPolicy, PollStatus, Result};
use lab_provider::models::{AwsAttributes, ClusterInfo, ClusterSpec, ClusterState};
use lab_provider::ResourceClient;
use tracing::{debug, info};

use crate::report::{ChangeKind, StageOutcome};

/// Find the cluster named in `settings`, starting or creating it as needed,
/// and wait until it is RUNNING. Never recreates an existing cluster.
pub async fn ensure_cluster(
    client: &dyn ResourceClient,
    settings: &ClusterSettings,
    timeouts: &Timeouts,
    owner: &str,
    stage: &mut StageOutcome,
) -> Result<String> {
    if let Some(arn) = settings.instance_profile_arn.as_deref() {
        if settings.cloud.is_aws() {
            ensure_instance_profile(client, arn, stage).await?;
        }
    }

    let policy = timeouts.cluster_policy();
    let resource = format!("cluster \"{}\"", settings.name);

    lab_println!("Looking for existing cluster \"{}\"...", settings.name);
    let cluster_id = match find_cluster(client, &settings.name).await? {
        Some(existing) => {
            lab_println!("  Found: {} (state: {})", existing.cluster_id, existing.state);
            match existing.state {
                ClusterState::Running => {
                    stage.record(&resource, ChangeKind::Reused);
                }
                ClusterState::Terminated => {
                    start_cluster(client, &existing.cluster_id).await?;
                    stage.record(&resource, ChangeKind::Started);
                }
                ClusterState::Terminating => {
                    lab_println!("  Waiting for termination to finish before restarting...");
                    let terminated = ClusterState::Terminated;
                    wait_for_state(client, &existing.cluster_id, terminated, policy).await?;
                    start_cluster(client, &existing.cluster_id).await?;
                    stage.record(&resource, ChangeKind::Started);
                }
                state if state.is_starting() => {
                    stage.record(&resource, ChangeKind::Reused);
                }
                state => {
                    let message = existing
                        .state_message
                        .unwrap_or_else(|| "no details".to_string());
                    return Err(LabError::Client(format!(
                        "Cluster {} is in state {state}: {message}",
                        existing.cluster_id
                    )));
                }
            }
            existing.cluster_id
        }
        None => {
            lab_println!("  Not found, creating new cluster...");
            let spec = build_cluster_spec(settings, &settings.name, owner);
            let cluster_id = client.create_cluster(&spec).await?;
            info!(cluster_id, name = %settings.name, "created cluster");
            lab_println!("  Created: {cluster_id}");
            stage.record(&resource, ChangeKind::Created);
            cluster_id
        }
    };

    wait_for_state(client, &cluster_id, ClusterState::Running, policy).await?;
    lab_success!("Cluster {cluster_id} is running");
    Ok(cluster_id)
}

pub async fn find_cluster(client: &dyn ResourceClient, name: &str) -> Result<Option<ClusterInfo>> {
    let clusters = client.list_clusters().await?;
    Ok(clusters.into_iter().find(|c| c.cluster_name == name))
}

/// Creation request for a dedicated (single-user) cluster owned by `owner`.
pub fn build_cluster_spec(settings: &ClusterSettings, name: &str, owner: &str) -> ClusterSpec {
    let node_type = settings.node_type();

    let mut spark_conf = BTreeMap::new();
    let mut custom_tags = BTreeMap::new();
    if settings.is_single_node() {
        spark_conf.insert(
            "spark.databricks.cluster.profile".to_string(),
            "singleNode".to_string(),
        );
        spark_conf.insert("spark.master".to_string(), "local[*]".to_string());
        custom_tags.insert("ResourceClass".to_string(), "SingleNode".to_string());
    }

    let aws_attributes = settings
        .cloud
        .is_aws()
        .then(|| AwsAttributes::on_demand(settings.instance_profile_arn.clone()));

    let runtime_engine = if settings.runtime_engine == "PHOTON" {
        "PHOTON"
    } else {
        "STANDARD"
    };

    ClusterSpec {
        cluster_name: name.to_string(),
        spark_version: settings.spark_version.clone(),
        node_type_id: node_type.clone(),
        driver_node_type_id: node_type,
        num_workers: settings.num_workers,
        autotermination_minutes: settings.autotermination_minutes,
        data_security_mode: "SINGLE_USER".to_string(),
        single_user_name: Some(owner.to_string()),
        runtime_engine: runtime_engine.to_string(),
        spark_conf,
        custom_tags,
        aws_attributes,
    }
}

async fn ensure_instance_profile(
    client: &dyn ResourceClient,
    arn: &str,
    stage: &mut StageOutcome,
) -> Result<()> {
    let registered = client.list_instance_profiles().await?;
    let resource = format!("instance profile {arn}");
    if registered.iter().any(|p| p == arn) {
        debug!(arn, "instance profile already registered");
        stage.record(resource, ChangeKind::AlreadyPresent);
        return Ok(());
    }

    lab_println!("  Registering instance profile: {arn}");
    client.add_instance_profile(arn).await?;
    stage.record(resource, ChangeKind::Created);
    Ok(())
}

async fn start_cluster(client: &dyn ResourceClient, cluster_id: &str) -> Result<()> {
    lab_println!("  Starting cluster {cluster_id}...");
    client.start_cluster(cluster_id).await?;
    Ok(())
}

/// Poll until the cluster reaches `target`. ERROR and UNKNOWN end the wait,
/// as does TERMINATED while waiting for RUNNING.
async fn wait_for_state(
    client: &dyn ResourceClient,
    cluster_id: &str,
    target: ClusterState,
    policy: PollPolicy,
) -> Result<ClusterInfo> {
    let operation = format!("cluster {cluster_id} to reach {target}");
    poll_until(policy, &operation, move || async move {
        let info = client.get_cluster(cluster_id).await?;
        debug!(cluster_id, state = %info.state, "cluster state");

        if info.state == target {
            return Ok(PollStatus::Done(info));
        }
        let fatal = match info.state {
            ClusterState::Error | ClusterState::Unknown => true,
            ClusterState::Terminated => target == ClusterState::Running,
            _ => false,
        };
        if fatal {
            let message = info.state_message.unwrap_or_else(|| "no details".to_string());
            return Err(LabError::Client(format!(
                "Cluster {cluster_id} entered {}: {message}",
                info.state
            )));
        }
        Ok(PollStatus::Waiting)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_config::CloudProvider;

    #[test]
    fn single_node_spec_on_aws() {
        let settings = ClusterSettings {
            instance_profile_arn: Some("arn:aws:iam::1:instance-profile/lab".to_string()),
            ..Default::default()
        };
        let spec = build_cluster_spec(&settings, "Small Spark 4.0", "admin@example.com");

        assert_eq!(spec.num_workers, 0);
        assert_eq!(spec.node_type_id, "m5.large");
        assert_eq!(spec.data_security_mode, "SINGLE_USER");
        assert_eq!(spec.single_user_name.as_deref(), Some("admin@example.com"));
        assert_eq!(spec.spark_conf["spark.databricks.cluster.profile"], "singleNode");
        assert_eq!(spec.custom_tags["ResourceClass"], "SingleNode");
        let aws = spec.aws_attributes.unwrap();
        assert_eq!(aws.ebs_volume_size, 100);
        assert!(aws.instance_profile_arn.is_some());
    }

    #[test]
    fn azure_spec_has_no_aws_attributes() {
        let settings = ClusterSettings {
            cloud: CloudProvider::Azure,
            num_workers: 2,
            runtime_engine: "PHOTON".to_string(),
            ..Default::default()
        };
        let spec = build_cluster_spec(&settings, "multi", "admin@example.com");

        assert!(spec.aws_attributes.is_none());
        assert!(spec.spark_conf.is_empty());
        assert_eq!(spec.node_type_id, "Standard_D4ds_v5");
        assert_eq!(spec.runtime_engine, "PHOTON");
    }
}
