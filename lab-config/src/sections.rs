//! Typed sections of the run configuration.
//!
//! Each section carries its own defaults so a missing env file yields a
//! usable configuration.

use std::path::PathBuf;

use lab_core::PollPolicy;
use serde::{Deserialize, Serialize};

use crate::cloud::CloudProvider;

/// Shared compute cluster settings. The name is the identity used for reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSettings {
    #[serde(default = "default_cluster_name")]
    pub name: String,

    #[serde(default = "default_spark_version")]
    pub spark_version: String,

    /// Explicit machine type; when unset the cloud provider's default is used.
    #[serde(default)]
    pub node_type: Option<String>,

    /// Zero means a single-node cluster.
    #[serde(default)]
    pub num_workers: u32,

    #[serde(default = "default_autotermination_minutes")]
    pub autotermination_minutes: u32,

    #[serde(default = "default_runtime_engine")]
    pub runtime_engine: String,

    /// AWS instance profile attached to cluster nodes.
    #[serde(default)]
    pub instance_profile_arn: Option<String>,

    #[serde(default)]
    pub cloud: CloudProvider,
}

fn default_cluster_name() -> String {
    "Small Spark 4.0".to_string()
}

fn default_spark_version() -> String {
    // 17.3 LTS ML, Spark 4.0
    "17.3.x-cpu-ml-scala2.13".to_string()
}

fn default_autotermination_minutes() -> u32 {
    30
}

fn default_runtime_engine() -> String {
    "STANDARD".to_string()
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            spark_version: default_spark_version(),
            node_type: None,
            num_workers: 0,
            autotermination_minutes: default_autotermination_minutes(),
            runtime_engine: default_runtime_engine(),
            instance_profile_arn: None,
            cloud: CloudProvider::default(),
        }
    }
}

impl ClusterSettings {
    pub fn node_type(&self) -> String {
        self.node_type
            .clone()
            .unwrap_or_else(|| self.cloud.default_node_type().to_string())
    }

    pub fn is_single_node(&self) -> bool {
        self.num_workers == 0
    }
}

/// Libraries installed on the shared cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySettings {
    #[serde(default = "default_maven_coordinates")]
    pub maven: Vec<String>,

    #[serde(default = "default_pypi_packages")]
    pub pypi: Vec<String>,
}

fn default_maven_coordinates() -> Vec<String> {
    vec!["org.neo4j:neo4j-connector-apache-spark_2.13:5.3.10_for_spark_3".to_string()]
}

fn default_pypi_packages() -> Vec<String> {
    [
        "neo4j==6.0.2",
        "databricks-agents>=1.2.0",
        "langgraph==1.0.5",
        "langchain-openai==1.1.2",
        "pydantic==2.12.5",
        "langchain-core>=1.2.0",
        "databricks-langchain>=0.11.0",
        "dspy>=3.0.4",
        "neo4j-graphrag>=1.13.0",
        "beautifulsoup4>=4.12.0",
        "sentence_transformers",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            maven: default_maven_coordinates(),
            pypi: default_pypi_packages(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseSettings {
    #[serde(default = "default_warehouse_name")]
    pub name: String,
}

fn default_warehouse_name() -> String {
    "Starter Warehouse".to_string()
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            name: default_warehouse_name(),
        }
    }
}

/// Local reference dataset uploaded to the volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSettings {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// File names never uploaded even when they match the patterns.
    #[serde(default = "default_excluded_files")]
    pub excluded_files: Vec<String>,

    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("aircraft_digital_twin_data")
}

fn default_excluded_files() -> Vec<String> {
    vec![
        "README_LARGE_DATASET.md".to_string(),
        "ARCHITECTURE.md".to_string(),
    ]
}

fn default_patterns() -> Vec<String> {
    vec!["*.csv".to_string(), "*.md".to_string()]
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            excluded_files: default_excluded_files(),
            patterns: default_patterns(),
        }
    }
}

/// Bounds for every poll loop, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_timeout_secs")]
    pub cluster_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub library_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub statement_secs: u64,

    /// Interval for cluster and library polling.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_statement_poll_interval_secs")]
    pub statement_poll_interval_secs: u64,
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_statement_poll_interval_secs() -> u64 {
    5
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            cluster_secs: default_timeout_secs(),
            library_secs: default_timeout_secs(),
            statement_secs: default_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            statement_poll_interval_secs: default_statement_poll_interval_secs(),
        }
    }
}

impl Timeouts {
    pub fn cluster_policy(&self) -> PollPolicy {
        PollPolicy::from_secs(self.poll_interval_secs, self.cluster_secs)
    }

    pub fn library_policy(&self) -> PollPolicy {
        PollPolicy::from_secs(self.poll_interval_secs, self.library_secs)
    }

    pub fn statement_policy(&self) -> PollPolicy {
        PollPolicy::from_secs(self.statement_poll_interval_secs, self.statement_secs)
    }
}

/// Who gets locked down and who gets read-only access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessSettings {
    /// Restricted group holding workshop participants.
    #[serde(default = "default_group_name")]
    pub group_name: String,

    /// Built-in group containing every workspace user.
    #[serde(default = "default_population_group")]
    pub population_group: String,
}

fn default_group_name() -> String {
    "aircraft_workshop_group".to_string()
}

fn default_population_group() -> String {
    "users".to_string()
}

impl Default for AccessSettings {
    fn default() -> Self {
        Self {
            group_name: default_group_name(),
            population_group: default_population_group(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn explicit_node_type_wins() {
        let mut cluster = ClusterSettings {
            cloud: CloudProvider::Azure,
            ..Default::default()
        };
        assert_eq!(cluster.node_type(), "Standard_D4ds_v5");

        cluster.node_type = Some("i3.xlarge".to_string());
        assert_eq!(cluster.node_type(), "i3.xlarge");
    }

    #[test]
    fn defaults_describe_single_node_cluster() {
        let cluster = ClusterSettings::default();
        assert!(cluster.is_single_node());
        assert_eq!(cluster.autotermination_minutes, 30);
        assert_eq!(
            Timeouts::default().statement_policy(),
            PollPolicy::new(Duration::from_secs(5), Duration::from_secs(600))
        );
    }
}
