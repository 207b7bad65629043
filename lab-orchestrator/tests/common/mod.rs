//! Shared fixture: a seeded in-memory workspace plus a matching configuration.

#![allow(dead_code)]

use std::fs;
use std::sync::Arc;

use lab_config::{LabConfig, Timeouts, VolumeTarget};
use lab_orchestrator::Orchestrator;
use lab_provider::mock::MockWorkspace;
use lab_provider::models::{AccessControlRequest, PermissionLevel, Principal, WarehouseState};
use lab_provider::ResourceClient;
use tempfile::TempDir;

pub const ADMIN: &str = "admin@example.com";
pub const CATALOG: &str = "workshop";
pub const VOLUME: &str = "workshop.data.raw";
pub const LAKEHOUSE: &str = "workshop.lakehouse";
pub const GROUP: &str = "aircraft_workshop_group";
pub const POPULATION: &str = "users";
pub const PERSONAL_COMPUTE: &str = "Personal Compute";

pub const DATA_FILES: [&str; 6] = [
    "nodes_aircraft.csv",
    "nodes_systems.csv",
    "nodes_sensors.csv",
    "nodes_readings.csv",
    "README_LARGE_DATASET.md",
    "MAINTENANCE.md",
];

pub const TABLE_ROWS: [(&str, u64); 4] = [
    ("aircraft", 20),
    ("systems", 80),
    ("sensors", 160),
    ("sensor_readings", 345_600),
];

pub struct Fixture {
    pub mock: Arc<MockWorkspace>,
    pub config: LabConfig,
    pub policy_id: String,
    _data_dir: TempDir,
}

impl Fixture {
    /// Pre-created empty catalog with its volume, a running warehouse, the
    /// default population holding both creation entitlements, and a Personal
    /// Compute policy usable by the population and the admin.
    pub fn new() -> Self {
        let mock = Arc::new(MockWorkspace::new());
        mock.set_current_user(ADMIN);
        mock.add_group(
            POPULATION,
            &[
                "workspace-access",
                "allow-cluster-create",
                "allow-instance-pool-create",
            ],
        );
        let policy_id = mock.add_cluster_policy(PERSONAL_COMPUTE, Some("personal-vm"));
        mock.add_cluster_policy_acl(
            &policy_id,
            AccessControlRequest::group(POPULATION, PermissionLevel::CanUse),
        );
        mock.add_cluster_policy_acl(
            &policy_id,
            AccessControlRequest::user(ADMIN, PermissionLevel::CanUse),
        );
        mock.add_volume(VOLUME);
        mock.add_warehouse("Starter Warehouse", WarehouseState::Running);
        for (table, rows) in TABLE_ROWS {
            mock.set_row_count(table, rows);
        }

        let data_dir = TempDir::new().unwrap();
        for name in DATA_FILES {
            fs::write(data_dir.path().join(name), "id,name\n1,a\n").unwrap();
        }

        let mut config = LabConfig::default().with_volume_target(Some(&VolumeTarget::parse(VOLUME).unwrap()));
        config.data.data_dir = data_dir.path().to_path_buf();
        config.timeouts = Timeouts {
            cluster_secs: 60,
            library_secs: 60,
            statement_secs: 60,
            poll_interval_secs: 1,
            statement_poll_interval_secs: 1,
        };

        Self {
            mock,
            config,
            policy_id,
            _data_dir: data_dir,
        }
    }

    /// Whether the Personal Compute policy currently forbids every node type.
    pub fn policy_locked(&self) -> bool {
        let policy = self.mock.cluster_policy(&self.policy_id).unwrap();
        let overrides: serde_json::Value =
            serde_json::from_str(policy.policy_family_definition_overrides.as_deref().unwrap_or("{}"))
                .unwrap();
        overrides["node_type_id"]["type"] == "forbidden"
    }

    /// Principals allowed to use the Personal Compute policy.
    pub fn policy_users(&self) -> Vec<Principal> {
        self.mock
            .cluster_policy_acl(&self.policy_id)
            .iter()
            .filter(|e| e.has_level(PermissionLevel::CanUse))
            .filter_map(|e| e.principal())
            .collect()
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let client: Arc<dyn ResourceClient> = self.mock.clone();
        Orchestrator::new(client, self.config.clone())
    }
}
