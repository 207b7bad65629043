//! Run configuration for the workshop lab tool.
//!
//! A [`LabConfig`] is an ordinary value: it is built once from a flat
//! key-value source (an env file overlaid with the process environment) and
//! then passed to every stage. Nothing here is global, so tests can build as
//! many independent configurations as they need.

pub mod cloud;
pub mod sections;
pub mod volume;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use lab_core::{LabError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use cloud::CloudProvider;
pub use sections::{
    AccessSettings, ClusterSettings, DataSettings, LibrarySettings, Timeouts, WarehouseSettings,
};
pub use volume::VolumeTarget;

/// Keys read from the env file and the process environment.
pub const CONFIG_KEYS: &[&str] = &[
    "CATALOG_NAME",
    "VOLUME_SCHEMA",
    "VOLUME_NAME",
    "LAKEHOUSE_SCHEMA",
    "CLUSTER_NAME",
    "SPARK_VERSION",
    "NODE_TYPE",
    "NUM_WORKERS",
    "AUTOTERMINATION_MINUTES",
    "RUNTIME_ENGINE",
    "INSTANCE_PROFILE_ARN",
    "CLOUD_PROVIDER",
    "WAREHOUSE_NAME",
    "WAREHOUSE_TIMEOUT",
    "CLUSTER_TIMEOUT",
    "LIBRARY_TIMEOUT",
    "POLL_INTERVAL",
    "STATEMENT_POLL_INTERVAL",
    "DATA_DIR",
    "USER_EMAIL",
    "DATABRICKS_PROFILE",
    "USERS_CSV",
    "WORKSHOP_GROUP",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabConfig {
    #[serde(default)]
    pub cluster: ClusterSettings,

    #[serde(default)]
    pub libraries: LibrarySettings,

    #[serde(default)]
    pub volume: VolumeTarget,

    #[serde(default)]
    pub warehouse: WarehouseSettings,

    #[serde(default)]
    pub data: DataSettings,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub access: AccessSettings,

    /// Owner of the shared cluster. Resolved from the control plane when unset.
    #[serde(default)]
    pub user_email: Option<String>,

    /// Named credential profile.
    #[serde(default)]
    pub profile: Option<String>,

    /// Participant roster for member management.
    #[serde(default)]
    pub users_csv: Option<PathBuf>,
}

impl LabConfig {
    /// Build a configuration from any key-value source, starting from defaults.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("CATALOG_NAME") {
            config.volume.catalog = v;
        }
        if let Some(v) = get("VOLUME_SCHEMA") {
            config.volume.schema = v;
        }
        if let Some(v) = get("VOLUME_NAME") {
            config.volume.volume = v;
        }
        if let Some(v) = get("LAKEHOUSE_SCHEMA") {
            config.volume.lakehouse_schema = v;
        }

        if let Some(v) = get("CLUSTER_NAME") {
            config.cluster.name = v;
        }
        if let Some(v) = get("SPARK_VERSION") {
            config.cluster.spark_version = v;
        }
        if let Some(v) = get("NODE_TYPE") {
            config.cluster.node_type = Some(v);
        }
        if let Some(v) = get("NUM_WORKERS") {
            config.cluster.num_workers = parse_number("NUM_WORKERS", &v)?;
        }
        if let Some(v) = get("AUTOTERMINATION_MINUTES") {
            config.cluster.autotermination_minutes = parse_number("AUTOTERMINATION_MINUTES", &v)?;
        }
        if let Some(v) = get("RUNTIME_ENGINE") {
            config.cluster.runtime_engine = v.to_ascii_uppercase();
        }
        if let Some(v) = get("INSTANCE_PROFILE_ARN") {
            config.cluster.instance_profile_arn = Some(v);
        }
        if let Some(v) = get("CLOUD_PROVIDER") {
            config.cluster.cloud = v.parse()?;
        }

        if let Some(v) = get("WAREHOUSE_NAME") {
            config.warehouse.name = v;
        }
        if let Some(v) = get("WAREHOUSE_TIMEOUT") {
            config.timeouts.statement_secs = parse_positive("WAREHOUSE_TIMEOUT", &v)?;
        }
        if let Some(v) = get("CLUSTER_TIMEOUT") {
            config.timeouts.cluster_secs = parse_positive("CLUSTER_TIMEOUT", &v)?;
        }
        if let Some(v) = get("LIBRARY_TIMEOUT") {
            config.timeouts.library_secs = parse_positive("LIBRARY_TIMEOUT", &v)?;
        }
        if let Some(v) = get("POLL_INTERVAL") {
            config.timeouts.poll_interval_secs = parse_positive("POLL_INTERVAL", &v)?;
        }
        if let Some(v) = get("STATEMENT_POLL_INTERVAL") {
            config.timeouts.statement_poll_interval_secs =
                parse_positive("STATEMENT_POLL_INTERVAL", &v)?;
        }

        if let Some(v) = get("DATA_DIR") {
            config.data.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("WORKSHOP_GROUP") {
            config.access.group_name = v;
        }

        config.user_email = get("USER_EMAIL");
        config.profile = get("DATABRICKS_PROFILE");
        config.users_csv = get("USERS_CSV").map(PathBuf::from);

        Ok(config)
    }

    /// Load from an optional env file, letting the process environment win.
    ///
    /// A missing file is not an error; the defaults apply.
    pub fn load(env_file: Option<&Path>) -> Result<Self> {
        let mut values = match env_file {
            Some(path) => read_env_file(path)?,
            None => HashMap::new(),
        };

        for key in CONFIG_KEYS {
            if let Ok(value) = std::env::var(key) {
                values.insert((*key).to_string(), value);
            }
        }

        Self::from_lookup(|key| values.get(key).cloned())
    }

    /// Override the volume target from a `catalog.schema.volume` argument.
    pub fn with_volume_target(mut self, target: Option<&VolumeTarget>) -> Self {
        if let Some(target) = target {
            self.volume = self.volume.with_volume(target);
        }
        self
    }

    /// Override the credential profile from the command line.
    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        if profile.is_some() {
            self.profile = profile;
        }
        self
    }
}

/// Read a flat `KEY=value` file. Returns an empty map if the file is absent.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        debug!(path = %path.display(), "env file not found, using defaults");
        return Ok(HashMap::new());
    }

    let iter = dotenvy::from_path_iter(path).map_err(|e| {
        LabError::Config(format!("Failed to read {}: {e}", path.display()))
    })?;

    let mut values = HashMap::new();
    for item in iter {
        let (key, value) = item.map_err(|e| {
            LabError::Config(format!("Invalid line in {}: {e}", path.display()))
        })?;
        values.insert(key, value);
    }
    debug!(path = %path.display(), keys = values.len(), "loaded env file");
    Ok(values)
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| LabError::Config(format!("{key} must be a whole number, got '{value}'")))
}

/// Timeouts and poll intervals are whole seconds, at least one.
fn parse_positive(key: &str, value: &str) -> Result<u64> {
    match parse_number(key, value)? {
        0 => Err(LabError::Config(format!("{key} must be greater than zero"))),
        n => Ok(n),
    }
}
