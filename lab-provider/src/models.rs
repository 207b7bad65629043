//! Wire models for the control-plane REST surface.
//!
//! Field names follow the platform's JSON. Enums carry an `Unknown` catch-all
//! so a new server-side state never breaks decoding.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Compute
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    Pending,
    Running,
    Restarting,
    Resizing,
    Terminating,
    Terminated,
    Error,
    #[serde(other)]
    Unknown,
}

impl ClusterState {
    /// States from which the cluster will reach RUNNING on its own.
    pub fn is_starting(self) -> bool {
        matches!(
            self,
            ClusterState::Pending | ClusterState::Restarting | ClusterState::Resizing
        )
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterState::Pending => "PENDING",
            ClusterState::Running => "RUNNING",
            ClusterState::Restarting => "RESTARTING",
            ClusterState::Resizing => "RESIZING",
            ClusterState::Terminating => "TERMINATING",
            ClusterState::Terminated => "TERMINATED",
            ClusterState::Error => "ERROR",
            ClusterState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsAttributes {
    pub availability: String,
    pub first_on_demand: u32,
    pub ebs_volume_type: String,
    pub ebs_volume_count: u32,
    pub ebs_volume_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_profile_arn: Option<String>,
}

impl AwsAttributes {
    /// On-demand nodes with one 100 GB general purpose SSD.
    pub fn on_demand(instance_profile_arn: Option<String>) -> Self {
        Self {
            availability: "ON_DEMAND".to_string(),
            first_on_demand: 1,
            ebs_volume_type: "GENERAL_PURPOSE_SSD".to_string(),
            ebs_volume_count: 1,
            ebs_volume_size: 100,
            instance_profile_arn,
        }
    }
}

/// Request body for cluster creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub cluster_name: String,
    pub spark_version: String,
    pub node_type_id: String,
    pub driver_node_type_id: String,
    pub num_workers: u32,
    pub autotermination_minutes: u32,
    pub data_security_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_user_name: Option<String>,
    pub runtime_engine: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spark_conf: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_attributes: Option<AwsAttributes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_id: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default = "unknown_cluster_state")]
    pub state: ClusterState,
    #[serde(default)]
    pub state_message: Option<String>,
    #[serde(default)]
    pub single_user_name: Option<String>,
}

fn unknown_cluster_state() -> ClusterState {
    ClusterState::Unknown
}

// ---------------------------------------------------------------------------
// Libraries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Library {
    Maven { coordinates: String },
    Pypi { package: String },
}

impl Library {
    pub fn maven(coordinates: impl Into<String>) -> Self {
        Library::Maven {
            coordinates: coordinates.into(),
        }
    }

    pub fn pypi(package: impl Into<String>) -> Self {
        Library::Pypi {
            package: package.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Library::Maven { coordinates } => coordinates,
            Library::Pypi { package } => package,
        }
    }
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Library::Maven { coordinates } => write!(f, "maven:{coordinates}"),
            Library::Pypi { package } => write!(f, "pypi:{package}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LibraryInstallStatus {
    Pending,
    Resolving,
    Installing,
    Installed,
    Failed,
    Skipped,
    UninstallOnRestart,
    #[serde(other)]
    Unknown,
}

impl LibraryInstallStatus {
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            LibraryInstallStatus::Pending
                | LibraryInstallStatus::Resolving
                | LibraryInstallStatus::Installing
        )
    }

    /// Statuses that call for a (re)install request.
    pub fn needs_install(self) -> bool {
        matches!(
            self,
            LibraryInstallStatus::Skipped
                | LibraryInstallStatus::UninstallOnRestart
                | LibraryInstallStatus::Unknown
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStatus {
    pub library: Library,
    pub status: LibraryInstallStatus,
    #[serde(default)]
    pub messages: Vec<String>,
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_directory: bool,
    #[serde(default)]
    pub file_size: Option<u64>,
}

// ---------------------------------------------------------------------------
// Warehouses and statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarehouseState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Deleting,
    Deleted,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: String,
    pub name: String,
    #[serde(default = "unknown_warehouse_state")]
    pub state: WarehouseState,
}

fn unknown_warehouse_state() -> WarehouseState {
    WarehouseState::Unknown
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Closed,
}

impl StatementState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StatementState::Pending | StatementState::Running)
    }
}

impl fmt::Display for StatementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatementState::Pending => "PENDING",
            StatementState::Running => "RUNNING",
            StatementState::Succeeded => "SUCCEEDED",
            StatementState::Failed => "FAILED",
            StatementState::Canceled => "CANCELED",
            StatementState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementError {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementStatus {
    pub state: StatementState,
    #[serde(default)]
    pub error: Option<StatementError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultManifest {
    #[serde(default)]
    pub total_row_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultData {
    #[serde(default)]
    pub data_array: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementResponse {
    pub statement_id: String,
    pub status: StatementStatus,
    #[serde(default)]
    pub manifest: Option<ResultManifest>,
    #[serde(default)]
    pub result: Option<ResultData>,
}

impl StatementResponse {
    pub fn state(&self) -> StatementState {
        self.status.state
    }

    pub fn error_message(&self) -> String {
        self.status
            .error
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| format!("statement ended in state {}", self.status.state))
    }

    /// First column of the first row, as returned in `JSON_ARRAY` format.
    pub fn first_value(&self) -> Option<&str> {
        self.result
            .as_ref()?
            .data_array
            .first()?
            .first()?
            .as_deref()
    }
}

// ---------------------------------------------------------------------------
// Identity (SCIM)
// ---------------------------------------------------------------------------

pub const SCIM_GROUP_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:Group";
pub const SCIM_USER_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:User";
pub const SCIM_PATCH_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexValue {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl ComplexValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            display: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub entitlements: Vec<ComplexValue>,
    #[serde(default)]
    pub members: Vec<ComplexValue>,
}

impl Group {
    pub fn entitlement_values(&self) -> BTreeSet<String> {
        self.entitlements.iter().map(|e| e.value.clone()).collect()
    }

    pub fn has_member(&self, principal_id: &str) -> bool {
        self.members.iter().any(|m| m.value == principal_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub user_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl PatchOperation {
    pub fn add_entitlement(entitlement: &str) -> Self {
        Self {
            op: PatchOp::Add,
            path: Some("entitlements".to_string()),
            value: Some(serde_json::json!([{ "value": entitlement }])),
        }
    }

    /// Targeted removal; removing an absent entitlement is a no-op server-side.
    pub fn remove_entitlement(entitlement: &str) -> Self {
        Self {
            op: PatchOp::Remove,
            path: Some(format!("entitlements[value eq \"{entitlement}\"]")),
            value: None,
        }
    }

    pub fn add_members<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let members: Vec<serde_json::Value> = ids
            .into_iter()
            .map(|id| serde_json::json!({ "value": id }))
            .collect();
        Self {
            op: PatchOp::Add,
            path: Some("members".to_string()),
            value: Some(serde_json::Value::Array(members)),
        }
    }

    pub fn remove_member(id: &str) -> Self {
        Self {
            op: PatchOp::Remove,
            path: Some(format!("members[value eq \"{id}\"]")),
            value: None,
        }
    }

    /// The quoted value of a `attr[value eq "x"]` filter path.
    pub fn filter_value(&self) -> Option<&str> {
        let path = self.path.as_deref()?;
        let start = path.find('"')? + 1;
        let end = path[start..].find('"')? + start;
        Some(&path[start..end])
    }
}

// ---------------------------------------------------------------------------
// Unity Catalog grants and objects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurableType {
    Catalog,
    Schema,
    Volume,
}

impl SecurableType {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurableType::Catalog => "catalog",
            SecurableType::Schema => "schema",
            SecurableType::Volume => "volume",
        }
    }
}

/// Additive/subtractive delta for one principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionsChange {
    pub principal: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeAssignment {
    pub principal: String,
    #[serde(default)]
    pub privileges: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub full_name: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub full_name: String,
    #[serde(default)]
    pub name: String,
}

// ---------------------------------------------------------------------------
// Cluster ACLs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionLevel {
    CanManage,
    CanRestart,
    CanAttachTo,
    CanUse,
    IsOwner,
    #[serde(other)]
    Unknown,
}

/// A principal in an access control list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Principal {
    User(String),
    Group(String),
    ServicePrincipal(String),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::User(name) => write!(f, "user:{name}"),
            Principal::Group(name) => write!(f, "group:{name}"),
            Principal::ServicePrincipal(name) => write!(f, "service-principal:{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_principal_name: Option<String>,
    pub permission_level: PermissionLevel,
}

impl AccessControlRequest {
    pub fn group(name: impl Into<String>, level: PermissionLevel) -> Self {
        Self {
            user_name: None,
            group_name: Some(name.into()),
            service_principal_name: None,
            permission_level: level,
        }
    }

    pub fn user(name: impl Into<String>, level: PermissionLevel) -> Self {
        Self {
            user_name: Some(name.into()),
            group_name: None,
            service_principal_name: None,
            permission_level: level,
        }
    }

    pub fn principal(&self) -> Option<Principal> {
        principal_of(
            &self.user_name,
            &self.group_name,
            &self.service_principal_name,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub permission_level: PermissionLevel,
    #[serde(default)]
    pub inherited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_principal_name: Option<String>,
    #[serde(default)]
    pub all_permissions: Vec<Permission>,
}

impl AccessControlEntry {
    pub fn principal(&self) -> Option<Principal> {
        principal_of(
            &self.user_name,
            &self.group_name,
            &self.service_principal_name,
        )
    }

    pub fn has_level(&self, level: PermissionLevel) -> bool {
        self.all_permissions
            .iter()
            .any(|p| p.permission_level == level)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPermissions {
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub access_control_list: Vec<AccessControlEntry>,
}

// ---------------------------------------------------------------------------
// Cluster policies
// ---------------------------------------------------------------------------

/// A cluster policy. Family-based policies carry overrides instead of a definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPolicy {
    pub policy_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_family_id: Option<String>,
    /// JSON object text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_family_definition_overrides: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

impl ClusterPolicy {
    /// The edit call replaces the whole policy, so every field is resent.
    /// A family policy must not send a definition.
    pub fn edit_request(&self) -> ClusterPolicy {
        let mut request = self.clone();
        if request.policy_family_id.is_some() {
            request.definition = None;
        }
        request
    }
}

fn principal_of(
    user: &Option<String>,
    group: &Option<String>,
    service_principal: &Option<String>,
) -> Option<Principal> {
    if let Some(name) = user {
        return Some(Principal::User(name.clone()));
    }
    if let Some(name) = group {
        return Some(Principal::Group(name.clone()));
    }
    service_principal
        .as_ref()
        .map(|name| Principal::ServicePrincipal(name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn library_uses_platform_shape() {
        let json = serde_json::to_value(Library::maven("org.neo4j:connector:1.0")).unwrap();
        assert_eq!(json, serde_json::json!({ "maven": { "coordinates": "org.neo4j:connector:1.0" } }));

        let parsed: Library = serde_json::from_value(serde_json::json!({ "pypi": { "package": "neo4j==6.0.2" } })).unwrap();
        assert_eq!(parsed.name(), "neo4j==6.0.2");
    }

    #[test]
    fn unknown_states_decode() {
        let info: ClusterInfo = serde_json::from_value(serde_json::json!({
            "cluster_id": "0101-abc",
            "cluster_name": "Small Spark 4.0",
            "state": "SOMETHING_NEW"
        }))
        .unwrap();
        assert_eq!(info.state, ClusterState::Unknown);
    }

    #[test]
    fn statement_first_value() {
        let response: StatementResponse = serde_json::from_value(serde_json::json!({
            "statement_id": "01ef",
            "status": { "state": "SUCCEEDED" },
            "manifest": { "total_row_count": 1 },
            "result": { "data_array": [["345600"]] }
        }))
        .unwrap();
        assert_eq!(response.first_value(), Some("345600"));
        assert!(response.state().is_terminal());
    }

    #[test]
    fn patch_filter_value() {
        let op = PatchOperation::remove_entitlement("allow-cluster-create");
        assert_eq!(op.path.as_deref(), Some("entitlements[value eq \"allow-cluster-create\"]"));
        assert_eq!(op.filter_value(), Some("allow-cluster-create"));
        assert_eq!(PatchOperation::add_members(["1"]).filter_value(), None);
    }

    #[test]
    fn acl_entry_principal() {
        let entry: AccessControlEntry = serde_json::from_value(serde_json::json!({
            "group_name": "admins",
            "all_permissions": [{ "permission_level": "CAN_MANAGE", "inherited": true }]
        }))
        .unwrap();
        assert_eq!(entry.principal(), Some(Principal::Group("admins".to_string())));
        assert!(entry.has_level(PermissionLevel::CanManage));
        assert!(!entry.has_level(PermissionLevel::CanAttachTo));
    }
}
