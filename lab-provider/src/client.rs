use async_trait::async_trait;

use crate::error::ClientResult;
use crate::models::{
    AccessControlEntry, AccessControlRequest, ClusterInfo, ClusterPolicy, ClusterSpec, FileEntry, Group, Library,
    LibraryStatus, PatchOperation, PermissionsChange, PrivilegeAssignment, SchemaInfo,
    SecurableType, StatementResponse, User, VolumeInfo, Warehouse,
};

/// Authenticated primitives against the platform's control plane.
///
/// Every method is a single atomic call. Retrying, polling and verification
/// live in the orchestrator; implementations only translate requests and map
/// a missing target to [`ClientError::NotFound`](crate::ClientError::NotFound).
#[async_trait]
pub trait ResourceClient: Send + Sync {
    // Compute

    async fn list_clusters(&self) -> ClientResult<Vec<ClusterInfo>>;

    async fn get_cluster(&self, cluster_id: &str) -> ClientResult<ClusterInfo>;

    /// Returns the new cluster's id. The cluster starts booting immediately.
    async fn create_cluster(&self, spec: &ClusterSpec) -> ClientResult<String>;

    /// Start a TERMINATED cluster. Rejected in any other state.
    async fn start_cluster(&self, cluster_id: &str) -> ClientResult<()>;

    async fn permanent_delete_cluster(&self, cluster_id: &str) -> ClientResult<()>;

    async fn list_instance_profiles(&self) -> ClientResult<Vec<String>>;

    async fn add_instance_profile(&self, instance_profile_arn: &str) -> ClientResult<()>;

    // Libraries

    async fn cluster_library_statuses(&self, cluster_id: &str) -> ClientResult<Vec<LibraryStatus>>;

    async fn install_libraries(&self, cluster_id: &str, libraries: &[Library]) -> ClientResult<()>;

    // Files

    /// Upload `contents` to a `/Volumes/...` path.
    async fn upload_file(&self, path: &str, contents: Vec<u8>, overwrite: bool)
        -> ClientResult<()>;

    async fn list_directory(&self, path: &str) -> ClientResult<Vec<FileEntry>>;

    // Warehouses and statements

    async fn list_warehouses(&self) -> ClientResult<Vec<Warehouse>>;

    async fn start_warehouse(&self, warehouse_id: &str) -> ClientResult<()>;

    /// Submit a statement without waiting; the response carries the handle.
    async fn execute_statement(
        &self,
        warehouse_id: &str,
        statement: &str,
    ) -> ClientResult<StatementResponse>;

    async fn get_statement(&self, statement_id: &str) -> ClientResult<StatementResponse>;

    async fn cancel_statement(&self, statement_id: &str) -> ClientResult<()>;

    // Identity

    async fn current_user(&self) -> ClientResult<User>;

    async fn find_users(&self, user_name: &str) -> ClientResult<Vec<User>>;

    async fn create_user(&self, user_name: &str) -> ClientResult<User>;

    async fn get_user(&self, user_id: &str) -> ClientResult<User>;

    async fn find_groups(&self, display_name: &str) -> ClientResult<Vec<Group>>;

    /// Full group record including entitlements and members.
    async fn get_group(&self, group_id: &str) -> ClientResult<Group>;

    async fn create_group(&self, display_name: &str) -> ClientResult<Group>;

    async fn delete_group(&self, group_id: &str) -> ClientResult<()>;

    async fn patch_group(&self, group_id: &str, operations: &[PatchOperation]) -> ClientResult<()>;

    // Catalog grants

    async fn get_grants(
        &self,
        securable: SecurableType,
        full_name: &str,
    ) -> ClientResult<Vec<PrivilegeAssignment>>;

    /// Apply deltas. Principals not named in `changes` are untouched.
    async fn update_grants(
        &self,
        securable: SecurableType,
        full_name: &str,
        changes: &[PermissionsChange],
    ) -> ClientResult<()>;

    // Cluster ACL

    async fn get_cluster_permissions(&self, cluster_id: &str)
        -> ClientResult<Vec<AccessControlEntry>>;

    /// PATCH semantics: entries are merged into the existing list.
    async fn update_cluster_permissions(
        &self,
        cluster_id: &str,
        entries: &[AccessControlRequest],
    ) -> ClientResult<()>;

    // Cluster policies

    async fn list_cluster_policies(&self) -> ClientResult<Vec<ClusterPolicy>>;

    async fn get_cluster_policy(&self, policy_id: &str) -> ClientResult<ClusterPolicy>;

    /// Replaces every field of the policy; send the full record back.
    async fn edit_cluster_policy(&self, policy: &ClusterPolicy) -> ClientResult<()>;

    async fn get_cluster_policy_permissions(
        &self,
        policy_id: &str,
    ) -> ClientResult<Vec<AccessControlEntry>>;

    /// PATCH semantics, as for clusters.
    async fn update_cluster_policy_permissions(
        &self,
        policy_id: &str,
        entries: &[AccessControlRequest],
    ) -> ClientResult<()>;

    /// PUT semantics: the direct entries become exactly `entries`.
    /// Inherited admin entries are not affected.
    async fn set_cluster_policy_permissions(
        &self,
        policy_id: &str,
        entries: &[AccessControlRequest],
    ) -> ClientResult<()>;

    // Catalog objects

    async fn get_volume(&self, full_name: &str) -> ClientResult<VolumeInfo>;

    async fn get_schema(&self, full_name: &str) -> ClientResult<SchemaInfo>;

    async fn delete_volume(&self, full_name: &str) -> ClientResult<()>;

    async fn delete_schema(&self, full_name: &str) -> ClientResult<()>;

    async fn delete_catalog(&self, name: &str, force: bool) -> ClientResult<()>;
}
