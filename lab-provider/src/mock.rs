//! In-memory control plane for tests.
//!
//! `MockWorkspace` models just enough of the platform for the orchestrator's
//! behavior to be observable: clusters boot after a number of status polls,
//! libraries and statements move through their lifecycles, grants and ACLs
//! are merged the way the real API merges them, and every mutating call is
//! appended to a journal.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::client::ResourceClient;
use crate::error::{ClientError, ClientResult};
use crate::models::{
    AccessControlEntry, AccessControlRequest, ClusterInfo, ClusterPolicy, ClusterSpec, ClusterState,
    ComplexValue, FileEntry, Group, Library, LibraryInstallStatus, LibraryStatus, PatchOp,
    PatchOperation, Permission, PermissionLevel, PermissionsChange, Principal, PrivilegeAssignment,
    ResultData, ResultManifest, SchemaInfo, SecurableType, StatementError, StatementResponse,
    StatementState, StatementStatus, User, VolumeInfo, Warehouse, WarehouseState,
};

/// A state-changing call observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateCluster(String),
    StartCluster(String),
    DeleteCluster(String),
    AddInstanceProfile(String),
    InstallLibraries { cluster_id: String, count: usize },
    UploadFile(String),
    StartWarehouse(String),
    ExecuteStatement(String),
    CancelStatement(String),
    CreateUser(String),
    CreateGroup(String),
    DeleteGroup(String),
    PatchGroup { group_id: String, operations: usize },
    UpdateGrants(String),
    UpdateClusterPermissions(String),
    EditClusterPolicy(String),
    UpdateClusterPolicyPermissions(String),
    DeleteVolume(String),
    DeleteSchema(String),
    DeleteCatalog(String),
}

impl Mutation {
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Mutation::CreateCluster(_) | Mutation::CreateGroup(_) | Mutation::CreateUser(_)
        )
    }

    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            Mutation::DeleteCluster(_)
                | Mutation::DeleteGroup(_)
                | Mutation::DeleteVolume(_)
                | Mutation::DeleteSchema(_)
                | Mutation::DeleteCatalog(_)
        )
    }
}

#[derive(Debug)]
struct MockCluster {
    info: ClusterInfo,
    polls_left: u32,
}

#[derive(Debug)]
struct MockLibrary {
    status: LibraryStatus,
    polls_left: u32,
}

#[derive(Debug)]
struct MockStatement {
    polls_left: u32,
    outcome: StatementState,
    error: Option<String>,
    value: Option<String>,
    state: StatementState,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    current_user: Option<User>,

    clusters: BTreeMap<String, MockCluster>,
    cluster_specs: HashMap<String, ClusterSpec>,
    cluster_acls: HashMap<String, Vec<AccessControlEntry>>,
    boot_polls: u32,
    clusters_stuck: bool,
    instance_profiles: Vec<String>,
    policies: BTreeMap<String, ClusterPolicy>,
    policy_acls: HashMap<String, Vec<AccessControlEntry>>,

    libraries: HashMap<String, Vec<MockLibrary>>,
    library_polls: u32,
    failing_libraries: HashSet<String>,
    stuck_libraries: HashSet<String>,

    files: BTreeMap<String, Vec<u8>>,

    warehouses: Vec<Warehouse>,
    statements: HashMap<String, MockStatement>,
    statement_polls: u32,
    stuck_sql: Vec<String>,
    failing_sql: Vec<String>,
    cancel_once_sql: Vec<String>,
    sql_log: Vec<String>,
    row_counts: HashMap<String, u64>,
    tables: BTreeSet<String>,

    users: Vec<User>,
    groups: BTreeMap<String, Group>,

    grants: BTreeMap<(SecurableType, String), BTreeMap<String, BTreeSet<String>>>,
    catalogs: BTreeSet<String>,
    schemas: BTreeSet<String>,
    volumes: BTreeSet<String>,

    journal: Vec<Mutation>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:04}", self.next_id)
    }

    fn principal_exists(&self, principal: &str) -> bool {
        self.groups.values().any(|g| g.display_name == principal)
            || self.users.iter().any(|u| u.user_name == principal)
    }
}

#[derive(Debug)]
pub struct MockWorkspace {
    state: Mutex<State>,
}

impl Default for MockWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWorkspace {
    /// Empty workspace. Clusters, libraries and statements need one poll to settle.
    pub fn new() -> Self {
        let state = State {
            boot_polls: 1,
            library_polls: 1,
            statement_polls: 1,
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- seeding -----------------------------------------------------------

    pub fn set_current_user(&self, user_name: &str) -> User {
        let user = self.add_user(user_name);
        self.state().current_user = Some(user.clone());
        user
    }

    pub fn add_user(&self, user_name: &str) -> User {
        let mut state = self.state();
        if let Some(existing) = state.users.iter().find(|u| u.user_name == user_name) {
            return existing.clone();
        }
        let user = User {
            id: state.next_id("user"),
            user_name: user_name.to_string(),
            display_name: None,
        };
        state.users.push(user.clone());
        user
    }

    pub fn add_group(&self, display_name: &str, entitlements: &[&str]) -> Group {
        let mut state = self.state();
        let group = Group {
            id: state.next_id("group"),
            display_name: display_name.to_string(),
            entitlements: entitlements.iter().map(|e| ComplexValue::new(*e)).collect(),
            members: Vec::new(),
        };
        state.groups.insert(group.id.clone(), group.clone());
        group
    }

    /// Seed a `catalog.schema.volume` with its parents.
    pub fn add_volume(&self, full_name: &str) {
        let mut state = self.state();
        let parts: Vec<&str> = full_name.split('.').collect();
        if let [catalog, schema, _] = parts.as_slice() {
            state.catalogs.insert(catalog.to_string());
            state.schemas.insert(format!("{catalog}.{schema}"));
        }
        state.volumes.insert(full_name.to_string());
    }

    pub fn add_catalog(&self, name: &str) {
        self.state().catalogs.insert(name.to_string());
    }

    pub fn add_warehouse(&self, name: &str, warehouse_state: WarehouseState) -> String {
        let mut state = self.state();
        let id = state.next_id("wh");
        state.warehouses.push(Warehouse {
            id: id.clone(),
            name: name.to_string(),
            state: warehouse_state,
        });
        id
    }

    pub fn add_cluster(&self, name: &str, cluster_state: ClusterState) -> String {
        let mut state = self.state();
        let id = state.next_id("cluster");
        let polls_left = state.boot_polls;
        state.clusters.insert(
            id.clone(),
            MockCluster {
                info: ClusterInfo {
                    cluster_id: id.clone(),
                    cluster_name: name.to_string(),
                    state: cluster_state,
                    state_message: None,
                    single_user_name: None,
                },
                polls_left,
            },
        );
        id
    }

    pub fn add_cluster_acl(&self, cluster_id: &str, entry: AccessControlRequest) {
        let mut state = self.state();
        let acl = state.cluster_acls.entry(cluster_id.to_string()).or_default();
        merge_acl(acl, &entry);
    }

    /// Seed a policy; `family` makes it a family-based policy with empty overrides.
    pub fn add_cluster_policy(&self, name: &str, family: Option<&str>) -> String {
        let mut state = self.state();
        let id = state.next_id("policy");
        state.policies.insert(
            id.clone(),
            ClusterPolicy {
                policy_id: id.clone(),
                name: name.to_string(),
                description: Some(format!("{name} policy")),
                policy_family_id: family.map(str::to_string),
                policy_family_definition_overrides: family.map(|_| "{}".to_string()),
                definition: None,
            },
        );
        id
    }

    pub fn add_cluster_policy_acl(&self, policy_id: &str, entry: AccessControlRequest) {
        let mut state = self.state();
        let acl = state.policy_acls.entry(policy_id.to_string()).or_default();
        merge_acl(acl, &entry);
    }

    pub fn seed_grant(
        &self,
        securable: SecurableType,
        full_name: &str,
        principal: &str,
        privileges: &[&str],
    ) {
        let mut state = self.state();
        let set = state
            .grants
            .entry((securable, full_name.to_string()))
            .or_default()
            .entry(principal.to_string())
            .or_default();
        set.extend(privileges.iter().map(|p| p.to_string()));
    }

    pub fn set_row_count(&self, table: &str, rows: u64) {
        self.state().row_counts.insert(table.to_string(), rows);
    }

    // -- scripting ---------------------------------------------------------

    /// Number of status polls a starting cluster needs before it reports RUNNING.
    pub fn set_boot_polls(&self, polls: u32) {
        self.state().boot_polls = polls;
    }

    /// Starting clusters never reach RUNNING.
    pub fn stall_clusters(&self) {
        self.state().clusters_stuck = true;
    }

    pub fn set_library_polls(&self, polls: u32) {
        self.state().library_polls = polls;
    }

    pub fn fail_library(&self, name: &str) {
        self.state().failing_libraries.insert(name.to_string());
    }

    pub fn stall_library(&self, name: &str) {
        self.state().stuck_libraries.insert(name.to_string());
    }

    pub fn set_statement_polls(&self, polls: u32) {
        self.state().statement_polls = polls;
    }

    /// Statements whose SQL contains `needle` stay RUNNING forever.
    pub fn stall_statements_containing(&self, needle: &str) {
        self.state().stuck_sql.push(needle.to_string());
    }

    pub fn fail_statements_containing(&self, needle: &str) {
        self.state().failing_sql.push(needle.to_string());
    }

    /// The first statement containing `needle` ends CANCELED; later ones succeed.
    pub fn cancel_once_containing(&self, needle: &str) {
        self.state().cancel_once_sql.push(needle.to_string());
    }

    // -- inspection --------------------------------------------------------

    pub fn journal(&self) -> Vec<Mutation> {
        self.state().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state().journal.clear();
    }

    pub fn sql_log(&self) -> Vec<String> {
        self.state().sql_log.clone()
    }

    pub fn cluster_by_name(&self, name: &str) -> Option<ClusterInfo> {
        self.state()
            .clusters
            .values()
            .find(|c| c.info.cluster_name == name)
            .map(|c| c.info.clone())
    }

    pub fn cluster_spec(&self, cluster_id: &str) -> Option<ClusterSpec> {
        self.state().cluster_specs.get(cluster_id).cloned()
    }

    pub fn set_cluster_state(&self, cluster_id: &str, cluster_state: ClusterState) {
        if let Some(cluster) = self.state().clusters.get_mut(cluster_id) {
            cluster.info.state = cluster_state;
        }
    }

    pub fn cluster_acl(&self, cluster_id: &str) -> Vec<AccessControlEntry> {
        self.state()
            .cluster_acls
            .get(cluster_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn cluster_policy(&self, policy_id: &str) -> Option<ClusterPolicy> {
        self.state().policies.get(policy_id).cloned()
    }

    pub fn cluster_policy_acl(&self, policy_id: &str) -> Vec<AccessControlEntry> {
        self.state()
            .policy_acls
            .get(policy_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn library_statuses(&self, cluster_id: &str) -> Vec<LibraryStatus> {
        self.state()
            .libraries
            .get(cluster_id)
            .map(|libs| libs.iter().map(|l| l.status.clone()).collect())
            .unwrap_or_default()
    }

    pub fn group_by_name(&self, name: &str) -> Option<Group> {
        self.state()
            .groups
            .values()
            .find(|g| g.display_name == name)
            .cloned()
    }

    pub fn user_by_name(&self, user_name: &str) -> Option<User> {
        self.state()
            .users
            .iter()
            .find(|u| u.user_name == user_name)
            .cloned()
    }

    /// Principal -> privileges currently granted on the securable.
    pub fn grants(
        &self,
        securable: SecurableType,
        full_name: &str,
    ) -> BTreeMap<String, BTreeSet<String>> {
        self.state()
            .grants
            .get(&(securable, full_name.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn files(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }

    pub fn tables(&self) -> BTreeSet<String> {
        self.state().tables.clone()
    }

    pub fn has_schema(&self, full_name: &str) -> bool {
        self.state().schemas.contains(full_name)
    }

    pub fn has_volume(&self, full_name: &str) -> bool {
        self.state().volumes.contains(full_name)
    }

    pub fn has_catalog(&self, name: &str) -> bool {
        self.state().catalogs.contains(name)
    }

    pub fn canceled_statements(&self) -> usize {
        self.state()
            .journal
            .iter()
            .filter(|m| matches!(m, Mutation::CancelStatement(_)))
            .count()
    }
}

fn merge_acl(acl: &mut Vec<AccessControlEntry>, request: &AccessControlRequest) {
    let principal = request.principal();
    let permission = Permission {
        permission_level: request.permission_level,
        inherited: false,
    };

    if let Some(entry) = acl.iter_mut().find(|e| e.principal() == principal) {
        if !entry.has_level(request.permission_level) {
            entry.all_permissions.push(permission);
        }
        return;
    }

    acl.push(AccessControlEntry {
        user_name: request.user_name.clone(),
        group_name: request.group_name.clone(),
        service_principal_name: request.service_principal_name.clone(),
        all_permissions: vec![permission],
    });
}

/// Identifiers written between backticks, in order.
fn backticked(sql: &str) -> Vec<String> {
    sql.split('`')
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, s)| s.to_string())
        .collect()
}

/// `/Volumes/c/s/v/...` -> `c.s.v`
fn volume_of(path: &str) -> Option<String> {
    let mut parts = path.trim_start_matches('/').split('/');
    if parts.next()? != "Volumes" {
        return None;
    }
    let catalog = parts.next()?;
    let schema = parts.next()?;
    let volume = parts.next()?;
    Some(format!("{catalog}.{schema}.{volume}"))
}

impl State {
    /// Apply the side effects of a statement that finished successfully.
    fn apply_sql(&mut self, sql: &str) -> Result<Option<String>, String> {
        let upper = sql.trim_start().to_ascii_uppercase();
        let idents = backticked(sql);

        if upper.starts_with("CREATE SCHEMA") {
            if let [catalog, schema, ..] = idents.as_slice() {
                if !self.catalogs.contains(catalog) {
                    return Err(format!("[NO_SUCH_CATALOG_EXCEPTION] Catalog '{catalog}' not found"));
                }
                self.schemas.insert(format!("{catalog}.{schema}"));
            }
            return Ok(None);
        }

        if upper.starts_with("CREATE OR REPLACE TABLE") || upper.starts_with("CREATE TABLE") {
            if let [catalog, schema, table, ..] = idents.as_slice() {
                if !self.schemas.contains(&format!("{catalog}.{schema}")) {
                    return Err(format!("[SCHEMA_NOT_FOUND] `{catalog}`.`{schema}`"));
                }
                self.tables.insert(format!("{catalog}.{schema}.{table}"));
            }
            return Ok(None);
        }

        if upper.starts_with("SELECT COUNT(*)") {
            if let [catalog, schema, table, ..] = idents.as_slice() {
                let full = format!("{catalog}.{schema}.{table}");
                if !self.tables.contains(&full) {
                    return Err(format!("[TABLE_OR_VIEW_NOT_FOUND] {full}"));
                }
                let rows = self.row_counts.get(table).copied().unwrap_or(0);
                return Ok(Some(rows.to_string()));
            }
            return Ok(Some("0".to_string()));
        }

        if upper.starts_with("DROP SCHEMA") {
            if let [catalog, schema, ..] = idents.as_slice() {
                let full = format!("{catalog}.{schema}");
                let prefix = format!("{full}.");
                self.tables.retain(|t| !t.starts_with(&prefix));
                self.schemas.remove(&full);
            }
            return Ok(None);
        }

        Ok(None)
    }
}

#[async_trait]
impl ResourceClient for MockWorkspace {
    async fn list_clusters(&self) -> ClientResult<Vec<ClusterInfo>> {
        Ok(self.state().clusters.values().map(|c| c.info.clone()).collect())
    }

    async fn get_cluster(&self, cluster_id: &str) -> ClientResult<ClusterInfo> {
        let mut state = self.state();
        let stuck = state.clusters_stuck;
        let cluster = state
            .clusters
            .get_mut(cluster_id)
            .ok_or_else(|| ClientError::not_found(format!("cluster {cluster_id}")))?;

        match cluster.info.state {
            ClusterState::Pending | ClusterState::Restarting if !stuck => {
                cluster.polls_left = cluster.polls_left.saturating_sub(1);
                if cluster.polls_left == 0 {
                    cluster.info.state = ClusterState::Running;
                }
            }
            ClusterState::Terminating => {
                cluster.info.state = ClusterState::Terminated;
            }
            _ => {}
        }
        Ok(cluster.info.clone())
    }

    async fn create_cluster(&self, spec: &ClusterSpec) -> ClientResult<String> {
        let mut state = self.state();
        let id = state.next_id("cluster");
        let polls_left = state.boot_polls;
        state.clusters.insert(
            id.clone(),
            MockCluster {
                info: ClusterInfo {
                    cluster_id: id.clone(),
                    cluster_name: spec.cluster_name.clone(),
                    state: ClusterState::Pending,
                    state_message: None,
                    single_user_name: spec.single_user_name.clone(),
                },
                polls_left,
            },
        );
        state.cluster_specs.insert(id.clone(), spec.clone());

        // Creators are cluster owners.
        if let Some(owner) = state.current_user.as_ref().map(|u| u.user_name.clone()) {
            state.cluster_acls.insert(
                id.clone(),
                vec![AccessControlEntry {
                    user_name: Some(owner),
                    group_name: None,
                    service_principal_name: None,
                    all_permissions: vec![Permission {
                        permission_level: PermissionLevel::CanManage,
                        inherited: false,
                    }],
                }],
            );
        }

        state
            .journal
            .push(Mutation::CreateCluster(spec.cluster_name.clone()));
        Ok(id)
    }

    async fn start_cluster(&self, cluster_id: &str) -> ClientResult<()> {
        let mut state = self.state();
        let boot_polls = state.boot_polls;
        let cluster = state
            .clusters
            .get_mut(cluster_id)
            .ok_or_else(|| ClientError::not_found(format!("cluster {cluster_id}")))?;

        if cluster.info.state != ClusterState::Terminated {
            return Err(ClientError::rejected(
                400,
                "INVALID_STATE",
                format!(
                    "Cluster {cluster_id} is in unexpected state {}",
                    cluster.info.state
                ),
            ));
        }
        cluster.info.state = ClusterState::Pending;
        cluster.polls_left = boot_polls;
        state
            .journal
            .push(Mutation::StartCluster(cluster_id.to_string()));
        Ok(())
    }

    async fn permanent_delete_cluster(&self, cluster_id: &str) -> ClientResult<()> {
        let mut state = self.state();
        if state.clusters.remove(cluster_id).is_none() {
            return Err(ClientError::not_found(format!("cluster {cluster_id}")));
        }
        state.cluster_acls.remove(cluster_id);
        state.libraries.remove(cluster_id);
        state
            .journal
            .push(Mutation::DeleteCluster(cluster_id.to_string()));
        Ok(())
    }

    async fn list_instance_profiles(&self) -> ClientResult<Vec<String>> {
        Ok(self.state().instance_profiles.clone())
    }

    async fn add_instance_profile(&self, instance_profile_arn: &str) -> ClientResult<()> {
        let mut state = self.state();
        state.instance_profiles.push(instance_profile_arn.to_string());
        state
            .journal
            .push(Mutation::AddInstanceProfile(instance_profile_arn.to_string()));
        Ok(())
    }

    async fn cluster_library_statuses(&self, cluster_id: &str) -> ClientResult<Vec<LibraryStatus>> {
        let mut state = self.state();
        if !state.clusters.contains_key(cluster_id) {
            return Err(ClientError::not_found(format!("cluster {cluster_id}")));
        }
        let failing = state.failing_libraries.clone();
        let stuck = state.stuck_libraries.clone();

        let libraries = state.libraries.entry(cluster_id.to_string()).or_default();
        for lib in libraries.iter_mut() {
            if !lib.status.status.is_in_flight() || stuck.contains(lib.status.library.name()) {
                continue;
            }
            lib.polls_left = lib.polls_left.saturating_sub(1);
            if lib.polls_left == 0 {
                if failing.contains(lib.status.library.name()) {
                    lib.status.status = LibraryInstallStatus::Failed;
                    lib.status.messages = vec!["Library resolution failed".to_string()];
                } else {
                    lib.status.status = LibraryInstallStatus::Installed;
                }
            } else {
                lib.status.status = LibraryInstallStatus::Installing;
            }
        }
        Ok(libraries.iter().map(|l| l.status.clone()).collect())
    }

    async fn install_libraries(&self, cluster_id: &str, libraries: &[Library]) -> ClientResult<()> {
        let mut state = self.state();
        if !state.clusters.contains_key(cluster_id) {
            return Err(ClientError::not_found(format!("cluster {cluster_id}")));
        }
        let polls = state.library_polls;
        let installed = state.libraries.entry(cluster_id.to_string()).or_default();
        for library in libraries {
            match installed.iter_mut().find(|l| &l.status.library == library) {
                Some(existing) if !existing.status.status.needs_install()
                    && existing.status.status != LibraryInstallStatus::Failed => {}
                Some(existing) => {
                    existing.status.status = LibraryInstallStatus::Pending;
                    existing.status.messages.clear();
                    existing.polls_left = polls;
                }
                None => installed.push(MockLibrary {
                    status: LibraryStatus {
                        library: library.clone(),
                        status: LibraryInstallStatus::Pending,
                        messages: Vec::new(),
                    },
                    polls_left: polls,
                }),
            }
        }
        state.journal.push(Mutation::InstallLibraries {
            cluster_id: cluster_id.to_string(),
            count: libraries.len(),
        });
        Ok(())
    }

    async fn upload_file(&self, path: &str, contents: Vec<u8>, overwrite: bool) -> ClientResult<()> {
        let mut state = self.state();
        let volume = volume_of(path).ok_or_else(|| {
            ClientError::rejected(400, "INVALID_PARAMETER_VALUE", format!("Not a volume path: {path}"))
        })?;
        if !state.volumes.contains(&volume) {
            return Err(ClientError::not_found(format!("volume {volume}")));
        }
        if !overwrite && state.files.contains_key(path) {
            return Err(ClientError::rejected(409, "ALREADY_EXISTS", format!("{path} exists")));
        }
        state.files.insert(path.to_string(), contents);
        state.journal.push(Mutation::UploadFile(path.to_string()));
        Ok(())
    }

    async fn list_directory(&self, path: &str) -> ClientResult<Vec<FileEntry>> {
        let state = self.state();
        let volume = volume_of(path).ok_or_else(|| ClientError::not_found(path.to_string()))?;
        if !state.volumes.contains(&volume) {
            return Err(ClientError::not_found(path.to_string()));
        }
        let prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(state
            .files
            .iter()
            .filter_map(|(file, bytes)| {
                let name = file.strip_prefix(&prefix)?;
                (!name.contains('/')).then(|| FileEntry {
                    path: file.clone(),
                    name: name.to_string(),
                    is_directory: false,
                    file_size: Some(bytes.len() as u64),
                })
            })
            .collect())
    }

    async fn list_warehouses(&self) -> ClientResult<Vec<Warehouse>> {
        Ok(self.state().warehouses.clone())
    }

    async fn start_warehouse(&self, warehouse_id: &str) -> ClientResult<()> {
        let mut state = self.state();
        let warehouse = state
            .warehouses
            .iter_mut()
            .find(|w| w.id == warehouse_id)
            .ok_or_else(|| ClientError::not_found(format!("warehouse {warehouse_id}")))?;
        warehouse.state = WarehouseState::Running;
        state
            .journal
            .push(Mutation::StartWarehouse(warehouse_id.to_string()));
        Ok(())
    }

    async fn execute_statement(
        &self,
        warehouse_id: &str,
        statement: &str,
    ) -> ClientResult<StatementResponse> {
        let mut state = self.state();
        if !state.warehouses.iter().any(|w| w.id == warehouse_id) {
            return Err(ClientError::not_found(format!("warehouse {warehouse_id}")));
        }

        let id = state.next_id("stmt");
        state.sql_log.push(statement.to_string());
        state
            .journal
            .push(Mutation::ExecuteStatement(statement.to_string()));

        let mut statement_state = MockStatement {
            polls_left: state.statement_polls,
            outcome: StatementState::Succeeded,
            error: None,
            value: None,
            state: StatementState::Pending,
        };

        if state.stuck_sql.iter().any(|n| statement.contains(n.as_str())) {
            statement_state.outcome = StatementState::Running;
        } else if let Some(pos) = state
            .cancel_once_sql
            .iter()
            .position(|n| statement.contains(n.as_str()))
        {
            state.cancel_once_sql.remove(pos);
            statement_state.outcome = StatementState::Canceled;
        } else if state.failing_sql.iter().any(|n| statement.contains(n.as_str())) {
            statement_state.outcome = StatementState::Failed;
            statement_state.error = Some("[INTERNAL_ERROR] scripted failure".to_string());
        } else {
            match state.apply_sql(statement) {
                Ok(value) => statement_state.value = value,
                Err(message) => {
                    statement_state.outcome = StatementState::Failed;
                    statement_state.error = Some(message);
                }
            }
        }

        state.statements.insert(id.clone(), statement_state);
        Ok(statement_response(&id, StatementState::Pending, None, None))
    }

    async fn get_statement(&self, statement_id: &str) -> ClientResult<StatementResponse> {
        let mut state = self.state();
        let statement = state
            .statements
            .get_mut(statement_id)
            .ok_or_else(|| ClientError::not_found(format!("statement {statement_id}")))?;

        if !statement.state.is_terminal() {
            statement.polls_left = statement.polls_left.saturating_sub(1);
            statement.state = if statement.polls_left == 0 {
                statement.outcome
            } else {
                StatementState::Running
            };
        }

        let value = if statement.state == StatementState::Succeeded {
            statement.value.clone()
        } else {
            None
        };
        let error = if statement.state == StatementState::Failed {
            statement.error.clone()
        } else {
            None
        };
        Ok(statement_response(statement_id, statement.state, value, error))
    }

    async fn cancel_statement(&self, statement_id: &str) -> ClientResult<()> {
        let mut state = self.state();
        let statement = state
            .statements
            .get_mut(statement_id)
            .ok_or_else(|| ClientError::not_found(format!("statement {statement_id}")))?;
        statement.state = StatementState::Canceled;
        state
            .journal
            .push(Mutation::CancelStatement(statement_id.to_string()));
        Ok(())
    }

    async fn current_user(&self) -> ClientResult<User> {
        self.state()
            .current_user
            .clone()
            .ok_or_else(|| ClientError::rejected(401, "UNAUTHENTICATED", "No current user"))
    }

    async fn find_users(&self, user_name: &str) -> ClientResult<Vec<User>> {
        Ok(self
            .state()
            .users
            .iter()
            .filter(|u| u.user_name.eq_ignore_ascii_case(user_name))
            .cloned()
            .collect())
    }

    async fn create_user(&self, user_name: &str) -> ClientResult<User> {
        let mut state = self.state();
        if state.users.iter().any(|u| u.user_name == user_name) {
            return Err(ClientError::rejected(409, "ALREADY_EXISTS", format!("User {user_name} exists")));
        }
        let user = User {
            id: state.next_id("user"),
            user_name: user_name.to_string(),
            display_name: None,
        };
        state.users.push(user.clone());
        state.journal.push(Mutation::CreateUser(user_name.to_string()));
        Ok(user)
    }

    async fn get_user(&self, user_id: &str) -> ClientResult<User> {
        self.state()
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or_else(|| ClientError::not_found(format!("user {user_id}")))
    }

    async fn find_groups(&self, display_name: &str) -> ClientResult<Vec<Group>> {
        Ok(self
            .state()
            .groups
            .values()
            .filter(|g| g.display_name == display_name)
            .cloned()
            .collect())
    }

    async fn get_group(&self, group_id: &str) -> ClientResult<Group> {
        self.state()
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| ClientError::not_found(format!("group {group_id}")))
    }

    async fn create_group(&self, display_name: &str) -> ClientResult<Group> {
        let mut state = self.state();
        if state.groups.values().any(|g| g.display_name == display_name) {
            return Err(ClientError::rejected(
                409,
                "ALREADY_EXISTS",
                format!("Group with name {display_name} already exists"),
            ));
        }
        let group = Group {
            id: state.next_id("group"),
            display_name: display_name.to_string(),
            entitlements: Vec::new(),
            members: Vec::new(),
        };
        state.groups.insert(group.id.clone(), group.clone());
        state
            .journal
            .push(Mutation::CreateGroup(display_name.to_string()));
        Ok(group)
    }

    async fn delete_group(&self, group_id: &str) -> ClientResult<()> {
        let mut state = self.state();
        let group = state
            .groups
            .remove(group_id)
            .ok_or_else(|| ClientError::not_found(format!("group {group_id}")))?;

        // Deleting a principal drops its ACL entries everywhere.
        let principal = Some(Principal::Group(group.display_name.clone()));
        let state = &mut *state;
        for acl in state
            .cluster_acls
            .values_mut()
            .chain(state.policy_acls.values_mut())
        {
            acl.retain(|e| e.principal() != principal);
        }
        state
            .journal
            .push(Mutation::DeleteGroup(group_id.to_string()));
        Ok(())
    }

    async fn patch_group(&self, group_id: &str, operations: &[PatchOperation]) -> ClientResult<()> {
        let mut state = self.state();
        let group = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| ClientError::not_found(format!("group {group_id}")))?;

        for operation in operations {
            let path = operation.path.as_deref().unwrap_or_default();
            match operation.op {
                PatchOp::Remove if path.starts_with("entitlements") => {
                    if let Some(value) = operation.filter_value() {
                        group.entitlements.retain(|e| e.value != value);
                    }
                }
                PatchOp::Remove if path.starts_with("members") => {
                    if let Some(value) = operation.filter_value() {
                        group.members.retain(|m| m.value != value);
                    }
                }
                PatchOp::Add | PatchOp::Replace => {
                    let values: Vec<ComplexValue> = operation
                        .value
                        .clone()
                        .map(serde_json::from_value)
                        .transpose()
                        .map_err(ClientError::Decode)?
                        .unwrap_or_default();
                    let target = if path == "entitlements" {
                        &mut group.entitlements
                    } else if path == "members" {
                        &mut group.members
                    } else {
                        return Err(ClientError::rejected(
                            400,
                            "INVALID_PATH",
                            format!("Unsupported patch path {path}"),
                        ));
                    };
                    for value in values {
                        if !target.iter().any(|v| v.value == value.value) {
                            target.push(value);
                        }
                    }
                }
                PatchOp::Remove => {
                    return Err(ClientError::rejected(
                        400,
                        "INVALID_PATH",
                        format!("Unsupported patch path {path}"),
                    ));
                }
            }
        }

        state.journal.push(Mutation::PatchGroup {
            group_id: group_id.to_string(),
            operations: operations.len(),
        });
        Ok(())
    }

    async fn get_grants(
        &self,
        securable: SecurableType,
        full_name: &str,
    ) -> ClientResult<Vec<PrivilegeAssignment>> {
        let state = self.state();
        if securable == SecurableType::Catalog && !state.catalogs.contains(full_name) {
            return Err(ClientError::not_found(format!("catalog {full_name}")));
        }
        Ok(state
            .grants
            .get(&(securable, full_name.to_string()))
            .map(|grants| {
                grants
                    .iter()
                    .filter(|(_, privileges)| !privileges.is_empty())
                    .map(|(principal, privileges)| PrivilegeAssignment {
                        principal: principal.clone(),
                        privileges: privileges.iter().cloned().collect(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_grants(
        &self,
        securable: SecurableType,
        full_name: &str,
        changes: &[PermissionsChange],
    ) -> ClientResult<()> {
        let mut state = self.state();
        if securable == SecurableType::Catalog && !state.catalogs.contains(full_name) {
            return Err(ClientError::not_found(format!("catalog {full_name}")));
        }
        for change in changes {
            if !change.add.is_empty() && !state.principal_exists(&change.principal) {
                return Err(ClientError::rejected(
                    400,
                    "INVALID_PARAMETER_VALUE",
                    format!("Could not find principal with name {}", change.principal),
                ));
            }
        }

        let grants = state
            .grants
            .entry((securable, full_name.to_string()))
            .or_default();
        for change in changes {
            let privileges = grants.entry(change.principal.clone()).or_default();
            privileges.extend(change.add.iter().cloned());
            for removed in &change.remove {
                privileges.remove(removed);
            }
        }
        state
            .journal
            .push(Mutation::UpdateGrants(full_name.to_string()));
        Ok(())
    }

    async fn get_cluster_permissions(&self, cluster_id: &str) -> ClientResult<Vec<AccessControlEntry>> {
        let state = self.state();
        if !state.clusters.contains_key(cluster_id) {
            return Err(ClientError::not_found(format!("cluster {cluster_id}")));
        }
        Ok(state.cluster_acls.get(cluster_id).cloned().unwrap_or_default())
    }

    async fn update_cluster_permissions(
        &self,
        cluster_id: &str,
        entries: &[AccessControlRequest],
    ) -> ClientResult<()> {
        let mut state = self.state();
        if !state.clusters.contains_key(cluster_id) {
            return Err(ClientError::not_found(format!("cluster {cluster_id}")));
        }
        for entry in entries {
            if let Some(group) = &entry.group_name {
                if !state.principal_exists(group) {
                    return Err(ClientError::rejected(
                        400,
                        "INVALID_PARAMETER_VALUE",
                        format!("Group {group} does not exist"),
                    ));
                }
            }
        }
        let acl = state.cluster_acls.entry(cluster_id.to_string()).or_default();
        for entry in entries {
            merge_acl(acl, entry);
        }
        state
            .journal
            .push(Mutation::UpdateClusterPermissions(cluster_id.to_string()));
        Ok(())
    }

    async fn list_cluster_policies(&self) -> ClientResult<Vec<ClusterPolicy>> {
        Ok(self.state().policies.values().cloned().collect())
    }

    async fn get_cluster_policy(&self, policy_id: &str) -> ClientResult<ClusterPolicy> {
        self.state()
            .policies
            .get(policy_id)
            .cloned()
            .ok_or_else(|| ClientError::not_found(format!("cluster policy {policy_id}")))
    }

    async fn edit_cluster_policy(&self, policy: &ClusterPolicy) -> ClientResult<()> {
        let mut state = self.state();
        if !state.policies.contains_key(&policy.policy_id) {
            return Err(ClientError::not_found(format!(
                "cluster policy {}",
                policy.policy_id
            )));
        }
        if policy.policy_family_id.is_some() && policy.definition.is_some() {
            return Err(ClientError::rejected(
                400,
                "INVALID_PARAMETER_VALUE",
                "definition cannot be set on a policy family policy",
            ));
        }
        state
            .policies
            .insert(policy.policy_id.clone(), policy.clone());
        state
            .journal
            .push(Mutation::EditClusterPolicy(policy.policy_id.clone()));
        Ok(())
    }

    async fn get_cluster_policy_permissions(
        &self,
        policy_id: &str,
    ) -> ClientResult<Vec<AccessControlEntry>> {
        let state = self.state();
        if !state.policies.contains_key(policy_id) {
            return Err(ClientError::not_found(format!("cluster policy {policy_id}")));
        }
        Ok(state.policy_acls.get(policy_id).cloned().unwrap_or_default())
    }

    async fn update_cluster_policy_permissions(
        &self,
        policy_id: &str,
        entries: &[AccessControlRequest],
    ) -> ClientResult<()> {
        let mut state = self.state();
        if !state.policies.contains_key(policy_id) {
            return Err(ClientError::not_found(format!("cluster policy {policy_id}")));
        }
        let acl = state.policy_acls.entry(policy_id.to_string()).or_default();
        for entry in entries {
            merge_acl(acl, entry);
        }
        state
            .journal
            .push(Mutation::UpdateClusterPolicyPermissions(policy_id.to_string()));
        Ok(())
    }

    async fn set_cluster_policy_permissions(
        &self,
        policy_id: &str,
        entries: &[AccessControlRequest],
    ) -> ClientResult<()> {
        let mut state = self.state();
        if !state.policies.contains_key(policy_id) {
            return Err(ClientError::not_found(format!("cluster policy {policy_id}")));
        }
        let acl = state.policy_acls.entry(policy_id.to_string()).or_default();
        acl.clear();
        for entry in entries {
            merge_acl(acl, entry);
        }
        state
            .journal
            .push(Mutation::UpdateClusterPolicyPermissions(policy_id.to_string()));
        Ok(())
    }

    async fn get_volume(&self, full_name: &str) -> ClientResult<VolumeInfo> {
        if !self.state().volumes.contains(full_name) {
            return Err(ClientError::not_found(format!("volume {full_name}")));
        }
        Ok(VolumeInfo {
            full_name: full_name.to_string(),
            name: full_name.rsplit('.').next().unwrap_or_default().to_string(),
        })
    }

    async fn get_schema(&self, full_name: &str) -> ClientResult<SchemaInfo> {
        if !self.state().schemas.contains(full_name) {
            return Err(ClientError::not_found(format!("schema {full_name}")));
        }
        Ok(SchemaInfo {
            full_name: full_name.to_string(),
            name: full_name.rsplit('.').next().unwrap_or_default().to_string(),
        })
    }

    async fn delete_volume(&self, full_name: &str) -> ClientResult<()> {
        let mut state = self.state();
        if !state.volumes.remove(full_name) {
            return Err(ClientError::not_found(format!("volume {full_name}")));
        }
        let prefix = format!("/Volumes/{}/", full_name.replace('.', "/"));
        state.files.retain(|path, _| !path.starts_with(&prefix));
        state
            .journal
            .push(Mutation::DeleteVolume(full_name.to_string()));
        Ok(())
    }

    async fn delete_schema(&self, full_name: &str) -> ClientResult<()> {
        let mut state = self.state();
        if !state.schemas.contains(full_name) {
            return Err(ClientError::not_found(format!("schema {full_name}")));
        }
        let prefix = format!("{full_name}.");
        if state.volumes.iter().any(|v| v.starts_with(&prefix))
            || state.tables.iter().any(|t| t.starts_with(&prefix))
        {
            return Err(ClientError::rejected(
                400,
                "SCHEMA_NOT_EMPTY",
                format!("Schema {full_name} is not empty"),
            ));
        }
        state.schemas.remove(full_name);
        state
            .journal
            .push(Mutation::DeleteSchema(full_name.to_string()));
        Ok(())
    }

    async fn delete_catalog(&self, name: &str, force: bool) -> ClientResult<()> {
        let mut state = self.state();
        if !state.catalogs.contains(name) {
            return Err(ClientError::not_found(format!("catalog {name}")));
        }
        let prefix = format!("{name}.");
        let has_children = state.schemas.iter().any(|s| s.starts_with(&prefix));
        if has_children && !force {
            return Err(ClientError::rejected(
                400,
                "CATALOG_NOT_EMPTY",
                format!("Catalog {name} is not empty"),
            ));
        }
        state.catalogs.remove(name);
        state.schemas.retain(|s| !s.starts_with(&prefix));
        state.volumes.retain(|v| !v.starts_with(&prefix));
        state.tables.retain(|t| !t.starts_with(&prefix));
        state
            .grants
            .retain(|(_, full_name), _| full_name != name && !full_name.starts_with(&prefix));
        state.journal.push(Mutation::DeleteCatalog(name.to_string()));
        Ok(())
    }
}

fn statement_response(
    id: &str,
    state: StatementState,
    value: Option<String>,
    error: Option<String>,
) -> StatementResponse {
    StatementResponse {
        statement_id: id.to_string(),
        status: StatementStatus {
            state,
            error: error.map(|message| StatementError {
                error_code: None,
                message: Some(message),
            }),
        },
        manifest: value.as_ref().map(|_| ResultManifest {
            total_row_count: Some(1),
        }),
        result: value.map(|v| ResultData {
            data_array: vec![vec![Some(v)]],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backticked_identifiers() {
        assert_eq!(
            backticked("SELECT COUNT(*) FROM `c`.`lakehouse`.`aircraft`"),
            vec!["c", "lakehouse", "aircraft"]
        );
    }

    #[test]
    fn volume_paths() {
        assert_eq!(volume_of("/Volumes/c/s/v/a.csv").as_deref(), Some("c.s.v"));
        assert_eq!(volume_of("/Workspace/x"), None);
    }
}
