//! `ResourceClient` over the platform's REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, trace};
use url::Url;

use crate::auth::Credentials;
use crate::client::ResourceClient;
use crate::error::{ClientError, ClientResult};
use crate::models::{
    AccessControlEntry, AccessControlRequest, ClusterInfo, ClusterPolicy, ClusterSpec, FileEntry, Group, Library,
    LibraryStatus, ObjectPermissions, PatchOperation, PermissionsChange, PrivilegeAssignment,
    SchemaInfo, SecurableType, StatementResponse, User, VolumeInfo, Warehouse, SCIM_GROUP_SCHEMA,
    SCIM_PATCH_SCHEMA, SCIM_USER_SCHEMA,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Error codes the platform uses for a missing target on non-404 responses.
const NOT_FOUND_CODES: &[&str] = &[
    "RESOURCE_DOES_NOT_EXIST",
    "NOT_FOUND",
    "CATALOG_DOES_NOT_EXIST",
    "SCHEMA_DOES_NOT_EXIST",
    "VOLUME_DOES_NOT_EXIST",
];

pub struct RestClient {
    http: Client,
    base: Url,
    token: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    // SCIM errors
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Deserialize)]
struct ClusterList {
    #[serde(default)]
    clusters: Vec<ClusterInfo>,
}

#[derive(Deserialize)]
struct PolicyList {
    #[serde(default)]
    policies: Vec<ClusterPolicy>,
}

#[derive(Deserialize)]
struct CreatedCluster {
    cluster_id: String,
}

#[derive(Deserialize)]
struct InstanceProfileList {
    #[serde(default)]
    instance_profiles: Vec<InstanceProfile>,
}

#[derive(Deserialize)]
struct InstanceProfile {
    instance_profile_arn: String,
}

#[derive(Deserialize)]
struct LibraryStatusList {
    #[serde(default)]
    library_statuses: Vec<LibraryStatus>,
}

#[derive(Deserialize)]
struct DirectoryContents {
    #[serde(default)]
    contents: Vec<FileEntry>,
}

#[derive(Deserialize)]
struct WarehouseList {
    #[serde(default)]
    warehouses: Vec<Warehouse>,
}

#[derive(Deserialize)]
struct ScimList<T> {
    #[serde(default = "Vec::new", rename = "Resources")]
    resources: Vec<T>,
}

#[derive(Deserialize)]
struct GrantList {
    #[serde(default)]
    privilege_assignments: Vec<PrivilegeAssignment>,
}

impl RestClient {
    pub fn new(credentials: &Credentials) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("workshop-lab/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut base = credentials.host.clone();
        base.set_path("");
        base.set_query(None);

        debug!(host = %base, source = %credentials.source, "created REST client");
        Ok(Self {
            http,
            base,
            token: credentials.token.clone(),
        })
    }

    /// Build an endpoint URL; each segment is percent-encoded separately.
    fn url(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| ClientError::Api {
                status: 0,
                message: format!("Workspace host {} cannot carry a path", self.base),
            })?;
            path.clear();
            for segment in segments {
                path.extend(segment.split('/').filter(|s| !s.is_empty()));
            }
        }
        Ok(url)
    }

    fn get(&self, url: Url) -> RequestBuilder {
        self.http.get(url).bearer_auth(&self.token)
    }

    fn post(&self, url: Url) -> RequestBuilder {
        self.http.post(url).bearer_auth(&self.token)
    }

    fn patch(&self, url: Url) -> RequestBuilder {
        self.http.patch(url).bearer_auth(&self.token)
    }

    fn put(&self, url: Url) -> RequestBuilder {
        self.http.put(url).bearer_auth(&self.token)
    }

    fn delete(&self, url: Url) -> RequestBuilder {
        self.http.delete(url).bearer_auth(&self.token)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, resource: &str) -> ClientResult<T> {
        let response = check(request.send().await?, resource).await?;
        let body = response.text().await?;
        trace!(resource, body = %body, "response body");
        Ok(serde_json::from_str(&body)?)
    }

    async fn send_empty(&self, request: RequestBuilder, resource: &str) -> ClientResult<()> {
        check(request.send().await?, resource).await?;
        Ok(())
    }

    fn scim_filter(attribute: &str, value: &str) -> String {
        format!("{attribute} eq \"{}\"", value.replace('"', "\\\""))
    }
}

async fn check(response: Response, resource: &str) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let code = body.error_code.unwrap_or_default();
    let message = body.message.or(body.detail).unwrap_or(text);
    debug!(resource, status = status.as_u16(), code = %code, "request failed");

    if status == StatusCode::NOT_FOUND || NOT_FOUND_CODES.contains(&code.as_str()) {
        return Err(ClientError::not_found(resource));
    }

    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::CONFLICT => Err(ClientError::rejected(status.as_u16(), code, message)),
        _ => Err(ClientError::Api {
            status: status.as_u16(),
            message,
        }),
    }
}

#[async_trait]
impl ResourceClient for RestClient {
    async fn list_clusters(&self) -> ClientResult<Vec<ClusterInfo>> {
        let url = self.url(&["api/2.1/clusters/list"])?;
        let list: ClusterList = self.send(self.get(url), "clusters").await?;
        Ok(list.clusters)
    }

    async fn get_cluster(&self, cluster_id: &str) -> ClientResult<ClusterInfo> {
        let url = self.url(&["api/2.1/clusters/get"])?;
        let request = self.get(url).query(&[("cluster_id", cluster_id)]);
        self.send(request, &format!("cluster {cluster_id}")).await
    }

    async fn create_cluster(&self, spec: &ClusterSpec) -> ClientResult<String> {
        let url = self.url(&["api/2.1/clusters/create"])?;
        let created: CreatedCluster = self
            .send(self.post(url).json(spec), &format!("cluster {}", spec.cluster_name))
            .await?;
        Ok(created.cluster_id)
    }

    async fn start_cluster(&self, cluster_id: &str) -> ClientResult<()> {
        let url = self.url(&["api/2.1/clusters/start"])?;
        let body = json!({ "cluster_id": cluster_id });
        self.send_empty(self.post(url).json(&body), &format!("cluster {cluster_id}"))
            .await
    }

    async fn permanent_delete_cluster(&self, cluster_id: &str) -> ClientResult<()> {
        let url = self.url(&["api/2.1/clusters/permanent-delete"])?;
        let body = json!({ "cluster_id": cluster_id });
        self.send_empty(self.post(url).json(&body), &format!("cluster {cluster_id}"))
            .await
    }

    async fn list_instance_profiles(&self) -> ClientResult<Vec<String>> {
        let url = self.url(&["api/2.0/instance-profiles/list"])?;
        let list: InstanceProfileList = self.send(self.get(url), "instance profiles").await?;
        Ok(list
            .instance_profiles
            .into_iter()
            .map(|p| p.instance_profile_arn)
            .collect())
    }

    async fn add_instance_profile(&self, instance_profile_arn: &str) -> ClientResult<()> {
        let url = self.url(&["api/2.0/instance-profiles/add"])?;
        let body = json!({
            "instance_profile_arn": instance_profile_arn,
            "skip_validation": true,
        });
        self.send_empty(self.post(url).json(&body), "instance profile")
            .await
    }

    async fn cluster_library_statuses(&self, cluster_id: &str) -> ClientResult<Vec<LibraryStatus>> {
        let url = self.url(&["api/2.0/libraries/cluster-status"])?;
        let request = self.get(url).query(&[("cluster_id", cluster_id)]);
        let list: LibraryStatusList = self
            .send(request, &format!("libraries of cluster {cluster_id}"))
            .await?;
        Ok(list.library_statuses)
    }

    async fn install_libraries(&self, cluster_id: &str, libraries: &[Library]) -> ClientResult<()> {
        let url = self.url(&["api/2.0/libraries/install"])?;
        let body = json!({ "cluster_id": cluster_id, "libraries": libraries });
        self.send_empty(self.post(url).json(&body), &format!("cluster {cluster_id}"))
            .await
    }

    async fn upload_file(&self, path: &str, contents: Vec<u8>, overwrite: bool) -> ClientResult<()> {
        let url = self.url(&["api/2.0/fs/files", path])?;
        let request = self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .query(&[("overwrite", overwrite.to_string())])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(contents);
        self.send_empty(request, path).await
    }

    async fn list_directory(&self, path: &str) -> ClientResult<Vec<FileEntry>> {
        let url = self.url(&["api/2.0/fs/directories", path])?;
        let listing: DirectoryContents = self.send(self.get(url), path).await?;
        Ok(listing.contents)
    }

    async fn list_warehouses(&self) -> ClientResult<Vec<Warehouse>> {
        let url = self.url(&["api/2.0/sql/warehouses"])?;
        let list: WarehouseList = self.send(self.get(url), "warehouses").await?;
        Ok(list.warehouses)
    }

    async fn start_warehouse(&self, warehouse_id: &str) -> ClientResult<()> {
        let url = self.url(&["api/2.0/sql/warehouses", warehouse_id, "start"])?;
        self.send_empty(self.post(url).json(&json!({})), &format!("warehouse {warehouse_id}"))
            .await
    }

    async fn execute_statement(
        &self,
        warehouse_id: &str,
        statement: &str,
    ) -> ClientResult<StatementResponse> {
        let url = self.url(&["api/2.0/sql/statements"])?;
        let body = json!({
            "warehouse_id": warehouse_id,
            "statement": statement,
            "wait_timeout": "0s",
            "on_wait_timeout": "CONTINUE",
            "disposition": "INLINE",
            "format": "JSON_ARRAY",
        });
        self.send(self.post(url).json(&body), &format!("warehouse {warehouse_id}"))
            .await
    }

    async fn get_statement(&self, statement_id: &str) -> ClientResult<StatementResponse> {
        let url = self.url(&["api/2.0/sql/statements", statement_id])?;
        self.send(self.get(url), &format!("statement {statement_id}"))
            .await
    }

    async fn cancel_statement(&self, statement_id: &str) -> ClientResult<()> {
        let url = self.url(&["api/2.0/sql/statements", statement_id, "cancel"])?;
        self.send_empty(self.post(url), &format!("statement {statement_id}"))
            .await
    }

    async fn current_user(&self) -> ClientResult<User> {
        let url = self.url(&["api/2.0/preview/scim/v2/Me"])?;
        self.send(self.get(url), "current user").await
    }

    async fn find_users(&self, user_name: &str) -> ClientResult<Vec<User>> {
        let url = self.url(&["api/2.0/preview/scim/v2/Users"])?;
        let request = self
            .get(url)
            .query(&[("filter", Self::scim_filter("userName", user_name))]);
        let list: ScimList<User> = self.send(request, "users").await?;
        Ok(list.resources)
    }

    async fn create_user(&self, user_name: &str) -> ClientResult<User> {
        let url = self.url(&["api/2.0/preview/scim/v2/Users"])?;
        let body = json!({ "schemas": [SCIM_USER_SCHEMA], "userName": user_name });
        self.send(self.post(url).json(&body), &format!("user {user_name}"))
            .await
    }

    async fn get_user(&self, user_id: &str) -> ClientResult<User> {
        let url = self.url(&["api/2.0/preview/scim/v2/Users", user_id])?;
        self.send(self.get(url), &format!("user {user_id}")).await
    }

    async fn find_groups(&self, display_name: &str) -> ClientResult<Vec<Group>> {
        let url = self.url(&["api/2.0/preview/scim/v2/Groups"])?;
        let request = self
            .get(url)
            .query(&[("filter", Self::scim_filter("displayName", display_name))]);
        let list: ScimList<Group> = self.send(request, "groups").await?;
        Ok(list.resources)
    }

    async fn get_group(&self, group_id: &str) -> ClientResult<Group> {
        let url = self.url(&["api/2.0/preview/scim/v2/Groups", group_id])?;
        self.send(self.get(url), &format!("group {group_id}")).await
    }

    async fn create_group(&self, display_name: &str) -> ClientResult<Group> {
        let url = self.url(&["api/2.0/preview/scim/v2/Groups"])?;
        let body = json!({ "schemas": [SCIM_GROUP_SCHEMA], "displayName": display_name });
        self.send(self.post(url).json(&body), &format!("group {display_name}"))
            .await
    }

    async fn delete_group(&self, group_id: &str) -> ClientResult<()> {
        let url = self.url(&["api/2.0/preview/scim/v2/Groups", group_id])?;
        self.send_empty(self.delete(url), &format!("group {group_id}"))
            .await
    }

    async fn patch_group(&self, group_id: &str, operations: &[PatchOperation]) -> ClientResult<()> {
        let url = self.url(&["api/2.0/preview/scim/v2/Groups", group_id])?;
        let body = json!({ "schemas": [SCIM_PATCH_SCHEMA], "Operations": operations });
        self.send_empty(self.patch(url).json(&body), &format!("group {group_id}"))
            .await
    }

    async fn get_grants(
        &self,
        securable: SecurableType,
        full_name: &str,
    ) -> ClientResult<Vec<PrivilegeAssignment>> {
        let url = self.url(&["api/2.1/unity-catalog/permissions", securable.as_str(), full_name])?;
        let list: GrantList = self
            .send(self.get(url), &format!("{} {full_name}", securable.as_str()))
            .await?;
        Ok(list.privilege_assignments)
    }

    async fn update_grants(
        &self,
        securable: SecurableType,
        full_name: &str,
        changes: &[PermissionsChange],
    ) -> ClientResult<()> {
        let url = self.url(&["api/2.1/unity-catalog/permissions", securable.as_str(), full_name])?;
        let body = json!({ "changes": changes });
        self.send_empty(
            self.patch(url).json(&body),
            &format!("{} {full_name}", securable.as_str()),
        )
        .await
    }

    async fn get_cluster_permissions(&self, cluster_id: &str) -> ClientResult<Vec<AccessControlEntry>> {
        let url = self.url(&["api/2.0/permissions/clusters", cluster_id])?;
        let permissions: ObjectPermissions = self
            .send(self.get(url), &format!("cluster {cluster_id}"))
            .await?;
        Ok(permissions.access_control_list)
    }

    async fn update_cluster_permissions(
        &self,
        cluster_id: &str,
        entries: &[AccessControlRequest],
    ) -> ClientResult<()> {
        let url = self.url(&["api/2.0/permissions/clusters", cluster_id])?;
        let body = json!({ "access_control_list": entries });
        self.send_empty(self.patch(url).json(&body), &format!("cluster {cluster_id}"))
            .await
    }

    async fn list_cluster_policies(&self) -> ClientResult<Vec<ClusterPolicy>> {
        let url = self.url(&["api/2.0/policies/clusters/list"])?;
        let list: PolicyList = self.send(self.get(url), "cluster policies").await?;
        Ok(list.policies)
    }

    async fn get_cluster_policy(&self, policy_id: &str) -> ClientResult<ClusterPolicy> {
        let url = self.url(&["api/2.0/policies/clusters/get"])?;
        let request = self.get(url).query(&[("policy_id", policy_id)]);
        self.send(request, &format!("cluster policy {policy_id}")).await
    }

    async fn edit_cluster_policy(&self, policy: &ClusterPolicy) -> ClientResult<()> {
        let url = self.url(&["api/2.0/policies/clusters/edit"])?;
        self.send_empty(
            self.post(url).json(&policy.edit_request()),
            &format!("cluster policy {}", policy.policy_id),
        )
        .await
    }

    async fn get_cluster_policy_permissions(
        &self,
        policy_id: &str,
    ) -> ClientResult<Vec<AccessControlEntry>> {
        let url = self.url(&["api/2.0/permissions/cluster-policies", policy_id])?;
        let permissions: ObjectPermissions = self
            .send(self.get(url), &format!("cluster policy {policy_id}"))
            .await?;
        Ok(permissions.access_control_list)
    }

    async fn update_cluster_policy_permissions(
        &self,
        policy_id: &str,
        entries: &[AccessControlRequest],
    ) -> ClientResult<()> {
        let url = self.url(&["api/2.0/permissions/cluster-policies", policy_id])?;
        let body = json!({ "access_control_list": entries });
        self.send_empty(
            self.patch(url).json(&body),
            &format!("cluster policy {policy_id}"),
        )
        .await
    }

    async fn set_cluster_policy_permissions(
        &self,
        policy_id: &str,
        entries: &[AccessControlRequest],
    ) -> ClientResult<()> {
        let url = self.url(&["api/2.0/permissions/cluster-policies", policy_id])?;
        let body = json!({ "access_control_list": entries });
        self.send_empty(self.put(url).json(&body), &format!("cluster policy {policy_id}"))
            .await
    }

    async fn get_volume(&self, full_name: &str) -> ClientResult<VolumeInfo> {
        let url = self.url(&["api/2.1/unity-catalog/volumes", full_name])?;
        self.send(self.get(url), &format!("volume {full_name}")).await
    }

    async fn get_schema(&self, full_name: &str) -> ClientResult<SchemaInfo> {
        let url = self.url(&["api/2.1/unity-catalog/schemas", full_name])?;
        self.send(self.get(url), &format!("schema {full_name}")).await
    }

    async fn delete_volume(&self, full_name: &str) -> ClientResult<()> {
        let url = self.url(&["api/2.1/unity-catalog/volumes", full_name])?;
        self.send_empty(self.delete(url), &format!("volume {full_name}"))
            .await
    }

    async fn delete_schema(&self, full_name: &str) -> ClientResult<()> {
        let url = self.url(&["api/2.1/unity-catalog/schemas", full_name])?;
        self.send_empty(self.delete(url), &format!("schema {full_name}"))
            .await
    }

    async fn delete_catalog(&self, name: &str, force: bool) -> ClientResult<()> {
        let url = self.url(&["api/2.1/unity-catalog/catalogs", name])?;
        let request = self.delete(url).query(&[("force", force.to_string())]);
        self.send_empty(request, &format!("catalog {name}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RestClient {
        let creds = Credentials::new("https://dbc-1.cloud.databricks.com", "t", "test").unwrap();
        RestClient::new(&creds).unwrap()
    }

    #[test]
    fn volume_paths_are_split_into_segments() {
        let url = client()
            .url(&["api/2.0/fs/files", "/Volumes/my cat/s/v/nodes_aircraft.csv"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://dbc-1.cloud.databricks.com/api/2.0/fs/files/Volumes/my%20cat/s/v/nodes_aircraft.csv"
        );
    }

    #[test]
    fn scim_filter_quotes_value() {
        assert_eq!(
            RestClient::scim_filter("displayName", "aircraft_workshop_group"),
            "displayName eq \"aircraft_workshop_group\""
        );
    }
}
