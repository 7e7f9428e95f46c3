//! Yandex Cloud API client
//!
//! Implements the REST endpoints the controller needs:
//! - Compute: `/compute/v1/instances`
//! - VPC: `/vpc/v1/subnets`, `/vpc/v1/routeTables`
//! - Network Load Balancer: `/load-balancer/v1/networkLoadBalancers`, `/load-balancer/v1/targetGroups`
//! - Operations: `/operations/{id}`

use crate::cloud_trait::CloudApi;
use crate::common::HttpClient;
use crate::common::auth::{Credentials, TokenSource};
use crate::common::operation::OperationWaiter;
use crate::error::CloudError;
use crate::models::*;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Page size used when listing everything in the folder
const LIST_PAGE_SIZE: &str = "1000";

/// Service endpoints; every field is the versioned API root of one service
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub compute: String,
    pub vpc: String,
    pub load_balancer: String,
    pub operation: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compute: "https://compute.api.cloud.yandex.net/compute/v1".to_string(),
            vpc: "https://vpc.api.cloud.yandex.net/vpc/v1".to_string(),
            load_balancer: "https://load-balancer.api.cloud.yandex.net/load-balancer/v1".to_string(),
            operation: "https://operation.api.cloud.yandex.net/operations".to_string(),
        }
    }
}

impl Endpoints {
    /// All services behind one host (API gateways, tests)
    pub fn single_host(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            compute: format!("{}/compute/v1", base),
            vpc: format!("{}/vpc/v1", base),
            load_balancer: format!("{}/load-balancer/v1", base),
            operation: format!("{}/operations", base),
        }
    }
}

/// Yandex Cloud API client
#[derive(Debug)]
pub struct YandexCloudClient {
    http: HttpClient,
    endpoints: Endpoints,
    waiter: OperationWaiter,
    folder_id: String,
    region_id: String,
}

impl YandexCloudClient {
    /// Create a new client against the public endpoints
    ///
    /// # Arguments
    /// * `credentials` - IAM token or instance service account
    /// * `folder_id` - Folder all managed resources live in
    /// * `region_id` - Region for target groups and balancers (e.g. "ru-central1")
    pub fn new(
        credentials: Credentials,
        folder_id: String,
        region_id: String,
    ) -> Result<Self, CloudError> {
        Self::with_endpoints(credentials, folder_id, region_id, Endpoints::default())
    }

    /// Create a new client against custom endpoints
    pub fn with_endpoints(
        credentials: Credentials,
        folder_id: String,
        region_id: String,
        endpoints: Endpoints,
    ) -> Result<Self, CloudError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(CloudError::Http)?;

        Ok(Self {
            http: HttpClient::new(client, TokenSource::new(credentials)),
            waiter: OperationWaiter::new(endpoints.operation.clone()),
            endpoints,
            folder_id,
            region_id,
        })
    }

    /// Override how often pending operations are polled
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.waiter = self.waiter.with_poll_interval(poll_interval);
        self
    }

    fn target_groups_url(&self) -> String {
        format!("{}/targetGroups", self.endpoints.load_balancer)
    }

    fn load_balancers_url(&self) -> String {
        format!("{}/networkLoadBalancers", self.endpoints.load_balancer)
    }

    /// Look a resource up by its folder-unique name.
    ///
    /// Two results are requested so a duplicate can be detected.
    async fn find_unique<T: DeserializeOwned>(
        &self,
        url: &str,
        kind: &str,
        name: &str,
    ) -> Result<Option<T>, CloudError> {
        let filter = format!("name=\"{}\"", name);
        let query = self.http.build_query_string(&[
            ("folderId", self.folder_id.as_str()),
            ("filter", filter.as_str()),
            ("pageSize", "2"),
        ]);
        let page: ListPage<T> = self.http.get(&format!("{}?{}", url, query)).await?;

        let mut items = page.items;
        match items.len() {
            0 => Ok(None),
            1 => Ok(items.pop()),
            n => Err(CloudError::Ambiguous(format!(
                "{} {} named {:?} found in folder {}",
                n, kind, name, self.folder_id
            ))),
        }
    }

    /// POST a mutating call and wait for its operation
    async fn mutate<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, CloudError> {
        let operation: Operation = self.http.post(url, body).await?;
        self.waiter.wait(&self.http, operation).await
    }

    /// DELETE a resource, treating "already gone" as success
    async fn delete_tolerant(&self, url: &str) -> Result<(), CloudError> {
        let operation: Operation = match self.http.delete(url).await {
            Ok(operation) => operation,
            Err(e) if e.is_not_found() => {
                debug!("DELETE {}: already gone", url);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match self.waiter.wait_done(&self.http, operation).await {
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
            Ok(_) => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl CloudApi for YandexCloudClient {
    fn folder_id(&self) -> &str {
        &self.folder_id
    }

    fn region_id(&self) -> &str {
        &self.region_id
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Instance, CloudError> {
        self.http
            .get(&format!("{}/instances/{}", self.endpoints.compute, instance_id))
            .await
    }

    async fn find_instance_by_name(&self, name: &str) -> Result<Option<Instance>, CloudError> {
        let url = format!("{}/instances", self.endpoints.compute);
        self.find_unique(&url, "instances", name).await
    }

    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet, CloudError> {
        self.http
            .get(&format!("{}/subnets/{}", self.endpoints.vpc, subnet_id))
            .await
    }

    async fn get_route_table(&self, route_table_id: &str) -> Result<RouteTable, CloudError> {
        self.http
            .get(&format!("{}/routeTables/{}", self.endpoints.vpc, route_table_id))
            .await
    }

    async fn update_route_table_static_routes(
        &self,
        route_table_id: &str,
        static_routes: Vec<StaticRoute>,
    ) -> Result<RouteTable, CloudError> {
        let url = format!("{}/routeTables/{}", self.endpoints.vpc, route_table_id);
        // FieldMask paths use the JSON (lowerCamel) spelling of `static_routes`
        let body = json!({
            "updateMask": "staticRoutes",
            "staticRoutes": static_routes,
        });
        let operation: Operation = self.http.patch(&url, &body).await?;
        self.waiter.wait(&self.http, operation).await
    }

    async fn list_target_groups(&self) -> Result<Vec<TargetGroup>, CloudError> {
        self.http
            .fetch_all_pages(
                &self.target_groups_url(),
                &[("folderId", self.folder_id.as_str()), ("pageSize", LIST_PAGE_SIZE)],
            )
            .await
    }

    async fn get_target_group_by_name(
        &self,
        name: &str,
    ) -> Result<Option<TargetGroup>, CloudError> {
        self.find_unique(&self.target_groups_url(), "target groups", name)
            .await
    }

    async fn create_target_group(
        &self,
        request: CreateTargetGroupRequest,
    ) -> Result<TargetGroup, CloudError> {
        let body = serde_json::to_value(&request)?;
        self.mutate(&self.target_groups_url(), &body).await
    }

    async fn add_targets(
        &self,
        target_group_id: &str,
        targets: Vec<Target>,
    ) -> Result<TargetGroup, CloudError> {
        let url = format!("{}/{}:addTargets", self.target_groups_url(), target_group_id);
        self.mutate(&url, &json!({ "targets": targets })).await
    }

    async fn remove_targets(
        &self,
        target_group_id: &str,
        targets: Vec<Target>,
    ) -> Result<TargetGroup, CloudError> {
        let url = format!("{}/{}:removeTargets", self.target_groups_url(), target_group_id);
        self.mutate(&url, &json!({ "targets": targets })).await
    }

    async fn delete_target_group(&self, target_group_id: &str) -> Result<(), CloudError> {
        self.delete_tolerant(&format!("{}/{}", self.target_groups_url(), target_group_id))
            .await
    }

    async fn get_load_balancer_by_name(
        &self,
        name: &str,
    ) -> Result<Option<NetworkLoadBalancer>, CloudError> {
        self.find_unique(&self.load_balancers_url(), "network load balancers", name)
            .await
    }

    async fn create_load_balancer(
        &self,
        request: CreateNetworkLoadBalancerRequest,
    ) -> Result<NetworkLoadBalancer, CloudError> {
        let body = serde_json::to_value(&request)?;
        self.mutate(&self.load_balancers_url(), &body).await
    }

    async fn delete_load_balancer(&self, load_balancer_id: &str) -> Result<(), CloudError> {
        self.delete_tolerant(&format!("{}/{}", self.load_balancers_url(), load_balancer_id))
            .await
    }

    async fn add_listener(
        &self,
        load_balancer_id: &str,
        listener: ListenerSpec,
    ) -> Result<NetworkLoadBalancer, CloudError> {
        let url = format!("{}/{}:addListener", self.load_balancers_url(), load_balancer_id);
        self.mutate(&url, &json!({ "listenerSpec": listener })).await
    }

    async fn remove_listener(
        &self,
        load_balancer_id: &str,
        listener_name: &str,
    ) -> Result<NetworkLoadBalancer, CloudError> {
        let url = format!("{}/{}:removeListener", self.load_balancers_url(), load_balancer_id);
        self.mutate(&url, &json!({ "listenerName": listener_name }))
            .await
    }

    async fn attach_target_group(
        &self,
        load_balancer_id: &str,
        attached: AttachedTargetGroup,
    ) -> Result<NetworkLoadBalancer, CloudError> {
        let url = format!(
            "{}/{}:attachTargetGroup",
            self.load_balancers_url(),
            load_balancer_id
        );
        self.mutate(&url, &json!({ "attachedTargetGroup": attached }))
            .await
    }

    async fn detach_target_group(
        &self,
        load_balancer_id: &str,
        target_group_id: &str,
    ) -> Result<NetworkLoadBalancer, CloudError> {
        let url = format!(
            "{}/{}:detachTargetGroup",
            self.load_balancers_url(),
            load_balancer_id
        );
        self.mutate(&url, &json!({ "targetGroupId": target_group_id }))
            .await
    }
}
