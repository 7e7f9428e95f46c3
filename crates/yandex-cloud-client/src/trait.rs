//! CloudApi trait for mocking
//!
//! This trait abstracts the Yandex Cloud client to enable mocking in unit tests.
//! The concrete `YandexCloudClient` implements this trait, and tests use
//! `MockCloudClient` (feature `test-util`).
//!
//! Mutating methods complete the long-running operation before returning.

use crate::error::CloudError;
use crate::models::*;

/// Trait for Yandex Cloud API operations used by the controller
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait CloudApi: Send + Sync {
    /// Folder all resources live in
    fn folder_id(&self) -> &str;

    /// Region new regional resources are created in
    fn region_id(&self) -> &str;

    // Compute
    async fn get_instance(&self, instance_id: &str) -> Result<Instance, CloudError>;
    /// Exact-name lookup; more than one match is `CloudError::Ambiguous`
    async fn find_instance_by_name(&self, name: &str) -> Result<Option<Instance>, CloudError>;

    // VPC
    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet, CloudError>;
    async fn get_route_table(&self, route_table_id: &str) -> Result<RouteTable, CloudError>;
    /// Replace the whole static route list (field mask `static_routes`)
    async fn update_route_table_static_routes(&self, route_table_id: &str, static_routes: Vec<StaticRoute>) -> Result<RouteTable, CloudError>;

    // Target groups
    async fn list_target_groups(&self) -> Result<Vec<TargetGroup>, CloudError>;
    /// Exact-name lookup; more than one match is `CloudError::Ambiguous`
    async fn get_target_group_by_name(&self, name: &str) -> Result<Option<TargetGroup>, CloudError>;
    async fn create_target_group(&self, request: CreateTargetGroupRequest) -> Result<TargetGroup, CloudError>;
    async fn add_targets(&self, target_group_id: &str, targets: Vec<Target>) -> Result<TargetGroup, CloudError>;
    async fn remove_targets(&self, target_group_id: &str, targets: Vec<Target>) -> Result<TargetGroup, CloudError>;
    /// Succeeds when the target group is already gone
    async fn delete_target_group(&self, target_group_id: &str) -> Result<(), CloudError>;

    // Network load balancers
    /// Exact-name lookup; more than one match is `CloudError::Ambiguous`
    async fn get_load_balancer_by_name(&self, name: &str) -> Result<Option<NetworkLoadBalancer>, CloudError>;
    async fn create_load_balancer(&self, request: CreateNetworkLoadBalancerRequest) -> Result<NetworkLoadBalancer, CloudError>;
    /// Succeeds when the balancer is already gone
    async fn delete_load_balancer(&self, load_balancer_id: &str) -> Result<(), CloudError>;
    async fn add_listener(&self, load_balancer_id: &str, listener: ListenerSpec) -> Result<NetworkLoadBalancer, CloudError>;
    async fn remove_listener(&self, load_balancer_id: &str, listener_name: &str) -> Result<NetworkLoadBalancer, CloudError>;
    async fn attach_target_group(&self, load_balancer_id: &str, attached: AttachedTargetGroup) -> Result<NetworkLoadBalancer, CloudError>;
    async fn detach_target_group(&self, load_balancer_id: &str, target_group_id: &str) -> Result<NetworkLoadBalancer, CloudError>;
}
