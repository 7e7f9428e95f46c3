//! Cloud provider capability contract.
//!
//! The controllers only see these traits. Routes is optional; see
//! [`crate::cloud::Cloud::routes`].

use crate::error::ControllerError;
use k8s_openapi::api::core::v1::{LoadBalancerStatus, Node, NodeAddress, Service};
use std::sync::Arc;

/// Failure domain of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub failure_domain: String,
    pub region: String,
}

/// Pod CIDR routed to a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Unique name, the node name for routes this provider owns
    pub name: String,
    pub target_node: String,
    pub destination_cidr: String,
    /// Next hop no longer matches any node address
    pub blackhole: bool,
}

/// Node identity and addressing
#[async_trait::async_trait]
pub trait Instances: Send + Sync {
    async fn node_addresses(&self, node_name: &str) -> Result<Vec<NodeAddress>, ControllerError>;
    async fn node_addresses_by_provider_id(&self, provider_id: &str) -> Result<Vec<NodeAddress>, ControllerError>;
    /// `{folder}/{zone}/{instance name}`
    async fn instance_id(&self, node_name: &str) -> Result<String, ControllerError>;
    async fn instance_type(&self, node_name: &str) -> Result<String, ControllerError>;
    async fn instance_type_by_provider_id(&self, provider_id: &str) -> Result<String, ControllerError>;
    /// `false` once the backing instance is deleted
    async fn instance_exists_by_provider_id(&self, provider_id: &str) -> Result<bool, ControllerError>;
    async fn instance_shutdown_by_provider_id(&self, provider_id: &str) -> Result<bool, ControllerError>;
    fn current_node_name(&self, hostname: &str) -> String;
}

/// Service type LoadBalancer support
#[async_trait::async_trait]
pub trait LoadBalancer: Send + Sync {
    /// `None` when no balancer exists for the Service
    async fn get_load_balancer(&self, service: &Service) -> Result<Option<LoadBalancerStatus>, ControllerError>;
    fn get_load_balancer_name(&self, service: &Service) -> String;
    async fn ensure_load_balancer(&self, service: &Service, nodes: &[Arc<Node>]) -> Result<LoadBalancerStatus, ControllerError>;
    async fn update_load_balancer(&self, service: &Service, nodes: &[Arc<Node>]) -> Result<(), ControllerError>;
    async fn ensure_load_balancer_deleted(&self, service: &Service) -> Result<(), ControllerError>;
}

/// Zone and region lookup
#[async_trait::async_trait]
pub trait Zones: Send + Sync {
    /// Zone of the controller's own instance
    async fn get_zone(&self) -> Result<Zone, ControllerError>;
    async fn get_zone_by_provider_id(&self, provider_id: &str) -> Result<Zone, ControllerError>;
    async fn get_zone_by_node_name(&self, node_name: &str) -> Result<Zone, ControllerError>;
}

/// Pod network routes
#[async_trait::async_trait]
pub trait Routes: Send + Sync {
    async fn list_routes(&self) -> Result<Vec<Route>, ControllerError>;
    async fn create_route(&self, name_hint: &str, route: &Route) -> Result<(), ControllerError>;
    async fn update_route(&self, route: &Route) -> Result<(), ControllerError>;
    async fn delete_route(&self, route: &Route) -> Result<(), ControllerError>;
}
