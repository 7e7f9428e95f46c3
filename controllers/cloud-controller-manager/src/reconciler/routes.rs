//! Pod CIDR routes in the VPC route table.
//!
//! Each node owns at most one static route, tagged with its name under
//! [`NODE_ROLE_LABEL`]. Untagged routes belong to someone else and are kept
//! as they are. Every change rewrites the whole static route list.

use crate::annotations::NODE_ROLE_LABEL;
use crate::cloudprovider::{Route, Routes};
use crate::error::ControllerError;
use crate::listers::{NodeLister, node_internal_ip};
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use yandex_cloud_client::{CloudApi, StaticRoute};

fn owner(route: &StaticRoute) -> Option<&str> {
    route.labels.get(NODE_ROLE_LABEL).map(String::as_str)
}

fn owned_route(node_name: &str, destination_cidr: &str, next_hop: &str) -> StaticRoute {
    StaticRoute {
        destination_prefix: destination_cidr.to_string(),
        next_hop_address: next_hop.to_string(),
        labels: BTreeMap::from([(NODE_ROLE_LABEL.to_string(), node_name.to_string())]),
    }
}

/// Leave exactly one route tagged for the node: the first tagged entry is
/// replaced in place, later duplicates are dropped, and the route is appended
/// when the node had none
fn upsert(routes: &mut Vec<StaticRoute>, node_name: &str, destination_cidr: &str, next_hop: &str) {
    let desired = owned_route(node_name, destination_cidr, next_hop);
    match routes.iter().position(|r| owner(r) == Some(node_name)) {
        Some(first) => {
            routes[first] = desired;
            let mut index = 0;
            routes.retain(|r| {
                let keep = index <= first || owner(r) != Some(node_name);
                index += 1;
                keep
            });
        }
        None => routes.push(desired),
    }
}

/// Routes capability backed by one route table
pub struct RouteReconciler {
    api: Arc<dyn CloudApi>,
    route_table_id: String,
    nodes: Arc<dyn NodeLister>,
    lock: Mutex<()>,
}

impl RouteReconciler {
    pub fn new(api: Arc<dyn CloudApi>, route_table_id: String, nodes: Arc<dyn NodeLister>) -> Self {
        Self {
            api,
            route_table_id,
            nodes,
            lock: Mutex::new(()),
        }
    }

    async fn current_routes(&self) -> Result<Vec<StaticRoute>, ControllerError> {
        Ok(self.api.get_route_table(&self.route_table_id).await?.static_routes)
    }

    /// Write `routes` back unless nothing changed
    async fn store(&self, before: &[StaticRoute], routes: Vec<StaticRoute>) -> Result<(), ControllerError> {
        if before == routes.as_slice() {
            debug!("Route table {} already up to date", self.route_table_id);
            return Ok(());
        }
        info!(
            "Updating route table {} with {} static routes",
            self.route_table_id,
            routes.len()
        );
        self.api
            .update_route_table_static_routes(&self.route_table_id, routes)
            .await?;
        Ok(())
    }

    fn node_ip(&self, node_name: &str) -> Result<String, ControllerError> {
        let node = self
            .nodes
            .get(node_name)
            .ok_or_else(|| ControllerError::Node(node_name.to_string(), "not found".to_string()))?;
        node_internal_ip(&node)
            .ok_or_else(|| ControllerError::Node(node_name.to_string(), "has no InternalIP address".to_string()))
    }

    async fn upsert_route(&self, route: &Route) -> Result<(), ControllerError> {
        let next_hop = self.node_ip(&route.target_node)?;
        let _guard = self.lock.lock().await;

        let before = self.current_routes().await?;
        let mut routes = before.clone();
        upsert(&mut routes, &route.target_node, &route.destination_cidr, &next_hop);
        self.store(&before, routes).await
    }
}

#[async_trait::async_trait]
impl Routes for RouteReconciler {
    async fn list_routes(&self) -> Result<Vec<Route>, ControllerError> {
        let _guard = self.lock.lock().await;
        let before = self.current_routes().await?;

        let ips: HashMap<String, String> = self
            .nodes
            .list()
            .iter()
            .filter_map(|node| node_internal_ip(node).map(|ip| (node.name_any(), ip)))
            .collect();

        let mut routes = before.clone();
        let mut listed = Vec::new();
        for route in routes.iter_mut() {
            let Some(node_name) = owner(route).map(ToString::to_string) else {
                continue;
            };
            let blackhole = match ips.get(&node_name) {
                Some(ip) if *ip != route.next_hop_address => {
                    info!(
                        "Route {} of node {} points at {}, node is now at {}",
                        route.destination_prefix, node_name, route.next_hop_address, ip
                    );
                    route.next_hop_address = ip.clone();
                    false
                }
                Some(_) => false,
                None => true,
            };
            listed.push(Route {
                name: node_name.clone(),
                target_node: node_name,
                destination_cidr: route.destination_prefix.clone(),
                blackhole,
            });
        }

        self.store(&before, routes).await?;
        Ok(listed)
    }

    async fn create_route(&self, name_hint: &str, route: &Route) -> Result<(), ControllerError> {
        debug!("Creating route {} for node {}", name_hint, route.target_node);
        self.upsert_route(route).await
    }

    async fn update_route(&self, route: &Route) -> Result<(), ControllerError> {
        self.upsert_route(route).await
    }

    async fn delete_route(&self, route: &Route) -> Result<(), ControllerError> {
        let _guard = self.lock.lock().await;
        let before = self.current_routes().await?;
        let routes: Vec<StaticRoute> = before
            .iter()
            .filter(|r| owner(r) != Some(route.target_node.as_str()))
            .cloned()
            .collect();
        self.store(&before, routes).await
    }
}
