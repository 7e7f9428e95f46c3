//! Pod CIDR route sync.
//!
//! Periodically converges the route table with the node set through the
//! Routes capability: a route per node with a pod CIDR, none for nodes that
//! are gone.

use crate::cloudprovider::{Route, Routes};
use crate::error::ControllerError;
use crate::listers::{NodeLister, node_internal_ip};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often the route table is converged with the node set
pub const ROUTE_SYNC_PERIOD: Duration = Duration::from_secs(10);

fn pod_cidr(node: &Node) -> Option<&str> {
    node.spec
        .as_ref()?
        .pod_cidr
        .as_deref()
        .filter(|cidr| !cidr.is_empty())
}

/// Converge routes with `nodes`.
///
/// Every node is attempted even when an earlier one fails; the first error
/// is returned.
pub async fn reconcile_routes(routes: &dyn Routes, nodes: &[Arc<Node>]) -> Result<(), ControllerError> {
    let mut listed: BTreeMap<String, Vec<Route>> = BTreeMap::new();
    for route in routes.list_routes().await? {
        listed.entry(route.target_node.clone()).or_default().push(route);
    }

    let mut first_error = None;
    let mut record = |result: Result<(), ControllerError>| {
        if let Err(e) = result {
            warn!("Route sync step failed: {}", e);
            first_error.get_or_insert(e);
        }
    };

    let names: BTreeSet<String> = nodes.iter().map(|n| n.name_any()).collect();
    for node in nodes {
        let node_name = node.name_any();
        let Some(cidr) = pod_cidr(node) else {
            debug!("Node {} has no pod CIDR yet", node_name);
            continue;
        };
        if node_internal_ip(node).is_none() {
            warn!("Node {} has no InternalIP address, not routing {}", node_name, cidr);
            continue;
        }

        let desired = Route {
            name: node_name.clone(),
            target_node: node_name.clone(),
            destination_cidr: cidr.to_string(),
            blackhole: false,
        };
        match listed.get(&node_name).map(Vec::as_slice) {
            None | Some([]) => {
                info!("Creating route {} -> {}", cidr, node_name);
                record(routes.create_route(&node_name, &desired).await);
            }
            Some([existing]) if existing.destination_cidr == desired.destination_cidr => {}
            Some(_) => {
                info!("Updating route of node {} to {}", node_name, cidr);
                record(routes.update_route(&desired).await);
            }
        }
    }

    for (node_name, stale) in &listed {
        if names.contains(node_name) {
            continue;
        }
        for route in stale {
            info!(
                "Deleting route {} of removed node {}",
                route.destination_cidr, node_name
            );
            record(routes.delete_route(route).await);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Converge the route table every [`ROUTE_SYNC_PERIOD`]
pub async fn run(routes: Arc<dyn Routes>, nodes: Arc<dyn NodeLister>) {
    info!("Starting route sync every {:?}", ROUTE_SYNC_PERIOD);
    let mut ticker = tokio::time::interval(ROUTE_SYNC_PERIOD);
    loop {
        ticker.tick().await;
        if let Err(e) = reconcile_routes(routes.as_ref(), &nodes.list()).await {
            warn!("Route sync failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::NODE_ROLE_LABEL;
    use crate::reconciler::routes::RouteReconciler;
    use crate::test_utils::*;
    use yandex_cloud_client::{CloudApi, CloudError, MockCall, MockCloudClient, RouteTable, StaticRoute};

    const TABLE: &str = "enproutes";

    fn tagged(node: &str, cidr: &str, hop: &str) -> StaticRoute {
        StaticRoute {
            destination_prefix: cidr.to_string(),
            next_hop_address: hop.to_string(),
            labels: BTreeMap::from([(NODE_ROLE_LABEL.to_string(), node.to_string())]),
        }
    }

    fn foreign() -> StaticRoute {
        StaticRoute {
            destination_prefix: "0.0.0.0/0".to_string(),
            next_hop_address: "10.0.0.1".to_string(),
            labels: BTreeMap::new(),
        }
    }

    fn setup(static_routes: Vec<StaticRoute>, nodes: Vec<Node>) -> (MockCloudClient, RouteReconciler, Vec<Arc<Node>>) {
        let mock = MockCloudClient::new(FOLDER_ID, REGION_ID);
        mock.add_route_table(RouteTable {
            id: TABLE.to_string(),
            folder_id: FOLDER_ID.to_string(),
            name: "k8s-pods".to_string(),
            network_id: DEFAULT_NETWORK_ID.to_string(),
            static_routes,
        });
        let lister = StaticNodeLister::new(nodes);
        let api: Arc<dyn CloudApi> = Arc::new(mock.clone());
        let routes = RouteReconciler::new(api, TABLE.to_string(), lister.clone());
        (mock, routes, lister.list())
    }

    fn workers() -> Vec<Node> {
        vec![
            routed_node("worker-0", "10.100.0.0/24", "10.0.0.5"),
            routed_node("worker-1", "10.100.1.0/24", "10.0.0.6"),
            // No pod CIDR assigned yet
            node("worker-2", Some("yandex://worker-2")),
        ]
    }

    fn table(mock: &MockCloudClient) -> Vec<StaticRoute> {
        mock.route_table(TABLE).unwrap().static_routes
    }

    #[tokio::test]
    async fn test_converges_whole_table() {
        let (mock, routes, nodes) = setup(
            vec![
                tagged("worker-0", "10.100.9.0/24", "10.0.0.5"),
                foreign(),
                tagged("gone", "10.100.5.0/24", "10.0.0.9"),
                tagged("worker-0", "10.100.8.0/24", "10.0.0.5"),
            ],
            workers(),
        );

        reconcile_routes(&routes, &nodes).await.unwrap();

        assert_eq!(
            table(&mock),
            vec![
                tagged("worker-0", "10.100.0.0/24", "10.0.0.5"),
                foreign(),
                tagged("worker-1", "10.100.1.0/24", "10.0.0.6"),
            ]
        );

        // Converged: nothing left to write
        mock.clear_calls();
        reconcile_routes(&routes, &nodes).await.unwrap();
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_nodes() {
        let (mock, routes, nodes) = setup(vec![], workers());
        mock.fail_next(
            "update_route_table_static_routes",
            CloudError::Api {
                status: 503,
                message: "unavailable".to_string(),
            },
        );

        let result = reconcile_routes(&routes, &nodes).await;
        assert!(matches!(&result, Err(e) if e.is_retryable()));
        assert_eq!(table(&mock), vec![tagged("worker-1", "10.100.1.0/24", "10.0.0.6")]);

        reconcile_routes(&routes, &nodes).await.unwrap();
        assert_eq!(table(&mock).len(), 2);
    }

    #[tokio::test]
    async fn test_node_without_address_is_skipped() {
        let mut unaddressed = routed_node("worker-3", "10.100.3.0/24", "10.0.0.8");
        unaddressed.status = None;
        let (mock, routes, nodes) = setup(vec![], vec![unaddressed]);

        reconcile_routes(&routes, &nodes).await.unwrap();
        assert!(table(&mock).is_empty());
        assert!(
            !mock
                .calls()
                .iter()
                .any(|c| matches!(c, MockCall::UpdateRouteTable { .. }))
        );
    }
}
