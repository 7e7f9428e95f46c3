//! VPC operations for MockCloudClient
//!
//! Handles subnets and route tables

use super::{MockCall, MockCloudClient};
use crate::error::CloudError;
use crate::models::*;

pub async fn get_subnet(client: &MockCloudClient, subnet_id: &str) -> Result<Subnet, CloudError> {
    client.injected("get_subnet")?;
    client.record_read();
    client
        .subnets
        .lock()
        .unwrap()
        .get(subnet_id)
        .cloned()
        .ok_or_else(|| CloudError::NotFound(format!("Subnet {} not found", subnet_id)))
}

pub async fn get_route_table(client: &MockCloudClient, route_table_id: &str) -> Result<RouteTable, CloudError> {
    client.injected("get_route_table")?;
    client.record_read();
    client
        .route_tables
        .lock()
        .unwrap()
        .get(route_table_id)
        .cloned()
        .ok_or_else(|| CloudError::NotFound(format!("Route table {} not found", route_table_id)))
}

pub async fn update_route_table_static_routes(
    client: &MockCloudClient,
    route_table_id: &str,
    static_routes: Vec<StaticRoute>,
) -> Result<RouteTable, CloudError> {
    client.injected("update_route_table_static_routes")?;
    client.record(MockCall::UpdateRouteTable {
        route_table_id: route_table_id.to_string(),
        static_routes: static_routes.clone(),
    });

    let mut tables = client.route_tables.lock().unwrap();
    let table = tables
        .get_mut(route_table_id)
        .ok_or_else(|| CloudError::NotFound(format!("Route table {} not found", route_table_id)))?;
    table.static_routes = static_routes;
    Ok(table.clone())
}
