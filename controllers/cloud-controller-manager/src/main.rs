//! Yandex Cloud Controller Manager
//!
//! Connects a Kubernetes cluster to Yandex Cloud: reports node addresses
//! and zones, maintains network load balancers for `LoadBalancer` Services,
//! keeps per-network target groups in step with the node set and, when a
//! route table is configured, programs pod CIDR routes.

mod annotations;
mod backoff;
mod cloud;
mod cloudprovider;
mod config;
mod controller;
mod error;
mod listers;
mod node_controller;
mod provider_id;
mod reconciler;
mod route_controller;
mod service_controller;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::CloudConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting Yandex Cloud Controller Manager");

    let config = CloudConfig::from_env().await?;

    info!("Configuration:");
    info!("  Cluster: {}", config.cluster_name);
    info!("  Folder: {}", config.folder_id);
    info!("  Zone: {} (region {})", config.zone_id, config.region_id);
    info!("  Default target group network: {}", config.lb_target_group_network_id);
    info!(
        "  Default listener subnet: {}",
        config.lb_listener_subnet_id.as_deref().unwrap_or("none (external balancers)")
    );
    info!(
        "  Route table: {}",
        config.route_table_id.as_deref().unwrap_or("none (routes disabled)")
    );
    info!("  Workers: {}", config.workers);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
