//! Main controller implementation.
//!
//! `Controller` builds the cloud provider, starts the Node watch and waits
//! for the Node cache to fill, then starts the Node and Service controllers,
//! the node-driven target group sync and, when a route table is configured,
//! the route sync loop.

use crate::cloud::Cloud;
use crate::config::CloudConfig;
use crate::error::ControllerError;
use crate::listers::{NodeLister, ServiceLister};
use crate::node_controller::{self, KubeNodeWriter, NodeContext};
use crate::route_controller;
use crate::service_controller::{self, KubeServiceWriter, ServiceContext};
use crate::watcher::{sync_target_groups_on_change, watch_nodes};
use futures::channel::mpsc;
use k8s_openapi::api::core::v1::{Node, Service};
use kube::{Api, Client};
use kube_runtime::reflector;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use yandex_cloud_client::{CloudApi, YandexCloudClient};

/// Main controller for the Yandex Cloud provider.
pub struct Controller {
    node_watcher: JoinHandle<Result<(), ControllerError>>,
    node_controller: JoinHandle<()>,
    target_group_sync: JoinHandle<()>,
    service_controller: JoinHandle<()>,
    route_sync: Option<JoinHandle<()>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: CloudConfig) -> Result<Self, ControllerError> {
        info!("Initializing Yandex Cloud Controller Manager");

        let kube_client = Client::try_default().await?;

        let cloud_client = YandexCloudClient::new(
            config.credentials()?,
            config.folder_id.clone(),
            config.region_id.clone(),
        )?;
        let api: Arc<dyn CloudApi> = Arc::new(cloud_client);

        let (node_store, node_writer) = reflector::store::<Node>();
        let nodes: Arc<dyn NodeLister> = Arc::new(node_store.clone());
        let services_controller = service_controller::controller(Api::<Service>::all(kube_client.clone()));
        let services: Arc<dyn ServiceLister> = Arc::new(services_controller.store());

        let config = Arc::new(config);
        let cloud = Arc::new(Cloud::new(
            Arc::clone(&config),
            api,
            Arc::clone(&nodes),
            services,
        ));
        let zone = cloud.zones().get_zone().await?;
        info!(
            "Provider {} running in zone {} (region {})",
            cloud.provider_name(),
            zone.failure_domain,
            zone.region
        );

        // Capacity 1: pending node changes coalesce into one resync
        let (node_changes, node_changes_rx) = mpsc::channel(1);
        let (service_resyncs, service_resyncs_rx) = mpsc::channel(1);
        let node_api: Api<Node> = Api::all(kube_client.clone());
        let node_watcher = tokio::spawn(watch_nodes(node_api.clone(), node_writer, node_changes));

        // An empty node cache would look like a cluster without nodes
        info!("Waiting for Node cache to sync");
        node_store
            .wait_until_ready()
            .await
            .map_err(|e| ControllerError::Watch(format!("Node cache never became ready: {}", e)))?;
        info!("Node cache synced");

        let node_ctx = Arc::new(NodeContext::new(
            cloud.instances(),
            cloud.zones(),
            Arc::new(KubeNodeWriter::new(kube_client.clone())),
        ));
        let node_controller = tokio::spawn(node_controller::run(node_api, node_ctx));

        let target_group_sync = tokio::spawn(sync_target_groups_on_change(
            Arc::clone(cloud.target_groups()),
            Arc::clone(&nodes),
            node_changes_rx,
            service_resyncs,
        ));

        let route_sync = cloud
            .routes()
            .map(|routes| tokio::spawn(route_controller::run(routes, Arc::clone(&nodes))));

        let service_ctx = Arc::new(ServiceContext::new(
            Arc::clone(&cloud),
            nodes,
            Arc::new(KubeServiceWriter::new(kube_client)),
        ));
        let service_controller = tokio::spawn(service_controller::run(
            services_controller,
            service_resyncs_rx,
            service_ctx,
            cloud.config().workers,
        ));

        Ok(Self {
            node_watcher,
            node_controller,
            target_group_sync,
            service_controller,
            route_sync,
        })
    }

    /// Runs the controller until shutdown.
    ///
    /// The Node and Service controllers stop on SIGTERM or Ctrl-C after their
    /// in-flight reconciliations finish; a failed Node watch stops everything.
    pub async fn run(self) -> Result<(), ControllerError> {
        let Self {
            mut node_watcher,
            node_controller,
            target_group_sync,
            mut service_controller,
            route_sync,
        } = self;
        info!("Yandex Cloud Controller Manager running");

        let (result, graceful) = tokio::select! {
            joined = &mut service_controller => (
                joined.map_err(|e| ControllerError::Watch(format!("Service controller panicked: {}", e))),
                true,
            ),
            joined = &mut node_watcher => (
                joined
                    .map_err(|e| ControllerError::Watch(format!("Node watcher panicked: {}", e)))
                    .and_then(|r| r),
                false,
            ),
        };

        if graceful {
            node_watcher.abort();
            join_logged("Node watcher", node_watcher).await;
        } else {
            service_controller.abort();
            join_logged("Service controller", service_controller).await;
            node_controller.abort();
        }
        join_logged("Node controller", node_controller).await;
        target_group_sync.abort();
        join_logged("Target group sync", target_group_sync).await;
        if let Some(route_sync) = route_sync {
            route_sync.abort();
            join_logged("Route sync", route_sync).await;
        }
        info!("Yandex Cloud Controller Manager stopped");

        result
    }
}

/// Wait for a task; cancellation is expected, a panic is logged
async fn join_logged<T>(name: &str, handle: JoinHandle<T>) {
    match handle.await {
        Err(e) if !e.is_cancelled() => warn!("{} task failed: {}", name, e),
        _ => {}
    }
}
