//! Node initialization and lifecycle.
//!
//! Kubelets started with an external cloud provider register their Node
//! with the uninitialized taint. This controller fills in what only the
//! cloud knows (providerID, addresses, zone and instance type labels) and
//! then lifts the taint. Initialized nodes of this provider are revisited
//! periodically: addresses are refreshed, a NotReady node whose instance is
//! gone is deleted, and one whose instance is stopped gets the shutdown taint.

use crate::backoff::{ExponentialBackoff, ItemBackoff};
use crate::cloudprovider::{Instances, Zone, Zones};
use crate::error::ControllerError;
use crate::listers::node_provider_id;
use crate::provider_id::{PROVIDER_NAME, belongs_to_provider};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, NodeAddress, Taint};
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig, Error as ControllerRunError};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, watcher};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const UNINITIALIZED_TAINT: &str = "node.cloudprovider.kubernetes.io/uninitialized";
pub const SHUTDOWN_TAINT: &str = "node.cloudprovider.kubernetes.io/shutdown";
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
pub const REGION_LABEL: &str = "topology.kubernetes.io/region";
pub const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";

/// How often an initialized node is checked against its instance
pub const NODE_MONITOR_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Changes to a Node's metadata and spec
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePatch {
    /// Set only when the node has none
    pub provider_id: Option<String>,
    /// Merged into the existing labels
    pub labels: BTreeMap<String, String>,
    /// Replaces the taint list
    pub taints: Option<Vec<Taint>>,
}

/// Writes back to Node objects
#[async_trait::async_trait]
pub trait NodeWriter: Send + Sync {
    async fn patch_node(&self, node: &Node, patch: &NodePatch) -> Result<(), ControllerError>;
    /// Replace `status.addresses`
    async fn patch_addresses(&self, node: &Node, addresses: &[NodeAddress]) -> Result<(), ControllerError>;
    async fn delete_node(&self, node: &Node) -> Result<(), ControllerError>;
}

/// [`NodeWriter`] backed by the Kubernetes API
pub struct KubeNodeWriter {
    api: Api<Node>,
}

impl KubeNodeWriter {
    pub fn new(client: Client) -> Self {
        Self { api: Api::all(client) }
    }
}

#[async_trait::async_trait]
impl NodeWriter for KubeNodeWriter {
    async fn patch_node(&self, node: &Node, patch: &NodePatch) -> Result<(), ControllerError> {
        let mut spec = serde_json::Map::new();
        if let Some(provider_id) = &patch.provider_id {
            spec.insert("providerID".to_string(), json!(provider_id));
        }
        if let Some(taints) = &patch.taints {
            spec.insert("taints".to_string(), json!(taints));
        }
        // resourceVersion makes the merge patch fail on a concurrent change
        let body = json!({
            "metadata": {
                "labels": patch.labels,
                "resourceVersion": node.resource_version(),
            },
            "spec": spec,
        });
        self.api
            .patch(&node.name_any(), &PatchParams::default(), &Patch::Merge(&body))
            .await?;
        Ok(())
    }

    async fn patch_addresses(&self, node: &Node, addresses: &[NodeAddress]) -> Result<(), ControllerError> {
        let body = json!({
            "status": {
                "addresses": addresses,
            }
        });
        self.api
            .patch_status(&node.name_any(), &PatchParams::default(), &Patch::Merge(&body))
            .await?;
        Ok(())
    }

    async fn delete_node(&self, node: &Node) -> Result<(), ControllerError> {
        match self.api.delete(&node.name_any(), &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn taints(node: &Node) -> &[Taint] {
    node.spec
        .as_ref()
        .and_then(|spec| spec.taints.as_deref())
        .unwrap_or_default()
}

fn has_taint(node: &Node, key: &str) -> bool {
    taints(node).iter().any(|t| t.key == key)
}

fn without_taint(node: &Node, key: &str) -> Vec<Taint> {
    taints(node).iter().filter(|t| t.key != key).cloned().collect()
}

fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|c| c.status == "True")
}

fn current_addresses(node: &Node) -> &[NodeAddress] {
    node.status
        .as_ref()
        .and_then(|status| status.addresses.as_deref())
        .unwrap_or_default()
}

/// Cloud addresses plus the node's hostname
fn with_hostname(mut addresses: Vec<NodeAddress>, node_name: &str) -> Vec<NodeAddress> {
    if !addresses.iter().any(|a| a.type_ == "Hostname") {
        addresses.push(NodeAddress {
            type_: "Hostname".to_string(),
            address: node_name.to_string(),
        });
    }
    addresses
}

/// Shared state of the Node controller
pub struct NodeContext {
    instances: Arc<dyn Instances>,
    zones: Arc<dyn Zones>,
    writer: Arc<dyn NodeWriter>,
    backoff: Mutex<ItemBackoff<ObjectRef<Node>>>,
}

impl NodeContext {
    pub fn new(instances: Arc<dyn Instances>, zones: Arc<dyn Zones>, writer: Arc<dyn NodeWriter>) -> Self {
        Self {
            instances,
            zones,
            writer,
            backoff: Mutex::new(ItemBackoff::new(ExponentialBackoff::default())),
        }
    }

    fn backoff(&self) -> MutexGuard<'_, ItemBackoff<ObjectRef<Node>>> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn process_node(&self, node: &Node) -> Result<Action, ControllerError> {
        if has_taint(node, UNINITIALIZED_TAINT) {
            self.initialize(node).await?;
            return Ok(Action::requeue(NODE_MONITOR_PERIOD));
        }

        let provider_id = node_provider_id(node);
        if !belongs_to_provider(provider_id) {
            debug!("Node {} is not managed by this provider", node.name_any());
            return Ok(Action::await_change());
        }
        self.monitor(node, provider_id).await?;
        Ok(Action::requeue(NODE_MONITOR_PERIOD))
    }

    /// Look the instance up by providerID when the node has one, by name otherwise
    async fn initialize(&self, node: &Node) -> Result<(), ControllerError> {
        let node_name = node.name_any();
        let known = node_provider_id(node);

        let (provider_id, addresses, instance_type, zone): (String, _, _, Zone) = if known.is_empty() {
            let instance_name = self.instances.current_node_name(&node_name);
            let provider_id = format!(
                "{}://{}",
                PROVIDER_NAME,
                self.instances.instance_id(&instance_name).await?
            );
            (
                provider_id,
                self.instances.node_addresses(&instance_name).await?,
                self.instances.instance_type(&instance_name).await?,
                self.zones.get_zone_by_node_name(&instance_name).await?,
            )
        } else {
            if !belongs_to_provider(known) {
                return Err(ControllerError::InvalidProviderId(format!(
                    "node {} carries {} but belongs to another provider",
                    node_name, known
                )));
            }
            (
                known.to_string(),
                self.instances.node_addresses_by_provider_id(known).await?,
                self.instances.instance_type_by_provider_id(known).await?,
                self.zones.get_zone_by_provider_id(known).await?,
            )
        };

        // Addresses first, the node must be reachable before it is schedulable
        self.writer
            .patch_addresses(node, &with_hostname(addresses, &node_name))
            .await?;

        let patch = NodePatch {
            provider_id: known.is_empty().then(|| provider_id.clone()),
            labels: BTreeMap::from([
                (ZONE_LABEL.to_string(), zone.failure_domain),
                (REGION_LABEL.to_string(), zone.region),
                (INSTANCE_TYPE_LABEL.to_string(), instance_type),
            ]),
            taints: Some(without_taint(node, UNINITIALIZED_TAINT)),
        };
        self.writer.patch_node(node, &patch).await?;

        info!("Initialized node {} as {}", node_name, provider_id);
        Ok(())
    }

    async fn monitor(&self, node: &Node, provider_id: &str) -> Result<(), ControllerError> {
        let node_name = node.name_any();
        let ready = is_ready(node);

        if !ready && !self.instances.instance_exists_by_provider_id(provider_id).await? {
            info!("Instance of NotReady node {} ({}) is gone, deleting the node", node_name, provider_id);
            return self.writer.delete_node(node).await;
        }

        let shutdown = !ready && self.instances.instance_shutdown_by_provider_id(provider_id).await?;
        if shutdown != has_taint(node, SHUTDOWN_TAINT) {
            let mut taints = without_taint(node, SHUTDOWN_TAINT);
            if shutdown {
                info!("Instance of node {} is stopped, tainting it", node_name);
                taints.push(Taint {
                    key: SHUTDOWN_TAINT.to_string(),
                    effect: "NoSchedule".to_string(),
                    ..Default::default()
                });
            } else {
                info!("Node {} is back, removing the shutdown taint", node_name);
            }
            let patch = NodePatch {
                taints: Some(taints),
                ..Default::default()
            };
            self.writer.patch_node(node, &patch).await?;
        }

        let addresses = with_hostname(
            self.instances.node_addresses_by_provider_id(provider_id).await?,
            &node_name,
        );
        if addresses.as_slice() != current_addresses(node) {
            info!("Addresses of node {} changed: {:?}", node_name, addresses);
            self.writer.patch_addresses(node, &addresses).await?;
        }
        Ok(())
    }
}

/// Reconcile one Node
pub async fn reconcile(node: Arc<Node>, ctx: Arc<NodeContext>) -> Result<Action, ControllerError> {
    debug!("Reconciling node {}", node.name_any());
    let action = ctx.process_node(&node).await?;
    ctx.backoff().forget(&ObjectRef::from_obj(&*node));
    Ok(action)
}

/// Requeue retryable failures with backoff, drop the rest until the Node changes
pub fn error_policy(node: Arc<Node>, err: &ControllerError, ctx: Arc<NodeContext>) -> Action {
    let key = ObjectRef::from_obj(&*node);
    let mut backoff = ctx.backoff();
    if err.is_retryable() {
        let delay = backoff.when(&key);
        warn!("Failed to reconcile node {}, retrying in {:?}: {}", key, delay, err);
        Action::requeue(delay)
    } else {
        error!("Failed to reconcile node {}, not retrying: {}", key, err);
        backoff.forget(&key);
        Action::await_change()
    }
}

/// Run the Node controller until shutdown
pub async fn run(api: Api<Node>, ctx: Arc<NodeContext>) {
    info!("Starting Node controller");

    Controller::new(api, watcher::Config::default())
        .with_config(ControllerConfig::default().concurrency(2))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {}", obj),
                Err(ControllerRunError::ReconcilerFailed(..)) => {}
                Err(e) => warn!("Node controller error: {}", e),
            }
        })
        .await;

    info!("Node controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::Cloud;
    use crate::test_utils::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus};
    use yandex_cloud_client::{CloudApi, InstanceStatus, MockCloudClient};

    #[derive(Debug, Clone, PartialEq)]
    enum NodeWrite {
        Patch(NodePatch),
        Addresses(Vec<(String, String)>),
        Delete,
    }

    #[derive(Default)]
    struct RecordingWriter {
        writes: Mutex<Vec<NodeWrite>>,
    }

    impl RecordingWriter {
        fn writes(&self) -> Vec<NodeWrite> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl NodeWriter for RecordingWriter {
        async fn patch_node(&self, _node: &Node, patch: &NodePatch) -> Result<(), ControllerError> {
            self.writes.lock().unwrap().push(NodeWrite::Patch(patch.clone()));
            Ok(())
        }

        async fn patch_addresses(&self, _node: &Node, addresses: &[NodeAddress]) -> Result<(), ControllerError> {
            let pairs = addresses
                .iter()
                .map(|a| (a.type_.clone(), a.address.clone()))
                .collect();
            self.writes.lock().unwrap().push(NodeWrite::Addresses(pairs));
            Ok(())
        }

        async fn delete_node(&self, _node: &Node) -> Result<(), ControllerError> {
            self.writes.lock().unwrap().push(NodeWrite::Delete);
            Ok(())
        }
    }

    struct Fixture {
        mock: MockCloudClient,
        writer: Arc<RecordingWriter>,
        ctx: Arc<NodeContext>,
    }

    fn fixture() -> Fixture {
        let mock = MockCloudClient::new(FOLDER_ID, REGION_ID);
        mock.add_subnet(subnet("e9b-a", DEFAULT_NETWORK_ID));
        mock.add_instance(instance(
            "fhm1",
            "worker-0",
            &[("e9b-a", "10.0.0.5", Some("203.0.113.7"))],
        ));

        let api: Arc<dyn CloudApi> = Arc::new(mock.clone());
        let cloud = Cloud::new(
            Arc::new(cloud_config()),
            api,
            StaticNodeLister::new(vec![]),
            StaticServiceLister::new(vec![]),
        );
        let writer = Arc::new(RecordingWriter::default());
        let ctx = Arc::new(NodeContext::new(cloud.instances(), cloud.zones(), writer.clone()));
        Fixture { mock, writer, ctx }
    }

    fn taint(key: &str) -> Taint {
        Taint {
            key: key.to_string(),
            effect: "NoSchedule".to_string(),
            ..Default::default()
        }
    }

    fn tainted(mut node: Node, keys: &[&str]) -> Node {
        if let Some(spec) = node.spec.as_mut() {
            spec.taints = Some(keys.iter().map(|k| taint(k)).collect());
        }
        node
    }

    fn with_status(mut node: Node, ready: bool, addresses: &[(&str, &str)]) -> Node {
        node.status = Some(NodeStatus {
            addresses: Some(
                addresses
                    .iter()
                    .map(|(kind, address)| NodeAddress {
                        type_: (*kind).to_string(),
                        address: (*address).to_string(),
                    })
                    .collect(),
            ),
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        node
    }

    fn worker_addresses() -> Vec<(String, String)> {
        vec![
            ("InternalIP".to_string(), "10.0.0.5".to_string()),
            ("ExternalIP".to_string(), "203.0.113.7".to_string()),
            ("Hostname".to_string(), "worker-0".to_string()),
        ]
    }

    fn current(addresses: &[(String, String)]) -> Vec<(&str, &str)> {
        addresses.iter().map(|(k, a)| (k.as_str(), a.as_str())).collect()
    }

    async fn reconcile_once(f: &Fixture, node: Node) -> Action {
        let node = Arc::new(node);
        match reconcile(Arc::clone(&node), Arc::clone(&f.ctx)).await {
            Ok(action) => action,
            Err(e) => error_policy(node, &e, Arc::clone(&f.ctx)),
        }
    }

    #[tokio::test]
    async fn test_initializes_node_without_provider_id() {
        let f = fixture();
        let fresh = tainted(node("worker-0", None), &[UNINITIALIZED_TAINT, "dedicated"]);

        let action = reconcile_once(&f, fresh).await;

        assert_eq!(action, Action::requeue(NODE_MONITOR_PERIOD));
        assert_eq!(
            f.writer.writes(),
            vec![
                NodeWrite::Addresses(worker_addresses()),
                NodeWrite::Patch(NodePatch {
                    provider_id: Some("yandex://b1gfolder/ru-central1-a/worker-0".to_string()),
                    labels: BTreeMap::from([
                        (INSTANCE_TYPE_LABEL.to_string(), "standard-v3".to_string()),
                        (REGION_LABEL.to_string(), "ru-central1".to_string()),
                        (ZONE_LABEL.to_string(), "ru-central1-a".to_string()),
                    ]),
                    taints: Some(vec![taint("dedicated")]),
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_initialization_keeps_existing_provider_id() {
        let f = fixture();
        let registered = tainted(node("worker-0", Some("yandex://fhm1")), &[UNINITIALIZED_TAINT]);

        reconcile_once(&f, registered).await;

        let writes = f.writer.writes();
        let Some(NodeWrite::Patch(patch)) = writes.last() else {
            panic!("expected a node patch, got {:?}", writes);
        };
        assert_eq!(patch.provider_id, None);
        assert_eq!(patch.labels.get(ZONE_LABEL).map(String::as_str), Some("ru-central1-a"));
        assert_eq!(patch.taints, Some(vec![]));
    }

    #[tokio::test]
    async fn test_missing_instance_delays_initialization() {
        let f = fixture();
        let unknown = tainted(node("worker-9", None), &[UNINITIALIZED_TAINT]);

        let action = reconcile_once(&f, unknown.clone()).await;
        assert_eq!(action, Action::requeue(Duration::from_millis(5)));
        assert!(f.writer.writes().is_empty());

        // The instance shows up and the next attempt succeeds
        f.mock.add_instance(instance("fhm9", "worker-9", &[("e9b-a", "10.0.0.9", None)]));
        let action = reconcile_once(&f, unknown).await;
        assert_eq!(action, Action::requeue(NODE_MONITOR_PERIOD));
        assert_eq!(f.writer.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_node_of_deleted_instance_is_removed() {
        let f = fixture();
        let orphan = with_status(node("worker-7", Some("yandex://fhm7")), false, &[]);

        reconcile_once(&f, orphan).await;
        assert_eq!(f.writer.writes(), vec![NodeWrite::Delete]);

        // A Ready node is never deleted on a lookup miss
        let f = fixture();
        let ready = with_status(node("worker-7", Some("yandex://fhm7")), true, &[]);
        let action = reconcile_once(&f, ready).await;
        assert!(!f.writer.writes().contains(&NodeWrite::Delete));
        assert_eq!(action, Action::requeue(Duration::from_millis(5)));
    }

    #[tokio::test]
    async fn test_shutdown_taint_follows_instance_state() {
        let f = fixture();
        let mut stopped = instance("fhm1", "worker-0", &[("e9b-a", "10.0.0.5", Some("203.0.113.7"))]);
        stopped.status = InstanceStatus::Stopped;
        f.mock.add_instance(stopped);
        let addresses = worker_addresses();

        let down = with_status(node("worker-0", Some("yandex://fhm1")), false, &current(&addresses));
        reconcile_once(&f, down).await;
        assert_eq!(
            f.writer.writes(),
            vec![NodeWrite::Patch(NodePatch {
                taints: Some(vec![taint(SHUTDOWN_TAINT)]),
                ..Default::default()
            })]
        );

        let back = tainted(
            with_status(node("worker-0", Some("yandex://fhm1")), true, &current(&addresses)),
            &[SHUTDOWN_TAINT],
        );
        reconcile_once(&f, back).await;
        assert_eq!(
            f.writer.writes().last(),
            Some(&NodeWrite::Patch(NodePatch {
                taints: Some(vec![]),
                ..Default::default()
            }))
        );
    }

    #[tokio::test]
    async fn test_addresses_refreshed_only_on_change() {
        let f = fixture();
        let addresses = worker_addresses();

        let settled = with_status(node("worker-0", Some("yandex://fhm1")), true, &current(&addresses));
        assert_eq!(reconcile_once(&f, settled).await, Action::requeue(NODE_MONITOR_PERIOD));
        assert!(f.writer.writes().is_empty());

        let moved = with_status(
            node("worker-0", Some("yandex://fhm1")),
            true,
            &[("InternalIP", "10.0.0.99"), ("Hostname", "worker-0")],
        );
        reconcile_once(&f, moved).await;
        assert_eq!(f.writer.writes(), vec![NodeWrite::Addresses(worker_addresses())]);
    }

    #[tokio::test]
    async fn test_foreign_node_is_left_alone() {
        let f = fixture();
        let foreign = with_status(node("gpu-0", Some("aws:///eu-west-1a/i-0abc")), false, &[]);

        assert_eq!(reconcile_once(&f, foreign).await, Action::await_change());
        assert!(f.writer.writes().is_empty());
        assert_eq!(f.mock.read_count(), 0);

        // The uninitialized taint with a foreign providerID is not retried
        let claimed = tainted(node("gpu-1", Some("aws:///eu-west-1a/i-0def")), &[UNINITIALIZED_TAINT]);
        assert_eq!(reconcile_once(&f, claimed).await, Action::await_change());
        assert!(f.writer.writes().is_empty());
    }
}
