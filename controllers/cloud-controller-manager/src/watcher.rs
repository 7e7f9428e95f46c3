//! Node cache and node set change detection.
//!
//! The Node watch feeds the reflector store every capability reads through
//! [`crate::listers::NodeLister`]. Load balancers only care about which nodes
//! may receive traffic, so status heartbeats are filtered out and a change
//! signal is sent only when that set changes. Each change resyncs the
//! target groups before it is passed on to the Service controller.

use crate::error::ControllerError;
use crate::listers::{NodeLister, is_load_balancer_target, node_provider_id};
use crate::reconciler::target_groups::TargetGroupReconciler;
use futures::StreamExt;
use futures::channel::mpsc;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, ResourceExt};
use kube_runtime::reflector::{self, store::Writer};
use kube_runtime::{WatchStreamExt, watcher};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a load balancer sees of a node: providerID and whether it takes traffic
type NodeKey = (String, bool);

fn node_key(node: &Node) -> NodeKey {
    (node_provider_id(node).to_string(), is_load_balancer_target(node))
}

/// Tracks the load balancer relevant view of the node set across watch events
#[derive(Debug, Default)]
pub struct NodeSetTracker {
    current: BTreeMap<String, NodeKey>,
    /// Relist in progress
    relisted: Option<BTreeMap<String, NodeKey>>,
}

impl NodeSetTracker {
    /// Apply one event; `true` when the node set changed
    pub fn observe(&mut self, event: &watcher::Event<Node>) -> bool {
        match event {
            watcher::Event::Apply(node) => {
                let key = node_key(node);
                self.current.insert(node.name_any(), key.clone()) != Some(key)
            }
            watcher::Event::Delete(node) => self.current.remove(&node.name_any()).is_some(),
            watcher::Event::Init => {
                self.relisted = Some(BTreeMap::new());
                false
            }
            watcher::Event::InitApply(node) => {
                self.relisted
                    .get_or_insert_with(BTreeMap::new)
                    .insert(node.name_any(), node_key(node));
                false
            }
            watcher::Event::InitDone => {
                let relisted = self.relisted.take().unwrap_or_default();
                let changed = relisted != self.current;
                self.current = relisted;
                changed
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.current.len()
    }
}

/// Watch Nodes into `writer`; a node set change sends on `changes`.
///
/// Signals coalesce: a full channel already holds a pending change.
pub async fn watch_nodes(
    api: Api<Node>,
    writer: Writer<Node>,
    mut changes: mpsc::Sender<()>,
) -> Result<(), ControllerError> {
    info!("Starting Node watcher");

    let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()).default_backoff());
    let mut stream = Box::pin(stream);
    let mut tracker = NodeSetTracker::default();

    while let Some(result) = stream.next().await {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                warn!("Node watch error, retrying: {}", e);
                continue;
            }
        };
        match &event {
            watcher::Event::Apply(node) => debug!("Node applied: {}", node.name_any()),
            watcher::Event::Delete(node) => info!("Node deleted: {}", node.name_any()),
            watcher::Event::InitDone => info!("Node watcher initialization complete"),
            watcher::Event::Init | watcher::Event::InitApply(_) => {}
        }

        if tracker.observe(&event) {
            debug!("Node set changed, {} nodes", tracker.node_count());
            if changes.try_send(()).is_err_and(|e| e.is_disconnected()) {
                return Err(ControllerError::Watch(
                    "Service controller stopped listening for node changes".to_string(),
                ));
            }
        }
    }

    Err(ControllerError::Watch("Node watch stream ended".to_string()))
}

/// Resync target groups on every node set change, then pass the change on
/// to `services`. Returns once `changes` is closed.
pub async fn sync_target_groups_on_change(
    target_groups: Arc<TargetGroupReconciler>,
    nodes: Arc<dyn NodeLister>,
    mut changes: mpsc::Receiver<()>,
    mut services: mpsc::Sender<()>,
) {
    while changes.next().await.is_some() {
        if let Err(e) = target_groups.sync_target_groups(&nodes.list()).await {
            // Services resync through their own retries
            warn!("Target group sync after node change failed: {}", e);
        }
        if services.try_send(()).is_err_and(|e| e.is_disconnected()) {
            debug!("Service controller gone, stopping target group sync");
            return;
        }
    }
}
