//! Read-only views of cluster state.
//!
//! Reconcilers never talk to the Kubernetes API for reads; they consult the
//! informer caches through these traits. Production uses reflector stores,
//! tests use fixed lists.

use crate::annotations::{EXCLUDE_FROM_EXTERNAL_LB_LABEL, LOAD_BALANCER_CLEANUP_FINALIZER};
use k8s_openapi::api::core::v1::{Node, Service};
use kube::ResourceExt;
use kube_runtime::reflector::{ObjectRef, Store};
use std::sync::Arc;

/// Cached Nodes
pub trait NodeLister: Send + Sync {
    fn list(&self) -> Vec<Arc<Node>>;
    fn get(&self, name: &str) -> Option<Arc<Node>>;
}

/// Cached Services
pub trait ServiceLister: Send + Sync {
    fn list(&self) -> Vec<Arc<Service>>;
}

impl NodeLister for Store<Node> {
    fn list(&self) -> Vec<Arc<Node>> {
        self.state()
    }

    fn get(&self, name: &str) -> Option<Arc<Node>> {
        Store::get(self, &ObjectRef::new(name))
    }
}

impl ServiceLister for Store<Service> {
    fn list(&self) -> Vec<Arc<Service>> {
        self.state()
    }
}

/// `spec.type == LoadBalancer`
pub fn is_load_balancer_service(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        == Some("LoadBalancer")
}

/// LoadBalancer Service that is not being deleted
pub fn is_active_load_balancer_service(service: &Service) -> bool {
    is_load_balancer_service(service) && service.metadata.deletion_timestamp.is_none()
}

/// Whether the Service still holds the balancer cleanup finalizer
pub fn has_cleanup_finalizer(service: &Service) -> bool {
    service
        .finalizers()
        .iter()
        .any(|f| f == LOAD_BALANCER_CLEANUP_FINALIZER)
}

/// Node may receive load balancer traffic
pub fn is_load_balancer_target(node: &Node) -> bool {
    !node.labels().contains_key(EXCLUDE_FROM_EXTERNAL_LB_LABEL)
}

/// First InternalIP reported in `status.addresses`
pub fn node_internal_ip(node: &Node) -> Option<String> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.clone())
}

/// `spec.providerID`, empty when unset
pub fn node_provider_id(node: &Node) -> &str {
    node.spec
        .as_ref()
        .and_then(|spec| spec.provider_id.as_deref())
        .unwrap_or_default()
}
