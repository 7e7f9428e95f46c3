//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data and setting up test scenarios.

use crate::annotations::TARGET_GROUP_NAME_PREFIX;
use crate::config::CloudConfig;
use crate::listers::{NodeLister, ServiceLister};
use k8s_openapi::api::core::v1::{
    Node, NodeAddress, NodeSpec, NodeStatus, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use yandex_cloud_client::{
    Instance, InstanceStatus, NetworkInterface, OneToOneNat, PrimaryAddress, Subnet,
};

pub const FOLDER_ID: &str = "b1gfolder";
pub const REGION_ID: &str = "ru-central1";
pub const CLUSTER_NAME: &str = "k8s";
pub const DEFAULT_NETWORK_ID: &str = "enpnet";

/// Helper to create a config with the cluster defaults used across tests
pub fn cloud_config() -> CloudConfig {
    CloudConfig {
        cluster_name: CLUSTER_NAME.to_string(),
        folder_id: FOLDER_ID.to_string(),
        zone_id: "ru-central1-a".to_string(),
        region_id: REGION_ID.to_string(),
        lb_target_group_network_id: DEFAULT_NETWORK_ID.to_string(),
        workers: 2,
        ..Default::default()
    }
}

/// Helper to create a running instance; each interface is `(subnet, address, nat)`
pub fn instance(id: &str, name: &str, interfaces: &[(&str, &str, Option<&str>)]) -> Instance {
    Instance {
        id: id.to_string(),
        folder_id: FOLDER_ID.to_string(),
        zone_id: "ru-central1-a".to_string(),
        name: name.to_string(),
        platform_id: "standard-v3".to_string(),
        status: InstanceStatus::Running,
        network_interfaces: interfaces
            .iter()
            .enumerate()
            .map(|(index, (subnet_id, address, nat))| NetworkInterface {
                index: index.to_string(),
                subnet_id: (*subnet_id).to_string(),
                primary_v4_address: Some(PrimaryAddress {
                    address: (*address).to_string(),
                    one_to_one_nat: nat.map(|a| OneToOneNat {
                        address: a.to_string(),
                        ip_version: None,
                    }),
                }),
            })
            .collect(),
        labels: Default::default(),
    }
}

/// Helper to create a subnet in a network
pub fn subnet(id: &str, network_id: &str) -> Subnet {
    Subnet {
        id: id.to_string(),
        folder_id: FOLDER_ID.to_string(),
        name: id.to_string(),
        network_id: network_id.to_string(),
        zone_id: "ru-central1-a".to_string(),
        v4_cidr_blocks: vec!["10.0.0.0/16".to_string()],
    }
}

/// Helper to create a Node with an optional providerID
pub fn node(name: &str, provider_id: Option<&str>) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            provider_id: provider_id.map(ToString::to_string),
            ..Default::default()
        }),
        status: None,
    }
}

/// Helper to create a Node with a pod CIDR and an InternalIP
pub fn routed_node(name: &str, pod_cidr: &str, internal_ip: &str) -> Node {
    let mut node = node(name, Some(&format!("yandex://{}", name)));
    if let Some(spec) = node.spec.as_mut() {
        spec.pod_cidr = Some(pod_cidr.to_string());
    }
    node.status = Some(NodeStatus {
        addresses: Some(vec![NodeAddress {
            type_: "InternalIP".to_string(),
            address: internal_ip.to_string(),
        }]),
        ..Default::default()
    });
    node
}

/// Set the target group name prefix annotation on a Node
pub fn with_prefix(mut node: Node, prefix: &str) -> Node {
    node.annotations_mut()
        .insert(TARGET_GROUP_NAME_PREFIX.to_string(), prefix.to_string());
    node
}

/// Helper to create a LoadBalancer Service; each port is `(name, protocol, port, nodePort)`
pub fn lb_service(namespace: &str, name: &str, uid: &str, ports: &[(&str, &str, i32, i32)]) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            annotations: Some(BTreeMap::new()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            ports: Some(
                ports
                    .iter()
                    .map(|(port_name, protocol, port, node_port)| ServicePort {
                        name: (!port_name.is_empty()).then(|| (*port_name).to_string()),
                        protocol: Some((*protocol).to_string()),
                        port: *port,
                        node_port: Some(*node_port),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

/// Set an annotation on a Service
pub fn annotate(mut service: Service, key: &str, value: &str) -> Service {
    service
        .annotations_mut()
        .insert(key.to_string(), value.to_string());
    service
}

/// NodeLister over a fixed, replaceable list
#[derive(Default)]
pub struct StaticNodeLister {
    nodes: Mutex<Vec<Arc<Node>>>,
}

impl StaticNodeLister {
    pub fn new(nodes: Vec<Node>) -> Arc<Self> {
        let lister = Self::default();
        lister.set(nodes);
        Arc::new(lister)
    }

    pub fn set(&self, nodes: Vec<Node>) {
        *self.nodes.lock().unwrap() = nodes.into_iter().map(Arc::new).collect();
    }
}

impl NodeLister for StaticNodeLister {
    fn list(&self) -> Vec<Arc<Node>> {
        self.nodes.lock().unwrap().clone()
    }

    fn get(&self, name: &str) -> Option<Arc<Node>> {
        self.list().into_iter().find(|n| n.name_any() == name)
    }
}

/// ServiceLister over a fixed, replaceable list
#[derive(Default)]
pub struct StaticServiceLister {
    services: Mutex<Vec<Arc<Service>>>,
}

impl StaticServiceLister {
    pub fn new(services: Vec<Service>) -> Arc<Self> {
        let lister = Self::default();
        lister.set(services);
        Arc::new(lister)
    }

    pub fn set(&self, services: Vec<Service>) {
        *self.services.lock().unwrap() = services.into_iter().map(Arc::new).collect();
    }
}

impl ServiceLister for StaticServiceLister {
    fn list(&self) -> Vec<Arc<Service>> {
        self.services.lock().unwrap().clone()
    }
}
