//! Node to compute instance resolution.
//!
//! Nodes map to instances by providerID when it is set and by name
//! otherwise; node names are instance names.

use crate::cloudprovider::Instances;
use crate::config::CloudConfig;
use crate::error::ControllerError;
use crate::listers::node_provider_id;
use crate::provider_id::ProviderId;
use k8s_openapi::api::core::v1::{Node, NodeAddress};
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use yandex_cloud_client::{CloudApi, Instance, InstanceStatus};

/// Resolves Nodes to Instances and Instances to node addresses
pub struct InstanceResolver {
    api: Arc<dyn CloudApi>,
    config: Arc<CloudConfig>,
}

impl InstanceResolver {
    pub fn new(api: Arc<dyn CloudApi>, config: Arc<CloudConfig>) -> Self {
        Self { api, config }
    }

    /// Exact-name lookup; zero matches is `None`, duplicates are an error
    pub async fn find_instance_by_name(&self, name: &str) -> Result<Option<Instance>, ControllerError> {
        Ok(self.api.find_instance_by_name(name).await?)
    }

    /// Look an instance up by providerID; `None` when it no longer exists
    pub async fn instance_by_provider_id(&self, provider_id: &str) -> Result<Option<Instance>, ControllerError> {
        match ProviderId::parse(provider_id)? {
            ProviderId::Legacy { folder_id, instance_name, .. } => {
                if folder_id != self.config.folder_id {
                    warn!(
                        "providerID {} points at folder {}, looking it up in {}",
                        provider_id, folder_id, self.config.folder_id
                    );
                }
                self.find_instance_by_name(&instance_name).await
            }
            ProviderId::Instance { instance_id } => match self.api.get_instance(&instance_id).await {
                Ok(instance) => Ok(Some(instance)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Instance backing a Node
    pub async fn instance_for_node(&self, node: &Node) -> Result<Option<Instance>, ControllerError> {
        let provider_id = node_provider_id(node);
        if provider_id.is_empty() {
            self.find_instance_by_name(&node.name_any()).await
        } else {
            self.instance_by_provider_id(provider_id).await
        }
    }

    async fn require_by_name(&self, node_name: &str) -> Result<Instance, ControllerError> {
        self.find_instance_by_name(node_name)
            .await?
            .ok_or_else(|| ControllerError::InstanceNotFound(node_name.to_string()))
    }

    async fn require_by_provider_id(&self, provider_id: &str) -> Result<Instance, ControllerError> {
        self.instance_by_provider_id(provider_id)
            .await?
            .ok_or_else(|| ControllerError::InstanceNotFound(provider_id.to_string()))
    }

    /// Node addresses of an instance.
    ///
    /// Without network allow-lists every interface reports its private address
    /// as InternalIP and the first interface's NAT address is the only
    /// ExternalIP. With allow-lists, an interface's address is classified by the
    /// network its subnet belongs to; interfaces in neither list are skipped.
    pub async fn extract_node_addresses(&self, instance: &Instance) -> Result<Vec<NodeAddress>, ControllerError> {
        if instance.network_interfaces.is_empty() {
            return Err(ControllerError::InvalidInstance(
                instance.name.clone(),
                "no network interfaces".to_string(),
            ));
        }

        let internal = &self.config.internal_network_ids;
        let external = &self.config.external_network_ids;
        let classify = !internal.is_empty() || !external.is_empty();
        let mut subnets = SubnetNetworks::new(Arc::clone(&self.api));
        let mut addresses = Vec::new();

        for (index, iface) in instance.network_interfaces.iter().enumerate() {
            let primary = iface
                .primary_v4_address
                .as_ref()
                .filter(|p| !p.address.is_empty())
                .ok_or_else(|| {
                    ControllerError::InvalidInstance(
                        instance.name.clone(),
                        format!("interface {} has no primary IPv4 address", index),
                    )
                })?;
            let nat = primary
                .one_to_one_nat
                .as_ref()
                .map(|n| n.address.as_str())
                .filter(|a| !a.is_empty());

            if !classify {
                addresses.push(node_address("InternalIP", &primary.address));
                if index == 0 {
                    if let Some(nat) = nat {
                        addresses.push(node_address("ExternalIP", nat));
                    }
                }
                continue;
            }

            let network_id = subnets.network_id(&iface.subnet_id).await?;
            if internal.contains(&network_id) {
                addresses.push(node_address("InternalIP", &primary.address));
            }
            if external.contains(&network_id) {
                addresses.push(node_address("ExternalIP", &primary.address));
                if let Some(nat) = nat {
                    addresses.push(node_address("ExternalIP", nat));
                }
            }
        }

        debug!("Instance {} addresses: {:?}", instance.name, addresses);
        Ok(addresses)
    }
}

fn node_address(kind: &str, address: &str) -> NodeAddress {
    NodeAddress {
        type_: kind.to_string(),
        address: address.to_string(),
    }
}

/// Subnet to network ID memo for the duration of one reconciliation
pub struct SubnetNetworks {
    api: Arc<dyn CloudApi>,
    known: HashMap<String, String>,
}

impl SubnetNetworks {
    pub fn new(api: Arc<dyn CloudApi>) -> Self {
        Self {
            api,
            known: HashMap::new(),
        }
    }

    /// Network the subnet belongs to
    pub async fn network_id(&mut self, subnet_id: &str) -> Result<String, ControllerError> {
        if let Some(network_id) = self.known.get(subnet_id) {
            return Ok(network_id.clone());
        }
        let subnet = self.api.get_subnet(subnet_id).await?;
        self.known.insert(subnet_id.to_string(), subnet.network_id.clone());
        Ok(subnet.network_id)
    }
}

#[async_trait::async_trait]
impl Instances for InstanceResolver {
    async fn node_addresses(&self, node_name: &str) -> Result<Vec<NodeAddress>, ControllerError> {
        let instance = self.require_by_name(node_name).await?;
        self.extract_node_addresses(&instance).await
    }

    async fn node_addresses_by_provider_id(&self, provider_id: &str) -> Result<Vec<NodeAddress>, ControllerError> {
        let instance = self.require_by_provider_id(provider_id).await?;
        self.extract_node_addresses(&instance).await
    }

    async fn instance_id(&self, node_name: &str) -> Result<String, ControllerError> {
        let instance = self.require_by_name(node_name).await?;
        Ok(format!("{}/{}/{}", instance.folder_id, instance.zone_id, instance.name))
    }

    async fn instance_type(&self, node_name: &str) -> Result<String, ControllerError> {
        Ok(self.require_by_name(node_name).await?.platform_id)
    }

    async fn instance_type_by_provider_id(&self, provider_id: &str) -> Result<String, ControllerError> {
        Ok(self.require_by_provider_id(provider_id).await?.platform_id)
    }

    async fn instance_exists_by_provider_id(&self, provider_id: &str) -> Result<bool, ControllerError> {
        Ok(self.instance_by_provider_id(provider_id).await?.is_some())
    }

    async fn instance_shutdown_by_provider_id(&self, provider_id: &str) -> Result<bool, ControllerError> {
        let instance = self.require_by_provider_id(provider_id).await?;
        Ok(instance.status == InstanceStatus::Stopped)
    }

    fn current_node_name(&self, hostname: &str) -> String {
        hostname.to_string()
    }
}
