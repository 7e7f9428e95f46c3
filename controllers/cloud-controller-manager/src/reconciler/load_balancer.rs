//! Network load balancers for Services of type LoadBalancer.
//!
//! One balancer per Service, named after the Service UID. Listeners, health
//! checks and the attached target group are derived from the Service and its
//! annotations, then converged against the existing balancer with minimal
//! listener and attachment changes. A change between internal and external
//! is the only case that recreates the balancer.

use crate::annotations::{
    HEALTHCHECK_HEALTHY_THRESHOLD, HEALTHCHECK_INTERVAL_SECONDS, HEALTHCHECK_TIMEOUT_SECONDS,
    HEALTHCHECK_UNHEALTHY_THRESHOLD, LISTENER_ADDRESS_IPV4, LISTENER_SUBNET_ID, LOADBALANCER_INTERNAL,
    TARGET_GROUP_NAME_PREFIX, TARGET_GROUP_NETWORK_ID,
};
use crate::cloudprovider::LoadBalancer;
use crate::config::CloudConfig;
use crate::error::ControllerError;
use crate::reconciler::target_groups::{TargetGroupReconciler, target_group_name};
use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Node, Service};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use yandex_cloud_client::{
    AttachedTargetGroup, CloudApi, CreateNetworkLoadBalancerRequest, ExternalAddressSpec, HealthCheck,
    HttpOptions, InternalAddressSpec, IpVersion, Listener, ListenerSpec, LoadBalancerType,
    NetworkLoadBalancer, Protocol,
};

/// Listener limit of a network load balancer
pub const MAX_PORTS: usize = 10;
/// Balancer names are capped by the API
pub const MAX_NAME_LEN: usize = 32;

pub const HEALTH_CHECK_NAME: &str = "kube-health-check";
const HEALTH_CHECK_PATH: &str = "/healthz";
/// kube-proxy health endpoint on every node
const KUBE_PROXY_HEALTH_PORT: i64 = 10256;
const DEFAULT_HEALTHY_THRESHOLD: i64 = 2;
const DEFAULT_UNHEALTHY_THRESHOLD: i64 = 2;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Balancer name of a Service: `a` + UID without hyphens, capped at 32 chars
pub fn load_balancer_name(service: &Service) -> String {
    let uid = service.uid().unwrap_or_default().replace('-', "");
    let mut name = format!("a{}", uid);
    name.truncate(MAX_NAME_LEN);
    name
}

/// Everything the balancer of one Service should look like
#[derive(Debug, Clone, PartialEq)]
pub struct BalancerSpec {
    pub name: String,
    pub lb_type: LoadBalancerType,
    pub listeners: Vec<ListenerSpec>,
    pub target_group_name: String,
    pub health_check: HealthCheck,
}

/// Listener identity for diffing
type ListenerKey = (Protocol, i64, i64);

fn spec_key(spec: &ListenerSpec) -> ListenerKey {
    (spec.protocol, spec.port, spec.target_port)
}

fn listener_key(listener: &Listener) -> ListenerKey {
    (listener.protocol, listener.port, listener.target_port)
}

/// Derive the desired balancer from a Service and the cluster defaults.
///
/// Annotations win over cluster defaults. Fails without any remote call when
/// the Service cannot be served.
pub fn balancer_spec(service: &Service, config: &CloudConfig) -> Result<BalancerSpec, ControllerError> {
    let service_name = format!(
        "{}/{}",
        service.namespace().unwrap_or_default(),
        service.name_any()
    );
    if service.uid().unwrap_or_default().is_empty() {
        return Err(ControllerError::Validation(format!(
            "service {} has no UID",
            service_name
        )));
    }

    let annotations = service.annotations();
    let annotation = |key: &str| {
        annotations
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    };

    let ports = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(Vec::as_slice)
        .unwrap_or_default();
    if ports.is_empty() {
        return Err(ControllerError::Validation(format!(
            "service {} has no ports",
            service_name
        )));
    }
    if ports.len() > MAX_PORTS {
        return Err(ControllerError::Validation(format!(
            "service {} has {} ports, a network load balancer supports at most {}",
            service_name,
            ports.len(),
            MAX_PORTS
        )));
    }

    let subnet_id = annotation(LISTENER_SUBNET_ID)
        .map(ToString::to_string)
        .or_else(|| config.lb_listener_subnet_id.clone());
    let internal = match annotation(LOADBALANCER_INTERNAL) {
        Some(raw) => raw.parse::<bool>().map_err(|_| {
            ControllerError::Validation(format!(
                "service {}: {} must be \"true\" or \"false\", got {:?}",
                service_name, LOADBALANCER_INTERNAL, raw
            ))
        })?,
        None => subnet_id.is_some(),
    };
    let internal_subnet = match (internal, &subnet_id) {
        (true, Some(subnet)) => Some(subnet.clone()),
        (true, None) => {
            return Err(ControllerError::Validation(format!(
                "service {} asks for an internal balancer but no listener subnet is set ({} annotation or cluster default)",
                service_name, LISTENER_SUBNET_ID
            )));
        }
        (false, _) => None,
    };
    let address = annotation(LISTENER_ADDRESS_IPV4).map(ToString::to_string);

    let mut listeners = Vec::with_capacity(ports.len());
    for (index, port) in ports.iter().enumerate() {
        let protocol = match port.protocol.as_deref().unwrap_or("TCP") {
            "TCP" => Protocol::Tcp,
            "UDP" => Protocol::Udp,
            other => {
                return Err(ControllerError::Validation(format!(
                    "service {}: protocol {} is not supported by network load balancers",
                    service_name, other
                )));
            }
        };
        let node_port = port.node_port.filter(|p| *p > 0).ok_or_else(|| {
            ControllerError::Validation(format!(
                "service {}: port {} has no node port allocated",
                service_name, port.port
            ))
        })?;
        let name = port
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("listener-{}", index));

        listeners.push(ListenerSpec {
            name,
            port: i64::from(port.port),
            protocol,
            target_port: i64::from(node_port),
            external_address_spec: internal_subnet.is_none().then(|| ExternalAddressSpec {
                address: address.clone(),
                ip_version: IpVersion::Ipv4,
            }),
            internal_address_spec: internal_subnet.as_ref().map(|subnet| InternalAddressSpec {
                address: address.clone(),
                subnet_id: subnet.clone(),
                ip_version: IpVersion::Ipv4,
            }),
        });
    }

    let network_id = annotation(TARGET_GROUP_NETWORK_ID).unwrap_or(config.lb_target_group_network_id.as_str());
    let prefix = annotation(TARGET_GROUP_NAME_PREFIX).unwrap_or_default();

    Ok(BalancerSpec {
        name: load_balancer_name(service),
        lb_type: if internal {
            LoadBalancerType::Internal
        } else {
            LoadBalancerType::External
        },
        listeners,
        target_group_name: target_group_name(prefix, &config.cluster_name, network_id),
        health_check: health_check(service, &service_name)?,
    })
}

fn health_check(service: &Service, service_name: &str) -> Result<HealthCheck, ControllerError> {
    let spec = service.spec.as_ref();
    let local = spec.and_then(|s| s.external_traffic_policy.as_deref()) == Some("Local");
    let port = match spec.and_then(|s| s.health_check_node_port) {
        Some(port) if local && port > 0 => i64::from(port),
        _ => KUBE_PROXY_HEALTH_PORT,
    };

    let positive = |key: &str, default: i64| -> Result<i64, ControllerError> {
        match service.annotations().get(key).map(|v| v.trim()) {
            None | Some("") => Ok(default),
            Some(raw) => raw.parse::<i64>().ok().filter(|v| *v > 0).ok_or_else(|| {
                ControllerError::Validation(format!(
                    "service {}: {} must be a positive integer, got {:?}",
                    service_name, key, raw
                ))
            }),
        }
    };
    let seconds = |key: &str, default: Duration| -> Result<Duration, ControllerError> {
        positive(key, default.as_secs() as i64).map(|s| Duration::from_secs(s.unsigned_abs()))
    };

    Ok(HealthCheck {
        name: HEALTH_CHECK_NAME.to_string(),
        interval: seconds(HEALTHCHECK_INTERVAL_SECONDS, DEFAULT_INTERVAL)?,
        timeout: seconds(HEALTHCHECK_TIMEOUT_SECONDS, DEFAULT_TIMEOUT)?,
        unhealthy_threshold: positive(HEALTHCHECK_UNHEALTHY_THRESHOLD, DEFAULT_UNHEALTHY_THRESHOLD)?,
        healthy_threshold: positive(HEALTHCHECK_HEALTHY_THRESHOLD, DEFAULT_HEALTHY_THRESHOLD)?,
        http_options: Some(HttpOptions {
            port,
            path: HEALTH_CHECK_PATH.to_string(),
        }),
        tcp_options: None,
    })
}

/// Ingress addresses of a balancer, deduplicated in listener order
pub fn ingress_status(balancer: &NetworkLoadBalancer) -> LoadBalancerStatus {
    let mut ips: Vec<String> = Vec::new();
    for listener in &balancer.listeners {
        if !listener.address.is_empty() && !ips.contains(&listener.address) {
            ips.push(listener.address.clone());
        }
    }
    LoadBalancerStatus {
        ingress: Some(
            ips.into_iter()
                .map(|ip| LoadBalancerIngress {
                    ip: Some(ip),
                    ..Default::default()
                })
                .collect(),
        ),
    }
}

/// LoadBalancer capability
pub struct LoadBalancerReconciler {
    api: Arc<dyn CloudApi>,
    config: Arc<CloudConfig>,
    target_groups: Arc<TargetGroupReconciler>,
}

impl LoadBalancerReconciler {
    pub fn new(api: Arc<dyn CloudApi>, config: Arc<CloudConfig>, target_groups: Arc<TargetGroupReconciler>) -> Self {
        Self {
            api,
            config,
            target_groups,
        }
    }

    async fn ensure(&self, service: &Service, nodes: &[Arc<Node>]) -> Result<NetworkLoadBalancer, ControllerError> {
        let desired = balancer_spec(service, &self.config)?;
        if nodes.is_empty() {
            return Err(ControllerError::Validation(format!(
                "no nodes available for load balancer {}",
                desired.name
            )));
        }

        let mut state = self.target_groups.lock().await;
        self.target_groups.sync_locked(&mut state, nodes).await?;

        let target_group = self
            .api
            .get_target_group_by_name(&desired.target_group_name)
            .await?
            .ok_or_else(|| ControllerError::TargetGroupNotFound(desired.target_group_name.clone()))?;
        let attachment = AttachedTargetGroup {
            target_group_id: target_group.id,
            health_checks: vec![desired.health_check.clone()],
        };

        match self.api.get_load_balancer_by_name(&desired.name).await? {
            Some(existing) if existing.lb_type != desired.lb_type => {
                info!(
                    "Load balancer {} changes type {:?} -> {:?}, recreating",
                    desired.name, existing.lb_type, desired.lb_type
                );
                self.api.delete_load_balancer(&existing.id).await?;
                self.create(&desired, attachment).await
            }
            Some(existing) => self.converge(existing, &desired, attachment).await,
            None => self.create(&desired, attachment).await,
        }
    }

    async fn create(&self, desired: &BalancerSpec, attachment: AttachedTargetGroup) -> Result<NetworkLoadBalancer, ControllerError> {
        info!(
            "Creating {:?} load balancer {} with {} listeners",
            desired.lb_type,
            desired.name,
            desired.listeners.len()
        );
        let request = CreateNetworkLoadBalancerRequest {
            folder_id: self.api.folder_id().to_string(),
            name: desired.name.clone(),
            region_id: self.api.region_id().to_string(),
            lb_type: desired.lb_type,
            listener_specs: desired.listeners.clone(),
            attached_target_groups: vec![attachment.clone()],
        };
        match self.api.create_load_balancer(request).await {
            Ok(balancer) => Ok(balancer),
            Err(e) if e.is_already_exists() => {
                debug!("Load balancer {} appeared concurrently, updating it instead", desired.name);
                let existing = self.api.get_load_balancer_by_name(&desired.name).await?.ok_or(e)?;
                self.converge(existing, desired, attachment).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply only the listener and attachment changes that are needed
    async fn converge(
        &self,
        existing: NetworkLoadBalancer,
        desired: &BalancerSpec,
        attachment: AttachedTargetGroup,
    ) -> Result<NetworkLoadBalancer, ControllerError> {
        let id = existing.id.clone();
        let wanted: BTreeMap<ListenerKey, &ListenerSpec> =
            desired.listeners.iter().map(|spec| (spec_key(spec), spec)).collect();
        let stale: Vec<String> = existing
            .listeners
            .iter()
            .filter(|l| !wanted.contains_key(&listener_key(l)))
            .map(|l| l.name.clone())
            .collect();
        let missing: Vec<ListenerSpec> = desired
            .listeners
            .iter()
            .filter(|spec| !existing.listeners.iter().any(|l| listener_key(l) == spec_key(spec)))
            .cloned()
            .collect();
        let detach: Vec<String> = existing
            .attached_target_groups
            .iter()
            .filter(|a| **a != attachment)
            .map(|a| a.target_group_id.clone())
            .collect();
        let attach = !existing.attached_target_groups.contains(&attachment);

        let mut current = existing;
        for name in stale {
            info!("Removing listener {} from load balancer {}", name, desired.name);
            current = self.api.remove_listener(&id, &name).await?;
        }
        for spec in missing {
            info!(
                "Adding listener {} ({:?} {} -> {}) to load balancer {}",
                spec.name, spec.protocol, spec.port, spec.target_port, desired.name
            );
            current = self.api.add_listener(&id, spec).await?;
        }
        for target_group_id in detach {
            info!("Detaching target group {} from load balancer {}", target_group_id, desired.name);
            current = self.api.detach_target_group(&id, &target_group_id).await?;
        }
        if attach {
            info!(
                "Attaching target group {} to load balancer {}",
                attachment.target_group_id, desired.name
            );
            current = self.api.attach_target_group(&id, attachment).await?;
        }
        Ok(current)
    }
}

#[async_trait::async_trait]
impl LoadBalancer for LoadBalancerReconciler {
    async fn get_load_balancer(&self, service: &Service) -> Result<Option<LoadBalancerStatus>, ControllerError> {
        let balancer = self.api.get_load_balancer_by_name(&load_balancer_name(service)).await?;
        Ok(balancer.as_ref().map(ingress_status))
    }

    fn get_load_balancer_name(&self, service: &Service) -> String {
        load_balancer_name(service)
    }

    async fn ensure_load_balancer(&self, service: &Service, nodes: &[Arc<Node>]) -> Result<LoadBalancerStatus, ControllerError> {
        let balancer = self.ensure(service, nodes).await?;
        Ok(ingress_status(&balancer))
    }

    async fn update_load_balancer(&self, service: &Service, nodes: &[Arc<Node>]) -> Result<(), ControllerError> {
        self.ensure(service, nodes).await.map(|_| ())
    }

    async fn ensure_load_balancer_deleted(&self, service: &Service) -> Result<(), ControllerError> {
        let name = load_balancer_name(service);
        let mut state = self.target_groups.lock().await;

        if let Some(balancer) = self.api.get_load_balancer_by_name(&name).await? {
            info!("Deleting load balancer {} ({})", name, balancer.id);
            match self.api.delete_load_balancer(&balancer.id).await {
                Err(e) if !e.is_not_found() => return Err(e.into()),
                _ => {}
            }
        }

        self.target_groups.sync_locked(&mut state, &[]).await
    }
}
