//! Target group membership.
//!
//! Every node interface becomes a target in the group of its network. Group
//! names are `{prefix}{cluster}{networkID}`, where the prefix is the node's
//! `target-group-name-prefix` annotation. Membership is converged with
//! `AddTargets`/`RemoveTargets` only; a group is never replaced wholesale.
//!
//! All target group and load balancer mutation happens under the lock held
//! by [`TargetGroupReconciler::lock`].

use crate::annotations::{MAX_TARGET_GROUP_PREFIX_LEN, TARGET_GROUP_NAME_PREFIX};
use crate::config::CloudConfig;
use crate::error::ControllerError;
use crate::listers::{ServiceLister, is_active_load_balancer_service, is_load_balancer_target, node_provider_id};
use crate::provider_id::belongs_to_provider;
use crate::reconciler::instances::{InstanceResolver, SubnetNetworks};
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use yandex_cloud_client::{CloudApi, CloudError, CreateTargetGroupRequest, Target, TargetGroup};

/// Target groups deleted concurrently during cleanup
const DELETE_CONCURRENCY: usize = 4;

/// Target group name for a grouping key
pub fn target_group_name(prefix: &str, cluster_name: &str, network_id: &str) -> String {
    let prefix: String = prefix.chars().take(MAX_TARGET_GROUP_PREFIX_LEN).collect();
    format!("{}{}{}", prefix, cluster_name, network_id)
}

/// State guarded by the reconciliation lock
#[derive(Debug, Default)]
pub struct SyncState {
    /// Node names of the last fully successful sync
    last_visited: Option<BTreeSet<String>>,
}

impl SyncState {
    pub fn last_visited(&self) -> Option<&BTreeSet<String>> {
        self.last_visited.as_ref()
    }
}

/// Converges target groups with the cluster's nodes
pub struct TargetGroupReconciler {
    api: Arc<dyn CloudApi>,
    config: Arc<CloudConfig>,
    instances: Arc<InstanceResolver>,
    services: Arc<dyn ServiceLister>,
    state: Mutex<SyncState>,
}

impl TargetGroupReconciler {
    pub fn new(
        api: Arc<dyn CloudApi>,
        config: Arc<CloudConfig>,
        instances: Arc<InstanceResolver>,
        services: Arc<dyn ServiceLister>,
    ) -> Self {
        Self {
            api,
            config,
            instances,
            services,
            state: Mutex::new(SyncState::default()),
        }
    }

    /// Take the reconciliation lock
    pub async fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().await
    }

    /// Sync target groups with `nodes`
    pub async fn sync_target_groups(&self, nodes: &[Arc<Node>]) -> Result<(), ControllerError> {
        let mut state = self.lock().await;
        self.sync_locked(&mut state, nodes).await
    }

    /// Sync with the lock already held
    pub async fn sync_locked(&self, state: &mut SyncState, nodes: &[Arc<Node>]) -> Result<(), ControllerError> {
        if nodes.is_empty() {
            if self.services.list().iter().any(|s| is_active_load_balancer_service(s)) {
                debug!("No nodes to sync, keeping target groups for active LoadBalancer services");
                return Ok(());
            }
            self.delete_cluster_target_groups().await?;
            state.last_visited = None;
            return Ok(());
        }

        let eligible: Vec<&Arc<Node>> = nodes
            .iter()
            .filter(|node| {
                let provider_id = node_provider_id(node);
                if provider_id.is_empty() {
                    warn!("Node {} has no providerID yet, skipping", node.name_any());
                    return false;
                }
                if !belongs_to_provider(provider_id) {
                    warn!(
                        "Node {} belongs to another provider ({}), skipping",
                        node.name_any(),
                        provider_id
                    );
                    return false;
                }
                is_load_balancer_target(node)
            })
            .collect();

        let names: BTreeSet<String> = eligible.iter().map(|n| n.name_any()).collect();
        if state.last_visited.as_ref() == Some(&names) {
            debug!("Node set unchanged ({} nodes), skipping target group sync", names.len());
            return Ok(());
        }

        let desired = self.desired_targets(&eligible).await?;
        for (name, targets) in desired {
            self.converge(&name, targets).await?;
        }

        info!("Target groups synced for {} nodes", names.len());
        state.last_visited = Some(names);
        Ok(())
    }

    /// Desired targets per target group name. Resolves every instance before
    /// anything is mutated.
    async fn desired_targets(&self, nodes: &[&Arc<Node>]) -> Result<BTreeMap<String, BTreeSet<Target>>, ControllerError> {
        let mut subnets = SubnetNetworks::new(Arc::clone(&self.api));
        let mut desired: BTreeMap<String, BTreeSet<Target>> = BTreeMap::new();

        for node in nodes {
            let node_name = node.name_any();
            let instance = self
                .instances
                .instance_by_provider_id(node_provider_id(node))
                .await?
                .ok_or_else(|| ControllerError::InstanceNotFound(node_name.clone()))?;
            let prefix = node
                .annotations()
                .get(TARGET_GROUP_NAME_PREFIX)
                .map(String::as_str)
                .unwrap_or_default();

            for iface in &instance.network_interfaces {
                let address = iface
                    .primary_v4_address
                    .as_ref()
                    .map(|p| p.address.clone())
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| {
                        ControllerError::InvalidInstance(
                            instance.name.clone(),
                            format!("interface in subnet {} has no primary IPv4 address", iface.subnet_id),
                        )
                    })?;
                let network_id = subnets.network_id(&iface.subnet_id).await?;
                let name = target_group_name(prefix, &self.config.cluster_name, &network_id);
                desired.entry(name).or_default().insert(Target {
                    subnet_id: iface.subnet_id.clone(),
                    address,
                });
            }
        }

        Ok(desired)
    }

    /// Bring one target group to exactly `targets`
    async fn converge(&self, name: &str, targets: BTreeSet<Target>) -> Result<(), ControllerError> {
        let existing = match self.fetch(name).await? {
            Some(group) => group,
            None => match self.create(name, &targets).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_already_exists() => {
                    debug!("Target group {} appeared concurrently, updating it instead", name);
                    self.fetch(name).await?.ok_or(e)?
                }
                Err(e) => return Err(e.into()),
            },
        };

        let actual: BTreeSet<Target> = existing.targets.iter().cloned().collect();
        let to_add: Vec<Target> = targets.difference(&actual).cloned().collect();
        let to_remove: Vec<Target> = actual.difference(&targets).cloned().collect();

        if !to_add.is_empty() {
            info!("Adding {} targets to target group {}", to_add.len(), name);
            self.api.add_targets(&existing.id, to_add).await?;
        }
        if !to_remove.is_empty() {
            info!("Removing {} targets from target group {}", to_remove.len(), name);
            self.api.remove_targets(&existing.id, to_remove).await?;
        }
        Ok(())
    }

    async fn fetch(&self, name: &str) -> Result<Option<TargetGroup>, CloudError> {
        match self.api.get_target_group_by_name(name).await {
            Err(e) if e.is_not_found() => Ok(None),
            other => other,
        }
    }

    async fn create(&self, name: &str, targets: &BTreeSet<Target>) -> Result<TargetGroup, CloudError> {
        info!("Creating target group {} with {} targets", name, targets.len());
        self.api
            .create_target_group(CreateTargetGroupRequest {
                folder_id: self.api.folder_id().to_string(),
                name: name.to_string(),
                region_id: self.api.region_id().to_string(),
                targets: targets.iter().cloned().collect(),
                labels: Default::default(),
            })
            .await
    }

    /// Delete every target group owned by this cluster
    async fn delete_cluster_target_groups(&self) -> Result<(), ControllerError> {
        let owned: Vec<TargetGroup> = self
            .api
            .list_target_groups()
            .await?
            .into_iter()
            .filter(|tg| tg.name.starts_with(&self.config.cluster_name))
            .collect();
        if owned.is_empty() {
            return Ok(());
        }

        info!(
            "No nodes and no LoadBalancer services left, deleting {} target groups",
            owned.len()
        );
        futures::stream::iter(owned.into_iter().map(|tg| {
            let api = Arc::clone(&self.api);
            async move {
                debug!("Deleting target group {} ({})", tg.name, tg.id);
                match api.delete_target_group(&tg.id).await {
                    Err(e) if e.is_not_found() => Ok(()),
                    other => other,
                }
            }
        }))
        .buffer_unordered(DELETE_CONCURRENCY)
        .try_collect::<Vec<()>>()
        .await?;
        Ok(())
    }
}
