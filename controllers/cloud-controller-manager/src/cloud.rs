//! Cloud provider assembly.
//!
//! [`Cloud::new`] wires the capability objects together; hosts reach them
//! through the accessors, which hand out the capability traits only.

use crate::cloudprovider::{Instances, LoadBalancer, Routes, Zones};
use crate::config::CloudConfig;
use crate::listers::{NodeLister, ServiceLister};
use crate::provider_id::PROVIDER_NAME;
use crate::reconciler::instances::InstanceResolver;
use crate::reconciler::load_balancer::LoadBalancerReconciler;
use crate::reconciler::routes::RouteReconciler;
use crate::reconciler::target_groups::TargetGroupReconciler;
use crate::reconciler::zones::ZoneResolver;
use std::sync::Arc;
use yandex_cloud_client::CloudApi;

/// Yandex Cloud provider
pub struct Cloud {
    config: Arc<CloudConfig>,
    instances: Arc<InstanceResolver>,
    target_groups: Arc<TargetGroupReconciler>,
    load_balancer: Arc<LoadBalancerReconciler>,
    zones: Arc<ZoneResolver>,
    routes: Option<Arc<RouteReconciler>>,
}

impl Cloud {
    pub fn new(
        config: Arc<CloudConfig>,
        api: Arc<dyn CloudApi>,
        nodes: Arc<dyn NodeLister>,
        services: Arc<dyn ServiceLister>,
    ) -> Self {
        let instances = Arc::new(InstanceResolver::new(Arc::clone(&api), Arc::clone(&config)));
        let target_groups = Arc::new(TargetGroupReconciler::new(
            Arc::clone(&api),
            Arc::clone(&config),
            Arc::clone(&instances),
            services,
        ));
        let load_balancer = Arc::new(LoadBalancerReconciler::new(
            Arc::clone(&api),
            Arc::clone(&config),
            Arc::clone(&target_groups),
        ));
        let zones = Arc::new(ZoneResolver::new(Arc::clone(&instances), Arc::clone(&config)));
        let routes = config
            .route_table_id
            .clone()
            .map(|table_id| Arc::new(RouteReconciler::new(api, table_id, nodes)));

        Self {
            config,
            instances,
            target_groups,
            load_balancer,
            zones,
            routes,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    pub fn instances(&self) -> Arc<dyn Instances> {
        Arc::clone(&self.instances) as Arc<dyn Instances>
    }

    pub fn load_balancer(&self) -> Arc<dyn LoadBalancer> {
        Arc::clone(&self.load_balancer) as Arc<dyn LoadBalancer>
    }

    pub fn zones(&self) -> Arc<dyn Zones> {
        Arc::clone(&self.zones) as Arc<dyn Zones>
    }

    /// Present only when a route table is configured
    pub fn routes(&self) -> Option<Arc<dyn Routes>> {
        self.routes.as_ref().map(|r| Arc::clone(r) as Arc<dyn Routes>)
    }

    /// Node-driven target group sync, outside the capability contract
    pub fn target_groups(&self) -> &Arc<TargetGroupReconciler> {
        &self.target_groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use yandex_cloud_client::MockCloudClient;

    fn cloud(config: CloudConfig) -> Cloud {
        let api: Arc<dyn CloudApi> = Arc::new(MockCloudClient::new(FOLDER_ID, REGION_ID));
        Cloud::new(
            Arc::new(config),
            api,
            StaticNodeLister::new(vec![]),
            StaticServiceLister::new(vec![]),
        )
    }

    #[test]
    fn test_routes_need_a_route_table() {
        let without = cloud(cloud_config());
        assert!(without.routes().is_none());

        let mut config = cloud_config();
        config.route_table_id = Some("enproutes".to_string());
        let with = cloud(config);
        assert!(with.routes().is_some());
        assert_eq!(with.provider_name(), "yandex");
    }

    #[tokio::test]
    async fn test_capabilities_share_configuration() {
        let cloud = cloud(cloud_config());
        let zone = cloud.zones().get_zone().await.unwrap();
        assert_eq!(zone.region, cloud.config().region_id);
        assert_eq!(
            cloud
                .load_balancer()
                .get_load_balancer_name(&lb_service("default", "web", "ab-cd", &[("http", "TCP", 80, 30080)])),
            "aabcd"
        );
        assert_eq!(cloud.instances().current_node_name("worker-0"), "worker-0");
    }
}
