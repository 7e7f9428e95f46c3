//! Zone and region lookup.

use crate::cloudprovider::{Zone, Zones};
use crate::config::CloudConfig;
use crate::error::ControllerError;
use crate::reconciler::instances::InstanceResolver;
use std::sync::Arc;
use yandex_cloud_client::Instance;

/// Region a zone belongs to: `ru-central1-a` is in `ru-central1`
pub fn region_from_zone(zone_id: &str) -> String {
    match zone_id.rfind('-') {
        Some(idx) => zone_id[..idx].to_string(),
        None => zone_id.to_string(),
    }
}

/// Zones capability
pub struct ZoneResolver {
    instances: Arc<InstanceResolver>,
    config: Arc<CloudConfig>,
}

impl ZoneResolver {
    pub fn new(instances: Arc<InstanceResolver>, config: Arc<CloudConfig>) -> Self {
        Self { instances, config }
    }

    fn zone_of(instance: &Instance) -> Zone {
        Zone {
            failure_domain: instance.zone_id.clone(),
            region: region_from_zone(&instance.zone_id),
        }
    }
}

#[async_trait::async_trait]
impl Zones for ZoneResolver {
    async fn get_zone(&self) -> Result<Zone, ControllerError> {
        Ok(Zone {
            failure_domain: self.config.zone_id.clone(),
            region: self.config.region_id.clone(),
        })
    }

    async fn get_zone_by_provider_id(&self, provider_id: &str) -> Result<Zone, ControllerError> {
        let instance = self
            .instances
            .instance_by_provider_id(provider_id)
            .await?
            .ok_or_else(|| ControllerError::InstanceNotFound(provider_id.to_string()))?;
        Ok(Self::zone_of(&instance))
    }

    async fn get_zone_by_node_name(&self, node_name: &str) -> Result<Zone, ControllerError> {
        let instance = self
            .instances
            .find_instance_by_name(node_name)
            .await?
            .ok_or_else(|| ControllerError::InstanceNotFound(node_name.to_string()))?;
        Ok(Self::zone_of(&instance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{cloud_config, instance};
    use yandex_cloud_client::{CloudApi, MockCloudClient};

    #[test]
    fn test_region_from_zone() {
        assert_eq!(region_from_zone("ru-central1-a"), "ru-central1");
        assert_eq!(region_from_zone("ru-central1-d"), "ru-central1");
        assert_eq!(region_from_zone("local"), "local");
        assert_eq!(region_from_zone(""), "");
    }

    fn resolver(mock: &MockCloudClient) -> ZoneResolver {
        let config = Arc::new(cloud_config());
        let api: Arc<dyn CloudApi> = Arc::new(mock.clone());
        let instances = Arc::new(InstanceResolver::new(api, Arc::clone(&config)));
        ZoneResolver::new(instances, config)
    }

    #[tokio::test]
    async fn test_local_zone_comes_from_config() {
        let mock = MockCloudClient::new("b1gfolder", "ru-central1");
        let zone = resolver(&mock).get_zone().await.unwrap();
        assert_eq!(zone.failure_domain, "ru-central1-a");
        assert_eq!(zone.region, "ru-central1");
        assert_eq!(mock.read_count(), 0);
    }

    #[tokio::test]
    async fn test_zone_by_provider_id_and_node_name() {
        let mock = MockCloudClient::new("b1gfolder", "ru-central1");
        let mut worker = instance("fhm1", "worker-0", &[("e9b-a", "10.0.0.5", None)]);
        worker.zone_id = "ru-central1-b".to_string();
        mock.add_instance(worker);
        let zones = resolver(&mock);

        let by_id = zones.get_zone_by_provider_id("yandex://fhm1").await.unwrap();
        assert_eq!(by_id.failure_domain, "ru-central1-b");
        assert_eq!(by_id.region, "ru-central1");

        let by_name = zones.get_zone_by_node_name("worker-0").await.unwrap();
        assert_eq!(by_name, by_id);

        let missing = zones.get_zone_by_node_name("worker-9").await;
        assert!(matches!(missing, Err(ControllerError::InstanceNotFound(_))));
    }
}
