//! Controller configuration.
//!
//! All settings come from environment variables. Folder and zone fall back
//! to the instance metadata service when not set explicitly.

use crate::error::ControllerError;
use crate::reconciler::zones::region_from_zone;
use std::collections::BTreeSet;
use std::env;
use tracing::info;
use yandex_cloud_client::{Credentials, InstanceLocation, MetadataClient};

pub const ENV_CLUSTER_NAME: &str = "YANDEX_CLUSTER_NAME";
pub const ENV_FOLDER_ID: &str = "YANDEX_CLOUD_FOLDER_ID";
pub const ENV_ZONE: &str = "YANDEX_CLOUD_ZONE";
pub const ENV_IAM_TOKEN: &str = "YANDEX_CLOUD_IAM_TOKEN";
pub const ENV_LB_LISTENER_SUBNET_ID: &str = "YANDEX_CLOUD_DEFAULT_LB_LISTENER_SUBNET_ID";
pub const ENV_LB_TARGET_GROUP_NETWORK_ID: &str = "YANDEX_CLOUD_DEFAULT_LB_TARGET_GROUP_NETWORK_ID";
pub const ENV_INTERNAL_NETWORK_IDS: &str = "YANDEX_CLOUD_INTERNAL_NETWORK_IDS";
pub const ENV_EXTERNAL_NETWORK_IDS: &str = "YANDEX_CLOUD_EXTERNAL_NETWORK_IDS";
pub const ENV_ROUTE_TABLE_ID: &str = "YANDEX_CLOUD_ROUTE_TABLE_ID";
pub const ENV_WORKERS: &str = "YANDEX_CCM_WORKERS";

const DEFAULT_WORKERS: usize = 2;

/// Cluster-wide settings for the cloud provider
#[derive(Debug, Clone, Default)]
pub struct CloudConfig {
    /// Cluster identity; prefixes every target group name
    pub cluster_name: String,
    pub folder_id: String,
    /// Zone of the instance the controller runs on
    pub zone_id: String,
    /// Region derived from `zone_id`
    pub region_id: String,
    /// Static IAM token, instance service account otherwise
    pub iam_token: Option<String>,
    /// Default listener subnet; its presence makes balancers internal
    pub lb_listener_subnet_id: Option<String>,
    /// Default network whose target group balancers attach
    pub lb_target_group_network_id: String,
    /// Networks whose addresses are reported as InternalIP
    pub internal_network_ids: BTreeSet<String>,
    /// Networks whose addresses are reported as ExternalIP
    pub external_network_ids: BTreeSet<String>,
    /// Enables the Routes capability
    pub route_table_id: Option<String>,
    /// Concurrent Service reconciliations
    pub workers: usize,
}

impl CloudConfig {
    /// Load configuration from the process environment and the metadata service
    pub async fn from_env() -> Result<Self, ControllerError> {
        let mut config = Self::from_lookup(|key| env::var(key).ok())?;

        if config.folder_id.is_empty() || config.zone_id.is_empty() {
            info!("Folder or zone not configured, asking the instance metadata service");
            let location = MetadataClient::new()?.get_location().await?;
            config.apply_location(location);
        }

        Ok(config)
    }

    /// Parse configuration from an arbitrary key lookup.
    ///
    /// Folder and zone may stay empty here; see [`CloudConfig::apply_location`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let cluster_name = get(ENV_CLUSTER_NAME).ok_or_else(|| {
            ControllerError::InvalidConfig(format!(
                "{} environment variable is required",
                ENV_CLUSTER_NAME
            ))
        })?;
        let lb_target_group_network_id = get(ENV_LB_TARGET_GROUP_NETWORK_ID).ok_or_else(|| {
            ControllerError::InvalidConfig(format!(
                "{} environment variable is required",
                ENV_LB_TARGET_GROUP_NETWORK_ID
            ))
        })?;

        let workers = match get(ENV_WORKERS) {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    ControllerError::InvalidConfig(format!(
                        "{} must be a positive integer, got {:?}",
                        ENV_WORKERS, raw
                    ))
                })?,
            None => DEFAULT_WORKERS,
        };

        let zone_id = get(ENV_ZONE).unwrap_or_default();
        let region_id = region_from_zone(&zone_id);

        Ok(Self {
            cluster_name,
            folder_id: get(ENV_FOLDER_ID).unwrap_or_default(),
            region_id,
            zone_id,
            iam_token: get(ENV_IAM_TOKEN),
            lb_listener_subnet_id: get(ENV_LB_LISTENER_SUBNET_ID),
            lb_target_group_network_id,
            internal_network_ids: parse_id_list(get(ENV_INTERNAL_NETWORK_IDS).as_deref()),
            external_network_ids: parse_id_list(get(ENV_EXTERNAL_NETWORK_IDS).as_deref()),
            route_table_id: get(ENV_ROUTE_TABLE_ID),
            workers,
        })
    }

    /// Fill folder and zone the environment left unset
    pub fn apply_location(&mut self, location: InstanceLocation) {
        if self.folder_id.is_empty() {
            self.folder_id = location.folder_id;
        }
        if self.zone_id.is_empty() {
            self.zone_id = location.zone_id;
            self.region_id = region_from_zone(&self.zone_id);
        }
    }

    /// Credentials for the cloud API client
    pub fn credentials(&self) -> Result<Credentials, ControllerError> {
        match &self.iam_token {
            Some(token) => Ok(Credentials::IamToken(token.clone())),
            None => Ok(Credentials::InstanceServiceAccount(MetadataClient::new()?)),
        }
    }
}

/// Split a comma-separated ID list, ignoring blanks
fn parse_id_list(raw: Option<&str>) -> BTreeSet<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
            .collect()
    })
    .unwrap_or_default()
}
