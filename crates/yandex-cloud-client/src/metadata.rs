//! Instance metadata service client
//!
//! Only the GCE-compatible endpoints the controller needs: the zone path,
//! which also carries the folder ID, and the service-account token.

use crate::error::CloudError;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Link-local address of the metadata service
pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254";

/// Zone and folder of the instance the controller runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceLocation {
    pub folder_id: String,
    pub zone_id: String,
}

/// Token issued for the instance's service account
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataToken {
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: String,
}

/// Metadata service client
#[derive(Debug, Clone)]
pub struct MetadataClient {
    client: Client,
    base_url: String,
}

impl MetadataClient {
    /// Create a client against the default link-local endpoint
    pub fn new() -> Result<Self, CloudError> {
        Self::with_base_url(DEFAULT_METADATA_URL)
    }

    /// Create a client against a custom endpoint
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, CloudError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(CloudError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_text(&self, path: &str) -> Result<String, CloudError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(CloudError::Http)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(CloudError::Api {
                status: status.as_u16(),
                message: format!("metadata GET {} failed: {}", path, body),
            });
        }
        Ok(body)
    }

    /// Get folder and zone from `instance/zone` (`projects/{folder}/zones/{zone}`)
    pub async fn get_location(&self) -> Result<InstanceLocation, CloudError> {
        let raw = self.get_text("/computeMetadata/v1/instance/zone").await?;
        parse_zone_path(raw.trim())
    }

    /// Get an IAM token for the instance's service account
    pub async fn get_token(&self) -> Result<MetadataToken, CloudError> {
        let raw = self
            .get_text("/computeMetadata/v1/instance/service-accounts/default/token")
            .await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn parse_zone_path(raw: &str) -> Result<InstanceLocation, CloudError> {
    let parts: Vec<&str> = raw.split('/').collect();
    match parts.as_slice() {
        ["projects", folder, "zones", zone] if !folder.is_empty() && !zone.is_empty() => {
            Ok(InstanceLocation {
                folder_id: (*folder).to_string(),
                zone_id: (*zone).to_string(),
            })
        }
        _ => Err(CloudError::InvalidRequest(format!(
            "unexpected zone path from metadata service: {:?}",
            raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_zone_path() {
        let location = parse_zone_path("projects/b1gfolder/zones/ru-central1-a").unwrap();
        assert_eq!(location.folder_id, "b1gfolder");
        assert_eq!(location.zone_id, "ru-central1-a");
    }

    #[test]
    fn test_parse_zone_path_rejects_garbage() {
        assert!(parse_zone_path("ru-central1-a").is_err());
        assert!(parse_zone_path("projects//zones/ru-central1-a").is_err());
    }
}
