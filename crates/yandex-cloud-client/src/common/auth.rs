//! IAM token handling
//!
//! A static token is used as-is. Without one, the token of the service
//! account bound to the VM is requested from the instance metadata service
//! and cached until shortly before it expires.

use crate::error::CloudError;
use crate::metadata::MetadataClient;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

/// Tokens are refreshed this long before the metadata service says they expire
const REFRESH_MARGIN_SECONDS: i64 = 300;

/// Where IAM tokens come from
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Pre-issued IAM token
    IamToken(String),
    /// Service account attached to the instance the controller runs on
    InstanceServiceAccount(MetadataClient),
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Hands out valid IAM tokens
#[derive(Debug)]
pub struct TokenSource {
    credentials: Credentials,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    /// Create a token source for the given credentials
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// Return a token valid for at least the refresh margin
    pub async fn token(&self) -> Result<String, CloudError> {
        let metadata = match &self.credentials {
            Credentials::IamToken(token) => return Ok(token.clone()),
            Credentials::InstanceServiceAccount(metadata) => metadata,
        };

        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.expires_at - Duration::seconds(REFRESH_MARGIN_SECONDS) > now {
                return Ok(token.value.clone());
            }
        }

        debug!("Requesting IAM token from instance metadata service");
        let issued = metadata.get_token().await?;
        if issued.access_token.is_empty() {
            return Err(CloudError::Authentication(
                "metadata service returned an empty token".to_string(),
            ));
        }
        let token = CachedToken {
            value: issued.access_token,
            expires_at: now + Duration::seconds(issued.expires_in),
        };
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }
}
