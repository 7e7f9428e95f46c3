//! Node `spec.providerID` handling.
//!
//! Two forms are in circulation:
//! - legacy: `yandex://{folderID}/{zone}/{instanceName}`
//! - current: `yandex://{instanceID}`

use crate::error::ControllerError;
use std::fmt;

/// Provider name registered with Kubernetes
pub const PROVIDER_NAME: &str = "yandex";

const SCHEME_PREFIX: &str = "yandex://";

/// Parsed providerID
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderId {
    /// Folder, zone and instance name
    Legacy {
        folder_id: String,
        zone_id: String,
        instance_name: String,
    },
    /// Opaque compute instance ID
    Instance { instance_id: String },
}

impl ProviderId {
    /// Parse a providerID string
    pub fn parse(raw: &str) -> Result<Self, ControllerError> {
        let rest = raw.strip_prefix(SCHEME_PREFIX).ok_or_else(|| {
            ControllerError::InvalidProviderId(format!(
                "{:?} does not use the {} scheme",
                raw, SCHEME_PREFIX
            ))
        })?;

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ControllerError::InvalidProviderId(format!(
                "{:?} has an empty path segment",
                raw
            )));
        }

        match segments.as_slice() {
            [folder, zone, name] => Ok(ProviderId::Legacy {
                folder_id: (*folder).to_string(),
                zone_id: (*zone).to_string(),
                instance_name: (*name).to_string(),
            }),
            [id] => Ok(ProviderId::Instance {
                instance_id: (*id).to_string(),
            }),
            _ => Err(ControllerError::InvalidProviderId(format!(
                "{:?} is neither {}<instanceID> nor {}<folder>/<zone>/<name>",
                raw, SCHEME_PREFIX, SCHEME_PREFIX
            ))),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderId::Legacy {
                folder_id,
                zone_id,
                instance_name,
            } => write!(f, "{}{}/{}/{}", SCHEME_PREFIX, folder_id, zone_id, instance_name),
            ProviderId::Instance { instance_id } => write!(f, "{}{}", SCHEME_PREFIX, instance_id),
        }
    }
}

/// Whether a providerID was assigned by this cloud provider
pub fn belongs_to_provider(raw: &str) -> bool {
    raw.starts_with(SCHEME_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_legacy_provider_id() {
        let parsed = ProviderId::parse("yandex://folder/zone/testid").unwrap();
        assert_eq!(
            parsed,
            ProviderId::Legacy {
                folder_id: "folder".to_string(),
                zone_id: "zone".to_string(),
                instance_name: "testid".to_string(),
            }
        );
        assert_eq!(parsed.to_string(), "yandex://folder/zone/testid");
    }

    #[test]
    fn test_parse_instance_provider_id() {
        let parsed = ProviderId::parse("yandex://testid").unwrap();
        assert_eq!(
            parsed,
            ProviderId::Instance {
                instance_id: "testid".to_string()
            }
        );
    }

    #[test]
    fn test_parse_foreign_or_malformed_provider_id() {
        assert!(matches!(
            ProviderId::parse("mail://test"),
            Err(ControllerError::InvalidProviderId(_))
        ));
        assert!(ProviderId::parse("").is_err());
        assert!(ProviderId::parse("yandex://").is_err());
        assert!(ProviderId::parse("yandex://folder/zone").is_err());
        assert!(ProviderId::parse("yandex://folder//name").is_err());
    }

    #[test]
    fn test_belongs_to_provider() {
        assert!(belongs_to_provider("yandex://fhm123"));
        assert!(!belongs_to_provider("aws:///eu-west-1a/i-123"));
        assert!(!belongs_to_provider(""));
    }
}
