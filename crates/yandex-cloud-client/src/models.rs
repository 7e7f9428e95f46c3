//! Yandex Cloud API models
//!
//! These models match the JSON mapping of the public Yandex Cloud REST API:
//! - compute/v1 `Instance`
//! - vpc/v1 `Subnet`, `RouteTable`
//! - loadbalancer/v1 `NetworkLoadBalancer`, `TargetGroup`
//! - operation `Operation`
//!
//! The JSON mapping encodes int64 fields as strings and durations as `"2s"`,
//! see the `int64` and `duration` helper modules at the bottom of this file.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Paginated list response (`{"<items>": [...], "nextPageToken": "..."}`)
///
/// The item field name differs per resource, so callers name it through
/// `#[serde(alias = ...)]` on the wrapper types below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage<T> {
    #[serde(
        default = "Vec::new",
        alias = "instances",
        alias = "targetGroups",
        alias = "networkLoadBalancers",
        alias = "subnets",
        alias = "routeTables"
    )]
    pub items: Vec<T>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

// ----------------------------------------------------------------------------
// Operations
// ----------------------------------------------------------------------------

/// Long-running operation returned by every mutating call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created_at: Option<String>, // RFC 3339 timestamp
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<OperationStatus>,
    #[serde(default)]
    pub response: Option<serde_json::Value>,
}

/// `google.rpc.Status` carried by a failed operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatus {
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Vec<serde_json::Value>,
}

// ----------------------------------------------------------------------------
// Compute
// ----------------------------------------------------------------------------

/// Lifecycle state of a compute instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Provisioning,
    Running,
    Stopping,
    Stopped,
    Starting,
    Restarting,
    Updating,
    Error,
    Crashed,
    Deleting,
    #[default]
    #[serde(other)]
    StatusUnspecified,
}

/// Compute instance (read-only for the controller)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub folder_id: String,
    pub zone_id: String,
    pub name: String,
    #[serde(default)]
    pub platform_id: String,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Network interface attached to an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(default)]
    pub index: String,
    pub subnet_id: String,
    #[serde(default)]
    pub primary_v4_address: Option<PrimaryAddress>,
}

/// Primary private address of an interface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryAddress {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub one_to_one_nat: Option<OneToOneNat>,
}

/// Public address mapped one-to-one onto a private one
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneToOneNat {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub ip_version: Option<IpVersion>,
}

// ----------------------------------------------------------------------------
// VPC
// ----------------------------------------------------------------------------

/// VPC subnet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    pub id: String,
    pub folder_id: String,
    #[serde(default)]
    pub name: String,
    pub network_id: String,
    #[serde(default)]
    pub zone_id: String,
    #[serde(default)]
    pub v4_cidr_blocks: Vec<String>,
}

/// VPC route table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTable {
    pub id: String,
    pub folder_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub static_routes: Vec<StaticRoute>,
}

/// Static route entry; order inside the table is preserved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StaticRoute {
    pub destination_prefix: String,
    pub next_hop_address: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

// ----------------------------------------------------------------------------
// Network Load Balancer
// ----------------------------------------------------------------------------

/// Single backend of a target group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub subnet_id: String,
    pub address: String,
}

/// Target group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroup {
    pub id: String,
    pub folder_id: String,
    pub name: String,
    #[serde(default)]
    pub region_id: String,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Request body for creating a target group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTargetGroupRequest {
    pub folder_id: String,
    pub name: String,
    pub region_id: String,
    pub targets: Vec<Target>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

/// Balancer reachability
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadBalancerType {
    External,
    Internal,
}

/// Listener protocol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// IP version of a listener address
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IpVersion {
    #[default]
    Ipv4,
    Ipv6,
}

/// Listener as reported by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(with = "int64")]
    pub port: i64,
    pub protocol: Protocol,
    #[serde(with = "int64")]
    pub target_port: i64,
    #[serde(default)]
    pub subnet_id: String,
    #[serde(default)]
    pub ip_version: IpVersion,
}

/// Listener definition used for creation and `addListener`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerSpec {
    pub name: String,
    #[serde(with = "int64")]
    pub port: i64,
    pub protocol: Protocol,
    #[serde(with = "int64")]
    pub target_port: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_address_spec: Option<ExternalAddressSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_address_spec: Option<InternalAddressSpec>,
}

/// Public listener address; empty `address` lets the cloud allocate one
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAddressSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub ip_version: IpVersion,
}

/// Private listener address inside `subnet_id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InternalAddressSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub subnet_id: String,
    pub ip_version: IpVersion,
}

/// HTTP probe options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpOptions {
    #[serde(with = "int64")]
    pub port: i64,
    pub path: String,
}

/// TCP probe options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TcpOptions {
    #[serde(with = "int64")]
    pub port: i64,
}

/// Health check of an attached target group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub name: String,
    #[serde(with = "duration")]
    pub interval: Duration,
    #[serde(with = "duration")]
    pub timeout: Duration,
    #[serde(with = "int64")]
    pub unhealthy_threshold: i64,
    #[serde(with = "int64")]
    pub healthy_threshold: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_options: Option<HttpOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_options: Option<TcpOptions>,
}

/// Target group attached to a balancer together with its health checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachedTargetGroup {
    pub target_group_id: String,
    #[serde(default)]
    pub health_checks: Vec<HealthCheck>,
}

/// Network load balancer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkLoadBalancer {
    pub id: String,
    pub folder_id: String,
    pub name: String,
    #[serde(default)]
    pub region_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "type")]
    pub lb_type: LoadBalancerType,
    #[serde(default)]
    pub listeners: Vec<Listener>,
    #[serde(default)]
    pub attached_target_groups: Vec<AttachedTargetGroup>,
}

/// Request body for creating a network load balancer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNetworkLoadBalancerRequest {
    pub folder_id: String,
    pub name: String,
    pub region_id: String,
    #[serde(rename = "type")]
    pub lb_type: LoadBalancerType,
    pub listener_specs: Vec<ListenerSpec>,
    pub attached_target_groups: Vec<AttachedTargetGroup>,
}

// ----------------------------------------------------------------------------
// JSON mapping helpers
// ----------------------------------------------------------------------------

/// int64 values arrive as JSON strings but are accepted as numbers on input
pub(crate) mod int64 {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s.parse().map_err(D::Error::custom),
        }
    }
}

/// `google.protobuf.Duration` JSON form: decimal seconds with an `s` suffix
pub(crate) mod duration {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", value.as_secs()))
        } else {
            serializer.serialize_str(&format!("{:.3}s", value.as_secs_f64()))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let seconds: f64 = raw
            .strip_suffix('s')
            .ok_or_else(|| D::Error::custom(format!("duration {:?} has no 's' suffix", raw)))?
            .parse()
            .map_err(D::Error::custom)?;
        Duration::try_from_secs_f64(seconds).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_listener_accepts_int64_as_string() {
        let listener: Listener = serde_json::from_value(json!({
            "name": "http",
            "address": "84.201.0.10",
            "port": "80",
            "protocol": "TCP",
            "targetPort": "30080",
            "ipVersion": "IPV4"
        }))
        .unwrap();
        assert_eq!(listener.port, 80);
        assert_eq!(listener.target_port, 30080);
        assert_eq!(listener.protocol, Protocol::Tcp);
    }

    #[test]
    fn test_health_check_durations() {
        let hc: HealthCheck = serde_json::from_value(json!({
            "name": "kube-health-check",
            "interval": "2s",
            "timeout": "0.500s",
            "unhealthyThreshold": "2",
            "healthyThreshold": 2,
            "httpOptions": {"port": "10256", "path": "/healthz"}
        }))
        .unwrap();
        assert_eq!(hc.interval, Duration::from_secs(2));
        assert_eq!(hc.timeout, Duration::from_millis(500));

        let encoded = serde_json::to_value(&hc).unwrap();
        assert_eq!(encoded["interval"], "2s");
        assert_eq!(encoded["timeout"], "0.500s");
    }

    #[test]
    fn test_unknown_instance_status_falls_back() {
        let instance: Instance = serde_json::from_value(json!({
            "id": "fhm1",
            "folderId": "b1g",
            "zoneId": "ru-central1-a",
            "name": "node-1",
            "status": "SOMETHING_NEW"
        }))
        .unwrap();
        assert_eq!(instance.status, InstanceStatus::StatusUnspecified);
        assert!(instance.network_interfaces.is_empty());
    }

    #[test]
    fn test_list_page_items_alias() {
        let page: ListPage<TargetGroup> = serde_json::from_value(json!({
            "targetGroups": [{"id": "tg1", "folderId": "b1g", "name": "cluster-net"}],
            "nextPageToken": "abc"
        }))
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
    }
}
