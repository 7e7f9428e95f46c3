//! Annotation, label and finalizer names shared with cluster operators.
//!
//! These names are a stable contract; renaming one breaks existing Services.

/// Per-Service or per-Node prefix prepended to target group names
pub const TARGET_GROUP_NAME_PREFIX: &str = "yandex.cpi.flant.com/target-group-name-prefix";
/// Network whose target group the balancer attaches
pub const TARGET_GROUP_NETWORK_ID: &str = "yandex.cpi.flant.com/target-group-network-id";
/// `"true"` for a balancer reachable only inside the VPC, `"false"` to force a public one
pub const LOADBALANCER_INTERNAL: &str = "yandex.cpi.flant.com/loadbalancer-internal";
/// Subnet internal listeners take their address from
pub const LISTENER_SUBNET_ID: &str = "yandex.cpi.flant.com/listener-subnet-id";
/// Fixed IPv4 for every listener of the balancer
pub const LISTENER_ADDRESS_IPV4: &str = "yandex.cpi.flant.com/listener-address-ipv4";

pub const HEALTHCHECK_INTERVAL_SECONDS: &str = "yandex.cpi.flant.com/healthcheck-interval-seconds";
pub const HEALTHCHECK_TIMEOUT_SECONDS: &str = "yandex.cpi.flant.com/healthcheck-timeout-seconds";
pub const HEALTHCHECK_HEALTHY_THRESHOLD: &str = "yandex.cpi.flant.com/healthcheck-healthy-threshold";
pub const HEALTHCHECK_UNHEALTHY_THRESHOLD: &str = "yandex.cpi.flant.com/healthcheck-unhealthy-threshold";

/// Node prefixes longer than this are cut so generated names stay within API limits
pub const MAX_TARGET_GROUP_PREFIX_LEN: usize = 36;

/// Route table label tying a static route to its node
pub const NODE_ROLE_LABEL: &str = "yandex.cpi.flant.com/node-role";

/// Nodes carrying this label never become load balancer targets
pub const EXCLUDE_FROM_EXTERNAL_LB_LABEL: &str = "node.kubernetes.io/exclude-from-external-load-balancers";

/// Finalizer holding a Service until its balancer is gone
pub const LOAD_BALANCER_CLEANUP_FINALIZER: &str = "service.kubernetes.io/load-balancer-cleanup";
