//! Mock CloudApi for unit testing
//!
//! This module provides an in-memory implementation of `CloudApi` that can be
//! used in unit tests without a Yandex Cloud account.
//!
//! The mock is organized into domain-specific modules:
//! - `compute.rs` - instances
//! - `vpc.rs` - subnets and route tables
//! - `load_balancer.rs` - target groups and network load balancers
//!
//! Every mutating call is appended to a call log so tests can assert on the
//! exact remote mutations a reconciliation issued. Failures can be injected
//! per operation name with [`MockCloudClient::fail_next`], and
//! [`MockCloudClient::before_next`] lets a test change the store right before
//! an operation runs, which is how concurrent writers are simulated.

mod compute;
mod load_balancer;
mod vpc;

use crate::cloud_trait::CloudApi;
use crate::error::CloudError;
use crate::models::*;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Mutating call recorded by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    CreateTargetGroup { name: String, targets: Vec<Target> },
    AddTargets { target_group_id: String, targets: Vec<Target> },
    RemoveTargets { target_group_id: String, targets: Vec<Target> },
    DeleteTargetGroup { target_group_id: String },
    CreateLoadBalancer { name: String, lb_type: LoadBalancerType },
    DeleteLoadBalancer { load_balancer_id: String },
    AddListener { load_balancer_id: String, listener_name: String },
    RemoveListener { load_balancer_id: String, listener_name: String },
    AttachTargetGroup { load_balancer_id: String, target_group_id: String },
    DetachTargetGroup { load_balancer_id: String, target_group_id: String },
    UpdateRouteTable { route_table_id: String, static_routes: Vec<StaticRoute> },
}

/// Store change run ahead of an operation
type Hook = Box<dyn FnOnce() + Send>;

/// Mock CloudApi for testing
///
/// Resources live in memory keyed by ID; cloned handles share state.
#[derive(Clone)]
pub struct MockCloudClient {
    pub(crate) folder_id: String,
    pub(crate) region_id: String,
    // In-memory storage for resources
    pub(crate) instances: Arc<Mutex<HashMap<String, Instance>>>,
    pub(crate) subnets: Arc<Mutex<HashMap<String, Subnet>>>,
    pub(crate) route_tables: Arc<Mutex<HashMap<String, RouteTable>>>,
    pub(crate) target_groups: Arc<Mutex<HashMap<String, TargetGroup>>>,
    pub(crate) load_balancers: Arc<Mutex<HashMap<String, NetworkLoadBalancer>>>,
    // Observability for tests
    pub(crate) calls: Arc<Mutex<Vec<MockCall>>>,
    pub(crate) reads: Arc<Mutex<u64>>,
    pub(crate) failures: Arc<Mutex<HashMap<String, VecDeque<CloudError>>>>,
    pub(crate) hooks: Arc<Mutex<HashMap<String, VecDeque<Hook>>>>,
    // Counter for generating IDs
    pub(crate) next_id: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for MockCloudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCloudClient")
            .field("folder_id", &self.folder_id)
            .field("region_id", &self.region_id)
            .finish_non_exhaustive()
    }
}

impl MockCloudClient {
    /// Create a new mock client
    pub fn new(folder_id: impl Into<String>, region_id: impl Into<String>) -> Self {
        Self {
            folder_id: folder_id.into(),
            region_id: region_id.into(),
            instances: Arc::new(Mutex::new(HashMap::new())),
            subnets: Arc::new(Mutex::new(HashMap::new())),
            route_tables: Arc::new(Mutex::new(HashMap::new())),
            target_groups: Arc::new(Mutex::new(HashMap::new())),
            load_balancers: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            reads: Arc::new(Mutex::new(0)),
            failures: Arc::new(Mutex::new(HashMap::new())),
            hooks: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Add an instance to the mock store (for test setup)
    pub fn add_instance(&self, instance: Instance) {
        self.instances.lock().unwrap().insert(instance.id.clone(), instance);
    }

    /// Add a subnet to the mock store (for test setup)
    pub fn add_subnet(&self, subnet: Subnet) {
        self.subnets.lock().unwrap().insert(subnet.id.clone(), subnet);
    }

    /// Add a route table to the mock store (for test setup)
    pub fn add_route_table(&self, route_table: RouteTable) {
        self.route_tables
            .lock()
            .unwrap()
            .insert(route_table.id.clone(), route_table);
    }

    /// Add a target group to the mock store (for test setup)
    pub fn add_target_group(&self, target_group: TargetGroup) {
        self.target_groups
            .lock()
            .unwrap()
            .insert(target_group.id.clone(), target_group);
    }

    /// Add a load balancer to the mock store (for test setup)
    pub fn add_load_balancer(&self, load_balancer: NetworkLoadBalancer) {
        self.load_balancers
            .lock()
            .unwrap()
            .insert(load_balancer.id.clone(), load_balancer);
    }

    /// Make the next call of `operation` (trait method name) fail with `error`
    pub fn fail_next(&self, operation: &str, error: CloudError) {
        self.failures
            .lock()
            .unwrap()
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Run `hook` right before the next call of `operation` touches the store
    pub fn before_next(&self, operation: &str, hook: impl FnOnce() + Send + 'static) {
        self.hooks
            .lock()
            .unwrap()
            .entry(operation.to_string())
            .or_default()
            .push_back(Box::new(hook));
    }

    /// Mutating calls issued so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Forget recorded calls and reads
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
        *self.reads.lock().unwrap() = 0;
    }

    /// Number of read calls issued so far
    pub fn read_count(&self) -> u64 {
        *self.reads.lock().unwrap()
    }

    /// Snapshot of a target group by name
    pub fn target_group_named(&self, name: &str) -> Option<TargetGroup> {
        self.target_groups
            .lock()
            .unwrap()
            .values()
            .find(|tg| tg.name == name)
            .cloned()
    }

    /// All target groups currently stored
    pub fn all_target_groups(&self) -> Vec<TargetGroup> {
        self.target_groups.lock().unwrap().values().cloned().collect()
    }

    /// Snapshot of a load balancer by name
    pub fn load_balancer_named(&self, name: &str) -> Option<NetworkLoadBalancer> {
        self.load_balancers
            .lock()
            .unwrap()
            .values()
            .find(|lb| lb.name == name)
            .cloned()
    }

    /// Snapshot of a route table by ID
    pub fn route_table(&self, route_table_id: &str) -> Option<RouteTable> {
        self.route_tables.lock().unwrap().get(route_table_id).cloned()
    }

    /// Generate next ID
    pub(crate) fn next_id(&self, prefix: &str) -> String {
        let mut id = self.next_id.lock().unwrap();
        let current = *id;
        *id += 1;
        format!("{}{:04}", prefix, current)
    }

    /// Run a pending hook, then pop an injected failure for `operation`
    pub(crate) fn injected(&self, operation: &str) -> Result<(), CloudError> {
        let hook = self
            .hooks
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        if let Some(hook) = hook {
            hook();
        }

        match self
            .failures
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub(crate) fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    pub(crate) fn record_read(&self) {
        *self.reads.lock().unwrap() += 1;
    }
}

#[async_trait::async_trait]
impl CloudApi for MockCloudClient {
    fn folder_id(&self) -> &str {
        &self.folder_id
    }

    fn region_id(&self) -> &str {
        &self.region_id
    }

    // Compute - delegated to compute module
    async fn get_instance(&self, instance_id: &str) -> Result<Instance, CloudError> {
        compute::get_instance(self, instance_id).await
    }

    async fn find_instance_by_name(&self, name: &str) -> Result<Option<Instance>, CloudError> {
        compute::find_instance_by_name(self, name).await
    }

    // VPC - delegated to vpc module
    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet, CloudError> {
        vpc::get_subnet(self, subnet_id).await
    }

    async fn get_route_table(&self, route_table_id: &str) -> Result<RouteTable, CloudError> {
        vpc::get_route_table(self, route_table_id).await
    }

    async fn update_route_table_static_routes(&self, route_table_id: &str, static_routes: Vec<StaticRoute>) -> Result<RouteTable, CloudError> {
        vpc::update_route_table_static_routes(self, route_table_id, static_routes).await
    }

    // Load balancing - delegated to load_balancer module
    async fn list_target_groups(&self) -> Result<Vec<TargetGroup>, CloudError> {
        load_balancer::list_target_groups(self).await
    }

    async fn get_target_group_by_name(&self, name: &str) -> Result<Option<TargetGroup>, CloudError> {
        load_balancer::get_target_group_by_name(self, name).await
    }

    async fn create_target_group(&self, request: CreateTargetGroupRequest) -> Result<TargetGroup, CloudError> {
        load_balancer::create_target_group(self, request).await
    }

    async fn add_targets(&self, target_group_id: &str, targets: Vec<Target>) -> Result<TargetGroup, CloudError> {
        load_balancer::add_targets(self, target_group_id, targets).await
    }

    async fn remove_targets(&self, target_group_id: &str, targets: Vec<Target>) -> Result<TargetGroup, CloudError> {
        load_balancer::remove_targets(self, target_group_id, targets).await
    }

    async fn delete_target_group(&self, target_group_id: &str) -> Result<(), CloudError> {
        load_balancer::delete_target_group(self, target_group_id).await
    }

    async fn get_load_balancer_by_name(&self, name: &str) -> Result<Option<NetworkLoadBalancer>, CloudError> {
        load_balancer::get_load_balancer_by_name(self, name).await
    }

    async fn create_load_balancer(&self, request: CreateNetworkLoadBalancerRequest) -> Result<NetworkLoadBalancer, CloudError> {
        load_balancer::create_load_balancer(self, request).await
    }

    async fn delete_load_balancer(&self, load_balancer_id: &str) -> Result<(), CloudError> {
        load_balancer::delete_load_balancer(self, load_balancer_id).await
    }

    async fn add_listener(&self, load_balancer_id: &str, listener: ListenerSpec) -> Result<NetworkLoadBalancer, CloudError> {
        load_balancer::add_listener(self, load_balancer_id, listener).await
    }

    async fn remove_listener(&self, load_balancer_id: &str, listener_name: &str) -> Result<NetworkLoadBalancer, CloudError> {
        load_balancer::remove_listener(self, load_balancer_id, listener_name).await
    }

    async fn attach_target_group(&self, load_balancer_id: &str, attached: AttachedTargetGroup) -> Result<NetworkLoadBalancer, CloudError> {
        load_balancer::attach_target_group(self, load_balancer_id, attached).await
    }

    async fn detach_target_group(&self, load_balancer_id: &str, target_group_id: &str) -> Result<NetworkLoadBalancer, CloudError> {
        load_balancer::detach_target_group(self, load_balancer_id, target_group_id).await
    }
}
