//! Service reconciliation.
//!
//! A `kube_runtime::Controller` over Services drives the LoadBalancer
//! capability. The controller dedups and schedules requests; node set
//! changes arrive as a trigger that reconciles every cached Service. Each
//! reconciliation gets a fresh deadline. Retryable failures are requeued
//! with per-Service exponential backoff, anything else is logged and waits
//! for the object to change.

use crate::annotations::LOAD_BALANCER_CLEANUP_FINALIZER;
use crate::backoff::{ExponentialBackoff, ItemBackoff};
use crate::cloud::Cloud;
use crate::error::ControllerError;
use crate::listers::{NodeLister, has_cleanup_finalizer, is_load_balancer_service};
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{LoadBalancerStatus, Service};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig, Error as ControllerRunError};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, watcher};
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Deadline for a single reconciliation
pub const CYCLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Writes back to Service objects
#[async_trait::async_trait]
pub trait ServiceWriter: Send + Sync {
    /// Replace the finalizer list
    async fn set_finalizers(&self, service: &Service, finalizers: Vec<String>) -> Result<(), ControllerError>;
    /// Set `status.loadBalancer`; `None` clears the ingress list
    async fn patch_status(&self, service: &Service, status: Option<&LoadBalancerStatus>) -> Result<(), ControllerError>;
}

/// [`ServiceWriter`] backed by the Kubernetes API
pub struct KubeServiceWriter {
    client: Client,
}

impl KubeServiceWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, service: &Service) -> Api<Service> {
        Api::namespaced(self.client.clone(), &service.namespace().unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl ServiceWriter for KubeServiceWriter {
    async fn set_finalizers(&self, service: &Service, finalizers: Vec<String>) -> Result<(), ControllerError> {
        // resourceVersion makes the merge patch fail on a concurrent change
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": service.resource_version(),
            }
        });
        self.api(service)
            .patch(&service.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_status(&self, service: &Service, status: Option<&LoadBalancerStatus>) -> Result<(), ControllerError> {
        let ingress = status.and_then(|s| s.ingress.clone());
        let patch = json!({
            "status": {
                "loadBalancer": {
                    "ingress": ingress,
                }
            }
        });
        self.api(service)
            .patch_status(&service.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Shared state of the Service controller
pub struct ServiceContext {
    cloud: Arc<Cloud>,
    nodes: Arc<dyn NodeLister>,
    writer: Arc<dyn ServiceWriter>,
    backoff: Mutex<ItemBackoff<ObjectRef<Service>>>,
}

impl ServiceContext {
    pub fn new(cloud: Arc<Cloud>, nodes: Arc<dyn NodeLister>, writer: Arc<dyn ServiceWriter>) -> Self {
        Self {
            cloud,
            nodes,
            writer,
            backoff: Mutex::new(ItemBackoff::new(ExponentialBackoff::default())),
        }
    }

    fn backoff(&self) -> MutexGuard<'_, ItemBackoff<ObjectRef<Service>>> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Failures recorded for a Service since its last success
    pub fn failures(&self, service: &Service) -> u32 {
        self.backoff().num_requeues(&ObjectRef::from_obj(service))
    }

    async fn process_service(&self, service: &Service) -> Result<(), ControllerError> {
        let load_balancer = self.cloud.load_balancer();
        let deleting = service.metadata.deletion_timestamp.is_some();

        if deleting || !is_load_balancer_service(service) {
            if !has_cleanup_finalizer(service) {
                return Ok(());
            }
            info!(
                "Cleaning up load balancer of service {}/{}",
                service.namespace().unwrap_or_default(),
                service.name_any()
            );
            load_balancer.ensure_load_balancer_deleted(service).await?;
            if !deleting {
                self.writer.patch_status(service, None).await?;
            }
            let finalizers = service
                .finalizers()
                .iter()
                .filter(|f| *f != LOAD_BALANCER_CLEANUP_FINALIZER)
                .cloned()
                .collect();
            return self.writer.set_finalizers(service, finalizers).await;
        }

        if !has_cleanup_finalizer(service) {
            let mut finalizers = service.finalizers().to_vec();
            finalizers.push(LOAD_BALANCER_CLEANUP_FINALIZER.to_string());
            self.writer.set_finalizers(service, finalizers).await?;
        }

        let nodes = self.nodes.list();
        let status = load_balancer.ensure_load_balancer(service, &nodes).await?;

        let current = service.status.as_ref().and_then(|s| s.load_balancer.as_ref());
        if current != Some(&status) {
            self.writer.patch_status(service, Some(&status)).await?;
        }
        Ok(())
    }
}

/// Reconcile one Service under [`CYCLE_TIMEOUT`]
pub async fn reconcile(service: Arc<Service>, ctx: Arc<ServiceContext>) -> Result<Action, ControllerError> {
    debug!(
        "Reconciling service {}/{}",
        service.namespace().unwrap_or_default(),
        service.name_any()
    );
    match tokio::time::timeout(CYCLE_TIMEOUT, ctx.process_service(&service)).await {
        Ok(result) => result?,
        Err(_) => return Err(ControllerError::Timeout(CYCLE_TIMEOUT)),
    }
    ctx.backoff().forget(&ObjectRef::from_obj(&*service));
    Ok(Action::await_change())
}

/// Requeue retryable failures with backoff, drop the rest until the Service changes
pub fn error_policy(service: Arc<Service>, err: &ControllerError, ctx: Arc<ServiceContext>) -> Action {
    let key = ObjectRef::from_obj(&*service);
    let mut backoff = ctx.backoff();
    if err.is_retryable() {
        let delay = backoff.when(&key);
        warn!(
            "Failed to reconcile service {} (attempt {}), retrying in {:?}: {}",
            key,
            backoff.num_requeues(&key),
            delay,
            err
        );
        Action::requeue(delay)
    } else {
        error!("Failed to reconcile service {}, not retrying: {}", key, err);
        backoff.forget(&key);
        Action::await_change()
    }
}

/// Run the Service controller until shutdown.
///
/// `controller` must be the one whose store backs the Service lister the
/// cloud was built with. Every item of `node_changes` reconciles all cached
/// Services.
pub async fn run(
    controller: Controller<Service>,
    node_changes: impl Stream<Item = ()> + Send + Sync + 'static,
    ctx: Arc<ServiceContext>,
    workers: usize,
) {
    info!("Starting Service controller with {} workers", workers);

    let config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(u16::try_from(workers).unwrap_or(u16::MAX));

    controller
        .with_config(config)
        .reconcile_all_on(node_changes)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {}", obj),
                // Already reported by error_policy
                Err(ControllerRunError::ReconcilerFailed(..)) => {}
                Err(e) => warn!("Service controller error: {}", e),
            }
        })
        .await;

    info!("Service controller stopped");
}

/// Controller over all Services; its store is the Service cache
pub fn controller(api: Api<Service>) -> Controller<Service> {
    Controller::new(api, watcher::Config::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use k8s_openapi::api::core::v1::ServiceStatus;
    use yandex_cloud_client::{CloudApi, CloudError, MockCloudClient};

    #[derive(Debug, Clone, PartialEq)]
    enum Write {
        Finalizers(Vec<String>),
        Status(Option<Vec<String>>),
    }

    #[derive(Default)]
    struct RecordingWriter {
        writes: Mutex<Vec<Write>>,
    }

    impl RecordingWriter {
        fn writes(&self) -> Vec<Write> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ServiceWriter for RecordingWriter {
        async fn set_finalizers(&self, _service: &Service, finalizers: Vec<String>) -> Result<(), ControllerError> {
            self.writes.lock().unwrap().push(Write::Finalizers(finalizers));
            Ok(())
        }

        async fn patch_status(&self, _service: &Service, status: Option<&LoadBalancerStatus>) -> Result<(), ControllerError> {
            let ips = status.map(|s| {
                s.ingress
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|i| i.ip)
                    .collect()
            });
            self.writes.lock().unwrap().push(Write::Status(ips));
            Ok(())
        }
    }

    struct Fixture {
        mock: MockCloudClient,
        services: Arc<StaticServiceLister>,
        writer: Arc<RecordingWriter>,
        ctx: Arc<ServiceContext>,
    }

    fn fixture() -> Fixture {
        let mock = MockCloudClient::new(FOLDER_ID, REGION_ID);
        mock.add_subnet(subnet("e9b-a", DEFAULT_NETWORK_ID));
        mock.add_instance(instance("fhm1", "worker-0", &[("e9b-a", "10.0.0.5", None)]));

        let api: Arc<dyn CloudApi> = Arc::new(mock.clone());
        let nodes = StaticNodeLister::new(vec![node("worker-0", Some("yandex://fhm1"))]);
        let services = StaticServiceLister::new(vec![]);
        let cloud = Arc::new(Cloud::new(
            Arc::new(cloud_config()),
            api,
            nodes.clone(),
            services.clone(),
        ));
        let writer = Arc::new(RecordingWriter::default());
        let ctx = Arc::new(ServiceContext::new(cloud, nodes, writer.clone()));

        Fixture {
            mock,
            services,
            writer,
            ctx,
        }
    }

    fn web() -> Service {
        annotate(
            lb_service("default", "web", "uid-1", &[("http", "TCP", 80, 30080)]),
            crate::annotations::LISTENER_ADDRESS_IPV4,
            "198.51.100.10",
        )
    }

    fn with_finalizer(mut service: Service) -> Service {
        service
            .finalizers_mut()
            .push(LOAD_BALANCER_CLEANUP_FINALIZER.to_string());
        service
    }

    /// Run one reconciliation and apply the error policy the way the controller does
    async fn reconcile_once(f: &Fixture, service: &Service) -> Action {
        f.services.set(vec![service.clone()]);
        let service = Arc::new(service.clone());
        match reconcile(Arc::clone(&service), Arc::clone(&f.ctx)).await {
            Ok(action) => action,
            Err(e) => error_policy(service, &e, Arc::clone(&f.ctx)),
        }
    }

    #[tokio::test]
    async fn test_active_service_gets_finalizer_balancer_and_status() {
        let f = fixture();

        let action = reconcile_once(&f, &web()).await;

        assert_eq!(action, Action::await_change());
        assert!(f.mock.load_balancer_named("auid1").is_some());
        assert_eq!(
            f.writer.writes(),
            vec![
                Write::Finalizers(vec![LOAD_BALANCER_CLEANUP_FINALIZER.to_string()]),
                Write::Status(Some(vec!["198.51.100.10".to_string()])),
            ]
        );
    }

    #[tokio::test]
    async fn test_status_not_patched_when_unchanged() {
        let f = fixture();
        let mut service = with_finalizer(web());
        service.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![k8s_openapi::api::core::v1::LoadBalancerIngress {
                    ip: Some("198.51.100.10".to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });

        reconcile_once(&f, &service).await;
        assert!(f.writer.writes().is_empty());
    }

    #[tokio::test]
    async fn test_deleting_service_releases_finalizer() {
        let f = fixture();
        let service = with_finalizer(web());
        reconcile_once(&f, &service).await;
        assert!(f.mock.load_balancer_named("auid1").is_some());

        let mut deleting = service.clone();
        deleting.metadata.deletion_timestamp =
            serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap();
        reconcile_once(&f, &deleting).await;

        assert!(f.mock.load_balancer_named("auid1").is_none());
        assert!(f.mock.all_target_groups().is_empty());
        assert_eq!(f.writer.writes().last(), Some(&Write::Finalizers(vec![])));
    }

    #[tokio::test]
    async fn test_type_change_clears_status() {
        let f = fixture();
        let service = with_finalizer(web());
        reconcile_once(&f, &service).await;

        let mut cluster_ip = service.clone();
        if let Some(spec) = cluster_ip.spec.as_mut() {
            spec.type_ = Some("ClusterIP".to_string());
        }
        reconcile_once(&f, &cluster_ip).await;

        assert!(f.mock.load_balancer_named("auid1").is_none());
        let writes = f.writer.writes();
        assert_eq!(
            writes[writes.len() - 2..].to_vec(),
            vec![Write::Status(None), Write::Finalizers(vec![])]
        );
    }

    #[tokio::test]
    async fn test_plain_service_is_ignored() {
        let f = fixture();
        let mut plain = web();
        if let Some(spec) = plain.spec.as_mut() {
            spec.type_ = Some("ClusterIP".to_string());
        }

        let action = reconcile_once(&f, &plain).await;
        assert_eq!(action, Action::await_change());
        assert!(f.writer.writes().is_empty());
        assert!(f.mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_requeues_with_growing_backoff() {
        let f = fixture();
        let service = with_finalizer(web());
        for _ in 0..2 {
            f.mock.fail_next(
                "get_subnet",
                CloudError::Api {
                    status: 503,
                    message: "unavailable".to_string(),
                },
            );
        }

        let first = reconcile_once(&f, &service).await;
        let second = reconcile_once(&f, &service).await;
        assert_eq!(first, Action::requeue(Duration::from_millis(5)));
        assert_eq!(second, Action::requeue(Duration::from_millis(10)));
        assert_eq!(f.ctx.failures(&service), 2);

        // Success resets the backoff
        assert_eq!(reconcile_once(&f, &service).await, Action::await_change());
        assert_eq!(f.ctx.failures(&service), 0);
        assert!(f.mock.load_balancer_named("auid1").is_some());
    }

    #[tokio::test]
    async fn test_invalid_service_is_not_retried() {
        let f = fixture();
        let mut broken = with_finalizer(web());
        broken.metadata.uid = None;

        let action = reconcile_once(&f, &broken).await;
        assert_eq!(action, Action::await_change());
        assert_eq!(f.ctx.failures(&broken), 0);
        assert!(f.mock.calls().is_empty());
    }
}
