//! Unit tests for the target group reconciler

#[cfg(test)]
mod tests {
    use crate::annotations::EXCLUDE_FROM_EXTERNAL_LB_LABEL;
    use crate::error::ControllerError;
    use crate::reconciler::instances::InstanceResolver;
    use crate::reconciler::target_groups::{TargetGroupReconciler, target_group_name};
    use crate::test_utils::*;
    use k8s_openapi::api::core::v1::Node;
    use kube::ResourceExt;
    use std::sync::Arc;
    use yandex_cloud_client::{CloudApi, CloudError, MockCall, MockCloudClient, Target, TargetGroup};

    struct Fixture {
        mock: MockCloudClient,
        services: Arc<StaticServiceLister>,
        reconciler: TargetGroupReconciler,
    }

    fn fixture() -> Fixture {
        let mock = MockCloudClient::new(FOLDER_ID, REGION_ID);
        mock.add_subnet(subnet("e9b-a", DEFAULT_NETWORK_ID));
        mock.add_subnet(subnet("e9b-b", "net-b"));
        mock.add_instance(instance("fhm1", "worker-0", &[("e9b-a", "10.0.0.5", None)]));
        mock.add_instance(instance(
            "fhm2",
            "worker-1",
            &[("e9b-a", "10.0.0.6", None), ("e9b-b", "10.1.0.6", None)],
        ));

        let config = Arc::new(cloud_config());
        let api: Arc<dyn CloudApi> = Arc::new(mock.clone());
        let instances = Arc::new(InstanceResolver::new(Arc::clone(&api), Arc::clone(&config)));
        let services = StaticServiceLister::new(vec![]);
        let reconciler = TargetGroupReconciler::new(api, config, instances, services.clone());

        Fixture {
            mock,
            services,
            reconciler,
        }
    }

    fn nodes(list: Vec<Node>) -> Vec<Arc<Node>> {
        list.into_iter().map(Arc::new).collect()
    }

    fn workers() -> Vec<Arc<Node>> {
        nodes(vec![
            node("worker-0", Some("yandex://fhm1")),
            node("worker-1", Some("yandex://fhm2")),
        ])
    }

    fn target(subnet_id: &str, address: &str) -> Target {
        Target {
            subnet_id: subnet_id.to_string(),
            address: address.to_string(),
        }
    }

    fn sorted_targets(group: &TargetGroup) -> Vec<Target> {
        let mut targets = group.targets.clone();
        targets.sort();
        targets
    }

    #[test]
    fn test_target_group_name() {
        assert_eq!(target_group_name("", "k8s", "enpnet"), "k8senpnet");
        assert_eq!(target_group_name("edge-", "k8s", "enpnet"), "edge-k8senpnet");

        let long = "p".repeat(50);
        let name = target_group_name(&long, "k8s", "enpnet");
        assert_eq!(name, format!("{}k8senpnet", "p".repeat(36)));

        // Same key, same name; different networks never collide
        assert_eq!(
            target_group_name("x", "k8s", "net-a"),
            target_group_name("x", "k8s", "net-a")
        );
        assert_ne!(
            target_group_name("", "k8s", "net-a"),
            target_group_name("", "k8s", "net-b")
        );
    }

    #[tokio::test]
    async fn test_creates_one_group_per_network() {
        let f = fixture();
        f.reconciler.sync_target_groups(&workers()).await.unwrap();

        let default_group = f.mock.target_group_named("k8senpnet").unwrap();
        assert_eq!(
            sorted_targets(&default_group),
            vec![target("e9b-a", "10.0.0.5"), target("e9b-a", "10.0.0.6")]
        );
        assert_eq!(default_group.region_id, REGION_ID);
        let other_group = f.mock.target_group_named("k8snet-b").unwrap();
        assert_eq!(sorted_targets(&other_group), vec![target("e9b-b", "10.1.0.6")]);

        let creates = f
            .mock
            .calls()
            .into_iter()
            .filter(|c| matches!(c, MockCall::CreateTargetGroup { .. }))
            .count();
        assert_eq!(creates, 2);
        assert_eq!(f.mock.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_node_set_makes_no_remote_calls() {
        let f = fixture();
        f.reconciler.sync_target_groups(&workers()).await.unwrap();
        f.mock.clear_calls();

        f.reconciler.sync_target_groups(&workers()).await.unwrap();
        assert!(f.mock.calls().is_empty());
        assert_eq!(f.mock.read_count(), 0);

        let state = f.reconciler.lock().await;
        let visited: Vec<&str> = state.last_visited().unwrap().iter().map(String::as_str).collect();
        assert_eq!(visited, vec!["worker-0", "worker-1"]);
    }

    #[tokio::test]
    async fn test_membership_is_a_set_difference() {
        let f = fixture();
        f.mock.add_target_group(TargetGroup {
            id: "enpexisting".to_string(),
            folder_id: FOLDER_ID.to_string(),
            name: "k8senpnet".to_string(),
            region_id: REGION_ID.to_string(),
            targets: vec![target("e9b-a", "10.0.0.5"), target("e9b-a", "10.0.0.99")],
            labels: Default::default(),
        });

        let only_first = nodes(vec![node("worker-0", Some("yandex://fhm1"))]);
        f.reconciler.sync_target_groups(&only_first).await.unwrap();

        assert_eq!(
            f.mock.calls(),
            vec![MockCall::RemoveTargets {
                target_group_id: "enpexisting".to_string(),
                targets: vec![target("e9b-a", "10.0.0.99")],
            }]
        );

        f.mock.clear_calls();
        f.reconciler.sync_target_groups(&workers()).await.unwrap();
        let calls = f.mock.calls();
        assert!(calls.contains(&MockCall::AddTargets {
            target_group_id: "enpexisting".to_string(),
            targets: vec![target("e9b-a", "10.0.0.6")],
        }));
        assert!(!calls.iter().any(|c| matches!(c, MockCall::RemoveTargets { .. })));
    }

    #[tokio::test]
    async fn test_node_prefix_annotation_names_the_group() {
        let f = fixture();
        let prefixed = nodes(vec![with_prefix(
            node("worker-0", Some("yandex://fhm1")),
            &"edge".repeat(12),
        )]);

        f.reconciler.sync_target_groups(&prefixed).await.unwrap();

        let expected = format!("{}k8senpnet", "edge".repeat(9));
        assert!(f.mock.target_group_named(&expected).is_some());
        assert!(f.mock.target_group_named("k8senpnet").is_none());
    }

    #[tokio::test]
    async fn test_foreign_and_excluded_nodes_are_skipped() {
        let f = fixture();
        let mut excluded = node("worker-1", Some("yandex://fhm2"));
        excluded
            .labels_mut()
            .insert(EXCLUDE_FROM_EXTERNAL_LB_LABEL.to_string(), String::new());
        let mixed = nodes(vec![
            node("worker-0", Some("yandex://fhm1")),
            node("aws-node", Some("aws:///eu-west-1a/i-0abc")),
            node("fresh-node", None),
            excluded,
        ]);

        f.reconciler.sync_target_groups(&mixed).await.unwrap();

        let group = f.mock.target_group_named("k8senpnet").unwrap();
        assert_eq!(group.targets, vec![target("e9b-a", "10.0.0.5")]);
        assert!(f.mock.target_group_named("k8snet-b").is_none());
    }

    #[tokio::test]
    async fn test_missing_instance_aborts_before_mutation() {
        let f = fixture();
        let first = nodes(vec![node("worker-0", Some("yandex://fhm1"))]);
        f.reconciler.sync_target_groups(&first).await.unwrap();
        f.mock.clear_calls();

        let with_missing = nodes(vec![
            node("worker-0", Some("yandex://fhm1")),
            node("worker-1", Some("yandex://fhm2")),
            node("worker-9", Some("yandex://fhm9")),
        ]);
        let result = f.reconciler.sync_target_groups(&with_missing).await;
        assert!(matches!(result, Err(ControllerError::InstanceNotFound(name)) if name == "worker-9"));
        assert!(f.mock.calls().is_empty());

        // Cache still holds the last successful set
        f.mock.clear_calls();
        f.reconciler.sync_target_groups(&first).await.unwrap();
        assert_eq!(f.mock.read_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_mutation_keeps_cache() {
        let f = fixture();
        f.reconciler.sync_target_groups(&workers()).await.unwrap();

        let fewer = nodes(vec![node("worker-0", Some("yandex://fhm1"))]);
        f.mock.fail_next(
            "remove_targets",
            CloudError::Api {
                status: 503,
                message: "unavailable".to_string(),
            },
        );
        let result = f.reconciler.sync_target_groups(&fewer).await;
        assert!(matches!(&result, Err(e) if e.is_retryable()));

        f.mock.clear_calls();
        f.reconciler.sync_target_groups(&fewer).await.unwrap();
        assert!(
            f.mock
                .calls()
                .iter()
                .any(|c| matches!(c, MockCall::RemoveTargets { .. }))
        );
    }

    #[tokio::test]
    async fn test_already_exists_on_create_falls_back_to_update() {
        let f = fixture();
        f.mock.add_target_group(TargetGroup {
            id: "enpraced".to_string(),
            folder_id: FOLDER_ID.to_string(),
            name: "k8senpnet".to_string(),
            region_id: REGION_ID.to_string(),
            targets: vec![],
            labels: Default::default(),
        });
        // The first lookup misses the group another writer just created
        f.mock
            .fail_next("get_target_group_by_name", CloudError::NotFound("k8senpnet".to_string()));

        let first = nodes(vec![node("worker-0", Some("yandex://fhm1"))]);
        f.reconciler.sync_target_groups(&first).await.unwrap();

        let group = f.mock.target_group_named("k8senpnet").unwrap();
        assert_eq!(group.id, "enpraced");
        assert_eq!(group.targets, vec![target("e9b-a", "10.0.0.5")]);
        assert_eq!(f.mock.all_target_groups().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_after_last_service_and_node() {
        let f = fixture();
        f.reconciler.sync_target_groups(&workers()).await.unwrap();
        f.mock.add_target_group(TargetGroup {
            id: "enpforeign".to_string(),
            folder_id: FOLDER_ID.to_string(),
            name: "other-cluster-group".to_string(),
            region_id: REGION_ID.to_string(),
            targets: vec![],
            labels: Default::default(),
        });

        // An active LoadBalancer service keeps the groups alive
        f.services
            .set(vec![lb_service("default", "web", "uid-1", &[("http", "TCP", 80, 30080)])]);
        f.mock.clear_calls();
        f.reconciler.sync_target_groups(&[]).await.unwrap();
        assert!(f.mock.calls().is_empty());

        f.services.set(vec![]);
        f.reconciler.sync_target_groups(&[]).await.unwrap();

        let remaining: Vec<String> = f.mock.all_target_groups().into_iter().map(|tg| tg.name).collect();
        assert_eq!(remaining, vec!["other-cluster-group".to_string()]);
        assert!(f.reconciler.lock().await.last_visited().is_none());

        // Cache was cleared, so the next sync recreates the groups
        f.reconciler.sync_target_groups(&workers()).await.unwrap();
        assert!(f.mock.target_group_named("k8senpnet").is_some());
    }

    #[tokio::test]
    async fn test_deleting_service_does_not_keep_groups() {
        let f = fixture();
        f.reconciler.sync_target_groups(&workers()).await.unwrap();

        let mut deleting = lb_service("default", "web", "uid-1", &[("http", "TCP", 80, 30080)]);
        deleting.metadata.deletion_timestamp =
            serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap();
        f.services.set(vec![deleting]);

        f.reconciler.sync_target_groups(&[]).await.unwrap();
        assert!(f.mock.all_target_groups().is_empty());
    }

    #[tokio::test]
    async fn test_failed_cleanup_keeps_cache_and_retries() {
        let f = fixture();
        f.reconciler.sync_target_groups(&workers()).await.unwrap();
        f.mock.fail_next(
            "delete_target_group",
            CloudError::Api {
                status: 503,
                message: "unavailable".to_string(),
            },
        );

        let result = f.reconciler.sync_target_groups(&[]).await;
        assert!(matches!(&result, Err(e) if e.is_retryable()));
        {
            let state = f.reconciler.lock().await;
            let visited: Vec<&str> = state.last_visited().unwrap().iter().map(String::as_str).collect();
            assert_eq!(visited, vec!["worker-0", "worker-1"]);
        }
        assert!(!f.mock.all_target_groups().is_empty());

        f.reconciler.sync_target_groups(&[]).await.unwrap();
        assert!(f.mock.all_target_groups().is_empty());
        assert!(f.reconciler.lock().await.last_visited().is_none());
    }
}
