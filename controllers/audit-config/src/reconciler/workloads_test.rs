//! Unit tests for the workload scanning feature

#[cfg(test)]
mod tests {
    use crate::reconciler::Progress;
    use crate::resources::workloads::{INVENTORY_REVISION_ANNOTATION, RESTARTED_AT_ANNOTATION, pod_inventory_revision};
    use crate::resources::Owner;
    use crate::test_utils::*;
    use cluster_client::{MockClusterClient, Verb};
    use crds::{AuditConfig, ConditionStatus, ConditionType, OperatorConfigSpec, find_condition};
    use image_resolver::StaticImageResolver;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn workloads_enabled() -> AuditConfig {
        create_test_audit_config_with(|spec| spec.workloads.enable = true)
    }

    fn workload_condition(client: &MockClusterClient) -> crds::Condition {
        let config = client.stored::<AuditConfig>(TEST_NAMESPACE, TEST_NAME).unwrap();
        let status = config.status.unwrap();
        find_condition(&status.conditions, ConditionType::WorkloadScanningDegraded)
            .cloned()
            .unwrap()
    }

    fn container_image(deployment: &Deployment) -> String {
        deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .image
            .clone()
            .unwrap()
    }

    #[tokio::test]
    async fn test_creates_config_map_then_deployment() {
        let client = MockClusterClient::new();
        let images = StaticImageResolver::new();
        client.insert(TEST_NAMESPACE, &workloads_enabled());
        let reconciler = create_test_reconciler(&client, &images);

        // ConfigMap first, Deployment on the next pass, converged on the third
        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Requeue);
        assert!(client.stored::<ConfigMap>(TEST_NAMESPACE, "audit-deploy").is_some());
        assert!(client.stored::<Deployment>(TEST_NAMESPACE, "audit-workload").is_none());

        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Requeue);
        let deployment = client.stored::<Deployment>(TEST_NAMESPACE, "audit-workload").unwrap();
        assert!(container_image(&deployment).starts_with("ghcr.io/microscaler/audit-scanner@sha256:"));

        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Done);
        let condition = workload_condition(&client);
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "WorkloadScanningAvailable");
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let client = MockClusterClient::new();
        let images = StaticImageResolver::new();
        client.insert(TEST_NAMESPACE, &workloads_enabled());
        let reconciler = create_test_reconciler(&client, &images);
        reconcile_until_converged(&reconciler, 5).await;

        client.reset_calls();
        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Done);
        assert_eq!(client.mutation_count(), 0, "{:?}", client.calls());
    }

    #[tokio::test]
    async fn test_skip_container_resolution_trusts_tag() {
        let client = MockClusterClient::new();
        let images = StaticImageResolver::new();
        client.insert(TEST_NAMESPACE, &workloads_enabled());
        client.insert_cluster(&create_test_operator_config(OperatorConfigSpec {
            skip_container_resolution: true,
            ..Default::default()
        }));
        let reconciler = create_test_reconciler(&client, &images);
        reconcile_until_converged(&reconciler, 5).await;

        let deployment = client.stored::<Deployment>(TEST_NAMESPACE, "audit-workload").unwrap();
        assert_eq!(container_image(&deployment), "ghcr.io/microscaler/audit-scanner:latest");
    }

    #[tokio::test]
    async fn test_disable_then_enable_cycle() {
        let client = MockClusterClient::new();
        let images = StaticImageResolver::new();
        client.insert(TEST_NAMESPACE, &workloads_enabled());
        let reconciler = create_test_reconciler(&client, &images);
        reconcile_until_converged(&reconciler, 5).await;

        client.modify::<AuditConfig>(TEST_NAMESPACE, TEST_NAME, |c| c.spec.workloads.enable = false);
        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Requeue);
        assert!(client.stored::<Deployment>(TEST_NAMESPACE, "audit-workload").is_none());
        assert!(client.stored::<ConfigMap>(TEST_NAMESPACE, "audit-deploy").is_none());
        let condition = workload_condition(&client);
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "WorkloadScanningDisabled");

        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Done);

        client.modify::<AuditConfig>(TEST_NAMESPACE, TEST_NAME, |c| c.spec.workloads.enable = true);
        reconcile_until_converged(&reconciler, 5).await;
        assert!(client.stored::<Deployment>(TEST_NAMESPACE, "audit-workload").is_some());
        assert!(client.stored::<ConfigMap>(TEST_NAMESPACE, "audit-deploy").is_some());
    }

    #[tokio::test]
    async fn test_never_enabled_feature_leaves_no_condition() {
        let client = MockClusterClient::new();
        let images = StaticImageResolver::new();
        client.insert(TEST_NAMESPACE, &create_test_audit_config(TEST_NAME, TEST_NAMESPACE));
        let reconciler = create_test_reconciler(&client, &images);

        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Done);
        assert_eq!(client.mutation_count(), 0);
        let config = client.stored::<AuditConfig>(TEST_NAMESPACE, TEST_NAME).unwrap();
        assert!(config.status.is_none());
    }

    #[tokio::test]
    async fn test_resource_change_updates_deployment() {
        let client = MockClusterClient::new();
        let images = StaticImageResolver::new();
        client.insert(TEST_NAMESPACE, &workloads_enabled());
        let reconciler = create_test_reconciler(&client, &images);
        reconcile_until_converged(&reconciler, 5).await;

        client.modify::<AuditConfig>(TEST_NAMESPACE, TEST_NAME, |c| {
            c.spec.workloads.resources.limits.insert("cpu".to_string(), "2".to_string());
            c.spec.workloads.resources.limits.insert("memory".to_string(), "1Gi".to_string());
        });
        client.reset_calls();
        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Requeue);
        assert_eq!(client.calls()[0].verb, Verb::Replace);

        let deployment = client.stored::<Deployment>(TEST_NAMESPACE, "audit-workload").unwrap();
        let resources = deployment.spec.unwrap().template.spec.unwrap().containers[0]
            .resources
            .clone()
            .unwrap();
        assert_eq!(resources.limits.unwrap()["cpu"].0, "2");
        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Done);
    }

    #[tokio::test]
    async fn test_equivalent_quantities_do_not_update() {
        let client = MockClusterClient::new();
        let images = StaticImageResolver::new();
        client.insert(TEST_NAMESPACE, &workloads_enabled());
        let reconciler = create_test_reconciler(&client, &images);
        reconcile_until_converged(&reconciler, 5).await;

        // The API server may hand back a canonicalized quantity
        client.modify::<Deployment>(TEST_NAMESPACE, "audit-workload", |d| {
            let container = &mut d.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0];
            let requests = container.resources.as_mut().unwrap().requests.as_mut().unwrap();
            requests.insert(
                "cpu".to_string(),
                k8s_openapi::apimachinery::pkg::api::resource::Quantity("0.1".to_string()),
            );
        });
        client.reset_calls();
        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Done);
        assert_eq!(client.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_inventory_revision_restarts_pods() {
        let client = MockClusterClient::new();
        let images = StaticImageResolver::new();
        client.insert(TEST_NAMESPACE, &workloads_enabled());
        let reconciler = create_test_reconciler(&client, &images);
        reconcile_until_converged(&reconciler, 5).await;

        let current = client.stored::<Deployment>(TEST_NAMESPACE, "audit-workload").unwrap();
        let revision = pod_inventory_revision(&current).unwrap().to_string();

        client.modify::<Deployment>(TEST_NAMESPACE, "audit-workload", |d| {
            let meta = d.spec.as_mut().unwrap().template.metadata.as_mut().unwrap();
            meta.annotations
                .as_mut()
                .unwrap()
                .insert(INVENTORY_REVISION_ANNOTATION.to_string(), "stale".to_string());
        });

        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Requeue);
        let restarted = client.stored::<Deployment>(TEST_NAMESPACE, "audit-workload").unwrap();
        assert_eq!(pod_inventory_revision(&restarted), Some(revision.as_str()));
        let annotations = restarted.spec.unwrap().template.metadata.unwrap().annotations.unwrap();
        assert!(annotations.contains_key(RESTARTED_AT_ANNOTATION));

        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Done);
    }

    #[tokio::test]
    async fn test_spec_update_keeps_restart_annotation() {
        let client = MockClusterClient::new();
        let images = StaticImageResolver::new();
        client.insert(TEST_NAMESPACE, &workloads_enabled());
        let reconciler = create_test_reconciler(&client, &images);
        reconcile_until_converged(&reconciler, 5).await;

        client.modify::<Deployment>(TEST_NAMESPACE, "audit-workload", |d| {
            let meta = d.spec.as_mut().unwrap().template.metadata.as_mut().unwrap();
            meta.annotations
                .as_mut()
                .unwrap()
                .insert(RESTARTED_AT_ANNOTATION.to_string(), "2026-10-16T10:00:00Z".to_string());
        });
        client.modify::<AuditConfig>(TEST_NAMESPACE, TEST_NAME, |c| {
            c.spec.workloads.service_account_name = Some("custom-scanner".to_string());
        });

        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Requeue);
        let updated = client.stored::<Deployment>(TEST_NAMESPACE, "audit-workload").unwrap();
        let template = updated.spec.unwrap().template;
        assert_eq!(
            template.spec.unwrap().service_account_name.as_deref(),
            Some("custom-scanner")
        );
        assert_eq!(
            template.metadata.unwrap().annotations.unwrap()[RESTARTED_AT_ANNOTATION],
            "2026-10-16T10:00:00Z"
        );
    }

    #[tokio::test]
    async fn test_degraded_follows_ready_replicas() {
        let client = MockClusterClient::new();
        let images = StaticImageResolver::new();
        client.insert(TEST_NAMESPACE, &workloads_enabled());
        let reconciler = create_test_reconciler(&client, &images);
        reconcile_until_converged(&reconciler, 5).await;

        set_deployment_ready(&client, "audit-workload", 1, 0);
        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Done);
        let degraded = workload_condition(&client);
        assert_eq!(degraded.status, ConditionStatus::True);
        assert_eq!(degraded.reason, "WorkloadScanningUnavailable");

        set_deployment_ready(&client, "audit-workload", 1, 1);
        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Done);
        let recovered = workload_condition(&client);
        assert_eq!(recovered.status, ConditionStatus::False);
        assert!(recovered.last_transition_time >= degraded.last_transition_time);
    }

    fn legacy_deployment(owner_uid: Option<&str>) -> Deployment {
        let config = workloads_enabled();
        let reference = Owner::of(&config).unwrap().reference;
        Deployment {
            metadata: ObjectMeta {
                name: Some(TEST_NAME.to_string()),
                namespace: Some(TEST_NAMESPACE.to_string()),
                owner_references: owner_uid.map(|uid| {
                    vec![k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
                        uid: uid.to_string(),
                        ..reference
                    }]
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_legacy_deployment_is_removed_once_converged() {
        let client = MockClusterClient::new();
        let images = StaticImageResolver::new();
        let config = workloads_enabled();
        client.insert(TEST_NAMESPACE, &config);
        client.insert(TEST_NAMESPACE, &legacy_deployment(config.metadata.uid.as_deref()));
        let reconciler = create_test_reconciler(&client, &images);

        reconcile_until_converged(&reconciler, 6).await;
        assert!(client.stored::<Deployment>(TEST_NAMESPACE, TEST_NAME).is_none());
        assert!(client.stored::<Deployment>(TEST_NAMESPACE, "audit-workload").is_some());
    }

    #[tokio::test]
    async fn test_unowned_legacy_name_is_left_alone() {
        let client = MockClusterClient::new();
        let images = StaticImageResolver::new();
        client.insert(TEST_NAMESPACE, &workloads_enabled());
        client.insert(TEST_NAMESPACE, &legacy_deployment(Some("someone-else")));
        let reconciler = create_test_reconciler(&client, &images);

        reconcile_until_converged(&reconciler, 5).await;
        assert!(client.stored::<Deployment>(TEST_NAMESPACE, TEST_NAME).is_some());
    }

    #[tokio::test]
    async fn test_legacy_cleanup_can_be_disabled() {
        let client = MockClusterClient::new();
        let images = StaticImageResolver::new();
        let config = workloads_enabled();
        client.insert(TEST_NAMESPACE, &config);
        client.insert(TEST_NAMESPACE, &legacy_deployment(config.metadata.uid.as_deref()));
        client.insert_cluster(&create_test_operator_config(OperatorConfigSpec {
            disable_legacy_workload_cleanup: true,
            ..Default::default()
        }));
        let reconciler = create_test_reconciler(&client, &images);

        reconcile_until_converged(&reconciler, 5).await;
        assert!(client.stored::<Deployment>(TEST_NAMESPACE, TEST_NAME).is_some());
    }
}
