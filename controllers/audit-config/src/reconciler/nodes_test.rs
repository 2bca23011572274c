//! Unit tests for the node scanning feature

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::reconciler::Progress;
    use crate::resources::nodes::pinned_node;
    use crate::test_utils::*;
    use cluster_client::{ClusterClient, MockClusterClient, Verb};
    use crds::{AuditConfig, ConditionStatus, ConditionType, find_condition};
    use image_resolver::StaticImageResolver;
    use k8s_openapi::api::batch::v1::CronJob;
    use k8s_openapi::api::core::v1::{ConfigMap, Node};
    use kube::ResourceExt;

    fn nodes_enabled() -> AuditConfig {
        create_test_audit_config_with(|spec| spec.nodes.enable = true)
    }

    fn setup(nodes: &[&str]) -> (MockClusterClient, StaticImageResolver) {
        let client = MockClusterClient::new();
        client.insert(TEST_NAMESPACE, &nodes_enabled());
        for node in nodes {
            client.insert_cluster(&create_test_node(node));
        }
        (client, StaticImageResolver::new())
    }

    fn cron_jobs(client: &MockClusterClient) -> Vec<CronJob> {
        client.stored_all::<CronJob>(TEST_NAMESPACE)
    }

    #[tokio::test]
    async fn test_one_cron_job_per_node() {
        let (client, images) = setup(&["worker-1", "worker-2", "worker-3"]);
        let reconciler = create_test_reconciler(&client, &images);

        // ConfigMap, then one CronJob per pass, then converged
        let passes = reconcile_until_converged(&reconciler, 10).await;
        assert_eq!(passes, 5);

        let jobs = cron_jobs(&client);
        assert_eq!(jobs.len(), 3);
        let pinned: BTreeSet<&str> = jobs.iter().filter_map(pinned_node).collect();
        assert_eq!(pinned, BTreeSet::from(["worker-1", "worker-2", "worker-3"]));
        assert!(client.stored::<ConfigMap>(TEST_NAMESPACE, "audit-node").is_some());

        client.reset_calls();
        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Done);
        assert_eq!(client.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_removed_node_loses_its_cron_job() {
        let (client, images) = setup(&["worker-1", "worker-2"]);
        let reconciler = create_test_reconciler(&client, &images);
        reconcile_until_converged(&reconciler, 10).await;

        let removed: Node = client.stored_cluster("worker-2").unwrap();
        client.delete_cluster::<Node>(&removed.name_any()).await.unwrap();
        client.reset_calls();

        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Requeue);
        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].verb, Verb::Delete);
        assert_eq!(calls[0].name, "audit-node-worker-2");

        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Done);
        let jobs = cron_jobs(&client);
        assert_eq!(jobs.len(), 1);
        assert_eq!(pinned_node(&jobs[0]), Some("worker-1"));
    }

    #[tokio::test]
    async fn test_schedule_change_updates_one_cron_job_per_pass() {
        let (client, images) = setup(&["worker-1", "worker-2"]);
        let reconciler = create_test_reconciler(&client, &images);
        reconcile_until_converged(&reconciler, 10).await;

        client.modify::<AuditConfig>(TEST_NAMESPACE, TEST_NAME, |c| {
            c.spec.nodes.schedule = Some("*/15 * * * *".to_string());
        });
        client.reset_calls();

        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Requeue);
        assert_eq!(client.mutation_count(), 1);
        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Requeue);
        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Done);

        for job in cron_jobs(&client) {
            assert_eq!(job.spec.unwrap().schedule, "*/15 * * * *");
        }
    }

    #[tokio::test]
    async fn test_failing_scan_marks_degraded() {
        let (client, images) = setup(&["worker-1", "worker-2"]);
        let reconciler = create_test_reconciler(&client, &images);
        reconcile_until_converged(&reconciler, 10).await;

        client.set_status::<CronJob>(
            TEST_NAMESPACE,
            "audit-node-worker-2",
            serde_json::json!({ "lastScheduleTime": "2026-10-16T10:00:00Z" }),
        );
        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Done);

        let config = client.stored::<AuditConfig>(TEST_NAMESPACE, TEST_NAME).unwrap();
        let status = config.status.unwrap();
        let condition = find_condition(&status.conditions, ConditionType::NodeScanningDegraded).unwrap();
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.reason, "NodeScanningUnavailable");
        assert!(condition.message.contains("audit-node-worker-2"));
    }

    #[tokio::test]
    async fn test_disable_deletes_all_cron_jobs() {
        let (client, images) = setup(&["worker-1", "worker-2"]);
        let reconciler = create_test_reconciler(&client, &images);
        reconcile_until_converged(&reconciler, 10).await;

        client.modify::<AuditConfig>(TEST_NAMESPACE, TEST_NAME, |c| c.spec.nodes.enable = false);
        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Requeue);
        assert!(cron_jobs(&client).is_empty());
        assert!(client.stored::<ConfigMap>(TEST_NAMESPACE, "audit-node").is_none());

        // Teardown of nothing is a no-op
        client.reset_calls();
        assert_eq!(reconciler.reconcile(TEST_NAMESPACE, TEST_NAME).await.unwrap(), Progress::Done);
        assert_eq!(client.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_no_nodes_means_no_cron_jobs() {
        let (client, images) = setup(&[]);
        let reconciler = create_test_reconciler(&client, &images);
        assert_eq!(reconcile_until_converged(&reconciler, 5).await, 2);
        assert!(cron_jobs(&client).is_empty());
    }
}
