//! Unit tests for the reconciler

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::event::SyncEvent;
    use crate::test_utils::*;
    use crds::{ApiExposure, StatusCode};
    use gateway_client::{MockGatewayClient, MockOp};
    use kube::ResourceExt;

    fn status_of(client: &MockGatewayClient, name: &str) -> crds::ApiExposureStatus {
        client
            .api_exposure("default", name)
            .and_then(|e| e.status)
            .unwrap_or_default()
    }

    /// Store a changed copy of `stored` the way an edit through the API would
    fn edit(client: &MockGatewayClient, stored: &ApiExposure, change: impl FnOnce(&mut ApiExposure)) -> ApiExposure {
        let mut changed = stored.clone();
        change(&mut changed);
        client.add_api_exposure(changed)
    }

    #[tokio::test]
    async fn test_create_without_authentication() {
        let client = MockGatewayClient::new();
        let reconciler = create_test_reconciler(&client, &test_config());
        let stored = client.add_api_exposure(create_test_api_exposure("httpbin", "default", "httpbin", "httpbin"));

        reconciler.sync(&SyncEvent::create(stored)).await.unwrap();

        let vs = client.virtual_service("default", "httpbin").unwrap();
        assert!(vs.spec.serves_host("httpbin.kyma.local"));
        assert!(client.policy("default", "httpbin").is_none());

        let status = status_of(&client, "httpbin");
        assert_eq!(status.validation_status, StatusCode::Successful);
        assert_eq!(status.virtual_service_status.resource().map(|r| r.uid.clone()), vs.uid());
        assert!(status.authentication_status.is_empty());
        assert_eq!(client.call_count(MockOp::UpdateApiExposureStatus), 1);
    }

    #[tokio::test]
    async fn test_create_with_authentication() {
        let client = MockGatewayClient::new();
        let reconciler = create_test_reconciler(&client, &test_config());
        let stored = client.add_api_exposure(create_test_api_exposure_with_auth(
            "httpbin",
            "default",
            "httpbin",
            Some(true),
            vec![],
        ));

        reconciler.sync(&SyncEvent::create(stored)).await.unwrap();

        let policy = client.policy("default", "httpbin").unwrap();
        assert_eq!(policy.spec.targets[0].name, "httpbin");
        let status = status_of(&client, "httpbin");
        assert!(status.virtual_service_status.is_successful());
        assert!(status.authentication_status.is_successful());
    }

    #[tokio::test]
    async fn test_second_claimant_is_rejected() {
        let client = MockGatewayClient::new();
        let reconciler = create_test_reconciler(&client, &test_config());
        let first = client.add_api_exposure(create_test_api_exposure("first", "default", "first", "httpbin"));
        reconciler.sync(&SyncEvent::create(first)).await.unwrap();

        let second = client.add_api_exposure(create_test_api_exposure("second", "default", "second", "httpbin"));
        reconciler.sync(&SyncEvent::create(second)).await.unwrap();

        assert!(client.virtual_service("default", "second").is_none());
        let status = status_of(&client, "second");
        assert_eq!(status.validation_status, StatusCode::TargetServiceOccupied);
        assert!(status.virtual_service_status.is_empty());
        assert!(status.authentication_status.is_empty());
        // the first claimant is untouched
        assert_eq!(status_of(&client, "first").validation_status, StatusCode::Successful);
    }

    #[tokio::test]
    async fn test_blacklisted_service_is_rejected() {
        let client = MockGatewayClient::new();
        let reconciler = create_test_reconciler(&client, &test_config());
        let stored = client.add_api_exposure(create_test_api_exposure("k8s", "default", "k8s", "kubernetes"));

        reconciler.sync(&SyncEvent::create(stored)).await.unwrap();

        assert_eq!(status_of(&client, "k8s").validation_status, StatusCode::Error);
        assert!(client.virtual_service("default", "k8s").is_none());
    }

    #[tokio::test]
    async fn test_hostname_update_in_place_leaves_policy_untouched() {
        let client = MockGatewayClient::new();
        let reconciler = create_test_reconciler(&client, &test_config());
        let stored = client.add_api_exposure(create_test_api_exposure_with_auth(
            "httpbin",
            "default",
            "httpbin",
            Some(true),
            vec![],
        ));
        reconciler.sync(&SyncEvent::create(stored)).await.unwrap();
        let vs_before = client.virtual_service("default", "httpbin").unwrap();
        let policy_before = client.policy("default", "httpbin").unwrap();

        let old = client.api_exposure("default", "httpbin").unwrap();
        let new = edit(&client, &old, |e| e.spec.hostname = "httpbin-v2".to_string());
        client.reset_counts();
        reconciler.sync(&SyncEvent::update(old, new)).await.unwrap();

        let vs_after = client.virtual_service("default", "httpbin").unwrap();
        assert_eq!(vs_after.uid(), vs_before.uid());
        assert!(vs_after.spec.serves_host("httpbin-v2.kyma.local"));
        assert_eq!(client.call_count(MockOp::UpdateVirtualService), 1);

        let policy_after = client.policy("default", "httpbin").unwrap();
        assert_eq!(policy_after.resource_version(), policy_before.resource_version());
        assert_eq!(client.call_count(MockOp::UpdatePolicy), 0);
        assert_eq!(client.call_count(MockOp::CreatePolicy), 0);

        let status = status_of(&client, "httpbin");
        assert_eq!(
            status.virtual_service_status.resource().map(|r| r.version.clone()),
            vs_after.resource_version()
        );
    }

    #[tokio::test]
    async fn test_disabling_authentication_deletes_policy() {
        let client = MockGatewayClient::new();
        let reconciler = create_test_reconciler(&client, &test_config());
        let stored = client.add_api_exposure(create_test_api_exposure_with_auth(
            "httpbin",
            "default",
            "httpbin",
            Some(true),
            vec![],
        ));
        reconciler.sync(&SyncEvent::create(stored)).await.unwrap();

        let old = client.api_exposure("default", "httpbin").unwrap();
        let new = edit(&client, &old, |e| e.spec.authentication_enabled = Some(false));
        reconciler.sync(&SyncEvent::update(old, new)).await.unwrap();

        assert!(client.policy("default", "httpbin").is_none());
        assert!(client.virtual_service("default", "httpbin").is_some());
        assert!(status_of(&client, "httpbin").authentication_status.is_empty());

        // and back on again
        let old = client.api_exposure("default", "httpbin").unwrap();
        let new = edit(&client, &old, |e| e.spec.authentication_enabled = Some(true));
        reconciler.sync(&SyncEvent::update(old, new)).await.unwrap();
        assert!(client.policy("default", "httpbin").is_some());
        assert!(status_of(&client, "httpbin").authentication_status.is_successful());
    }

    #[tokio::test]
    async fn test_delete_removes_everything_and_tolerates_absence() {
        let client = MockGatewayClient::new();
        let reconciler = create_test_reconciler(&client, &test_config());
        let stored = client.add_api_exposure(create_test_api_exposure_with_auth(
            "httpbin",
            "default",
            "httpbin",
            Some(true),
            vec![],
        ));
        reconciler.sync(&SyncEvent::create(stored)).await.unwrap();

        let last_seen = client.api_exposure("default", "httpbin").unwrap();
        client.remove_api_exposure("default", "httpbin");
        reconciler.sync(&SyncEvent::delete(last_seen.clone())).await.unwrap();

        assert!(client.virtual_service("default", "httpbin").is_none());
        assert!(client.policy("default", "httpbin").is_none());

        // second delete finds nothing and still succeeds
        reconciler.sync(&SyncEvent::delete(last_seen)).await.unwrap();
    }

    #[tokio::test]
    async fn test_second_sync_writes_nothing() {
        let client = MockGatewayClient::new();
        let reconciler = create_test_reconciler(&client, &test_config());
        let stored = client.add_api_exposure(create_test_api_exposure_with_auth(
            "httpbin",
            "default",
            "httpbin",
            Some(true),
            vec![],
        ));
        reconciler.sync(&SyncEvent::create(stored)).await.unwrap();

        client.reset_counts();
        let current = client.api_exposure("default", "httpbin").unwrap();
        reconciler.sync(&SyncEvent::create(current)).await.unwrap();
        assert_eq!(client.write_count(), 0);
    }

    #[tokio::test]
    async fn test_status_only_update_is_ignored() {
        let client = MockGatewayClient::new();
        let reconciler = create_test_reconciler(&client, &test_config());
        let stored = client.add_api_exposure(create_test_api_exposure("httpbin", "default", "httpbin", "httpbin"));
        reconciler.sync(&SyncEvent::create(stored.clone())).await.unwrap();

        // our own status write shows up as an update with an unchanged spec
        let current = client.api_exposure("default", "httpbin").unwrap();
        client.reset_counts();
        reconciler.sync(&SyncEvent::update(stored, current)).await.unwrap();
        assert_eq!(client.write_count(), 0);
        assert_eq!(client.call_count(MockOp::ListVirtualServices), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_other_resources() {
        let client = MockGatewayClient::new();
        let reconciler = create_test_reconciler(&client, &test_config());
        let stored = client.add_api_exposure(create_test_api_exposure_with_auth(
            "httpbin",
            "default",
            "httpbin",
            Some(true),
            vec![],
        ));
        client.fail_always(MockOp::CreatePolicy);

        let err = reconciler.sync(&SyncEvent::create(stored)).await.unwrap_err();
        assert!(matches!(err, ControllerError::Sync { .. }));

        let status = status_of(&client, "httpbin");
        assert!(status.virtual_service_status.is_successful());
        assert_eq!(status.authentication_status.code(), StatusCode::Error);
        let last_error = status.authentication_status.last_error().unwrap();
        assert!(last_error.contains("correlation id: "));
        assert!(!last_error.contains("injected"));

        // retry rewrites only what failed
        client.clear_failures();
        client.reset_counts();
        let current = client.api_exposure("default", "httpbin").unwrap();
        reconciler.sync(&SyncEvent::create(current)).await.unwrap();
        assert_eq!(client.call_count(MockOp::CreateVirtualService), 0);
        assert_eq!(client.call_count(MockOp::CreatePolicy), 1);
        assert!(status_of(&client, "httpbin").authentication_status.is_successful());
    }

    #[tokio::test]
    async fn test_occupied_hostname_is_not_retried() {
        let client = MockGatewayClient::new();
        let reconciler = create_test_reconciler(&client, &test_config());
        let first = client.add_api_exposure(create_test_api_exposure("first", "default", "shared", "one"));
        reconciler.sync(&SyncEvent::create(first)).await.unwrap();

        let second = client.add_api_exposure(create_test_api_exposure("second", "default", "shared", "two"));
        reconciler.sync(&SyncEvent::create(second)).await.unwrap();

        let status = status_of(&client, "second");
        assert_eq!(status.validation_status, StatusCode::Successful);
        assert_eq!(status.virtual_service_status.code(), StatusCode::HostnameOccupied);
        assert!(client.virtual_service("default", "second").is_none());
    }

    #[tokio::test]
    async fn test_occupied_hostname_stays_blocked_after_unrelated_edit() {
        let client = MockGatewayClient::new();
        let reconciler = create_test_reconciler(&client, &test_config());
        let first = client.add_api_exposure(create_test_api_exposure("first", "default", "shared", "one"));
        reconciler.sync(&SyncEvent::create(first)).await.unwrap();
        let second = client.add_api_exposure(create_test_api_exposure("second", "default", "shared", "two"));
        reconciler.sync(&SyncEvent::create(second)).await.unwrap();

        let stored = client.api_exposure("default", "second").unwrap();
        let edited = edit(&client, &stored, |e| e.spec.service.port = 9090);
        reconciler.sync(&SyncEvent::update(stored, edited)).await.unwrap();

        assert!(client.virtual_service("default", "second").is_none());
        let status = status_of(&client, "second");
        assert_eq!(status.virtual_service_status.code(), StatusCode::HostnameOccupied);
    }

    #[tokio::test]
    async fn test_create_applies_spec_changed_while_down() {
        let client = MockGatewayClient::new();
        let reconciler = create_test_reconciler(&client, &test_config());
        let stored = client.add_api_exposure(create_test_api_exposure("httpbin", "default", "httpbin", "httpbin"));
        reconciler.sync(&SyncEvent::create(stored)).await.unwrap();
        let before = client.virtual_service("default", "httpbin").unwrap();

        // edited while no controller ran; the restart lists it as a create
        let current = client.api_exposure("default", "httpbin").unwrap();
        let edited = edit(&client, &current, |e| e.spec.hostname = "httpbin-v2".to_string());
        reconciler.sync(&SyncEvent::create(edited)).await.unwrap();

        let vs = client.virtual_service("default", "httpbin").unwrap();
        assert!(vs.spec.serves_host("httpbin-v2.kyma.local"));
        assert_eq!(vs.uid(), before.uid());
        let recorded = status_of(&client, "httpbin").virtual_service_status.resource().cloned().unwrap();
        assert_eq!(Some(recorded.version), vs.resource_version());
    }

    #[tokio::test]
    async fn test_missing_object_is_a_no_op() {
        let client = MockGatewayClient::new();
        let reconciler = create_test_reconciler(&client, &test_config());
        let ghost = create_test_api_exposure("ghost", "default", "ghost", "httpbin");

        reconciler.sync(&SyncEvent::create(ghost.clone())).await.unwrap();
        reconciler.sync(&SyncEvent::update(ghost.clone(), ghost)).await.unwrap();
        assert_eq!(client.write_count(), 0);
    }

    #[tokio::test]
    async fn test_recreated_object_takes_over_resources() {
        let client = MockGatewayClient::new();
        let reconciler = create_test_reconciler(&client, &test_config());
        let original = client.add_api_exposure(create_test_api_exposure("httpbin", "default", "httpbin", "httpbin"));
        reconciler.sync(&SyncEvent::create(original)).await.unwrap();
        let old = client.api_exposure("default", "httpbin").unwrap();

        // deleted and created again before the queue saw the delete
        client.remove_api_exposure("default", "httpbin");
        let mut replacement = create_test_api_exposure("httpbin", "default", "httpbin-v2", "httpbin");
        replacement.metadata.uid = Some("uid-replacement".to_string());
        let new = client.add_api_exposure(replacement);

        reconciler.sync(&SyncEvent::update(old, new)).await.unwrap();

        let vs = client.virtual_service("default", "httpbin").unwrap();
        assert_eq!(vs.labels().get("apiUid").map(String::as_str), Some("uid-replacement"));
        assert!(vs.spec.serves_host("httpbin-v2.kyma.local"));
        assert!(status_of(&client, "httpbin").virtual_service_status.is_successful());
    }

    #[tokio::test]
    async fn test_legacy_ingress_follows_the_exposure() {
        let client = MockGatewayClient::new();
        let mut config = test_config();
        config.legacy_ingress = true;
        let reconciler = create_test_reconciler(&client, &config);
        let stored = client.add_api_exposure(create_test_api_exposure("httpbin", "default", "httpbin", "httpbin"));

        reconciler.sync(&SyncEvent::create(stored)).await.unwrap();
        assert!(client.ingress("default", "httpbin").is_some());
        assert!(status_of(&client, "httpbin").ingress_status.is_successful());

        let last_seen = client.api_exposure("default", "httpbin").unwrap();
        client.remove_api_exposure("default", "httpbin");
        reconciler.sync(&SyncEvent::delete(last_seen)).await.unwrap();
        assert!(client.ingress("default", "httpbin").is_none());
    }
}
