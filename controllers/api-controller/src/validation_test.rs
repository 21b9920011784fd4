//! Unit tests for the service validator

#[cfg(test)]
mod tests {
    use crate::config::Blacklist;
    use crate::test_utils::*;
    use crate::validation::{ExposureLister, ServiceValidator, StoreLister};
    use crds::{ApiExposure, StatusCode};
    use gateway_client::MockGatewayClient;
    use kube_runtime::reflector;
    use std::sync::Arc;

    fn validator(client: &MockGatewayClient, fail: bool) -> ServiceValidator {
        ServiceValidator::new(
            Arc::new(MockLister { client: client.clone(), fail }),
            Blacklist::parse("default/kubernetes").unwrap(),
        )
    }

    #[test]
    fn test_free_service_passes() {
        let client = MockGatewayClient::new();
        let candidate = client.add_api_exposure(create_test_api_exposure("a", "default", "a", "httpbin"));
        let result = validator(&client, false).validate(&candidate);
        assert!(result.is_successful());
        assert!(result.reason.is_none());
    }

    #[test]
    fn test_blacklisted_service_is_error_even_when_unclaimed() {
        let client = MockGatewayClient::new();
        let candidate = create_test_api_exposure("a", "default", "a", "kubernetes");
        let result = validator(&client, false).validate(&candidate);
        assert_eq!(result.code, StatusCode::Error);
        assert!(result.reason.unwrap().contains("blacklisted"));
    }

    #[test]
    fn test_blacklist_is_namespaced() {
        let client = MockGatewayClient::new();
        let candidate = create_test_api_exposure("a", "production", "a", "kubernetes");
        assert!(validator(&client, false).validate(&candidate).is_successful());
    }

    #[test]
    fn test_blacklist_wins_over_listing_failure() {
        let client = MockGatewayClient::new();
        let candidate = create_test_api_exposure("a", "default", "a", "kubernetes");
        let result = validator(&client, true).validate(&candidate);
        assert!(result.reason.unwrap().contains("blacklisted"));
    }

    #[test]
    fn test_successful_holder_occupies_service() {
        let client = MockGatewayClient::new();
        client.add_api_exposure(with_validation(
            create_test_api_exposure("first", "default", "first", "httpbin"),
            StatusCode::Successful,
        ));
        let candidate = create_test_api_exposure("second", "default", "second", "httpbin");
        let result = validator(&client, false).validate(&candidate);
        assert_eq!(result.code, StatusCode::TargetServiceOccupied);
        assert!(result.reason.unwrap().contains("first"));
    }

    #[test]
    fn test_rejected_objects_do_not_occupy() {
        let client = MockGatewayClient::new();
        for (name, code) in [
            ("errored", StatusCode::Error),
            ("occupied", StatusCode::TargetServiceOccupied),
            ("hostname", StatusCode::HostnameOccupied),
        ] {
            client.add_api_exposure(with_validation(
                create_test_api_exposure(name, "default", name, "httpbin"),
                code,
            ));
        }
        let candidate = create_test_api_exposure("candidate", "default", "candidate", "httpbin");
        assert!(validator(&client, false).validate(&candidate).is_successful());
    }

    #[test]
    fn test_other_namespaces_and_services_ignored() {
        let client = MockGatewayClient::new();
        client.add_api_exposure(with_validation(
            create_test_api_exposure("a", "other", "a", "httpbin"),
            StatusCode::Successful,
        ));
        client.add_api_exposure(with_validation(
            create_test_api_exposure("b", "default", "b", "another"),
            StatusCode::Successful,
        ));
        let candidate = create_test_api_exposure("c", "default", "c", "httpbin");
        assert!(validator(&client, false).validate(&candidate).is_successful());
    }

    #[test]
    fn test_candidate_does_not_block_itself() {
        let client = MockGatewayClient::new();
        let candidate = client.add_api_exposure(with_validation(
            create_test_api_exposure("a", "default", "a", "httpbin"),
            StatusCode::Successful,
        ));
        assert!(validator(&client, false).validate(&candidate).is_successful());
    }

    #[test]
    fn test_unvalidated_objects_block_only_newer_candidates() {
        let client = MockGatewayClient::new();
        // No timestamps: ties break on name, so "alpha" is older than "beta"
        let alpha = client.add_api_exposure(create_test_api_exposure("alpha", "default", "alpha", "httpbin"));
        let beta = client.add_api_exposure(create_test_api_exposure("beta", "default", "beta", "httpbin"));

        let v = validator(&client, false);
        assert!(v.validate(&alpha).is_successful());
        assert_eq!(v.validate(&beta).code, StatusCode::TargetServiceOccupied);
    }

    #[test]
    fn test_listing_failure_is_error() {
        let client = MockGatewayClient::new();
        let candidate = create_test_api_exposure("a", "default", "a", "httpbin");
        let result = validator(&client, true).validate(&candidate);
        assert_eq!(result.code, StatusCode::Error);
        assert!(result.reason.unwrap().ends_with(": cache unavailable"));
    }

    #[test]
    fn test_unsynced_store_refuses_to_list() {
        let (store, _writer) = reflector::store::<ApiExposure>();
        let lister = StoreLister::new(store);

        let err = lister.list_namespace("default").unwrap_err();
        let source: Box<dyn std::error::Error> = Box::new(err);
        assert_eq!(source.to_string(), "ApiExposure cache has not synced yet");

        lister.mark_synced();
        assert!(lister.list_namespace("default").unwrap().is_empty());
    }
}
