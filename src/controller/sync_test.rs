//! Tests for the sync engine against a mock API server.
//!
//! These tests verify the convergence algorithm end to end:
//! - Scenario A: a present workload gets a Service and an Ingress
//! - Scenario B: a removed workload gets both torn down
//! - Idempotence: AlreadyExists and NotFound are success, not failure
//! - Partial teardown failure still attempts the second deletion

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use kube::api::ObjectMeta;
    use kube::Client;
    use kube_runtime::reflector::store;
    use kube_runtime::watcher::Event;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::controller::reconciler::ControllerState;
    use crate::controller::resources::ExposureMode;
    use crate::controller::sync::{pod_template_labels, sync_exposure, teardown_exposure};
    use crate::error::Error;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn web_labels() -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "web".to_string());
        labels
    }

    fn workload(namespace: &str, name: &str, labels: BTreeMap<String, String>) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: None,
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Controller state backed by the mock API server, with the given
    /// workloads already synced into the cache.
    fn state_for(
        server: &MockServer,
        workloads: Vec<Deployment>,
        mode: ExposureMode,
    ) -> ControllerState {
        let config = kube::Config::new(server.uri().parse().expect("mock server uri"));
        let client = Client::try_from(config).expect("client for mock server");

        let (reader, mut writer) = store::<Deployment>();
        writer.apply_watcher_event(&Event::Init);
        for w in workloads {
            writer.apply_watcher_event(&Event::InitApply(w));
        }
        writer.apply_watcher_event(&Event::InitDone);

        ControllerState {
            client,
            store: reader,
            mode,
        }
    }

    fn status_ok() -> serde_json::Value {
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Success",
            "code": 200
        })
    }

    fn status_failure(code: u16, reason: &str) -> serde_json::Value {
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": reason,
            "reason": reason,
            "code": code
        })
    }

    fn created_service() -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "web", "namespace": "default"}
        })
    }

    fn created_ingress() -> serde_json::Value {
        json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": {"name": "web", "namespace": "default"}
        })
    }

    // -----------------------------------------------------------------------
    // Present branch
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_present_workload_gets_service_and_ingress() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/default/services"))
            .and(body_partial_json(json!({
                "metadata": {"name": "web", "namespace": "default"},
                "spec": {
                    "selector": {"app": "web"},
                    "type": "LoadBalancer",
                    "ports": [{"name": "http", "port": 80}]
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(created_service()))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/apis/networking.k8s.io/v1/namespaces/default/ingresses"))
            .and(body_partial_json(json!({
                "metadata": {"name": "web", "namespace": "default"},
                "spec": {
                    "rules": [{
                        "http": {
                            "paths": [{
                                "path": "/web",
                                "pathType": "Prefix",
                                "backend": {"service": {"name": "web", "port": {"number": 80}}}
                            }]
                        }
                    }]
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(created_ingress()))
            .expect(1)
            .mount(&server)
            .await;

        let state = state_for(
            &server,
            vec![workload("default", "web", web_labels())],
            ExposureMode::External,
        );

        sync_exposure(&state, "default", "web")
            .await
            .expect("sync must succeed");
    }

    #[tokio::test]
    async fn test_second_reconcile_tolerates_already_exists() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/default/services"))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(status_failure(409, "AlreadyExists")),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/apis/networking.k8s.io/v1/namespaces/default/ingresses"))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(status_failure(409, "AlreadyExists")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let state = state_for(
            &server,
            vec![workload("default", "web", web_labels())],
            ExposureMode::External,
        );

        sync_exposure(&state, "default", "web")
            .await
            .expect("AlreadyExists is an idempotent success, not an error");
    }

    #[tokio::test]
    async fn test_cluster_local_mode_skips_ingress() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/default/services"))
            .and(body_partial_json(json!({"spec": {"type": "ClusterIP"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(created_service()))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/apis/networking.k8s.io/v1/namespaces/default/ingresses"))
            .respond_with(ResponseTemplate::new(201).set_body_json(created_ingress()))
            .expect(0)
            .mount(&server)
            .await;

        let state = state_for(
            &server,
            vec![workload("default", "web", web_labels())],
            ExposureMode::ClusterLocal,
        );

        sync_exposure(&state, "default", "web")
            .await
            .expect("cluster-local sync must succeed without an ingress");
    }

    #[tokio::test]
    async fn test_transient_create_failure_is_retryable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/default/services"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(status_failure(500, "InternalError")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let state = state_for(
            &server,
            vec![workload("default", "web", web_labels())],
            ExposureMode::External,
        );

        let err = sync_exposure(&state, "default", "web")
            .await
            .expect_err("server failure must surface");
        assert!(err.is_retryable(), "API failures must requeue, not drop");
    }

    // -----------------------------------------------------------------------
    // Absent branch
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_absent_workload_tears_down_both_objects() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/api/v1/namespaces/default/services/web"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_ok()))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path("/apis/networking.k8s.io/v1/namespaces/default/ingresses/web"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_ok()))
            .expect(1)
            .mount(&server)
            .await;

        let state = state_for(&server, Vec::new(), ExposureMode::External);

        sync_exposure(&state, "default", "web")
            .await
            .expect("teardown must succeed");
    }

    #[tokio::test]
    async fn test_teardown_tolerates_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/api/v1/namespaces/default/services/web"))
            .respond_with(ResponseTemplate::new(404).set_body_json(status_failure(404, "NotFound")))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path("/apis/networking.k8s.io/v1/namespaces/default/ingresses/web"))
            .respond_with(ResponseTemplate::new(404).set_body_json(status_failure(404, "NotFound")))
            .expect(1)
            .mount(&server)
            .await;

        let state = state_for(&server, Vec::new(), ExposureMode::External);

        sync_exposure(&state, "default", "web")
            .await
            .expect("already-absent objects are the desired end state");
    }

    #[tokio::test]
    async fn test_teardown_attempts_ingress_after_service_failure() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/api/v1/namespaces/default/services/web"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(status_failure(500, "InternalError")),
            )
            .expect(1)
            .mount(&server)
            .await;

        // The second deletion must still be attempted.
        Mock::given(method("DELETE"))
            .and(path("/apis/networking.k8s.io/v1/namespaces/default/ingresses/web"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_ok()))
            .expect(1)
            .mount(&server)
            .await;

        let state = state_for(&server, Vec::new(), ExposureMode::External);

        let err = sync_exposure(&state, "default", "web")
            .await
            .expect_err("service deletion failure must surface");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_teardown_aggregates_both_failures() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/api/v1/namespaces/default/services/web"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(status_failure(500, "InternalError")),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path("/apis/networking.k8s.io/v1/namespaces/default/ingresses/web"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(status_failure(500, "InternalError")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = teardown_exposure(
            &state_for(&server, Vec::new(), ExposureMode::External).client,
            "default",
            "web",
        )
        .await
        .expect_err("double failure must surface");

        match err {
            Error::TeardownFailed { key, details } => {
                assert_eq!(key, "default/web");
                assert!(details.contains("service:"), "details: {}", details);
                assert!(details.contains("ingress:"), "details: {}", details);
            }
            other => panic!("expected TeardownFailed, got {:?}", other),
        }
    }

    // -----------------------------------------------------------------------
    // Snapshot reading
    // -----------------------------------------------------------------------

    #[test]
    fn test_pod_template_labels_default_to_empty() {
        let mut bare = workload("default", "web", web_labels());
        bare.spec = None;

        assert!(pod_template_labels(&bare).is_empty());
    }
}
