//! HTTP inventory client and webhook notifier against a mock server.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fleet_lifecycle::config::InventoryConfig;
use fleet_lifecycle::credentials::StaticTokenProvider;
use fleet_lifecycle::inventory::{
    HttpInventoryClient, InventoryClient, InventoryError, ListFilters, PartialUpdate,
};
use fleet_lifecycle::models::{InventoryRecord, RecordType, Resource};
use fleet_lifecycle::notifier::{Notifier, NotifierError, OperationOutcome, WebhookNotifier};
use fleet_lifecycle::state_machine::{LifecycleOperation, ResourceKind, ResourceState};

fn client_for(server: &MockServer) -> HttpInventoryClient {
    HttpInventoryClient::new(
        InventoryConfig {
            base_url: server.uri(),
            timeout_ms: 2000,
            max_retries: 3,
            retry_backoff_ms: 10,
        },
        None,
    )
    .unwrap()
}

#[tokio::test]
async fn test_read_unwraps_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vm/42/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"content": {"id": 42, "state": 1, "project_id": 1}})),
        )
        .mount(&server)
        .await;

    let record = client_for(&server)
        .read(RecordType::VirtualMachine, 42)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(record.id, 42);
    assert_eq!(record.state(), Some(ResourceState::Requested));
    assert_eq!(record.project_id(), Some(1));
}

#[tokio::test]
async fn test_read_missing_record_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/virtual_router/7/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let record = client_for(&server)
        .read(RecordType::VirtualRouter, 7)
        .await
        .unwrap();
    assert!(record.is_none());
}

#[tokio::test]
async fn test_read_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/storage/5/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/5/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 5, "state": 9})))
        .expect(1)
        .mount(&server)
        .await;

    let record = client_for(&server)
        .read(RecordType::StorageVolume, 5)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state(), Some(ResourceState::ScrubQueue));
}

#[tokio::test]
async fn test_read_gives_up_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vm/42/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;

    let result = client_for(&server).read(RecordType::VirtualMachine, 42).await;
    match result {
        Err(e @ InventoryError::Http { status: 500, .. }) => assert!(e.is_recoverable()),
        other => panic!("expected HTTP 500, got {other:?}"),
    }
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vm/42/"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad id"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client_for(&server).read(RecordType::VirtualMachine, 42).await;
    assert!(matches!(result, Err(InventoryError::Http { status: 400, .. })));
}

#[tokio::test]
async fn test_list_sends_filters_and_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vm/"))
        .and(query_param("state", "1"))
        .and(query_param("project_id", "1"))
        .and(query_param("limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                {"id": 42, "state": 1, "project_id": 1},
                {"id": 43, "state": 1, "project_id": 1}
            ]
        })))
        .mount(&server)
        .await;

    let filters = ListFilters::new()
        .state(ResourceState::Requested)
        .project(1)
        .limit(10);
    let records = client_for(&server)
        .list(RecordType::VirtualMachine, &filters)
        .await
        .unwrap();

    let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![42, 43]);
}

#[tokio::test]
async fn test_conditional_update_sends_expected_state() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/vm/42/"))
        .and(header("X-Expected-State", "1"))
        .and(body_json(json!({"state": 2})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42, "state": 2})))
        .expect(1)
        .mount(&server)
        .await;

    let applied = client_for(&server)
        .partial_update(
            RecordType::VirtualMachine,
            42,
            &PartialUpdate::transition(ResourceState::Requested, ResourceState::Building),
        )
        .await
        .unwrap();
    assert!(applied);
}

#[tokio::test]
async fn test_rejected_precondition_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/vm/42/"))
        .respond_with(ResponseTemplate::new(409))
        .expect(1)
        .mount(&server)
        .await;

    let applied = client_for(&server)
        .partial_update(
            RecordType::VirtualMachine,
            42,
            &PartialUpdate::transition(ResourceState::Requested, ResourceState::Building),
        )
        .await
        .unwrap();
    assert!(!applied);
}

#[tokio::test]
async fn test_update_server_error_is_sent_once() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/vm/42/"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let result = client_for(&server)
        .partial_update(
            RecordType::VirtualMachine,
            42,
            &PartialUpdate::new().set_state(ResourceState::Running),
        )
        .await;
    assert!(matches!(result, Err(InventoryError::Http { status: 502, .. })));
}

#[tokio::test]
async fn test_delete_reports_whether_record_existed() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/project/1/"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/project/2/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.delete(RecordType::Project, 1).await.unwrap());
    assert!(!client.delete(RecordType::Project, 2).await.unwrap());
}

#[tokio::test]
async fn test_requests_carry_auth_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/server/11/"))
        .and(header("X-Auth-Token", "s3cret"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": 11, "ip_address": "10.0.0.11"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpInventoryClient::new(
        InventoryConfig {
            base_url: server.uri(),
            ..Default::default()
        },
        Some(Arc::new(StaticTokenProvider::new("s3cret"))),
    )
    .unwrap();

    let record = client.read(RecordType::Server, 11).await.unwrap().unwrap();
    assert_eq!(record.get_string("ip_address").as_deref(), Some("10.0.0.11"));
}

fn sample_resource() -> Resource {
    Resource::from_record(
        ResourceKind::VirtualMachine,
        InventoryRecord::new(42)
            .with_field("state", ResourceState::Running.code())
            .with_field("project_id", 1),
    )
    .unwrap()
}

fn sample_outcome() -> OperationOutcome {
    OperationOutcome {
        operation: LifecycleOperation::Build,
        success: true,
        final_state: Some(ResourceState::Running),
        errors: Vec::new(),
        correlation_id: Uuid::new_v4(),
    }
}

#[tokio::test]
async fn test_webhook_posts_notification() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/lifecycle"))
        .and(body_partial_json(json!({
            "event_kind": "operation.succeeded",
            "operation_event": "lifecycle.build",
            "kind": "virtual_machine",
            "resource_id": 42,
            "project_id": 1
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(
        format!("{}/hooks/lifecycle", server.uri()),
        Duration::from_secs(2),
    )
    .unwrap();
    notifier
        .deliver("operation.succeeded", &sample_resource(), &sample_outcome())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_webhook_notify_does_not_wait_for_slow_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/lifecycle"))
        .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(
        format!("{}/hooks/lifecycle", server.uri()),
        Duration::from_secs(10),
    )
    .unwrap();
    let sent = tokio::time::timeout(
        Duration::from_millis(500),
        notifier.notify("operation.failed", &sample_resource(), &sample_outcome()),
    )
    .await;
    assert!(matches!(sent, Ok(Ok(()))));

    let mut received = 0;
    for _ in 0..50 {
        received = server.received_requests().await.map_or(0, |r| r.len());
        if received > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(received, 1);
}

#[tokio::test]
async fn test_webhook_rejection_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(server.uri(), Duration::from_secs(2)).unwrap();
    let result = notifier
        .deliver("operation.failed", &sample_resource(), &sample_outcome())
        .await;
    assert!(matches!(result, Err(NotifierError::Rejected { status: 500 })));
}
