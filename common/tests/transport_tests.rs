// Integration tests for the retrying transport and the data management client
// Every test runs against a local wiremock server; backoff is zero and jitter off.

use common::client::{ApiCredentials, DataManagementApi, HttpDataManagementClient};
use common::errors::TransportError;
use common::retry::RetryPolicy;
use common::transport::RetryingTransport;
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport(max_attempts: u32, cancel: CancellationToken) -> RetryingTransport {
    RetryingTransport::new(
        reqwest::Client::new(),
        RetryPolicy::new(max_attempts, 0).without_jitter(),
        "transport-test",
        cancel,
    )
}

fn api(server: &MockServer, credentials: Option<ApiCredentials>) -> HttpDataManagementClient {
    HttpDataManagementClient::new(
        transport(3, CancellationToken::new()),
        &server.uri(),
        credentials,
    )
    .unwrap()
}

// ============================================================================
// Retry behaviour
// ============================================================================

#[tokio::test]
async fn test_throttled_request_is_sent_exactly_max_attempts_times() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/throttled"))
        .respond_with(ResponseTemplate::new(429))
        .expect(4)
        .mount(&server)
        .await;

    let transport = transport(4, CancellationToken::new());
    let request = transport
        .client()
        .get(format!("{}/throttled", server.uri()));
    let response = transport.send(request).await.unwrap();

    // The last transient response is handed back, not turned into an error
    assert_eq!(response.status_code, 429);
    assert!(!response.is_success());
}

#[tokio::test]
async fn test_server_errors_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport(5, CancellationToken::new());
    let response = transport
        .send(transport.client().get(format!("{}/flaky", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.text(), "ok");
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bad"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport(5, CancellationToken::new());
    let response = transport
        .send(transport.client().post(format!("{}/bad", server.uri())).body("x"))
        .await
        .unwrap();

    assert_eq!(response.status_code, 400);
    assert_eq!(response.reason(), "Bad Request");
}

#[tokio::test]
async fn test_throttling_code_599_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(599))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let transport = transport(3, CancellationToken::new());
    let response = transport
        .send(transport.client().get(format!("{}/busy", server.uri())))
        .await
        .unwrap();
    assert_eq!(response.status_code, 204);
}

#[tokio::test]
async fn test_retry_after_header_sets_the_wait() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/throttled-once"))
        .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/throttled-once"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    // Zero base delay: without the header the retry would be immediate
    let transport = transport(3, CancellationToken::new());
    let started = std::time::Instant::now();
    let response = transport
        .send(transport.client().get(format!("{}/throttled-once", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.status_code, 200);
    assert!(started.elapsed() >= Duration::from_millis(950));
}

#[tokio::test]
async fn test_cancelled_transport_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let transport = transport(3, cancel);
    let result = transport
        .send(transport.client().get(format!("{}/never", server.uri())))
        .await;
    assert!(matches!(result, Err(TransportError::Cancelled)));
}

#[tokio::test]
async fn test_cancellation_interrupts_retry_wait() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "120"))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let transport = transport(3, cancel.clone());
    let request = transport.client().get(format!("{}/slow", server.uri()));

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });
    let result = tokio::time::timeout(Duration::from_secs(10), transport.send(request))
        .await
        .unwrap();
    canceller.await.unwrap();

    assert!(matches!(result, Err(TransportError::Cancelled)));
}

// ============================================================================
// Data management client
// ============================================================================

#[tokio::test]
async fn test_oauth2_token_is_acquired_once_per_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "token-123",
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(
            "/data/DataManagementDefinitionGroups/Microsoft.Dynamics.DataEntities.GetExecutionSummaryStatus",
        ))
        .and(header("authorization", "Bearer token-123"))
        .and(body_partial_json(json!({ "executionId": "EXEC-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": "Executing" })))
        .expect(2)
        .mount(&server)
        .await;

    let credentials = ApiCredentials {
        token_url: format!("{}/token", server.uri()),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        scope: None,
    };
    let api = api(&server, Some(credentials));

    for _ in 0..2 {
        let response = api.get_execution_summary_status("EXEC-1").await.unwrap();
        assert_eq!(response.value_string(), "Executing");
    }
}

#[tokio::test]
async fn test_rejected_token_request_is_an_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
        .mount(&server)
        .await;

    let credentials = ApiCredentials {
        token_url: format!("{}/token", server.uri()),
        client_id: "client".to_string(),
        client_secret: "wrong".to_string(),
        scope: Some("api://default".to_string()),
    };
    let api = api(&server, Some(credentials));
    let result = api.get_azure_write_url().await;
    assert!(matches!(result, Err(TransportError::Authentication(_))));
}

#[tokio::test]
async fn test_download_location_is_fetched_without_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "t" })))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blob/package.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = ApiCredentials {
        token_url: format!("{}/token", server.uri()),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        scope: None,
    };
    let api = api(&server, Some(credentials));
    let response = api
        .get(&format!("{}/blob/package.zip", server.uri()), false)
        .await
        .unwrap();
    assert_eq!(response.body, b"PK".to_vec());
}

#[tokio::test]
async fn test_enqueue_sends_external_identifier() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/connector/enqueue/ACT-1"))
        .and(header("x-ms-dyn-externalidentifier", "customers.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string("MSG-1"))
        .expect(1)
        .mount(&server)
        .await;

    let api = api(&server, None);
    let uri = api.enqueue_uri("ACT-1", None, Some("USMF")).unwrap();
    assert!(uri.ends_with("/api/connector/enqueue/ACT-1?company=USMF"));

    let response = api
        .post_stream(&uri, b"a,b\n1,2\n".to_vec(), Some("customers.csv"))
        .await
        .unwrap();
    assert_eq!(response.text(), "MSG-1");
}

// ============================================================================
// Backoff properties
// ============================================================================

proptest! {
    /// *For any* base delay and attempt, the computed backoff stays within
    /// [base, max(base, 60s)] and never decreases from one attempt to the next.
    #[test]
    fn property_backoff_is_bounded_and_monotonic(base in 0u64..30, attempt in 0u32..16) {
        let policy = RetryPolicy::new(10, base).without_jitter();
        let current = policy.base_delay(attempt);
        let next = policy.base_delay(attempt + 1);

        prop_assert!(current >= Duration::from_secs(base));
        prop_assert!(current <= Duration::from_secs(base.max(60)));
        prop_assert!(next >= current);
    }

    /// *For any* positive server hint, the hint replaces the computed backoff.
    #[test]
    fn property_retry_after_hint_wins(hint in 1u64..600, attempt in 0u32..8) {
        let policy = RetryPolicy::new(10, 5).without_jitter();
        let wait = policy.wait_for(attempt, Some(Duration::from_secs(hint)));
        prop_assert_eq!(wait, Duration::from_secs(hint));
    }
}
