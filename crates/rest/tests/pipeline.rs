//! Integration tests: drives the request pipeline against a mock HTTP
//! server and asserts classification, retry, and rate-limit behavior.

use std::time::{Duration, Instant};

use accord_rest::{RestClient, RestError};
use mockito::Server;
use serde_json::Value;

fn client_for(server: &Server, max_retries: u32) -> RestClient {
    RestClient::builder("test-token")
        .base_url(server.url())
        .timeout(Duration::from_secs(2))
        .max_retries(max_retries)
        .build()
        .unwrap()
}

#[tokio::test]
async fn success_returns_payload_and_snapshot() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/users/@me")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("x-ratelimit-bucket", "user-bucket")
        .with_header("x-ratelimit-limit", "5")
        .with_header("x-ratelimit-remaining", "4")
        .with_header("x-ratelimit-reset-after", "3.0")
        .with_body(r#"{"id":"42","username":"bot"}"#)
        .create_async()
        .await;

    let client = client_for(&server, 1);
    let resp = client.get::<Value>("/users/@me").await.unwrap();

    assert_eq!(resp.value["id"], "42");
    assert_eq!(resp.rate_limit.bucket.as_deref(), Some("user-bucket"));
    assert_eq!(resp.rate_limit.remaining, Some(4));
    // The route converged on the server-assigned bucket.
    assert_eq!(client.buckets().resolve("GET /users/@me"), "user-bucket");
    mock.assert_async().await;
}

#[tokio::test]
async fn auth_failure_is_not_retried_and_counts() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/users/@me")
        .with_status(401)
        .with_body(r#"{"message":"401: Unauthorized"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server, 3);
    let err = client.get::<Value>("/users/@me").await.unwrap_err();

    assert!(matches!(err, RestError::Auth { status: 401, .. }));
    assert_eq!(client.buckets().invalid_request_count(), 1);
    mock.assert_async().await; // exactly one hit: no retry
}

#[tokio::test]
async fn other_client_errors_surface_without_ban_accounting() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/channels/1")
        .with_status(404)
        .with_body(r#"{"message":"Unknown Channel","code":10003}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server, 3);
    let err = client.get::<Value>("/channels/1").await.unwrap_err();

    assert!(matches!(err, RestError::Api { status: 404, .. }));
    assert_eq!(client.buckets().invalid_request_count(), 0);
}

#[tokio::test]
async fn server_faults_retry_with_backoff_then_surface() {
    let mut server = Server::new_async().await;
    // max_retries = 1 → initial call + one retry.
    let mock = server
        .mock("GET", "/guilds/1")
        .with_status(502)
        .with_body("bad gateway")
        .expect(2)
        .create_async()
        .await;

    let client = client_for(&server, 1);
    let start = Instant::now();
    let err = client.get::<Value>("/guilds/1").await.unwrap_err();

    assert!(matches!(
        err,
        RestError::Upstream {
            attempts: 2,
            status: 502,
            ..
        }
    ));
    // One linear backoff step of ~1s between the two calls.
    assert!(start.elapsed() >= Duration::from_millis(900));
    mock.assert_async().await;
}

#[tokio::test]
async fn malformed_json_is_treated_as_upstream_block() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/gateway/bot")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html>blocked</html>")
        .expect(2)
        .create_async()
        .await;

    let client = client_for(&server, 1);
    let err = client.get_gateway_bot().await.unwrap_err();

    match err {
        RestError::Upstream {
            attempts, message, ..
        } => {
            assert_eq!(attempts, 2);
            assert!(message.contains("malformed JSON"), "message: {message}");
        }
        other => panic!("expected Upstream, got {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn rate_limit_waits_then_retries_uncounted() {
    let mut server = Server::new_async().await;
    let limited = server
        .mock("DELETE", "/channels/1/messages/2")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message":"You are being rate limited.","retry_after":0.4,"global":false}"#)
        .create_async()
        .await;

    // max_retries = 0: if the 429 wait consumed a retry, this would fail.
    let client = client_for(&server, 0);
    let start = Instant::now();
    let handle = {
        let client = client.clone();
        tokio::spawn(async move { client.delete::<Value>("/channels/1/messages/2").await })
    };

    // Let the first attempt hit the 429, then swap in a success.
    tokio::time::sleep(Duration::from_millis(200)).await;
    limited.remove_async().await;
    server
        .mock("DELETE", "/channels/1/messages/2")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let resp = handle.await.unwrap().unwrap();
    assert_eq!(resp.value, serde_json::json!({}));
    assert!(
        start.elapsed() >= Duration::from_millis(400),
        "must wait out retry_after"
    );
    // Non-shared 429s count toward ban-risk accounting.
    assert_eq!(client.buckets().invalid_request_count(), 1);
}

#[tokio::test]
async fn global_rate_limit_gates_the_whole_client() {
    let mut server = Server::new_async().await;
    let limited = server
        .mock("GET", "/users/@me")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_header("x-ratelimit-global", "true")
        .with_body(r#"{"message":"You are being rate limited.","retry_after":1.2,"global":true}"#)
        .create_async()
        .await;

    let client = client_for(&server, 0);
    let handle = {
        let client = client.clone();
        tokio::spawn(async move { client.get::<Value>("/users/@me").await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    // The global gate is up while the 429 wait is in progress.
    assert!(client.buckets().global_reset_at().is_some());

    limited.remove_async().await;
    server
        .mock("GET", "/users/@me")
        .with_status(200)
        .with_body(r#"{"id":"42"}"#)
        .create_async()
        .await;

    let resp = handle.await.unwrap().unwrap();
    assert_eq!(resp.value["id"], "42");
}

#[tokio::test]
async fn shared_scope_429_is_not_ban_risk() {
    let mut server = Server::new_async().await;
    let limited = server
        .mock("POST", "/channels/1/messages")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_header("x-ratelimit-scope", "shared")
        .with_body(r#"{"message":"shared resource limit","retry_after":0.2,"global":false}"#)
        .create_async()
        .await;

    let client = client_for(&server, 0);
    let handle = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .post::<Value>("/channels/1/messages", serde_json::json!({"content": "hi"}))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    limited.remove_async().await;
    server
        .mock("POST", "/channels/1/messages")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    handle.await.unwrap().unwrap();
    assert_eq!(client.buckets().invalid_request_count(), 0);
}

#[tokio::test]
async fn empty_body_decodes_as_null() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("DELETE", "/channels/1/messages/2")
        .with_status(204)
        .with_body("")
        .create_async()
        .await;

    let client = client_for(&server, 0);
    let resp = client
        .delete::<Value>("/channels/1/messages/2")
        .await
        .unwrap();
    assert_eq!(resp.value, Value::Null);
}

#[tokio::test]
async fn connect_errors_exhaust_as_timeout() {
    // Nothing listens here; connects fail fast.
    let client = RestClient::builder("test-token")
        .base_url("http://127.0.0.1:9")
        .timeout(Duration::from_millis(500))
        .max_retries(1)
        .build()
        .unwrap();

    let err = client.get::<Value>("/users/@me").await.unwrap_err();
    assert!(matches!(err, RestError::Timeout { attempts: 2, .. }));
}

#[tokio::test]
async fn discovery_payload_parses() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/gateway/bot")
        .with_status(200)
        .with_body(
            r#"{
                "url": "wss://gateway.accord.gg",
                "shards": 8,
                "session_start_limit": {
                    "total": 1000,
                    "remaining": 993,
                    "reset_after": 14400000,
                    "max_concurrency": 2
                }
            }"#,
        )
        .create_async()
        .await;

    let client = client_for(&server, 0);
    let info = client.get_gateway_bot().await.unwrap();
    assert_eq!(info.url, "wss://gateway.accord.gg");
    assert_eq!(info.shards, 8);
    assert_eq!(info.session_start_limit.max_concurrency, 2);
    assert_eq!(info.session_start_limit.remaining, 993);
}
