//! API client tests against a mock Unified Listing server
//!
//! Covers login, listing with query filters, and the create/update write
//! paths including validation error parsing.

use serde_json::json;
use std::time::Duration;
use ul_sync::api::{ApiClient, ProductQuery};
use ul_sync::record::{Record, RecordStatus};
use ul_sync::SyncError;
use wiremock::{
    matchers::{body_json, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn client(server: &MockServer) -> ApiClient {
    ApiClient::new(server.uri(), Duration::from_secs(5)).expect("client builds")
}

fn record(value: serde_json::Value) -> Record {
    Record::try_from(value).expect("object record")
}

#[tokio::test]
async fn test_login_sets_session_cookie() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/user/login"))
        .and(body_json(json!({"username": "importer", "password": "secret"})))
        .respond_with(
            ResponseTemplate::new(200).insert_header("set-cookie", "ul.sid=abc123; Path=/; HttpOnly"),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/products"))
        .and(header("cookie", "ul.sid=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client.login("importer", "secret").await.expect("login succeeds");

    let products = client
        .fetch_products(&ProductQuery::default())
        .await
        .expect("session cookie is sent");
    assert!(products.is_empty());
}

#[tokio::test]
async fn test_login_failure_is_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/user/login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .mount(&server)
        .await;

    let err = client(&server).login("importer", "wrong").await.unwrap_err();
    match err {
        SyncError::Auth(msg) => {
            assert!(msg.contains("401"));
            assert!(msg.contains("bad credentials"));
        },
        other => panic!("expected auth error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_login_requires_exactly_200() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/user/login"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let err = client(&server).login("importer", "secret").await.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_fetch_products_sends_filters() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/products"))
        .and(query_param("sources", r#"["gari"]"#))
        .and(query_param("unified", "false"))
        .and(query_param("limit", "250"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "products": [
                {"source": "gari", "sid": "1", "uid": "u-1", "status": "active"},
                {"source": "gari", "sid": "2", "uid": "u-2", "status": "new"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let products = client(&server)
        .fetch_products(&ProductQuery::for_source("gari", 250))
        .await
        .expect("fetch succeeds");

    assert_eq!(products.len(), 2);
    assert_eq!(products[0].uid(), Some("u-1"));
    assert_eq!(products[1].status(), Some(RecordStatus::New));
}

#[tokio::test]
async fn test_fetch_products_error_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/products"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client(&server)
        .fetch_products(&ProductQuery::for_source("sai", 10))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Api { status: 503, ref body } if body == "maintenance"));
}

#[tokio::test]
async fn test_create_returns_stored_record() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/product"))
        .and(body_json(json!({"source": "gari", "sid": "9", "status": "new"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "source": "gari", "sid": "9", "status": "new", "uid": "u-9"
        })))
        .mount(&server)
        .await;

    let stored = client(&server)
        .create_product(&record(json!({"source": "gari", "sid": "9", "status": "new"})))
        .await
        .expect("create succeeds");
    assert_eq!(stored.uid(), Some("u-9"));
}

#[tokio::test]
async fn test_update_with_empty_body_returns_submitted() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/product"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let submitted = record(json!({"source": "gari", "sid": "9", "uid": "u-9", "name": "Ramp"}));
    let stored = client(&server).update_product(&submitted).await.expect("update succeeds");
    assert_eq!(stored, submitted);
}

#[tokio::test]
async fn test_write_validation_errors() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/product"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "Product failed validation",
            "errors": [
                {"dataPath": ".sourceUrl", "message": "should match format \"uri\""},
                {"dataPath": ".status", "message": "should be equal to one of the allowed values"}
            ]
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .update_product(&record(json!({"source": "gari", "sid": "1"})))
        .await
        .unwrap_err();

    match err {
        SyncError::Validation {
            status,
            message,
            errors,
        } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Product failed validation");
            assert_eq!(errors.len(), 2);
            assert_eq!(errors[1].data_path, ".status");
        },
        other => panic!("expected validation error, got {:?}", other),
    }
}
