//! End-to-end source synchronization against a mock Unified Listing server

use serde_json::{json, Value};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use ul_sync::config::SyncConfig;
use ul_sync::record::Record;
use ul_sync::sync::SourceSync;
use ul_sync::SyncError;
use wiremock::{
    matchers::{body_partial_json, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn config(server: &MockServer, output_dir: Option<PathBuf>) -> SyncConfig {
    SyncConfig {
        api_url: server.uri(),
        username: Some("importer".to_string()),
        password: Some("secret".to_string()),
        request_timeout_secs: 5,
        concurrency: 4,
        output_dir,
        ..SyncConfig::default()
    }
}

fn records(value: Value) -> Vec<Record> {
    ul_sync::record::parse_records(value).expect("valid record list")
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/user/login"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "ul.sid=s1; Path=/"))
        .mount(server)
        .await;
}

async fn mount_existing(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/products"))
        .and(query_param("sources", r#"["gari"]"#))
        .and(query_param("unified", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "products": [
                {"source": "gari", "sid": "1", "uid": "u-1", "status": "active", "name": "Phone"},
                {"source": "gari", "sid": "2", "uid": "u-2", "status": "active", "name": "Ramp"}
            ]
        })))
        .mount(server)
        .await;
}

fn incoming() -> Vec<Record> {
    records(json!([
        {"sid": "1", "name": "Phone", "updated": "2024-01-01"},
        {"sid": "2", "name": "Folding Ramp"},
        {"sid": "3", "name": "Magnifier"}
    ]))
}

#[tokio::test]
async fn test_sync_creates_updates_and_skips() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_existing(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/product"))
        .and(body_partial_json(json!({"source": "gari", "sid": "3", "status": "new"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "source": "gari", "sid": "3", "status": "new", "name": "Magnifier", "uid": "u-3"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/api/product"))
        .and(body_partial_json(json!({
            "sid": "2", "uid": "u-2", "status": "active", "name": "Folding Ramp"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sync = SourceSync::new(config(&server, None)).expect("valid config");
    let report = sync.run("gari", incoming()).await.expect("sync succeeds");

    let counts = report.summary();
    assert_eq!(counts.examined, 3);
    assert_eq!(counts.existing, 2);
    assert_eq!(counts.skipped, 1);
    assert_eq!(counts.created, 1);
    assert_eq!(counts.updated, 1);
    assert_eq!(counts.failed, 0);

    assert_eq!(report.created[0].uid(), Some("u-3"));
    assert_eq!(report.updated[0].original.get("name"), Some(&json!("Ramp")));
}

#[tokio::test]
async fn test_rejected_write_is_reported_not_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_existing(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/product"))
        .and(body_partial_json(json!({"sid": "3"})))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "invalid product",
            "errors": [{"dataPath": ".sourceUrl", "message": "is required"}]
        })))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/api/product"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let sync = SourceSync::new(config(&server, Some(dir.path().to_path_buf()))).expect("valid config");
    let report = sync.run("gari", incoming()).await.expect("run completes");

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.failed[0].field_errors[0].data_path, ".sourceUrl");

    let failed: Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("gari-failed.json")).expect("failed set written"),
    )
    .expect("valid json");
    assert_eq!(failed[0]["record"]["sid"], "3");
    assert_eq!(failed[0]["operation"], "create");

    let summary: Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("gari-summary.json")).expect("summary written"),
    )
    .expect("valid json");
    assert_eq!(summary["source"], "gari");
    assert_eq!(summary["counts"]["failed"], 1);
    assert!(dir.path().join("gari-updated.json").exists());
}

#[tokio::test]
async fn test_auth_failure_aborts_before_writes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/user/login"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": []})))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(path("/api/product"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let sync = SourceSync::new(config(&server, None)).expect("valid config");
    let err = sync.run("gari", incoming()).await.unwrap_err();
    assert!(matches!(err, SyncError::Auth(_)));
}

#[tokio::test]
async fn test_fetch_failure_aborts_before_writes() {
    let server = MockServer::start().await;
    mount_login(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/products"))
        .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
        .mount(&server)
        .await;

    Mock::given(path("/api/product"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let sync = SourceSync::new(config(&server, None)).expect("valid config");
    let err = sync.run("gari", incoming()).await.unwrap_err();
    assert!(matches!(err, SyncError::Api { status: 500, .. }));
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_existing(&server).await;

    Mock::given(path("/api/product"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let sync = SourceSync::new(config(&server, None)).expect("valid config");
    let plan = sync.plan("gari", incoming()).await.expect("plan succeeds");

    let counts = plan.counts();
    assert_eq!(counts.to_create, 1);
    assert_eq!(counts.to_update, 1);
    assert_eq!(counts.skipped, 1);
}

#[tokio::test]
async fn test_login_skipped_without_credentials() {
    let server = MockServer::start().await;

    Mock::given(path("/api/user/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": []})))
        .expect(1)
        .mount(&server)
        .await;

    let config = SyncConfig {
        username: None,
        password: None,
        ..config(&server, None)
    };
    let sync = SourceSync::new(config).expect("valid config");
    let plan = sync.plan("gari", incoming()).await.expect("plan succeeds");
    assert_eq!(plan.counts().to_create, 3);
}

#[tokio::test]
async fn test_cancelled_run_persists_abandoned_writes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_existing(&server).await;

    Mock::given(path("/api/product"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    token.cancel();
    let sync = SourceSync::new(config(&server, Some(dir.path().to_path_buf())))
        .expect("valid config")
        .with_cancellation(token);
    let report = sync.run("gari", incoming()).await.expect("run completes");

    let counts = report.summary();
    assert_eq!((counts.skipped, counts.abandoned), (1, 2));

    let abandoned: Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("gari-abandoned.json")).expect("abandoned set written"),
    )
    .expect("valid json");
    assert_eq!(abandoned.as_array().map(Vec::len), Some(2));
}
