// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// HTTP routes: health and index reload

use crate::common::{ingest, manager, write_docs, RecordingSink, PARIS_DOC, TOKYO_DOC};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use fabstir_doc_qa::api::router;
use fabstir_doc_qa::inference::StaticGenerator;
use fabstir_doc_qa::vector::INDEX_FILE_NAME;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

async fn call(app: axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health_reports_index_and_sessions() {
    let source = write_docs(&[("paris.txt", PARIS_DOC)]);
    let store = tempfile::tempdir().unwrap();
    ingest(source.path(), store.path()).await.unwrap();

    let manager = Arc::new(manager(store.path(), Arc::new(StaticGenerator::new("ok")), false));

    // Index not loaded before the first session
    let (status, body) = call(router(manager.clone()), "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].as_str().unwrap().starts_with("v"));
    assert_eq!(body["build"]["version"], fabstir_doc_qa::version::VERSION_NUMBER);
    assert!(body["build"]["features"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f == "websocket-chat"));
    assert!(body["index_entries"].is_null());
    assert_eq!(body["active_sessions"], 0);

    manager.on_session_start("s1", &RecordingSink::new()).await;

    let (_, body) = call(router(manager), "GET", "/health").await;
    assert_eq!(body["index_entries"], 1);
    assert_eq!(body["active_sessions"], 1);
}

#[tokio::test]
async fn test_reload_route() {
    let store = tempfile::tempdir().unwrap();
    let first = write_docs(&[("paris.txt", PARIS_DOC)]);
    ingest(first.path(), store.path()).await.unwrap();

    let manager = Arc::new(manager(store.path(), Arc::new(StaticGenerator::new("ok")), false));
    manager.index().get().await.unwrap();

    let second = write_docs(&[("paris.txt", PARIS_DOC), ("tokyo.txt", TOKYO_DOC)]);
    ingest(second.path(), store.path()).await.unwrap();

    let (status, body) = call(router(manager.clone()), "POST", "/v1/index/reload").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "reloaded");
    assert_eq!(body["entries"], 2);
    assert_eq!(body["embedding_model"], "hashing-1024");

    // A broken file leaves the loaded index in place
    std::fs::write(store.path().join(INDEX_FILE_NAME), b"garbage").unwrap();
    let (status, body) = call(router(manager.clone()), "POST", "/v1/index/reload").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "INDEX_UNAVAILABLE");
    assert_eq!(manager.index().loaded_entries().await, Some(2));
}
