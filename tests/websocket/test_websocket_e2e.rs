// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Real WebSocket connection against the router

use crate::common::{ingest, manager, write_docs, PARIS_DOC, TOKYO_DOC};
use fabstir_doc_qa::api::router;
use fabstir_doc_qa::inference::StaticGenerator;
use futures::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

async fn next_json<S>(ws: &mut S) -> Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_chat_over_websocket() {
    let source = write_docs(&[("paris.txt", PARIS_DOC), ("tokyo.txt", TOKYO_DOC)]);
    let store = tempfile::tempdir().unwrap();
    ingest(source.path(), store.path()).await.unwrap();

    let manager = Arc::new(manager(
        store.path(),
        Arc::new(StaticGenerator::new("Mount Fuji")),
        true,
    ));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(manager.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (mut ws, _) = connect_async(format!("ws://{}/v1/ws", addr)).await.unwrap();

    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["content"], "Olá! qual a sua pergunta?");

    // JSON frame
    ws.send(Message::Text(
        json!({"type": "message", "content": "Which mountain can be seen from Tokyo?"}).to_string(),
    ))
    .await
    .unwrap();

    let mut streamed = String::new();
    let answer = loop {
        let reply = next_json(&mut ws).await;
        match reply["type"].as_str() {
            Some("stream_chunk") => streamed.push_str(reply["content"].as_str().unwrap()),
            Some("answer") => break reply,
            other => panic!("unexpected reply type {:?}", other),
        }
    };
    assert_eq!(streamed, "Mount Fuji");
    assert!(answer["content"].as_str().unwrap().starts_with("Mount Fuji\n\nSources:"));
    assert_eq!(answer["sources"][0]["source"], "tokyo.txt");

    // Plain text frame
    ws.send(Message::Text("What is the capital of France?".to_string()))
        .await
        .unwrap();
    let answer = loop {
        let reply = next_json(&mut ws).await;
        if reply["type"] == "answer" {
            break reply;
        }
    };
    assert_eq!(answer["sources"][0]["source"], "paris.txt");

    // A message frame without content is rejected, the session carries on
    ws.send(Message::Text(json!({"type": "message"}).to_string()))
        .await
        .unwrap();
    let rejected = next_json(&mut ws).await;
    assert_eq!(rejected["type"], "error");
    assert_eq!(rejected["code"], "INVALID_MESSAGE");
    assert_eq!(manager.active_sessions().await, 1);

    ws.close(None).await.unwrap();

    // Session state is dropped once the connection closes
    for _ in 0..50 {
        if manager.active_sessions().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(manager.active_sessions().await, 0);
}
