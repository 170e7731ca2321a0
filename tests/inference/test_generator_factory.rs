// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Generator provisioning across sessions

use fabstir_doc_qa::config::GeneratorMode;
use fabstir_doc_qa::inference::{
    generator_factory, AnswerGenerator, GenerationRequest, GeneratorLoader, StaticGenerator,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn request() -> GenerationRequest {
    GenerationRequest {
        prompt: "Context: x\nQuestion: y".to_string(),
        max_new_tokens: 16,
        temperature: 0.5,
    }
}

/// Loader handing out one shared slow generator, counting loads
fn loader(inner: Arc<StaticGenerator>, loads: Arc<AtomicUsize>) -> GeneratorLoader {
    Arc::new(move || {
        loads.fetch_add(1, Ordering::SeqCst);
        Ok(inner.clone() as Arc<dyn AnswerGenerator>)
    })
}

#[tokio::test]
async fn test_shared_mode_serializes_streams_across_sessions() {
    let inner = Arc::new(StaticGenerator::new("a b c d").with_delay(Duration::from_millis(10)));
    let loads = Arc::new(AtomicUsize::new(0));
    let factory = generator_factory(GeneratorMode::Shared, loader(inner.clone(), loads.clone()));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let factory = factory.clone();
        handles.push(tokio::spawn(async move {
            let generator = factory.generator().await.unwrap();
            let stream = generator.generate_stream(&request()).await.unwrap();
            stream.map(|t| t.unwrap()).collect::<String>().await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), "a b c d");
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(inner.calls(), 4);
    assert_eq!(inner.max_concurrent_calls(), 1);
}

#[tokio::test]
async fn test_per_session_mode_loads_for_each_session() {
    let inner = Arc::new(StaticGenerator::new("ok"));
    let loads = Arc::new(AtomicUsize::new(0));
    let factory = generator_factory(
        GeneratorMode::PerSession,
        loader(inner.clone(), loads.clone()),
    );

    for _ in 0..3 {
        let generator = factory.generator().await.unwrap();
        assert_eq!(generator.generate(&request()).await.unwrap().text, "ok");
    }
    assert_eq!(loads.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_dropped_stream_releases_shared_generator() {
    let inner = Arc::new(
        StaticGenerator::new("one two three four five").with_delay(Duration::from_millis(20)),
    );
    let factory = generator_factory(
        GeneratorMode::Shared,
        loader(inner, Arc::new(AtomicUsize::new(0))),
    );
    let generator = factory.generator().await.unwrap();

    let mut stream = generator.generate_stream(&request()).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "one ");
    drop(stream);

    let next = tokio::time::timeout(Duration::from_secs(2), generator.generate(&request()))
        .await
        .expect("generator still locked after the stream was dropped")
        .unwrap();
    assert_eq!(next.text, "one two three four five");
}
