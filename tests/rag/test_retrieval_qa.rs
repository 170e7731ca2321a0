// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Retrieval-QA orchestrator: retrieval, prompt rendering, deadlines

use crate::common::{embedder, qa_over, settings, PARIS_DOC, TOKYO_DOC};
use fabstir_doc_qa::inference::StaticGenerator;
use fabstir_doc_qa::rag::{PromptTemplate, RagError, RetrievalQa, NO_SOURCES_TEXT};
use fabstir_doc_qa::vector::{DocumentChunk, VectorIndex};
use std::sync::Arc;
use std::time::Duration;

fn docs() -> Vec<(&'static str, &'static str)> {
    vec![("paris.txt", PARIS_DOC), ("tokyo.txt", TOKYO_DOC)]
}

#[tokio::test]
async fn test_capital_question_retrieves_paris_chunk() {
    let generator = Arc::new(StaticGenerator::new("Paris"));
    let (_store, qa) = qa_over(&docs(), generator.clone(), settings(1)).await;

    let answer = qa.answer("What is the capital of France?").await.unwrap();

    assert_eq!(answer.text, "Paris");
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].source, "paris.txt");
    assert!(answer.sources[0].excerpt.contains("capital of France"));

    // The generator saw the Paris chunk and the question, nothing from Tokyo
    let prompt = generator.last_prompt().unwrap();
    assert!(prompt.contains(PARIS_DOC));
    assert!(prompt.contains("Question: What is the capital of France?"));
    assert!(!prompt.contains("Tokyo"));
}

#[tokio::test]
async fn test_one_sentence_chunks_rank_paris_first() {
    let docs = [
        ("france.txt", "Paris is the capital of France."),
        ("japan.txt", "Tokyo is the capital of Japan."),
    ];
    let (_store, qa) = qa_over(&docs, Arc::new(StaticGenerator::new("Paris")), settings(2)).await;

    let answer = qa.answer("What is the capital of France?").await.unwrap();
    assert_eq!(answer.sources.len(), 2);
    assert_eq!(answer.sources[0].excerpt, "Paris is the capital of France.");
    assert!(answer.sources[0].score > answer.sources[1].score);
}

#[tokio::test]
async fn test_tokyo_question_retrieves_tokyo_chunk() {
    let (_store, qa) = qa_over(&docs(), Arc::new(StaticGenerator::new("Fuji")), settings(1)).await;

    let answer = qa.answer("Which mountain can be seen from Tokyo?").await.unwrap();
    assert_eq!(answer.sources[0].source, "tokyo.txt");
}

#[tokio::test]
async fn test_sources_never_exceed_top_k() {
    let many: Vec<(String, String)> = (0..6)
        .map(|i| {
            (
                format!("doc{}.txt", i),
                format!("Document number {} talks about the capital of France.", i),
            )
        })
        .collect();
    let refs: Vec<(&str, &str)> = many.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();

    for top_k in [1, 2, 4] {
        let (_store, qa) = qa_over(&refs, Arc::new(StaticGenerator::new("ok")), settings(top_k)).await;
        let answer = qa.answer("capital of France").await.unwrap();
        assert_eq!(answer.sources.len(), top_k);
    }

    // Fewer chunks than top_k
    let (_store, qa) = qa_over(&docs(), Arc::new(StaticGenerator::new("ok")), settings(5)).await;
    let answer = qa.answer("capital").await.unwrap();
    assert_eq!(answer.sources.len(), 2);
}

#[tokio::test]
async fn test_retrieval_is_deterministic() {
    let (_store, qa) = qa_over(&docs(), Arc::new(StaticGenerator::new("ok")), settings(2)).await;

    let first = qa.answer("Where is the Eiffel Tower?").await.unwrap();
    for _ in 0..5 {
        let again = qa.answer("Where is the Eiffel Tower?").await.unwrap();
        assert_eq!(again.sources, first.sources);
    }
    assert!(first.sources[0].score >= first.sources[1].score);
}

#[tokio::test]
async fn test_empty_index_answers_without_sources() {
    let index = Arc::new(VectorIndex::new("hashing-1024", 1024, "data"));
    let generator = Arc::new(StaticGenerator::new("I don't know."));
    let qa = RetrievalQa::new(
        index,
        embedder(),
        generator.clone(),
        PromptTemplate::default(),
        settings(2),
    )
    .unwrap();

    let answer = qa.answer("Anything?").await.unwrap();
    assert!(answer.sources.is_empty());
    assert!(answer.render().ends_with(NO_SOURCES_TEXT));
    assert!(generator.last_prompt().unwrap().contains("Context: \n"));
}

#[tokio::test]
async fn test_blank_query_rejected() {
    let generator = Arc::new(StaticGenerator::new("unused"));
    let (_store, qa) = qa_over(&docs(), generator.clone(), settings(2)).await;

    for query in ["", "   ", "\n\t"] {
        let err = qa.answer(query).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidQuery(_)));
    }
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_overlong_query_rejected() {
    let mut limited = settings(2);
    limited.max_query_chars = 10;
    let (_store, qa) = qa_over(&docs(), Arc::new(StaticGenerator::new("x")), limited).await;

    let err = qa.answer("this question is far too long").await.unwrap_err();
    assert!(matches!(err, RagError::InvalidQuery(_)));
}

#[tokio::test]
async fn test_generation_timeout() {
    let mut quick = settings(1);
    quick.generation_timeout = Duration::from_millis(50);
    let generator = Arc::new(StaticGenerator::new("slow").with_delay(Duration::from_millis(500)));
    let (_store, qa) = qa_over(&docs(), generator, quick).await;

    let err = qa.answer("capital of France").await.unwrap_err();
    assert!(matches!(err, RagError::GeneratorTimeout { .. }));
}

#[tokio::test]
async fn test_streaming_timeout_reported_once() {
    let mut quick = settings(1);
    quick.generation_timeout = Duration::from_millis(100);
    let generator = Arc::new(
        StaticGenerator::new("one two three four five six").with_delay(Duration::from_millis(40)),
    );
    let (_store, qa) = qa_over(&docs(), generator, quick).await;

    let mut streaming = qa.answer_stream("capital of France").await.unwrap();
    let mut errors = 0;
    while let Some(token) = streaming.next_token().await {
        if let Err(e) = token {
            assert!(matches!(e, RagError::GeneratorTimeout { .. }));
            errors += 1;
        }
    }
    assert_eq!(errors, 1);
    assert!(streaming.next_token().await.is_none());
}

#[tokio::test]
async fn test_streaming_matches_full_answer() {
    let (_store, qa) = qa_over(
        &docs(),
        Arc::new(StaticGenerator::new("The capital of France is Paris.")),
        settings(1),
    )
    .await;

    let streaming = qa.answer_stream("capital of France").await.unwrap();
    assert_eq!(streaming.sources()[0].source, "paris.txt");

    let streamed = streaming.collect().await.unwrap();
    let full = qa.answer("capital of France").await.unwrap();
    assert_eq!(streamed, full);
}

#[tokio::test]
async fn test_dimension_mismatch_rejected() {
    let mut index = VectorIndex::new("other-model", 3, "data");
    index
        .insert(
            vec![1.0, 0.0, 0.0],
            DocumentChunk {
                id: "a#0".to_string(),
                source: "a.txt".to_string(),
                chunk_index: 0,
                start_offset: 0,
                end_offset: 1,
                text: "a".to_string(),
            },
        )
        .unwrap();

    let result = RetrievalQa::new(
        Arc::new(index),
        embedder(),
        Arc::new(StaticGenerator::new("x")),
        PromptTemplate::default(),
        settings(2),
    );
    assert!(matches!(result, Err(RagError::IndexUnavailable(_))));
}

#[tokio::test]
async fn test_zero_top_k_rejected() {
    let result = RetrievalQa::new(
        Arc::new(VectorIndex::new("hashing-1024", 1024, "data")),
        embedder(),
        Arc::new(StaticGenerator::new("x")),
        PromptTemplate::default(),
        settings(0),
    );
    assert!(matches!(result, Err(RagError::Config(_))));
}
