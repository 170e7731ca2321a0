// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Index cache shared between sessions

use crate::common::{ingest, write_docs, PARIS_DOC, TOKYO_DOC};
use fabstir_doc_qa::rag::RagError;
use fabstir_doc_qa::vector::{IndexCache, INDEX_FILE_NAME};
use std::sync::Arc;

#[tokio::test]
async fn test_concurrent_first_use_loads_once() {
    let source = write_docs(&[("paris.txt", PARIS_DOC)]);
    let store = tempfile::tempdir().unwrap();
    ingest(source.path(), store.path()).await.unwrap();

    let cache = Arc::new(IndexCache::new(store.path()));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get().await.unwrap() })
        })
        .collect();

    let mut indexes = Vec::new();
    for handle in handles {
        indexes.push(handle.await.unwrap());
    }
    assert!(indexes.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[tokio::test]
async fn test_reload_picks_up_new_ingestion() {
    let store = tempfile::tempdir().unwrap();
    let first = write_docs(&[("paris.txt", PARIS_DOC)]);
    ingest(first.path(), store.path()).await.unwrap();

    let cache = IndexCache::new(store.path());
    let before = cache.get().await.unwrap();
    assert_eq!(before.len(), 1);

    let second = write_docs(&[("paris.txt", PARIS_DOC), ("tokyo.txt", TOKYO_DOC)]);
    ingest(second.path(), store.path()).await.unwrap();

    // Cached until reloaded
    assert_eq!(cache.get().await.unwrap().len(), 1);
    let after = cache.reload().await.unwrap();
    assert_eq!(after.len(), 2);
    assert_eq!(cache.loaded_entries().await, Some(2));

    // Holders of the old index are unaffected
    assert_eq!(before.len(), 1);
}

#[tokio::test]
async fn test_failed_reload_keeps_current_index() {
    let source = write_docs(&[("paris.txt", PARIS_DOC)]);
    let store = tempfile::tempdir().unwrap();
    ingest(source.path(), store.path()).await.unwrap();

    let cache = IndexCache::new(store.path());
    cache.get().await.unwrap();

    std::fs::write(store.path().join(INDEX_FILE_NAME), b"garbage").unwrap();
    assert!(matches!(cache.reload().await, Err(RagError::IndexUnavailable(_))));
    assert_eq!(cache.get().await.unwrap().len(), 1);
}
