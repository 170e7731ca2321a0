// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Document ingestion into a persisted index

use crate::common::{ingest, write_docs, EMBEDDING_DIMENSIONS, PARIS_DOC, TOKYO_DOC};
use fabstir_doc_qa::vector::{VectorIndex, INDEX_FILE_NAME};

#[tokio::test]
async fn test_ingest_persists_all_documents() {
    let source = write_docs(&[("paris.txt", PARIS_DOC), ("tokyo.md", TOKYO_DOC)]);
    let store = tempfile::tempdir().unwrap();

    let report = ingest(source.path(), store.path()).await.unwrap();
    assert_eq!(report.documents_loaded, 2);
    assert_eq!(report.chunks_indexed, 2);
    assert!(report.skipped.is_empty());
    assert!(report.warnings.is_empty());
    assert_eq!(report.index_path, store.path().join(INDEX_FILE_NAME));

    let index = VectorIndex::load(store.path()).unwrap();
    assert_eq!(index.len(), 2);
    assert_eq!(index.dimensions(), EMBEDDING_DIMENSIONS);
    assert_eq!(index.embedding_model(), "hashing-1024");

    // Documents are ingested in file name order
    let sources: Vec<&str> = index.entries().iter().map(|e| e.chunk.source.as_str()).collect();
    assert_eq!(sources, vec!["paris.txt", "tokyo.md"]);
    assert_eq!(index.entries()[0].chunk.id, "paris.txt#0");
}

#[tokio::test]
async fn test_long_document_chunk_offsets() {
    let text = "Ownership rules keep memory safe without a garbage collector. ".repeat(20);
    let source = write_docs(&[("rust.txt", &text)]);
    let store = tempfile::tempdir().unwrap();

    let report = ingest(source.path(), store.path()).await.unwrap();
    assert!(report.chunks_indexed > 1);

    let index = VectorIndex::load(store.path()).unwrap();
    let normalized_len = text.trim().chars().count();
    let mut previous_start = None;
    for (i, entry) in index.entries().iter().enumerate() {
        let chunk = &entry.chunk;
        assert_eq!(chunk.chunk_index, i);
        assert_eq!(chunk.id, format!("rust.txt#{}", i));
        assert!(chunk.end_offset <= normalized_len);
        assert!(chunk.text.chars().count() <= 200);
        if let Some(prev) = previous_start {
            assert!(chunk.start_offset > prev);
        }
        previous_start = Some(chunk.start_offset);
    }
}

#[tokio::test]
async fn test_unsupported_and_empty_files() {
    let source = write_docs(&[
        ("notes.txt", PARIS_DOC),
        ("image.png", "not a document"),
        ("blank.txt", "   \n\n  "),
    ]);
    let store = tempfile::tempdir().unwrap();

    let report = ingest(source.path(), store.path()).await.unwrap();
    assert_eq!(report.documents_loaded, 1);
    // Unsupported extensions are ignored, unreadable documents reported
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].path.ends_with("blank.txt"));
}

#[tokio::test]
async fn test_corrupt_pdf_is_skipped() {
    let source = write_docs(&[("broken.pdf", "%PDF-1.4 garbage"), ("ok.txt", TOKYO_DOC)]);
    let store = tempfile::tempdir().unwrap();

    let report = ingest(source.path(), store.path()).await.unwrap();
    assert_eq!(report.documents_loaded, 1);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].path.ends_with("broken.pdf"));
}

#[tokio::test]
async fn test_empty_source_writes_empty_index() {
    let source = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();

    let report = ingest(source.path(), store.path()).await.unwrap();
    assert_eq!(report.chunks_indexed, 0);
    assert_eq!(report.warnings.len(), 1);

    let index = VectorIndex::load(store.path()).unwrap();
    assert!(index.is_empty());
}

#[tokio::test]
async fn test_missing_source_writes_empty_index() {
    let store = tempfile::tempdir().unwrap();
    let missing = store.path().join("no-such-dir");

    let report = ingest(&missing, store.path()).await.unwrap();
    assert_eq!(report.chunks_indexed, 0);
    assert_eq!(report.warnings.len(), 1);
    assert!(VectorIndex::load(store.path()).unwrap().is_empty());
}

#[tokio::test]
async fn test_reingest_replaces_index() {
    let store = tempfile::tempdir().unwrap();

    let first = write_docs(&[("a.txt", PARIS_DOC), ("b.txt", TOKYO_DOC)]);
    ingest(first.path(), store.path()).await.unwrap();
    assert_eq!(VectorIndex::load(store.path()).unwrap().len(), 2);

    let second = write_docs(&[("c.txt", TOKYO_DOC)]);
    ingest(second.path(), store.path()).await.unwrap();

    let index = VectorIndex::load(store.path()).unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index.entries()[0].chunk.source, "c.txt");

    // No temporary files left next to the index
    let files: Vec<_> = std::fs::read_dir(store.path()).unwrap().collect();
    assert_eq!(files.len(), 1);
}
