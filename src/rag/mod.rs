// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// RAG (Retrieval-Augmented Generation) module
// Document ingestion, prompt rendering and retrieval-augmented answering

pub mod chunker;
pub mod errors;
pub mod ingest;
pub mod loader;
pub mod orchestrator;
pub mod prompt;

pub use chunker::{normalize_text, TextChunk, TextSplitter};
pub use errors::{RagError, GENERIC_USER_ERROR};
pub use ingest::{DocumentIngestor, IngestReport};
pub use loader::{load_directory, load_document, DocumentKind, LoadedDocument, SkippedDocument};
pub use orchestrator::{
    render_sources, Answer, ChunkRef, QaSettings, RetrievalQa, StreamingAnswer, NO_SOURCES_TEXT,
};
pub use prompt::{PromptTemplate, DEFAULT_TEMPLATE};
