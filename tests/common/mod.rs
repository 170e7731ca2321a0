// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Shared fixtures for integration tests
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use fabstir_doc_qa::api::websocket::{ChatSessionManager, OutgoingMessage, ReplySink, SessionServices};
use fabstir_doc_qa::config::RagConfig;
use fabstir_doc_qa::embeddings::{Embedder, HashingEmbedder};
use fabstir_doc_qa::inference::{AnswerGenerator, SharedGeneratorFactory};
use fabstir_doc_qa::rag::{DocumentIngestor, PromptTemplate, QaSettings, RetrievalQa, TextSplitter};
use fabstir_doc_qa::vector::{IndexCache, VectorIndex};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const PARIS_DOC: &str = "Paris is the capital of France. The Eiffel Tower stands in Paris.";
pub const TOKYO_DOC: &str =
    "Tokyo is the capital of Japan. Mount Fuji can be seen from Tokyo on clear days.";

pub const EMBEDDING_DIMENSIONS: usize = 1024;

pub fn embedder() -> Arc<dyn Embedder> {
    Arc::new(HashingEmbedder::new(EMBEDDING_DIMENSIONS).unwrap())
}

/// Write `(file name, contents)` pairs into a fresh directory
pub fn write_docs(docs: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, text) in docs {
        std::fs::write(dir.path().join(name), text).unwrap();
    }
    dir
}

/// Ingest `source` into `store` with small chunks
pub async fn ingest(source: &Path, store: &Path) -> Result<fabstir_doc_qa::rag::IngestReport> {
    let ingestor = DocumentIngestor::new(embedder(), TextSplitter::new(200, 20)?, 8, store)?;
    Ok(ingestor.ingest(source).await?)
}

pub fn settings(top_k: usize) -> QaSettings {
    QaSettings {
        top_k,
        max_new_tokens: 64,
        temperature: 0.5,
        generation_timeout: Duration::from_secs(5),
        max_query_chars: 4096,
    }
}

/// Orchestrator over a freshly ingested index of `docs`
pub async fn qa_over(
    docs: &[(&str, &str)],
    generator: Arc<dyn AnswerGenerator>,
    settings: QaSettings,
) -> (TempDir, RetrievalQa) {
    let source = write_docs(docs);
    let store = tempfile::tempdir().unwrap();
    ingest(source.path(), store.path()).await.unwrap();

    let index = Arc::new(VectorIndex::load(store.path()).unwrap());
    let qa = RetrievalQa::new(
        index,
        embedder(),
        generator,
        PromptTemplate::default(),
        settings,
    )
    .unwrap();

    (store, qa)
}

/// Session manager reading its index from `index_dir`
pub fn manager(
    index_dir: &Path,
    generator: Arc<dyn AnswerGenerator>,
    stream_answers: bool,
) -> ChatSessionManager {
    manager_with_settings(index_dir, generator, stream_answers, settings(2))
}

pub fn manager_with_settings(
    index_dir: &Path,
    generator: Arc<dyn AnswerGenerator>,
    stream_answers: bool,
    qa_settings: QaSettings,
) -> ChatSessionManager {
    let mut config = RagConfig::default();
    config.stream_answers = stream_answers;
    config.generation_timeout_secs = 5;

    let mut services = SessionServices::new(
        &config,
        Arc::new(IndexCache::new(index_dir)),
        embedder(),
        Arc::new(SharedGeneratorFactory::from_generator(generator)),
        PromptTemplate::default(),
    );
    services.settings = qa_settings;
    ChatSessionManager::new(services)
}

/// Records every reply; can simulate a disconnected client
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<OutgoingMessage>>,
    closed: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn closed() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            closed: true,
        }
    }

    pub fn messages(&self) -> Vec<OutgoingMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Final replies (answer or error)
    pub fn finals(&self) -> Vec<OutgoingMessage> {
        self.messages().into_iter().filter(|m| m.is_final()).collect()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        if self.closed {
            return Err(anyhow!("connection closed"));
        }
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}
