// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Document ingestion: load → chunk → embed → persist
//!
//! Every run builds a fresh [`VectorIndex`] and replaces the file at the
//! storage path. An empty or unreadable source directory still produces an
//! (empty) index; the problem is reported as a warning.

use crate::config::RagConfig;
use crate::embeddings::Embedder;
use crate::rag::chunker::TextSplitter;
use crate::rag::errors::RagError;
use crate::rag::loader::{load_directory, LoadOutcome, SkippedDocument};
use crate::vector::{DocumentChunk, VectorIndex};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Summary of one ingestion run
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub documents_loaded: usize,
    pub chunks_indexed: usize,
    pub skipped: Vec<SkippedDocument>,
    pub warnings: Vec<String>,
    pub index_path: PathBuf,
    pub elapsed: Duration,
}

pub struct DocumentIngestor {
    embedder: Arc<dyn Embedder>,
    splitter: TextSplitter,
    batch_size: usize,
    index_dir: PathBuf,
}

impl DocumentIngestor {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        splitter: TextSplitter,
        batch_size: usize,
        index_dir: impl Into<PathBuf>,
    ) -> Result<Self, RagError> {
        if batch_size == 0 {
            return Err(RagError::Config(
                "embedding_batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            embedder,
            splitter,
            batch_size,
            index_dir: index_dir.into(),
        })
    }

    pub fn from_config(embedder: Arc<dyn Embedder>, config: &RagConfig) -> Result<Self, RagError> {
        let splitter = TextSplitter::new(config.chunk_size, config.chunk_overlap)?;
        Self::new(
            embedder,
            splitter,
            config.embedding_batch_size,
            config.index_storage_path.clone(),
        )
    }

    /// Ingest `source_dir` and persist the resulting index
    pub async fn ingest(&self, source_dir: &Path) -> Result<IngestReport, RagError> {
        let start = Instant::now();
        let mut warnings = Vec::new();

        info!(
            "Ingesting {} (chunk_size={}, overlap={}, embedder={})",
            source_dir.display(),
            self.splitter.chunk_size(),
            self.splitter.chunk_overlap(),
            self.embedder.model_id()
        );

        let outcome = match load_directory(source_dir).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Source directory unreadable, writing empty index: {}", e);
                warnings.push(e.to_string());
                LoadOutcome::default()
            }
        };

        if outcome.documents.is_empty() && warnings.is_empty() {
            let e = RagError::IngestionFailure {
                path: source_dir.display().to_string(),
                reason: "no supported documents found".to_string(),
            };
            warn!("{}, writing empty index", e);
            warnings.push(e.to_string());
        }

        let chunks: Vec<DocumentChunk> = outcome
            .documents
            .iter()
            .flat_map(|doc| {
                self.splitter
                    .split(&doc.text)
                    .into_iter()
                    .enumerate()
                    .map(move |(chunk_index, piece)| DocumentChunk {
                        id: format!("{}#{}", doc.source, chunk_index),
                        source: doc.source.clone(),
                        chunk_index,
                        start_offset: piece.start,
                        end_offset: piece.end,
                        text: piece.text,
                    })
            })
            .collect();

        info!(
            "Split {} documents into {} chunks",
            outcome.documents.len(),
            chunks.len()
        );

        let mut index = VectorIndex::new(
            self.embedder.model_id(),
            self.embedder.dimension(),
            source_dir.display().to_string(),
        );

        for (batch_no, batch) in chunks.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;

            if vectors.len() != batch.len() {
                return Err(RagError::Embedding(format!(
                    "Embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }

            for (vector, chunk) in vectors.into_iter().zip(batch.iter().cloned()) {
                index.insert(vector, chunk)?;
            }
            debug!("Embedded batch {} ({} chunks)", batch_no + 1, batch.len());
        }

        let index_path = index.save(&self.index_dir)?;

        let report = IngestReport {
            documents_loaded: outcome.documents.len(),
            chunks_indexed: index.len(),
            skipped: outcome.skipped,
            warnings,
            index_path,
            elapsed: start.elapsed(),
        };

        info!(
            "Ingestion complete: {} documents, {} chunks, {} skipped in {:.2}s",
            report.documents_loaded,
            report.chunks_indexed,
            report.skipped.len(),
            report.elapsed.as_secs_f32()
        );

        Ok(report)
    }
}
