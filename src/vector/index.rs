// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Persisted vector index for document chunks
//!
//! Flat, exact cosine-similarity index over `(embedding, chunk)` pairs.
//!
//! ## Properties
//!
//! - **Deterministic**: the same query against the same index always yields
//!   the same ordered results
//! - **Stable ties**: equal scores keep index insertion order
//! - **Immutable after load**: shared across chat sessions behind an `Arc`
//! - **Whole-file persistence**: bincode file written atomically; a new
//!   ingestion run replaces the file, there is no incremental update
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut index = VectorIndex::new("all-MiniLM-L6-v2", 384, "data/");
//! index.insert(vector, chunk)?;
//! index.save("vectorstore/db_index")?;
//!
//! let index = VectorIndex::load("vectorstore/db_index")?;
//! let hits = index.search(&query_vector, 2)?;
//! ```

use crate::rag::errors::RagError;
use crate::vector::embeddings::Embedding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the index inside the storage directory
pub const INDEX_FILE_NAME: &str = "index.bin";

/// Bumped whenever the on-disk layout changes
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Contiguous span of source text with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Unique chunk id
    pub id: String,

    /// Source file name (e.g. "manual.pdf")
    pub source: String,

    /// Position of this chunk within its source document
    pub chunk_index: usize,

    /// Character offset where the chunk starts in the normalized document text
    pub start_offset: usize,

    /// Character offset where the chunk ends (exclusive)
    pub end_offset: usize,

    /// Chunk text
    pub text: String,
}

/// Index metadata written ahead of the entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHeader {
    pub format_version: u32,

    /// Id of the embedding model that produced every vector in the index
    pub embedding_model: String,

    pub dimensions: usize,

    pub created_at: DateTime<Utc>,

    /// Directory the documents were ingested from
    pub source_dir: String,
}

/// One stored vector and the chunk it represents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub chunk: DocumentChunk,
}

/// Search hit
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,

    /// Cosine similarity to the query
    pub score: f32,
}

/// Vector index of document chunks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    header: IndexHeader,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Create an empty index for vectors of `dimensions` produced by `embedding_model`
    pub fn new(
        embedding_model: impl Into<String>,
        dimensions: usize,
        source_dir: impl Into<String>,
    ) -> Self {
        Self {
            header: IndexHeader {
                format_version: INDEX_FORMAT_VERSION,
                embedding_model: embedding_model.into(),
                dimensions,
                created_at: Utc::now(),
                source_dir: source_dir.into(),
            },
            entries: Vec::new(),
        }
    }

    /// Append a chunk and its embedding
    ///
    /// # Errors
    ///
    /// Returns `RagError::Embedding` if the vector has the wrong dimensions
    /// or contains NaN/Infinity.
    pub fn insert(&mut self, vector: Vec<f32>, chunk: DocumentChunk) -> Result<(), RagError> {
        if vector.len() != self.header.dimensions {
            return Err(RagError::Embedding(format!(
                "Vector for chunk {} has wrong dimensions: expected {}, got {}",
                chunk.id,
                self.header.dimensions,
                vector.len()
            )));
        }

        if !Embedding::new(&vector).is_finite() {
            return Err(RagError::Embedding(format!(
                "Vector for chunk {} contains NaN or Infinity values",
                chunk.id
            )));
        }

        self.entries.push(IndexEntry { vector, chunk });
        Ok(())
    }

    /// Top-k chunks by cosine similarity, highest first
    ///
    /// Ties keep insertion order. An empty index returns no results.
    ///
    /// # Errors
    ///
    /// Returns `RagError::Embedding` if the query has the wrong dimensions or
    /// is not finite.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, RagError> {
        if query.len() != self.header.dimensions {
            return Err(RagError::Embedding(format!(
                "Query has wrong dimensions: expected {}, got {}",
                self.header.dimensions,
                query.len()
            )));
        }

        let query_embedding = Embedding::new(query);
        if !query_embedding.is_finite() {
            return Err(RagError::Embedding(
                "Query contains NaN or Infinity values".to_string(),
            ));
        }

        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                (
                    i,
                    query_embedding.cosine_similarity(&Embedding::new(&entry.vector)),
                )
            })
            .collect();

        // sort_by is stable: equal scores stay in insertion order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        debug!(
            "Index search: {} candidates, returning {}",
            self.entries.len(),
            scored.len()
        );

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect())
    }

    /// Persist the index to `<dir>/index.bin`, replacing any previous file
    ///
    /// The file is written to a temporary file in the same directory and then
    /// renamed, so readers never observe a partially written index.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf, RagError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let path = dir.join(INDEX_FILE_NAME);
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            bincode::serialize_into(&mut writer, self).map_err(|e| {
                RagError::IndexUnavailable(format!("Failed to serialize index: {}", e))
            })?;
            writer.flush()?;
        }
        tmp.persist(&path).map_err(|e| RagError::Io(e.error))?;

        info!(
            "Saved vector index: {} entries, {}D, model={} -> {}",
            self.entries.len(),
            self.header.dimensions,
            self.header.embedding_model,
            path.display()
        );

        Ok(path)
    }

    /// Load an index previously written by [`VectorIndex::save`]
    ///
    /// # Errors
    ///
    /// Returns `RagError::IndexUnavailable` if the file is missing, corrupt,
    /// or has an unsupported format version.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, RagError> {
        let path = dir.as_ref().join(INDEX_FILE_NAME);

        let file = std::fs::File::open(&path).map_err(|e| {
            RagError::IndexUnavailable(format!("Cannot open {}: {}", path.display(), e))
        })?;

        let index: VectorIndex = bincode::deserialize_from(BufReader::new(file)).map_err(|e| {
            RagError::IndexUnavailable(format!("Corrupt index at {}: {}", path.display(), e))
        })?;

        if index.header.format_version != INDEX_FORMAT_VERSION {
            return Err(RagError::IndexUnavailable(format!(
                "Unsupported index format version {} (expected {}) - re-run ingestion",
                index.header.format_version, INDEX_FORMAT_VERSION
            )));
        }

        info!(
            "Loaded vector index: {} entries, {}D, model={}",
            index.entries.len(),
            index.header.dimensions,
            index.header.embedding_model
        );

        Ok(index)
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.header.dimensions
    }

    pub fn embedding_model(&self) -> &str {
        &self.header.embedding_model
    }
}
