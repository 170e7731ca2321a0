// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod embeddings;
pub mod index;
pub mod index_cache;

pub use embeddings::{normalize_vector, Embedding};
pub use index::{
    DocumentChunk, IndexEntry, IndexHeader, ScoredChunk, VectorIndex, INDEX_FILE_NAME,
    INDEX_FORMAT_VERSION,
};
pub use index_cache::IndexCache;
