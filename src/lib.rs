// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod api;
pub mod cli;
pub mod config;
pub mod embeddings;
pub mod inference;
pub mod rag;
pub mod vector;
pub mod version;

// Re-export main types
pub use config::{GeneratorMode, RagConfig};
pub use embeddings::{Embedder, HashingEmbedder, OnnxEmbeddingModel};
pub use inference::{AnswerGenerator, GenerationRequest, LlamaGenerator, StaticGenerator};
pub use rag::{
    Answer, ChunkRef, DocumentIngestor, IngestReport, PromptTemplate, QaSettings, RagError,
    RetrievalQa,
};
pub use vector::{DocumentChunk, IndexCache, VectorIndex};
