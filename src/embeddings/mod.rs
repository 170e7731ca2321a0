// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Embedding models
//!
//! The same [`Embedder`] must be used to build an index and to query it.
//! Two implementations are provided:
//! - [`OnnxEmbeddingModel`]: sentence-transformer (all-MiniLM-L6-v2) via ONNX Runtime
//! - [`HashingEmbedder`]: deterministic bag-of-words feature hashing, no model files

pub mod hashing;
pub mod onnx_model;

pub use hashing::HashingEmbedder;
pub use onnx_model::OnnxEmbeddingModel;

use crate::config::RagConfig;
use crate::rag::errors::RagError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Model id that selects [`HashingEmbedder`] instead of an ONNX model
pub const HASHING_MODEL_ID: &str = "hashing";

/// Text embedding function
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier recorded in the index header
    fn model_id(&self) -> &str;

    /// Output vector length
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}

/// Build the embedder selected by `config.embedding_model_id`
pub async fn load_embedder(config: &RagConfig) -> Result<Arc<dyn Embedder>, RagError> {
    if config.embedding_model_id == HASHING_MODEL_ID {
        info!(
            "Using hashing embedder ({} dimensions)",
            config.hashing_dimensions
        );
        let embedder = HashingEmbedder::new(config.hashing_dimensions)?;
        return Ok(Arc::new(embedder));
    }

    let model = OnnxEmbeddingModel::new(
        config.embedding_model_id.clone(),
        &config.embedding_model_path,
        &config.embedding_tokenizer_path,
    )
    .await
    .map_err(|e| RagError::Embedding(format!("Failed to load embedding model: {:#}", e)))?;

    Ok(Arc::new(model))
}
