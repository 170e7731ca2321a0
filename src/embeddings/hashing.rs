// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Deterministic feature-hashing embedder
//!
//! Maps lowercased word tokens into a fixed number of signed buckets and
//! L2-normalizes the result. Texts sharing words get high cosine similarity,
//! which is enough for keyword-style retrieval without any model files.
//! Output is stable across runs and platforms (unseeded xxh3).

use super::Embedder;
use crate::rag::errors::RagError;
use crate::vector::normalize_vector;
use async_trait::async_trait;
use xxhash_rust::xxh3::xxh3_64;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self, RagError> {
        if dimension == 0 {
            return Err(RagError::Config(
                "Embedding dimension must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            dimension,
            model_id: format!("{}-{}", super::HASHING_MODEL_ID, dimension),
        })
    }

    /// Synchronous embedding, used by the async trait methods
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let hash = xxh3_64(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            // Top bit decides the sign so colliding tokens tend to cancel
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign;
        }

        normalize_vector(&embedding)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        Ok(self.embed_sync(text))
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}
