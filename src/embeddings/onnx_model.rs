// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! ONNX Embedding Model Wrapper
//!
//! Runs a sentence-transformer model (all-MiniLM-L6-v2 by default) with
//! ONNX Runtime.
//!
//! Features:
//! - ONNX model loading from disk
//! - GPU acceleration via CUDA when built with the `cuda` feature (CPU fallback)
//! - BERT tokenization with truncation
//! - Single and batch embedding generation
//! - Attention-masked mean pooling, L2-normalized output
//! - Output dimension detected from the model at load time

use super::Embedder;
use crate::rag::errors::RagError;
use crate::vector::normalize_vector;
use anyhow::{Context, Result};
use async_trait::async_trait;
use ndarray::{Array2, Axis};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info, warn};

/// Maximum sequence length for all-MiniLM-L6-v2
const MAX_SEQUENCE_LENGTH: usize = 256;

/// ONNX-based sentence embedding model
///
/// All fields are wrapped in Arc for cheap cloning; inference runs on the
/// blocking thread pool.
#[derive(Clone)]
pub struct OnnxEmbeddingModel {
    /// ONNX Runtime session (Mutex: `run` needs exclusive access)
    session: Arc<Mutex<Session>>,

    tokenizer: Arc<Tokenizer>,

    model_name: String,

    dimension: usize,
}

impl std::fmt::Debug for OnnxEmbeddingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingModel")
            .field("model_name", &self.model_name)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl OnnxEmbeddingModel {
    /// Creates a new ONNX embedding model from disk paths
    ///
    /// # Errors
    /// Returns error if:
    /// - Model or tokenizer file not found or invalid
    /// - ONNX Runtime initialization fails
    /// - Model output is not `[batch, seq_len, hidden]`
    ///
    /// # Example
    /// ```ignore
    /// let model = OnnxEmbeddingModel::new(
    ///     "all-MiniLM-L6-v2",
    ///     "./models/all-MiniLM-L6-v2-onnx/model.onnx",
    ///     "./models/all-MiniLM-L6-v2-onnx/tokenizer.json"
    /// ).await?;
    /// ```
    pub async fn new<P: AsRef<Path>>(
        model_name: impl Into<String>,
        model_path: P,
        tokenizer_path: P,
    ) -> Result<Self> {
        let model_name = model_name.into();
        let model_path = model_path.as_ref().to_path_buf();
        let tokenizer_path = tokenizer_path.as_ref().to_path_buf();

        if !model_path.exists() {
            anyhow::bail!("ONNX model file not found: {}", model_path.display());
        }
        if !tokenizer_path.exists() {
            anyhow::bail!("Tokenizer file not found: {}", tokenizer_path.display());
        }

        info!("Loading ONNX embedding model {}", model_name);

        let (session, tokenizer, dimension) = tokio::task::spawn_blocking(move || {
            let mut session = build_session(&model_path)?;

            let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
            tokenizer
                .with_truncation(Some(TruncationParams {
                    max_length: MAX_SEQUENCE_LENGTH,
                    ..Default::default()
                }))
                .map_err(|e| anyhow::anyhow!("Failed to configure truncation: {}", e))?;

            // Probe the output shape once to learn the hidden dimension
            let dimension = {
                let encoding = tokenizer
                    .encode("validation test", true)
                    .map_err(|e| anyhow::anyhow!("Tokenizer validation failed: {}", e))?;
                let pooled = run_pooled(&mut session, &[encoding])?;
                pooled
                    .first()
                    .map(|v| v.len())
                    .context("Validation inference returned no embeddings")?
            };

            Ok::<_, anyhow::Error>((session, tokenizer, dimension))
        })
        .await
        .context("Embedding model loader task panicked")??;

        info!(
            "ONNX embedding model {} loaded ({} dimensions)",
            model_name, dimension
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            model_name,
            dimension,
        })
    }

    /// Embeds a batch of texts on the blocking pool
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let model = self.clone();
        tokio::task::spawn_blocking(move || {
            let encodings = texts
                .iter()
                .map(|text| {
                    model
                        .tokenizer
                        .encode(text.as_str(), true)
                        .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))
                })
                .collect::<Result<Vec<_>>>()?;

            let mut session = model
                .session
                .lock()
                .map_err(|_| anyhow::anyhow!("ONNX session lock poisoned"))?;
            let embeddings = run_pooled(&mut session, &encodings)?;

            for (i, emb) in embeddings.iter().enumerate() {
                if emb.len() != model.dimension {
                    anyhow::bail!(
                        "Unexpected embedding dimension at index {}: {} (expected {})",
                        i,
                        emb.len(),
                        model.dimension
                    );
                }
            }

            Ok(embeddings)
        })
        .await
        .context("Embedding task panicked")?
    }
}

#[async_trait]
impl Embedder for OnnxEmbeddingModel {
    fn model_id(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let mut embeddings = self
            .embed_texts(vec![text.to_string()])
            .await
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))?;

        embeddings
            .pop()
            .ok_or_else(|| RagError::Embedding("Model returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        debug!("Embedding batch of {} texts", texts.len());
        self.embed_texts(texts.to_vec())
            .await
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))
    }
}

#[cfg(feature = "cuda")]
fn build_session(model_path: &Path) -> Result<Session> {
    use ort::execution_providers::CUDAExecutionProvider;

    let cuda_result = Session::builder()
        .context("Failed to create session builder")?
        .with_execution_providers([CUDAExecutionProvider::default().build()])
        .context("Failed to set CUDA execution provider")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(4)
        .context("Failed to set intra threads")?
        .commit_from_file(model_path);

    match cuda_result {
        Ok(session) => {
            info!("CUDA execution provider initialized");
            Ok(session)
        }
        Err(e) => {
            warn!("CUDA execution provider failed: {} - falling back to CPU", e);
            build_cpu_session(model_path)
        }
    }
}

#[cfg(not(feature = "cuda"))]
fn build_session(model_path: &Path) -> Result<Session> {
    build_cpu_session(model_path)
}

fn build_cpu_session(model_path: &Path) -> Result<Session> {
    use ort::execution_providers::CPUExecutionProvider;

    Session::builder()
        .context("Failed to create session builder")?
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .context("Failed to set CPU execution provider")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(4)
        .context("Failed to set intra threads")?
        .commit_from_file(model_path)
        .context(format!(
            "Failed to load ONNX model from {}",
            model_path.display()
        ))
}

/// Runs padded batch inference and mean-pools token embeddings
fn run_pooled(
    session: &mut Session,
    encodings: &[tokenizers::Encoding],
) -> Result<Vec<Vec<f32>>> {
    let batch = encodings.len();
    let max_len = encodings
        .iter()
        .map(|enc| enc.get_ids().len())
        .max()
        .unwrap_or(0);

    if batch == 0 || max_len == 0 {
        return Ok(vec![]);
    }

    let mut input_ids = Vec::with_capacity(batch * max_len);
    let mut attention_mask = Vec::with_capacity(batch * max_len);

    for encoding in encodings {
        let ids = encoding.get_ids();
        let mask = encoding.get_attention_mask();
        let padding = max_len - ids.len();

        input_ids.extend(ids.iter().map(|&id| id as i64));
        input_ids.extend(std::iter::repeat(0i64).take(padding));
        attention_mask.extend(mask.iter().map(|&m| m as i64));
        attention_mask.extend(std::iter::repeat(0i64).take(padding));
    }

    let mask_for_pooling = attention_mask.clone();

    let input_ids_array = Array2::from_shape_vec((batch, max_len), input_ids)
        .context("Failed to create input_ids array")?;
    let attention_mask_array = Array2::from_shape_vec((batch, max_len), attention_mask)
        .context("Failed to create attention_mask array")?;
    let token_type_ids_array = Array2::<i64>::zeros((batch, max_len));

    let outputs = session.run(ort::inputs![
        "input_ids" => Value::from_array(input_ids_array)?,
        "attention_mask" => Value::from_array(attention_mask_array)?,
        "token_type_ids" => Value::from_array(token_type_ids_array)?
    ])?;

    // Index [0]: output names differ between exports
    let output_array = outputs[0]
        .try_extract_array::<f32>()
        .context("Failed to extract output tensor")?;

    let shape = output_array.shape();
    if shape.len() != 3 {
        anyhow::bail!(
            "Model outputs unexpected dimensions: {:?} (expected [batch, seq_len, hidden])",
            shape
        );
    }

    let mut embeddings = Vec::with_capacity(batch);
    for batch_idx in 0..batch {
        let item = output_array.index_axis(Axis(0), batch_idx);
        let seq_len = item.shape()[0];
        let hidden_dim = item.shape()[1];
        let item_mask = &mask_for_pooling[batch_idx * max_len..(batch_idx + 1) * max_len];

        let mut pooled = vec![0.0f32; hidden_dim];
        let mut sum_mask = 0.0f32;

        for i in 0..seq_len {
            let mask_value = item_mask[i] as f32;
            sum_mask += mask_value;
            for j in 0..hidden_dim {
                pooled[j] += item[[i, j]] * mask_value;
            }
        }

        for val in &mut pooled {
            *val /= sum_mask.max(1e-9);
        }

        embeddings.push(normalize_vector(&pooled));
    }

    Ok(embeddings)
}
